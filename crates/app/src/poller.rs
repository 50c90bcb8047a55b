//! Register polling state machine.
//!
//! ```text
//! Idle ─start─▶ Awaiting(first) ─response/timeout─▶ Awaiting(next) ─ … ─▶ CycleComplete
//!                                                                          │
//!                                     (repeat) Awaiting(first) ◀───────────┤
//!                                     (once)   Idle ◀──────────────────────┘
//! ```
//!
//! Every register ends in exactly one resolution (decoded, malformed or
//! timed out) before the machine moves on, so a cycle always terminates.
//! The machine performs no IO: it reports which register to request next and
//! hands back completed value sets.

use std::time::Duration;

use motobridge_domain::error::DecodeError;
use motobridge_domain::frame::{RegisterClass, ResponseFrame};
use motobridge_domain::register::{RegisterId, RegisterSpec, RegisterTable, Successor};
use motobridge_domain::time;
use motobridge_domain::value::{CycleValues, SensorValue};

/// What happens when a cycle completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// Start over from the first register (telemetry streaming).
    Repeat,
    /// Return to idle (identification).
    Once,
}

/// Current state of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    AwaitingResponse(RegisterId),
}

/// How the awaited register was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Decoded(SensorValue),
    Malformed(RegisterId, DecodeError),
    TimedOut(RegisterId),
}

impl Resolution {
    #[must_use]
    pub fn id(&self) -> RegisterId {
        match self {
            Self::Decoded(value) => value.id,
            Self::Malformed(id, _) | Self::TimedOut(id) => *id,
        }
    }
}

/// Result of resolving the awaited register.
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    pub resolution: Resolution,
    /// Values of the cycle that just completed, if it did.
    pub completed: Option<CycleValues>,
    /// Register to request next; `None` when the poller went idle.
    pub next: Option<RegisterId>,
}

/// The in-progress cycle.
#[derive(Debug)]
struct PollCycle {
    current: RegisterId,
    values: CycleValues,
}

/// Walks one register table, one register at a time.
#[derive(Debug)]
pub struct RegisterPoller {
    table: &'static RegisterTable,
    timeout: Duration,
    mode: CycleMode,
    cycle: Option<PollCycle>,
}

impl RegisterPoller {
    #[must_use]
    pub fn new(table: &'static RegisterTable, timeout: Duration, mode: CycleMode) -> Self {
        Self {
            table,
            timeout,
            mode,
            cycle: None,
        }
    }

    #[must_use]
    pub fn class(&self) -> RegisterClass {
        self.table.class()
    }

    /// Per-register response deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn state(&self) -> PollState {
        self.cycle
            .as_ref()
            .map_or(PollState::Idle, |cycle| PollState::AwaitingResponse(cycle.current))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.cycle.is_some()
    }

    /// Begin a cycle. Returns the first register to request, or `None` if a
    /// cycle is already running.
    pub fn start(&mut self) -> Option<RegisterId> {
        if self.cycle.is_some() {
            return None;
        }
        Some(self.begin_cycle())
    }

    /// Stop polling. Returns the register that was awaited, so its timeout
    /// and command can be cancelled.
    pub fn stop(&mut self) -> Option<RegisterId> {
        self.cycle.take().map(|cycle| cycle.current)
    }

    /// Feed a response. Returns `None` when the frame does not answer the
    /// awaited register (stale or unsolicited), which leaves the state
    /// untouched.
    pub fn on_response(&mut self, frame: &ResponseFrame) -> Option<Advance> {
        let spec = self.awaiting_spec()?;
        if frame.class != self.class() || frame.id != spec.id {
            return None;
        }

        let resolution = match frame.ensure_ok() {
            Ok(()) => Resolution::Decoded(SensorValue::decode(spec, frame, time::now())),
            Err(err) => Resolution::Malformed(spec.id, err),
        };
        Some(self.advance(resolution))
    }

    /// Feed a timeout for `id`. Returns `None` if `id` is no longer awaited.
    pub fn on_timeout(&mut self, id: RegisterId) -> Option<Advance> {
        if self.awaiting()? != id {
            return None;
        }
        Some(self.advance(Resolution::TimedOut(id)))
    }

    fn awaiting(&self) -> Option<RegisterId> {
        self.cycle.as_ref().map(|cycle| cycle.current)
    }

    /// Cycles only ever visit registers of the table, so this is `Some`
    /// exactly while a cycle runs.
    fn awaiting_spec(&self) -> Option<&'static RegisterSpec> {
        self.table.get(self.awaiting()?)
    }

    fn begin_cycle(&mut self) -> RegisterId {
        let first = self.table.first();
        self.cycle = Some(PollCycle {
            current: first,
            values: CycleValues::new(self.class()),
        });
        first
    }

    fn advance(&mut self, resolution: Resolution) -> Advance {
        let Some(cycle) = self.cycle.as_mut() else {
            return Advance {
                resolution,
                completed: None,
                next: None,
            };
        };

        if let Resolution::Decoded(value) = &resolution {
            cycle.values.insert(value.clone());
        }

        match self.table.successor(cycle.current) {
            Successor::Next(next) => {
                cycle.current = next;
                Advance {
                    resolution,
                    completed: None,
                    next: Some(next),
                }
            }
            Successor::Complete => {
                let completed = self.cycle.take().map(|cycle| cycle.values);
                let next = match self.mode {
                    CycleMode::Repeat => Some(self.begin_cycle()),
                    CycleMode::Once => None,
                };
                Advance {
                    resolution,
                    completed,
                    next,
                }
            }
        }
    }
}
