//! Command channel — serializes writes to the peripheral.
//!
//! Exactly one [`Command`] is in flight at a time. Further commands wait in
//! a bounded FIFO queue and are only written once the in-flight command has
//! been resolved, failed or abandoned, so commands are never interleaved.
//!
//! The channel performs no IO. It tells its caller which bytes to write and
//! is told the outcome of each write.

use std::collections::VecDeque;
use std::time::Instant;

use motobridge_domain::frame::RegisterClass;
use motobridge_domain::register::RegisterId;

/// Commands that may wait behind the in-flight one.
pub const QUEUE_CAPACITY: usize = 16;

/// Identifies the caller waiting on a command's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// What completes a command once its bytes are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Transport delivery is the whole protocol exchange.
    Delivery,
    /// A binary response for this register.
    Register { class: RegisterClass, id: RegisterId },
    /// A resolving `WIFI` token.
    WifiStatus,
}

/// An outbound frame and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Unique per channel; ties write outcomes to the command they belong to.
    pub seq: u64,
    pub bytes: Vec<u8>,
    pub expect: Expectation,
    /// When the command was accepted by the channel.
    pub issued_at: Instant,
    /// Failed writes so far.
    pub retries: u8,
    pub ticket: Option<Ticket>,
}

/// Outcome of [`CommandChannel::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// The channel was idle: write these bytes now.
    Write(Vec<u8>),
    /// Another command is in flight; this one waits its turn.
    Queued,
}

/// What to do after a write completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStep {
    /// Delivered; the command is now waiting for its response.
    AwaitingResponse,
    /// Delivered, and delivery was all the command needed.
    Completed(Command),
    /// The write failed; write these bytes again.
    Retry(Vec<u8>),
    /// The write failed on the last allowed attempt; the command is dropped.
    Failed(Command),
    /// The write belonged to a command that is no longer in flight.
    Stale,
}

/// The queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("command queue full")]
pub struct QueueFull;

/// Single-in-flight command serializer with bounded write retries.
#[derive(Debug)]
pub struct CommandChannel {
    in_flight: Option<Command>,
    queue: VecDeque<Command>,
    max_attempts: u8,
    next_seq: u64,
}

impl CommandChannel {
    /// Create a channel allowing `max_attempts` writes per command, the
    /// first one included.
    #[must_use]
    pub fn new(max_attempts: u8) -> Self {
        Self {
            in_flight: None,
            queue: VecDeque::new(),
            max_attempts: max_attempts.max(1),
            next_seq: 0,
        }
    }

    /// Submit a command.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when a command is in flight and the queue has
    /// no room left.
    pub fn send(
        &mut self,
        bytes: Vec<u8>,
        expect: Expectation,
        ticket: Option<Ticket>,
    ) -> Result<Submitted, QueueFull> {
        if self.in_flight.is_some() && self.queue.len() >= QUEUE_CAPACITY {
            return Err(QueueFull);
        }
        let command = Command {
            seq: self.next_seq,
            bytes,
            expect,
            issued_at: Instant::now(),
            retries: 0,
            ticket,
        };
        self.next_seq += 1;
        self.queue.push_back(command);
        Ok(self.next().map_or(Submitted::Queued, Submitted::Write))
    }

    /// Record the outcome of the last write of the in-flight command.
    pub fn on_write(&mut self, seq: u64, delivered: bool) -> WriteStep {
        let Some(command) = self.in_flight.as_mut().filter(|command| command.seq == seq) else {
            return WriteStep::Stale;
        };

        if delivered {
            if command.expect == Expectation::Delivery {
                return self
                    .in_flight
                    .take()
                    .map_or(WriteStep::Stale, WriteStep::Completed);
            }
            return WriteStep::AwaitingResponse;
        }

        command.retries += 1;
        if command.retries < self.max_attempts {
            return WriteStep::Retry(command.bytes.clone());
        }
        self.in_flight
            .take()
            .map_or(WriteStep::Stale, WriteStep::Failed)
    }

    /// Complete the in-flight command if it is waiting for `expect`.
    pub fn resolve(&mut self, expect: Expectation) -> Option<Command> {
        if self.in_flight.as_ref()?.expect == expect {
            self.in_flight.take()
        } else {
            None
        }
    }

    /// Drop every command waiting for `expect`, in flight or queued.
    ///
    /// Returns the dropped commands, the in-flight one first.
    pub fn abandon(&mut self, expect: Expectation) -> Vec<Command> {
        let mut dropped = Vec::new();
        if let Some(command) = self.resolve(expect) {
            dropped.push(command);
        }
        let (matching, kept): (VecDeque<_>, VecDeque<_>) = self
            .queue
            .drain(..)
            .partition(|command| command.expect == expect);
        self.queue = kept;
        dropped.extend(matching);
        dropped
    }

    /// Promote the next queued command if nothing is in flight.
    ///
    /// Returns the bytes to write.
    pub fn next(&mut self) -> Option<Vec<u8>> {
        if self.in_flight.is_some() {
            return None;
        }
        let command = self.queue.pop_front()?;
        let bytes = command.bytes.clone();
        self.in_flight = Some(command);
        Some(bytes)
    }

    /// Drop everything, in flight and queued.
    pub fn clear(&mut self) -> Vec<Command> {
        self.in_flight.take().into_iter().chain(self.queue.drain(..)).collect()
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<&Command> {
        self.in_flight.as_ref()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }
}
