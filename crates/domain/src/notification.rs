//! Notification decoder — classifies inbound transport messages.
//!
//! The notify characteristic carries two kinds of messages:
//!
//! - binary register responses, recognised by their leading marker byte
//!   (see [`crate::frame`]);
//! - ASCII lines of the form `NAME=VALUE`, plus the bare
//!   `SESSION EXPIRED` marker.

use crate::error::DecodeError;
use crate::frame::{self, ResponseFrame};

/// Literal line sent by the peripheral when the session is no longer valid.
pub const SESSION_EXPIRED: &str = "SESSION EXPIRED";

/// Placeholder value of the `WIFI` token while Wi-Fi is not configured.
pub const WIFI_PLACEHOLDER: &str = "-";

/// Device-state tokens carried as `NAME=VALUE` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// `SN` — serial number.
    SerialNumber,
    /// `BAT` — bridge battery level.
    Battery,
    /// `ID` — device id used in telemetry topics.
    Id,
    /// `PWD` — password echo.
    Password,
    /// `WIFI` — Wi-Fi status.
    Wifi,
    /// `CNT` — counter; its first arrival authorizes the session.
    Counter,
}

impl Token {
    /// Resolve a token name, case-insensitively.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        const NAMES: [(&str, Token); 6] = [
            ("SN", Token::SerialNumber),
            ("BAT", Token::Battery),
            ("ID", Token::Id),
            ("PWD", Token::Password),
            ("WIFI", Token::Wifi),
            ("CNT", Token::Counter),
        ];
        NAMES
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, token)| *token)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SerialNumber => "SN",
            Self::Battery => "BAT",
            Self::Id => "ID",
            Self::Password => "PWD",
            Self::Wifi => "WIFI",
            Self::Counter => "CNT",
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// State reported by the `WIFI` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiStatus {
    /// Wi-Fi is switched off.
    Off,
    /// Wi-Fi is configured for the given network.
    Configured(String),
    /// Placeholder: Wi-Fi has not been configured yet.
    Unconfigured,
}

impl WifiStatus {
    fn parse(value: &str) -> Self {
        if value.is_empty() || value == WIFI_PLACEHOLDER {
            Self::Unconfigured
        } else if value.eq_ignore_ascii_case("OFF") {
            Self::Off
        } else {
            Self::Configured(value.to_owned())
        }
    }

    /// Whether this status answers a pending Wi-Fi command.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unconfigured)
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Device metadata forwarded verbatim to listeners.
    Attribute { token: Token, value: String },
    /// The counter token.
    Counter(String),
    /// The Wi-Fi status token.
    Wifi(WifiStatus),
    /// The peripheral ended the session.
    SessionExpired,
    /// A binary register response.
    Frame(ResponseFrame),
    /// A text line that matches no known token.
    Unrecognized(String),
}

/// Classify one inbound message.
///
/// # Errors
///
/// Returns a [`DecodeError`] when a binary frame header is malformed or a
/// text message is not valid UTF-8.
pub fn decode(bytes: &[u8]) -> Result<Notification, DecodeError> {
    if frame::is_binary(bytes) {
        return ResponseFrame::parse(bytes).map(Notification::Frame);
    }

    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotText)?;
    let line = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    if line.eq_ignore_ascii_case(SESSION_EXPIRED) {
        return Ok(Notification::SessionExpired);
    }

    let Some((name, value)) = line.split_once('=') else {
        return Ok(Notification::Unrecognized(line.to_owned()));
    };
    let value = value.trim();

    Ok(match Token::from_name(name.trim()) {
        Some(Token::Counter) => Notification::Counter(value.to_owned()),
        Some(Token::Wifi) => Notification::Wifi(WifiStatus::parse(value)),
        Some(token) => Notification::Attribute {
            token,
            value: value.to_owned(),
        },
        None => Notification::Unrecognized(line.to_owned()),
    })
}
