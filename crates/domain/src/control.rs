//! Text control commands written to the UART characteristic.

/// A text command understood by the bridge firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `PWD=<password>` — authenticate the session.
    Password(String),
    /// `WiFi=<ssid>,<password>` — join a network.
    WifiOn { ssid: String, password: String },
    /// `WiFi=OFF`.
    WifiOff,
    /// `END` — graceful session end.
    End,
}

impl ControlCommand {
    /// Encode the command as the bytes written to the peripheral.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Password(password) => format!("PWD={password}").into_bytes(),
            Self::WifiOn { ssid, password } => format!("WiFi={ssid},{password}").into_bytes(),
            Self::WifiOff => b"WiFi=OFF".to_vec(),
            Self::End => b"END".to_vec(),
        }
    }
}
