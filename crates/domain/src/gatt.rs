//! GATT identifiers of the bridge's UART-style service.

/// Nordic UART service.
pub const UART_SERVICE: uuid::Uuid =
    uuid::Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Characteristic the central writes commands to (UART RX).
pub const WRITE_CHAR: uuid::Uuid = uuid::Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Characteristic the peripheral notifies responses on (UART TX).
pub const NOTIFY_CHAR: uuid::Uuid =
    uuid::Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);
