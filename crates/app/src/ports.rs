//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the protocol core and the outside world.
//! They are defined here (in `app`) so that both the engine and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod sink;
pub mod transport;

pub use sink::{Publication, Sample, SampleRecorder, SinkError, TelemetryPublisher};
pub use transport::{
    Central, DeviceInfo, Endpoints, Link, LinkEvent, ServiceDescriptor, TransportCapabilities,
    TransportError,
};
