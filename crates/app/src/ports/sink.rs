//! Sink ports — where decoded telemetry goes.

use std::future::Future;

use motobridge_domain::time::Timestamp;
use motobridge_domain::value::DecodedValue;

/// A JSON body destined for one broker topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// One decoded telemetry sample for the recording sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: Timestamp,
    /// Register label (e.g. `"Engine speed"`).
    pub label: &'static str,
    pub value: DecodedValue,
}

/// A sink refused or failed to accept data.
#[derive(Debug, thiserror::Error)]
#[error("sink unavailable")]
pub struct SinkError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

/// Publishes telemetry bodies to the message broker.
pub trait TelemetryPublisher: Send + Sync {
    /// Publish one body.
    fn publish(
        &self,
        publication: Publication,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<T: TelemetryPublisher> TelemetryPublisher for std::sync::Arc<T> {
    fn publish(
        &self,
        publication: Publication,
    ) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).publish(publication)
    }
}

/// Appends decoded samples to a recording.
pub trait SampleRecorder: Send + Sync {
    /// Record one sample.
    fn record(&self, sample: Sample) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<T: SampleRecorder> SampleRecorder for std::sync::Arc<T> {
    fn record(&self, sample: Sample) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).record(sample)
    }
}
