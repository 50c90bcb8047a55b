//! CSV recording of decoded samples.
//!
//! Rows are `timestamp,registerLabel,value` with RFC 3339 timestamps. The
//! header is written once, when the file is created empty. A disabled
//! recorder drops every sample.

use std::path::Path;

use motobridge_app::ports::{Sample, SampleRecorder, SinkError};
use motobridge_domain::time::format_rfc3339;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;

const HEADER: &str = "timestamp,registerLabel,value\n";

/// [`SampleRecorder`] appending to a CSV file.
#[derive(Debug)]
pub struct CsvRecorder {
    file: Option<Mutex<File>>,
}

impl CsvRecorder {
    /// Open `path` for appending, creating it with a header if needed.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened or written.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        if file.metadata().await?.len() == 0 {
            file.write_all(HEADER.as_bytes()).await?;
            file.flush().await?;
        }
        tracing::info!(path = %path.display(), "recording to CSV");
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    /// A recorder that writes nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self { file: None }
    }
}

impl SampleRecorder for CsvRecorder {
    async fn record(&self, sample: Sample) -> Result<(), SinkError> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let row = format!(
            "{},{},{}\n",
            format_rfc3339(&sample.timestamp),
            escape(sample.label),
            escape(&sample.value.to_string()),
        );
        let mut file = file.lock().await;
        file.write_all(row.as_bytes())
            .await
            .map_err(|err| SinkError(Box::new(err)))?;
        file.flush().await.map_err(|err| SinkError(Box::new(err)))
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
