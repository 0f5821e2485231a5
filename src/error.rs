use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures the collector can run into. None of them abort the polling loop;
/// the caller decides whether a failure costs a tick, a sample or an artifact.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The OS process table could not be read this tick.
    #[error("process enumeration failed: {0}")]
    Enumeration(String),

    /// The process could not be opened or queried (exited, access denied).
    #[error("process {pid} could not be sampled")]
    SampleUnavailable { pid: u32 },

    #[error("failed to write {artifact} to {}: {source}", path.display())]
    Io {
        artifact: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    ConfigParse { key: &'static str, value: String },
}

impl CollectorError {
    pub fn io(artifact: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        CollectorError::Io {
            artifact,
            path: path.into(),
            source,
        }
    }
}
