//! Event recorders
//!
//! Services hand selected session events to [`Recorder`]s bound under a
//! [`RecordKind`]. Currently the accept loop emits
//! [`RecordKind::ServiceClientAddress`] with the client IP of every accepted
//! connection.

use crate::common::{Recorder, SessionContext};
use crate::{Result, TollgateError};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Event kinds a recorder can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    ServiceClientAddress,
    ServiceRouterDialAddress,
    ServiceHandlerSerial,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ServiceClientAddress => "recorder.service.client.address",
            RecordKind::ServiceRouterDialAddress => "recorder.service.router.dial.address",
            RecordKind::ServiceHandlerSerial => "recorder.service.handler.serial",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordKind {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recorder.service.client.address" => Ok(RecordKind::ServiceClientAddress),
            "recorder.service.router.dial.address" => Ok(RecordKind::ServiceRouterDialAddress),
            "recorder.service.handler.serial" => Ok(RecordKind::ServiceHandlerSerial),
            other => Err(TollgateError::Recorder(format!("unknown record kind {other}"))),
        }
    }
}

/// A recorder attached to one event kind
#[derive(Clone)]
pub struct RecorderBinding {
    pub kind: RecordKind,
    pub recorder: Arc<dyn Recorder>,
}

impl RecorderBinding {
    pub fn new(kind: RecordKind, recorder: Arc<dyn Recorder>) -> Self {
        Self { kind, recorder }
    }
}

impl fmt::Debug for RecorderBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecorderBinding").field("kind", &self.kind).finish()
    }
}

/// Appends each record to a file followed by a separator
pub struct FileRecorder {
    path: PathBuf,
    sep: String,
    file: Mutex<Option<File>>,
}

impl FileRecorder {
    /// The file is created on the first record
    pub fn new(path: impl Into<PathBuf>, sep: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sep: sep.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl Recorder for FileRecorder {
    async fn record(&self, _ctx: &SessionContext, data: &[u8]) -> Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            let mut line = Vec::with_capacity(data.len() + self.sep.len());
            line.extend_from_slice(data);
            line.extend_from_slice(self.sep.as_bytes());
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }
}
