use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use crate::backend::ResolvedBackend;
use crate::error::LaunchError;
use crate::launcher::Shutdown;

use super::lines::{accept_loop, LineListener};
use super::DEFAULT_ERROR_BACKOFF;

/// Hex-line server on a local socket. The socket file is removed on stop.
#[derive(Debug)]
pub struct UnixLinesBinding {
    path: PathBuf,
    backend: ResolvedBackend,
    max_line_length: usize,
    error_backoff: Duration,
    listener: Option<UnixListener>,
}

impl UnixLinesBinding {
    pub fn new(path: &str, backend: ResolvedBackend, max_line_length: usize) -> Self {
        Self {
            path: PathBuf::from(path),
            backend,
            max_line_length,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            listener: None,
        }
    }

    /// Pause after a failed accept before accepting again.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub async fn bind(&mut self) -> Result<(), LaunchError> {
        let listener = UnixListener::bind(&self.path).map_err(|err| {
            LaunchError::transport(format!("bind {}: {err}", self.path.display()))
        })?;
        info!(path = %self.path.display(), "unix-lines transport listening");
        self.listener = Some(listener);
        Ok(())
    }

    pub async fn serve(&mut self, shutdown: Shutdown) -> Result<(), LaunchError> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| LaunchError::transport("unix-lines transport served before bind"))?;
        accept_loop(
            &listener,
            &self.backend,
            self.max_line_length,
            self.error_backoff,
            shutdown,
        )
        .await;

        drop(listener);
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "could not remove socket file");
        }
        info!("unix-lines transport stopped");
        Ok(())
    }
}

impl LineListener for UnixListener {
    type Stream = UnixStream;

    async fn accept(&self) -> io::Result<(UnixStream, Option<String>)> {
        let (stream, _) = UnixListener::accept(self).await?;
        Ok((stream, None))
    }
}
