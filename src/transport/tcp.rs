use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use crate::backend::ResolvedBackend;
use crate::error::LaunchError;
use crate::launcher::Shutdown;

use super::lines::{accept_loop, LineListener};
use super::DEFAULT_ERROR_BACKOFF;

/// Hex-line server on a TCP listener.
#[derive(Debug)]
pub struct TcpBinding {
    authority: String,
    backend: ResolvedBackend,
    max_line_length: usize,
    error_backoff: Duration,
    listener: Option<TcpListener>,
}

impl TcpBinding {
    pub fn new(authority: &str, backend: ResolvedBackend, max_line_length: usize) -> Self {
        Self {
            authority: authority.to_string(),
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

    /// Address actually bound, once [`TcpBinding::bind`] succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|listener| listener.local_addr().ok())
    }

    pub async fn bind(&mut self) -> Result<(), LaunchError> {
        let listener = TcpListener::bind(&self.authority)
            .await
            .map_err(|err| LaunchError::transport(format!("bind {}: {err}", self.authority)))?;
        let local = listener.local_addr().map_err(LaunchError::transport)?;
        info!(%local, "tcp transport listening");
        self.listener = Some(listener);
        Ok(())
    }

    pub async fn serve(&mut self, shutdown: Shutdown) -> Result<(), LaunchError> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| LaunchError::transport("tcp transport served before bind"))?;
        accept_loop(
            &listener,
            &self.backend,
            self.max_line_length,
            self.error_backoff,
            shutdown,
        )
        .await;
        info!("tcp transport stopped");
        Ok(())
    }
}

impl LineListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, Option<String>)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        Ok((stream, Some(peer.to_string())))
    }
}
