//! Hex line framing shared by the stream bindings.
//!
//! Each request is one line of hex digits; each response is written back the
//! same way. Suppressed responses produce no line at all.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::backend::ResolvedBackend;
use crate::launcher::Shutdown;

/// Listening side of a stream binding.
pub(super) trait LineListener {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept one connection; the peer name is `None` for unnamed peers.
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, Option<String>)>> + Send;
}

/// Accept connections and serve each on its own task until `shutdown`.
///
/// A failed accept (for example out of file descriptors) is logged and the
/// loop pauses for `backoff` before accepting again.
pub(super) async fn accept_loop<L: LineListener>(
    listener: &L,
    backend: &ResolvedBackend,
    max_line_length: usize,
    backoff: Duration,
    mut shutdown: Shutdown,
) {
    let mut connections = JoinSet::new();
    let mut accepted_total = 0u64;

    loop {
        let mut failed = false;
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    accepted_total += 1;
                    let peer = peer.unwrap_or_else(|| format!("local#{accepted_total}"));
                    debug!(%peer, "connection accepted");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        backend.clone(),
                        max_line_length,
                        shutdown.clone(),
                    ));
                }
                Err(err) => {
                    warn!(%err, backoff_ms = backoff.as_millis() as u64, "accept failed");
                    failed = true;
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                match finished {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(%err, "connection ended with error"),
                    Err(err) => warn!(%err, "connection task failed"),
                }
            }
        }

        if failed {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    connections.shutdown().await;
}

/// Serve one connection until EOF, shutdown or an I/O error.
pub(super) async fn serve_connection<S>(
    stream: S,
    peer: String,
    backend: ResolvedBackend,
    max_line_length: usize,
    mut shutdown: Shutdown,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = {
            let mut limited = (&mut reader).take(max_line_length as u64 + 1);
            tokio::select! {
                _ = shutdown.wait() => None,
                read = limited.read_line(&mut line) => Some(read?),
            }
        };
        let Some(read) = read else { break };
        if read == 0 {
            debug!(%peer, "connection closed by peer");
            break;
        }
        if !line.ends_with('\n') && read > max_line_length {
            warn!(%peer, max_line_length, "request line too long; closing connection");
            break;
        }

        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        let request = match hex::decode(request) {
            Ok(request) => request,
            Err(err) => {
                warn!(%peer, %err, "ignoring malformed request line");
                continue;
            }
        };

        let response = backend
            .handle(&request)
            .map_err(|err| io::Error::other(err.to_string()))?;
        trace!(%peer, request = %hex::encode(&request), response = ?response.as_ref().map(hex::encode), "handled");
        if let Some(response) = response {
            let mut out = hex::encode(response);
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}
