//! Transport dispatch and bindings.
//!
//! A [`TargetAddress`] names a scheme; [`dispatch`] maps the scheme and the
//! host's [`PlatformCapability`] onto one [`BindingKind`], and
//! [`TransportBinding::new`] turns that into a server bound to a
//! [`ResolvedBackend`].

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use cfg_if::cfg_if;
use tracing::debug;

use crate::backend::ResolvedBackend;
use crate::config::TransportConfig;
use crate::error::LaunchError;
use crate::launcher::Shutdown;

mod address;
mod lines;
mod tcp;

#[cfg(unix)]
mod unix;

#[cfg(target_os = "linux")]
mod isotp;

/// Pause after a failed accept or receive when no configuration says otherwise.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub use address::TargetAddress;
pub use tcp::TcpBinding;

#[cfg(unix)]
pub use unix::UnixLinesBinding;

#[cfg(target_os = "linux")]
pub use isotp::IsoTpBinding;

/// Transport scheme of a target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportScheme {
    /// Hex request/response lines over a stream socket.
    Tcp,
    /// Kernel ISO-TP datagrams on a CAN interface.
    IsoTp,
    /// Hex request/response lines over a local socket.
    UnixLines,
}

impl TransportScheme {
    pub const ALL: [TransportScheme; 3] = [
        TransportScheme::Tcp,
        TransportScheme::IsoTp,
        TransportScheme::UnixLines,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransportScheme::Tcp => "tcp",
            TransportScheme::IsoTp => "isotp",
            TransportScheme::UnixLines => "unix-lines",
        }
    }

    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            TransportScheme::Tcp => &["stream", "tcp-lines"],
            TransportScheme::IsoTp => &["automotive-bus"],
            TransportScheme::UnixLines => &["local-channel"],
        }
    }
}

impl fmt::Display for TransportScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportScheme {
    type Err = LaunchError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let wanted = input.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|scheme| scheme.as_str() == wanted || scheme.aliases().contains(&wanted.as_str()))
            .ok_or_else(|| {
                let known = Self::ALL
                    .iter()
                    .map(|scheme| scheme.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                LaunchError::invalid_argument(format!(
                    "unknown transport scheme '{input}' (known: {known})"
                ))
            })
    }
}

/// What the host can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCapability {
    /// Every scheme, including kernel ISO-TP and local sockets.
    Full,
    /// Stream sockets only.
    Limited,
}

impl PlatformCapability {
    /// Capability of the compile target.
    pub fn detect() -> Self {
        cfg_if! {
            if #[cfg(target_os = "linux")] {
                PlatformCapability::Full
            } else {
                PlatformCapability::Limited
            }
        }
    }

    pub fn supported_schemes(self) -> Vec<TransportScheme> {
        TransportScheme::ALL
            .into_iter()
            .filter(|&scheme| dispatch(scheme, self).is_ok())
            .collect()
    }
}

impl fmt::Display for PlatformCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformCapability::Full => f.write_str("full"),
            PlatformCapability::Limited => f.write_str("limited"),
        }
    }
}

/// Binding selected by [`dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Tcp,
    IsoTp,
    UnixLines,
}

/// Select the binding for `scheme` on a host with `capability`.
///
/// # Errors
/// `UnsupportedScheme` listing the schemes the capability does support.
pub fn dispatch(
    scheme: TransportScheme,
    capability: PlatformCapability,
) -> Result<BindingKind, LaunchError> {
    match (scheme, capability) {
        (TransportScheme::Tcp, _) => Ok(BindingKind::Tcp),
        (TransportScheme::IsoTp, PlatformCapability::Full) => Ok(BindingKind::IsoTp),
        (TransportScheme::UnixLines, PlatformCapability::Full) => Ok(BindingKind::UnixLines),
        (TransportScheme::IsoTp | TransportScheme::UnixLines, PlatformCapability::Limited) => {
            Err(LaunchError::UnsupportedScheme {
                scheme,
                capability,
                supported: vec![TransportScheme::Tcp],
            })
        }
    }
}

/// A server that can be bound and then run until shutdown.
pub trait ServerTransport {
    /// Acquire the listening resource.
    fn bind(&mut self) -> impl Future<Output = Result<(), LaunchError>>;

    /// Serve requests until `shutdown` fires or a fatal error occurs.
    fn serve(&mut self, shutdown: Shutdown) -> impl Future<Output = Result<(), LaunchError>>;
}

/// Concrete binding wrapping a resolved backend.
#[derive(Debug)]
pub enum TransportBinding {
    Tcp(TcpBinding),
    #[cfg(unix)]
    UnixLines(UnixLinesBinding),
    #[cfg(target_os = "linux")]
    IsoTp(IsoTpBinding),
}

impl TransportBinding {
    /// Build the binding selected by [`dispatch`]. Parameters are validated
    /// here; no socket is opened until [`ServerTransport::bind`].
    pub fn new(
        kind: BindingKind,
        target: &TargetAddress,
        backend: ResolvedBackend,
        settings: &TransportConfig,
    ) -> Result<Self, LaunchError> {
        debug!(?kind, %target, "constructing transport binding");
        match kind {
            BindingKind::Tcp => Ok(TransportBinding::Tcp(
                TcpBinding::new(target.authority(), backend, settings.max_line_length)
                    .with_error_backoff(settings.error_backoff()),
            )),
            #[cfg(unix)]
            BindingKind::UnixLines => Ok(TransportBinding::UnixLines(
                UnixLinesBinding::new(target.authority(), backend, settings.max_line_length)
                    .with_error_backoff(settings.error_backoff()),
            )),
            #[cfg(target_os = "linux")]
            BindingKind::IsoTp => Ok(TransportBinding::IsoTp(
                IsoTpBinding::new(target, backend, settings.isotp_buffer_size)?
                    .with_error_backoff(settings.error_backoff()),
            )),
            #[allow(unreachable_patterns)]
            _ => Err(LaunchError::UnsupportedScheme {
                scheme: target.scheme(),
                capability: PlatformCapability::detect(),
                supported: PlatformCapability::detect().supported_schemes(),
            }),
        }
    }
}

impl ServerTransport for TransportBinding {
    async fn bind(&mut self) -> Result<(), LaunchError> {
        match self {
            TransportBinding::Tcp(binding) => binding.bind().await,
            #[cfg(unix)]
            TransportBinding::UnixLines(binding) => binding.bind().await,
            #[cfg(target_os = "linux")]
            TransportBinding::IsoTp(binding) => binding.bind(),
        }
    }

    async fn serve(&mut self, shutdown: Shutdown) -> Result<(), LaunchError> {
        match self {
            TransportBinding::Tcp(binding) => binding.serve(shutdown).await,
            #[cfg(unix)]
            TransportBinding::UnixLines(binding) => binding.serve(shutdown).await,
            #[cfg(target_os = "linux")]
            TransportBinding::IsoTp(binding) => binding.serve(shutdown).await,
        }
    }
}
