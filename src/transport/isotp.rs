//! Kernel ISO-TP binding (Linux `CAN_ISOTP` sockets).
//!
//! The server receives on `src_addr` and transmits on `dst_addr`; the kernel
//! handles segmentation and flow control, so every datagram is one complete
//! request or response.

use std::fmt;
use std::fs;
use std::future::Future;
use std::io::{self, Read};
use std::mem;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, SockAddrStorage, Socket, Type};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, trace, warn};

use crate::backend::ResolvedBackend;
use crate::error::LaunchError;
use crate::launcher::Shutdown;

use super::{TargetAddress, DEFAULT_ERROR_BACKOFF};

const AF_CAN: i32 = 29;
const CAN_ISOTP: i32 = 6;
const CAN_EFF_FLAG: u32 = 0x8000_0000;
const CAN_SFF_MASK: u32 = 0x7FF;
const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

// Per-message errors the ISO-TP layer reports on read.
const ECOMM: i32 = 70;
const EBADMSG: i32 = 74;
const EILSEQ: i32 = 84;
const ETIMEDOUT: i32 = 110;

/// `struct sockaddr_can` with the `tp` address member.
#[repr(C)]
struct SockaddrCanTp {
    can_family: u16,
    can_ifindex: i32,
    rx_id: u32,
    tx_id: u32,
    _pad: [u8; 8],
}

pub struct IsoTpBinding {
    interface: String,
    rx_id: u32,
    tx_id: u32,
    buffer_size: usize,
    error_backoff: Duration,
    backend: ResolvedBackend,
    socket: Option<AsyncFd<Socket>>,
}

impl fmt::Debug for IsoTpBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsoTpBinding")
            .field("interface", &self.interface)
            .field("rx_id", &format_args!("{:#x}", self.rx_id))
            .field("tx_id", &format_args!("{:#x}", self.tx_id))
            .field("bound", &self.socket.is_some())
            .finish()
    }
}

impl IsoTpBinding {
    /// Validate the target parameters. No socket is opened here.
    ///
    /// # Errors
    /// `InvalidArgument` when `src_addr` or `dst_addr` is missing or not a
    /// valid CAN identifier.
    pub fn new(
        target: &TargetAddress,
        backend: ResolvedBackend,
        buffer_size: usize,
    ) -> Result<Self, LaunchError> {
        let rx_id = parse_can_id("src_addr", target.required_param("src_addr")?)?;
        let tx_id = parse_can_id("dst_addr", target.required_param("dst_addr")?)?;
        Ok(Self {
            interface: target.authority().to_string(),
            rx_id,
            tx_id,
            buffer_size,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            backend,
            socket: None,
        })
    }

    /// Pause after a per-message receive error before reading again.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn bind(&mut self) -> Result<(), LaunchError> {
        let ifindex = interface_index(&self.interface)?;
        let socket = Socket::new(
            Domain::from(AF_CAN),
            Type::DGRAM,
            Some(Protocol::from(CAN_ISOTP)),
        )
        .map_err(|err| LaunchError::transport(format!("isotp socket: {err}")))?;
        socket
            .bind(&can_tp_address(ifindex, self.rx_id, self.tx_id))
            .map_err(|err| LaunchError::transport(format!("bind {}: {err}", self.interface)))?;
        socket.set_nonblocking(true).map_err(LaunchError::transport)?;
        let socket = AsyncFd::new(socket).map_err(LaunchError::transport)?;

        info!(
            interface = %self.interface,
            rx_id = format_args!("{:#x}", self.rx_id),
            tx_id = format_args!("{:#x}", self.tx_id),
            "isotp transport bound"
        );
        self.socket = Some(socket);
        Ok(())
    }

    pub async fn serve(&mut self, shutdown: Shutdown) -> Result<(), LaunchError> {
        let socket = self
            .socket
            .take()
            .ok_or_else(|| LaunchError::transport("isotp transport served before bind"))?;
        let served = serve_datagrams(
            &socket,
            &self.backend,
            self.buffer_size,
            self.error_backoff,
            shutdown,
        )
        .await;
        debug!(interface = %self.interface, "isotp transport stopped");
        served
    }
}

/// A connected datagram socket carrying whole requests and responses.
trait Datagrams {
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    fn send(&self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

impl Datagrams for AsyncFd<Socket> {
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.readable().await?;
            match guard.try_io(|inner| {
                let mut sock: &Socket = inner.get_ref();
                sock.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn send(&self, data: &[u8]) -> io::Result<()> {
        loop {
            let mut guard = self.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send(data)) {
                Ok(result) => return result.map(|_| ()),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Whether a receive error only lost the message in flight.
fn is_message_error(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::Interrupted | io::ErrorKind::TimedOut)
        || matches!(err.raw_os_error(), Some(ECOMM | EBADMSG | EILSEQ | ETIMEDOUT))
}

/// Answer datagrams until shutdown. A per-message error is logged and
/// followed by `backoff`; any other socket error faults the transport.
async fn serve_datagrams<D: Datagrams>(
    socket: &D,
    backend: &ResolvedBackend,
    buffer_size: usize,
    backoff: Duration,
    mut shutdown: Shutdown,
) -> Result<(), LaunchError> {
    let mut buf = vec![0u8; buffer_size];

    loop {
        let received = tokio::select! {
            _ = shutdown.wait() => break,
            received = socket.recv(&mut buf) => received,
        };
        let len = match received {
            Ok(0) => continue,
            Ok(len) => len,
            Err(err) if is_message_error(&err) => {
                warn!(%err, backoff_ms = backoff.as_millis() as u64, "isotp message lost");
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }
            Err(err) => {
                return Err(LaunchError::transport(format!("isotp receive: {err}")));
            }
        };

        let request = &buf[..len];
        let response = backend.handle(request)?;
        trace!(request = %hex::encode(request), response = ?response.as_ref().map(hex::encode), "handled");
        if let Some(response) = response {
            socket.send(&response).await.map_err(LaunchError::transport)?;
        }
    }

    Ok(())
}

fn parse_can_id(name: &str, raw: &str) -> Result<u32, LaunchError> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    let id = parsed
        .ok()
        .filter(|id| *id <= CAN_EFF_MASK)
        .ok_or_else(|| {
            LaunchError::invalid_argument(format!("{name}: '{raw}' is not a CAN identifier"))
        })?;
    if id > CAN_SFF_MASK {
        Ok(id | CAN_EFF_FLAG)
    } else {
        Ok(id)
    }
}

fn interface_index(interface: &str) -> Result<i32, LaunchError> {
    let path = format!("/sys/class/net/{interface}/ifindex");
    let raw = fs::read_to_string(&path)
        .map_err(|err| LaunchError::transport(format!("interface {interface}: {err}")))?;
    raw.trim()
        .parse()
        .map_err(|err| LaunchError::transport(format!("interface {interface}: {err}")))
}

fn can_tp_address(ifindex: i32, rx_id: u32, tx_id: u32) -> SockAddr {
    let mut storage = SockAddrStorage::zeroed();
    // SAFETY: sockaddr_storage is larger than and suitably aligned for SockaddrCanTp.
    let addr = unsafe { storage.view_as::<SockaddrCanTp>() };
    addr.can_family = AF_CAN as u16;
    addr.can_ifindex = ifindex;
    addr.rx_id = rx_id;
    addr.tx_id = tx_id;
    let len = mem::size_of::<SockaddrCanTp>();
    // SAFETY: the storage holds an initialised AF_CAN address of `len` bytes.
    unsafe { SockAddr::new(storage, len as _) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{build_backend, BackendConfig, SyntheticConfig};
    use crate::launcher::shutdown_channel;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn backend() -> ResolvedBackend {
        build_backend(BackendConfig::Synthetic(SyntheticConfig { seed: 1 }), &[]).unwrap()
    }

    #[test]
    fn identifiers_accept_hex_and_decimal() {
        assert_eq!(parse_can_id("src_addr", "0x7E0").unwrap(), 0x7E0);
        assert_eq!(parse_can_id("src_addr", "2016").unwrap(), 0x7E0);
        assert_eq!(
            parse_can_id("src_addr", "0x18DA00F1").unwrap(),
            0x18DA_00F1 | CAN_EFF_FLAG
        );
        assert!(parse_can_id("src_addr", "0x20000000").is_err());
        assert!(parse_can_id("src_addr", "seven").is_err());
    }

    #[test]
    fn missing_addresses_fail_before_any_socket() {
        let target: TargetAddress = "isotp://vcan0?src_addr=0x7e0".parse().unwrap();
        let err = IsoTpBinding::new(&target, backend(), 4095).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgument { .. }));
    }

    #[test]
    fn unknown_interface_is_a_transport_error() {
        let target: TargetAddress = "isotp://vecu-no-such-if?src_addr=0x7e0&dst_addr=0x7e8"
            .parse()
            .unwrap();
        let mut binding = IsoTpBinding::new(&target, backend(), 4095).unwrap();
        let err = binding.bind().unwrap_err();
        assert!(matches!(err, LaunchError::TransportFailed { .. }));
    }

    /// Socket replaying a fixed list of receive results, then idling.
    struct ScriptedSocket {
        script: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        sent: Mutex<Vec<Vec<u8>>>,
        receives: AtomicUsize,
    }

    impl ScriptedSocket {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
                receives: AtomicUsize::new(0),
            }
        }
    }

    impl Datagrams for ScriptedSocket {
        async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            self.receives.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(err)) => Err(err),
                None => std::future::pending().await,
            }
        }

        async fn send(&self, data: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn interface_going_down_faults_the_transport() {
        let backend = backend();
        backend.setup().unwrap();
        let socket = ScriptedSocket::new(vec![
            Ok(vec![0x3E, 0x00]),
            Err(io::Error::from_raw_os_error(100)),
            Ok(vec![0x3E, 0x00]),
        ]);
        let (_trigger, shutdown) = shutdown_channel();

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            serve_datagrams(&socket, &backend, 64, Duration::from_millis(10), shutdown),
        )
        .await
        .expect("persistent socket error ends the loop")
        .unwrap_err();

        assert!(matches!(err, LaunchError::TransportFailed { .. }));
        assert_eq!(socket.receives.load(Ordering::SeqCst), 2);
        assert_eq!(*socket.sent.lock().unwrap(), vec![vec![0x7E, 0x00]]);
    }

    #[tokio::test]
    async fn lost_message_is_skipped_after_backoff() {
        let backend = backend();
        backend.setup().unwrap();
        let socket = ScriptedSocket::new(vec![
            Err(io::Error::from_raw_os_error(ECOMM)),
            Ok(vec![0x3E, 0x00]),
        ]);
        let (trigger, shutdown) = shutdown_channel();

        let serving = serve_datagrams(&socket, &backend, 64, Duration::from_millis(10), shutdown);
        let stopper = async {
            while socket.sent.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            trigger.fire();
        };
        let (served, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(serving, stopper)
        })
        .await
        .expect("loop keeps serving after a lost message");

        served.unwrap();
        assert_eq!(*socket.sent.lock().unwrap(), vec![vec![0x7E, 0x00]]);
    }

    #[test]
    fn address_layout_matches_kernel() {
        assert_eq!(mem::size_of::<SockaddrCanTp>(), 24);
        let addr = can_tp_address(3, 0x7E0, 0x7E8);
        assert_eq!(addr.family(), AF_CAN as u16);
    }
}
