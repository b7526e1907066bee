//! Datagram transports.
//!
//! The session only ever sees raw payloads pulled from a bounded queue with
//! [`Transport::try_recv`]; decoding happens on the session's own thread.
//! Sends are fire-and-forget.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tandem_netproto::constants::MAX_DATAGRAM_LEN;
use tracing::{debug, error, info, trace, warn};

/// Item pulled from a transport's inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Datagram(Bytes),
    /// The transport failed permanently; nothing more will arrive.
    Closed { reason: String },
}

/// Unordered, unreliable datagram link to exactly one peer.
pub trait Transport {
    /// Queue a datagram for the peer. Failures are logged, never returned.
    fn send(&self, datagram: Bytes);

    /// Next queued inbound item, without blocking.
    fn try_recv(&self) -> Option<Inbound>;

    /// Stop receiving and release resources. Idempotent.
    fn close(&mut self);
}

/// How often the receive worker wakes up to check the stop flag.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Larger than any valid datagram so oversized ones reach the decoder intact
/// enough to be rejected by length.
const RECV_BUFFER_LEN: usize = 2048;

const _: () = assert!(RECV_BUFFER_LEN > MAX_DATAGRAM_LEN);

/// How long the worker waits to hand over a close notice before giving up.
const CLOSE_NOTICE_TIMEOUT: Duration = Duration::from_millis(200);

/// UDP socket bound locally and connected to the peer.
///
/// Connecting the socket makes the OS discard datagrams from any other
/// origin.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    rx: Receiver<Inbound>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind `local`, connect to `peer` and start the receive worker.
    pub fn bind(local: SocketAddr, peer: SocketAddr, queue_capacity: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let (tx, rx) = bounded(queue_capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let worker = {
            let socket = socket.clone();
            let stop = stop.clone();
            let dropped = dropped.clone();
            thread::Builder::new()
                .name("tandem-rx".into())
                .spawn(move || receive_loop(&socket, &tx, &stop, &dropped))?
        };

        info!(%local_addr, %peer, "udp transport up");
        Ok(Self {
            socket,
            rx,
            stop,
            dropped,
            worker: Some(worker),
            local_addr,
            peer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Datagrams discarded because the inbound queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Transport for UdpTransport {
    fn send(&self, datagram: Bytes) {
        if self.stop.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.socket.send(&datagram) {
            if is_transient(&e) {
                debug!("udp send: {e}");
            } else {
                warn!("udp send failed: {e}");
            }
        }
    }

    fn try_recv(&self) -> Option<Inbound> {
        self.rx.try_recv().ok()
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("receive worker panicked");
            }
            debug!(local_addr = %self.local_addr, "udp transport closed");
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Errors that say nothing about the health of the socket.
///
/// Connection reset/refused on a connected UDP socket is an ICMP
/// port-unreachable from a peer that is not listening yet.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

fn receive_loop(socket: &UdpSocket, tx: &Sender<Inbound>, stop: &AtomicBool, dropped: &AtomicU64) {
    let mut buf = [0u8; RECV_BUFFER_LEN];
    while !stop.load(Ordering::Acquire) {
        match socket.recv(&mut buf) {
            Ok(n) => {
                trace!(len = n, "datagram");
                match tx.try_send(Inbound::Datagram(Bytes::copy_from_slice(&buf[..n]))) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if total.is_power_of_two() {
                            warn!(total, "inbound queue full, dropping datagrams");
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) if is_transient(&e) => debug!("udp recv: {e}"),
            Err(e) => {
                error!("udp recv failed: {e}");
                let notice = Inbound::Closed {
                    reason: e.to_string(),
                };
                let _ = tx.send_timeout(notice, CLOSE_NOTICE_TIMEOUT);
                break;
            }
        }
    }
    debug!("receive worker exiting");
}

/// In-process datagram endpoint.
///
/// Datagrams are carried over bounded channels and dropped when the far
/// queue is full, like a congested socket.
pub struct MemoryTransport {
    outbound: Sender<Inbound>,
    inbound: Receiver<Inbound>,
    closed: bool,
}

impl MemoryTransport {
    /// Two endpoints wired directly to each other.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = bounded(capacity.max(1));
        let (b_tx, b_rx) = bounded(capacity.max(1));
        (
            Self {
                outbound: b_tx,
                inbound: a_rx,
                closed: false,
            },
            Self {
                outbound: a_tx,
                inbound: b_rx,
                closed: false,
            },
        )
    }

    /// An endpoint whose far side is driven by hand through a [`MemoryLink`].
    pub fn detached(capacity: usize) -> (Self, MemoryLink) {
        let (sent_tx, sent_rx) = bounded(capacity.max(1));
        let (deliver_tx, deliver_rx) = bounded(capacity.max(1));
        (
            Self {
                outbound: sent_tx,
                inbound: deliver_rx,
                closed: false,
            },
            MemoryLink {
                sent: sent_rx,
                deliver: deliver_tx,
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn send(&self, datagram: Bytes) {
        if self.closed {
            return;
        }
        if let Err(TrySendError::Full(_)) = self.outbound.try_send(Inbound::Datagram(datagram)) {
            trace!("memory link full, datagram dropped");
        }
    }

    fn try_recv(&self) -> Option<Inbound> {
        if self.closed {
            return None;
        }
        self.inbound.try_recv().ok()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// The wire side of a detached [`MemoryTransport`].
pub struct MemoryLink {
    sent: Receiver<Inbound>,
    deliver: Sender<Inbound>,
}

impl MemoryLink {
    /// Everything the endpoint has sent since the last call.
    pub fn take_sent(&self) -> Vec<Bytes> {
        self.sent
            .try_iter()
            .filter_map(|item| match item {
                Inbound::Datagram(bytes) => Some(bytes),
                Inbound::Closed { .. } => None,
            })
            .collect()
    }

    /// Hand a datagram to the endpoint. Returns false if its queue is full.
    pub fn deliver(&self, datagram: Bytes) -> bool {
        self.deliver.try_send(Inbound::Datagram(datagram)).is_ok()
    }

    /// Make the endpoint observe a fatal transport failure.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.deliver.try_send(Inbound::Closed {
            reason: reason.into(),
        });
    }
}
