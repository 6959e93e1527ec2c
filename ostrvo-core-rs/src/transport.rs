//! Transport boundary for OSTRVO frames.
//!
//! The core treats the radio as best-effort, unordered, and lossy: sends
//! are fire-and-forget, receives are non-blocking polls. Background I/O
//! hands frames to the coordination loop through a bounded queue so the
//! loop stays the single writer of all protocol state.

use crate::wire::MAX_FRAME_LEN;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Frames buffered between ticks before the radio task starts dropping
pub const INBOUND_QUEUE_DEPTH: usize = 256;

/// Abstract best-effort frame transport
pub trait Transport {
    /// Non-blocking send; `false` means the frame was not handed to the
    /// radio. A `true` frame may still be lost in flight, delivery is
    /// never acknowledged.
    fn try_send(&mut self, frame: &[u8]) -> bool;

    /// Drain every frame received since the last poll, oldest first
    fn poll_received(&mut self) -> Vec<Vec<u8>>;
}

/// UDP broadcast transport for bench and street deployments.
///
/// A background task owns the blocking receive and feeds a bounded
/// channel; the coordination loop drains it at tick start.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbound_rx: mpsc::Receiver<Vec<u8>>,
}

impl UdpTransport {
    /// Bind a socket and start the background receive task
    pub async fn bind(listen: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(listen).await?);
        socket.set_broadcast(true)?;

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let recv_socket = socket.clone();
        tokio::spawn(async move {
            // Oversized datagrams are radio noise; recv truncates them and
            // the codec rejects the remainder
            let mut buf = vec![0u8; 4 * MAX_FRAME_LEN];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, src)) => {
                        debug!(bytes = len, %src, "frame received");
                        match inbound_tx.try_send(buf[..len].to_vec()) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!(%src, "inbound queue full, frame dropped");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(e) => error!(error = %e, "udp receive failed"),
                }
            }
        });

        Ok(Self { socket, peer, inbound_rx })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn try_send(&mut self, frame: &[u8]) -> bool {
        match self.socket.try_send_to(frame, self.peer) {
            Ok(sent) => sent == frame.len(),
            Err(e) => {
                debug!(error = %e, "udp send failed");
                false
            }
        }
    }

    fn poll_received(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.inbound_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// In-memory transport for deterministic tests and the simulation harness
#[derive(Debug, Default)]
pub struct ChannelTransport {
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<Vec<u8>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for the next `poll_received`
    pub fn push_inbound(&mut self, frame: Vec<u8>) {
        self.inbound.push_back(frame);
    }

    /// Take everything the node sent since the last drain
    pub fn drain_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }
}

impl Transport for ChannelTransport {
    fn try_send(&mut self, frame: &[u8]) -> bool {
        self.outbound.push(frame.to_vec());
        true
    }

    fn poll_received(&mut self) -> Vec<Vec<u8>> {
        self.inbound.drain(..).collect()
    }
}
