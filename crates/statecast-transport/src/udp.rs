//! UDP channel implementation
//!
//! Envelopes travel as one JSON datagram each. `send` only queues: a writer
//! task drains the queue onto the socket, and a receive loop fans inbound
//! datagrams out to the channel's handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use statecast_core::{AbortHandle, Envelope, Notifier, StatecastError, StatecastResult};

use crate::{Channel, MessageHandler, Peers};

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// UDP channel configuration
#[derive(Clone, Debug)]
pub struct UdpConfig {
    /// Upper bound for an encoded envelope
    pub max_datagram: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        UdpConfig {
            max_datagram: MAX_DATAGRAM_SIZE,
        }
    }
}

/// One encoded envelope and the peers it goes to
#[derive(Debug)]
struct Outgoing {
    bytes: Vec<u8>,
    dests: Vec<SocketAddr>,
}

/// Channel over a UDP socket
pub struct UdpChannel {
    local_addr: SocketAddr,
    peers: Peers<SocketAddr>,
    listeners: Arc<Notifier<Envelope>>,
    signal: AbortHandle,
    outbox: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
    config: UdpConfig,
}

impl UdpChannel {
    /// Bind to a local address and start receiving
    pub async fn bind(
        addr: SocketAddr,
        peers: impl Into<Peers<SocketAddr>>,
        config: UdpConfig,
    ) -> StatecastResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| StatecastError::Transport(e.to_string()))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| StatecastError::Transport(e.to_string()))?;

        let socket = Arc::new(socket);
        let listeners = Arc::new(Notifier::new());
        let receive_loop = start_receive_loop(
            Arc::clone(&socket),
            Arc::clone(&listeners),
            config.max_datagram,
        );
        let (outbox, queue) = mpsc::unbounded_channel();
        start_send_loop(socket, queue);

        tracing::debug!(%local_addr, "udp channel bound");

        Ok(UdpChannel {
            local_addr,
            peers: peers.into(),
            listeners,
            signal: AbortHandle::new(),
            outbox: Mutex::new(Some(outbox)),
            receive_loop: Mutex::new(Some(receive_loop)),
            config,
        })
    }

    /// Get local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl From<SocketAddr> for Peers<SocketAddr> {
    fn from(addr: SocketAddr) -> Self {
        Peers::One(addr)
    }
}

impl Channel for UdpChannel {
    fn send(&self, envelope: Envelope) -> StatecastResult<()> {
        if self.signal.is_aborted() {
            return Err(StatecastError::Detached);
        }

        let bytes = envelope.encode()?;
        if bytes.len() > self.config.max_datagram {
            return Err(StatecastError::DatagramTooLarge {
                size: bytes.len(),
                limit: self.config.max_datagram,
            });
        }

        let dests = self.peers.resolve(&envelope);
        if dests.is_empty() {
            return Ok(());
        }

        match &*self.outbox.lock() {
            Some(outbox) => outbox
                .send(Outgoing { bytes, dests })
                .map_err(|_| StatecastError::Transport("udp writer stopped".to_string())),
            None => Err(StatecastError::Detached),
        }
    }

    fn on_message(&self, handler: MessageHandler) -> StatecastResult<()> {
        if self.signal.is_aborted() {
            return Err(StatecastError::Detached);
        }
        self.listeners.subscribe_handler(&self.signal, handler);
        Ok(())
    }

    fn detach(&self) {
        if !self.signal.abort() {
            return;
        }
        if let Some(task) = self.receive_loop.lock().take() {
            task.abort();
        }
        // The writer drains what is already queued, then exits.
        self.outbox.lock().take();
        self.listeners.close();
        tracing::debug!(local_addr = %self.local_addr, "udp channel detached");
    }

    fn is_detached(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl Drop for UdpChannel {
    fn drop(&mut self) {
        if let Some(task) = self.receive_loop.get_mut().take() {
            task.abort();
        }
    }
}

/// Start the writer draining queued datagrams onto the socket.
///
/// A failing peer is logged and skipped; the remaining peers still get the
/// datagram. The task ends once every sender is gone.
fn start_send_loop(
    socket: Arc<UdpSocket>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    tokio::spawn(async move {
        while let Some(outgoing) = queue.recv().await {
            for dest in &outgoing.dests {
                if let Err(e) = socket.send_to(&outgoing.bytes, *dest).await {
                    tracing::warn!("UDP send to {} failed: {}", dest, e);
                }
            }
        }
    });
}

/// Start a background receive loop dispatching decoded envelopes
fn start_receive_loop(
    socket: Arc<UdpSocket>,
    listeners: Arc<Notifier<Envelope>>,
    max_datagram: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; max_datagram];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => match Envelope::decode(&buf[..len]) {
                    Ok(envelope) => {
                        listeners.emit(&envelope);
                    }
                    Err(e) => {
                        tracing::warn!("Dropping datagram from {}: {}", addr, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("UDP receive error: {}", e);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use statecast_core::{Detail, MessageKind};
    use std::time::Duration;

    async fn bind_any(peers: Peers<SocketAddr>) -> UdpChannel {
        UdpChannel::bind("127.0.0.1:0".parse().unwrap(), peers, UdpConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_udp_channel_bind() {
        let channel = bind_any(Peers::None).await;
        assert_ne!(channel.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_udp_envelope_delivery() {
        let receiver = bind_any(Peers::None).await;
        let sender = bind_any(Peers::One(receiver.local_addr())).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        receiver
            .on_message(Arc::new(move |e: &Envelope| {
                let _ = tx.send(e.clone());
            }))
            .unwrap();

        let envelope = Envelope::new(
            MessageKind::Update,
            "udp",
            Detail::update(Some(json!("theme")), json!("dark")),
        );
        sender.send(envelope.clone()).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, envelope);
    }

    fn collect(channel: &UdpChannel) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        channel
            .on_message(Arc::new(move |e: &Envelope| {
                let _ = tx.send(e.clone());
            }))
            .unwrap();
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn numbered(n: u32) -> Envelope {
        Envelope::new(
            MessageKind::Update,
            "udp",
            Detail::update(Some(json!("seq")), json!(n)),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_udp_sends_right_after_bind() {
        let receiver = bind_any(Peers::None).await;
        let mut rx = collect(&receiver);
        let sender = bind_any(Peers::One(receiver.local_addr())).await;

        for n in 0..5 {
            sender.send(numbered(n)).unwrap();
        }
        for n in 0..5 {
            assert_eq!(next(&mut rx).await, numbered(n));
        }
    }

    #[tokio::test]
    async fn test_udp_fan_out_skips_failing_peer() {
        let receiver = bind_any(Peers::None).await;
        let mut rx = collect(&receiver);

        // An IPv6 destination cannot be reached from an IPv4 socket.
        let unreachable: SocketAddr = "[::1]:9".parse().unwrap();
        let sender = bind_any(Peers::Many(vec![unreachable, receiver.local_addr()])).await;

        sender.send(numbered(1)).unwrap();
        assert_eq!(next(&mut rx).await, numbered(1));
    }

    #[tokio::test]
    async fn test_udp_receive_only_send_is_noop() {
        let channel = bind_any(Peers::None).await;
        assert!(channel.send(numbered(0)).is_ok());
    }

    #[tokio::test]
    async fn test_udp_rejects_oversized() {
        let channel = UdpChannel::bind(
            "127.0.0.1:0".parse().unwrap(),
            Peers::<SocketAddr>::None,
            UdpConfig { max_datagram: 16 },
        )
        .await
        .unwrap();

        let envelope = Envelope::new(
            MessageKind::Update,
            "a-rather-long-namespace",
            Detail::update(None, json!("value")),
        );
        assert!(matches!(
            channel.send(envelope),
            Err(StatecastError::DatagramTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_udp_detach() {
        let channel = bind_any(Peers::None).await;
        channel.detach();
        channel.detach();
        assert!(channel.is_detached());
        assert!(matches!(
            channel.send(Envelope::new(MessageKind::Reset, "ns", Detail::empty())),
            Err(StatecastError::Detached)
        ));
    }
}
