//! UDP ingestion loop
//!
//! Reads one datagram at a time into a reusable buffer, samples it, and
//! publishes survivors to the broadcaster.
//!
//! The buffer never leaves this module: a forwarded datagram is copied into
//! its own `EventMessage` before publishing, so the next receive can safely
//! overwrite the buffer.
//!
//! A receive error after startup ends the loop with `Error::Ingest`. There
//! is no reconnect; the caller is expected to shut the process down and rely
//! on external supervision.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::broadcast::{Broadcaster, EventMessage};
use crate::error::{Error, Result};
use crate::sampler::Sampler;
use crate::stats::IngestStats;

/// Default maximum payload size in bytes
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256;

/// Source of datagrams for the ingestion loop
///
/// Implemented for `UdpSocket`; tests substitute scripted sources.
pub trait DatagramSource: Send + Sync {
    /// Receive one datagram into `buf`, returning its length and sender
    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a;

    /// Local address, for logging
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl DatagramSource for UdpSocket {
    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a {
        UdpSocket::recv_from(self, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Owner of the ingestion socket
pub struct Ingester<S = UdpSocket> {
    socket: S,
    sampler: Sampler,
    broadcaster: Arc<Broadcaster>,
    stats: Arc<IngestStats>,
    max_message_size: usize,
}

impl Ingester<UdpSocket> {
    /// Bind a UDP socket on `addr` and create an ingester over it
    pub async fn bind(
        addr: SocketAddr,
        sampler: Sampler,
        broadcaster: Arc<Broadcaster>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| Error::Bind {
            what: "udp",
            addr,
            source,
        })?;
        Ok(Self::new(socket, sampler, broadcaster))
    }
}

impl<S: DatagramSource> Ingester<S> {
    /// Create an ingester over an already-bound socket
    pub fn new(socket: S, sampler: Sampler, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            socket,
            sampler,
            broadcaster,
            stats: Arc::new(IngestStats::new()),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Set the maximum accepted payload size (at least 1)
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.max(1);
        self
    }

    /// Share counters with the caller
    pub fn with_stats(mut self, stats: Arc<IngestStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Ingestion counters
    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Run the receive loop
    ///
    /// Only returns on a receive error. Cancel it by dropping the future,
    /// e.g. from a `tokio::select!` on a shutdown signal.
    pub async fn run(&self) -> Result<()> {
        // One spare byte tells an exactly-full datagram from a truncated one.
        let mut buffer = vec![0u8; self.max_message_size + 1];

        tracing::info!(
            addr = ?self.socket.local_addr().ok(),
            sample_rate = self.sampler.rate(),
            max_message_size = self.max_message_size,
            "Ingestion started"
        );

        loop {
            let (len, peer) = match self.socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!(error = %e, "UDP receive failed");
                    return Err(Error::Ingest(e));
                }
            };

            self.handle_datagram(&buffer[..len], peer);
        }
    }

    fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr) {
        self.stats.record_datagram(datagram.len());

        if datagram.len() > self.max_message_size {
            self.stats.record_oversized();
            tracing::debug!(
                peer = %peer,
                limit = self.max_message_size,
                "Oversized datagram dropped"
            );
            return;
        }

        if !self.sampler.should_forward() {
            self.stats.record_sampled_out();
            return;
        }

        self.stats.record_forwarded();
        self.broadcaster.publish(EventMessage::copy_from_slice(datagram));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    /// Replays queued datagrams, then fails like a dead socket
    struct ScriptedSource {
        datagrams: Mutex<VecDeque<&'static [u8]>>,
    }

    impl ScriptedSource {
        fn new(datagrams: &[&'static [u8]]) -> Self {
            Self {
                datagrams: Mutex::new(datagrams.iter().copied().collect()),
            }
        }
    }

    impl DatagramSource for ScriptedSource {
        fn recv_from<'a>(
            &'a self,
            buf: &'a mut [u8],
        ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a {
            async move {
                let next = self.datagrams.lock().pop_front();
                match next {
                    Some(datagram) => {
                        let len = datagram.len().min(buf.len());
                        buf[..len].copy_from_slice(&datagram[..len]);
                        Ok((len, SocketAddr::from(([127, 0, 0, 1], 9))))
                    }
                    None => Err(io::Error::new(io::ErrorKind::ConnectionReset, "socket gone")),
                }
            }
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_receive_error() {
        let broadcaster = Arc::new(Broadcaster::new());
        let mut handle = broadcaster.subscribe().unwrap();
        let ingester = Ingester::new(
            ScriptedSource::new(&[b"first", b"second"]),
            Sampler::all(),
            Arc::clone(&broadcaster),
        );

        let result = ingester.run().await;

        match result {
            Err(Error::Ingest(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected ingest error, got {:?}", other),
        }
        assert_eq!(handle.try_recv().unwrap().as_bytes(), b"first");
        assert_eq!(handle.try_recv().unwrap().as_bytes(), b"second");
        assert_eq!(ingester.stats().snapshot().forwarded, 2);
    }

    async fn ingester(sampler: Sampler) -> (Ingester, Arc<Broadcaster>) {
        let broadcaster = Arc::new(Broadcaster::new());
        let ingester = Ingester::bind(
            "127.0.0.1:0".parse().unwrap(),
            sampler,
            Arc::clone(&broadcaster),
        )
        .await
        .unwrap();
        (ingester, broadcaster)
    }

    #[tokio::test]
    async fn test_handle_datagram_forwards_copy() {
        let (ingester, broadcaster) = ingester(Sampler::all()).await;
        let mut handle = broadcaster.subscribe().unwrap();
        handle.activate();

        let mut buffer = *b"evt-1";
        ingester.handle_datagram(&buffer, "127.0.0.1:9".parse().unwrap());
        buffer.copy_from_slice(b"evt-2");

        assert_eq!(handle.try_recv().unwrap().as_bytes(), b"evt-1");
        assert_eq!(ingester.stats().snapshot().forwarded, 1);
    }

    #[tokio::test]
    async fn test_handle_datagram_drops_oversized() {
        let (ingester, broadcaster) = ingester(Sampler::all()).await;
        let ingester = ingester.max_message_size(4);
        let mut handle = broadcaster.subscribe().unwrap();

        ingester.handle_datagram(b"12345", "127.0.0.1:9".parse().unwrap());
        ingester.handle_datagram(b"1234", "127.0.0.1:9".parse().unwrap());

        assert_eq!(handle.try_recv().unwrap().as_bytes(), b"1234");
        assert!(handle.try_recv().is_none());

        let stats = ingester.stats().snapshot();
        assert_eq!(stats.datagrams_received, 2);
        assert_eq!(stats.oversized, 1);
        assert_eq!(stats.forwarded, 1);
    }

    #[tokio::test]
    async fn test_handle_datagram_sampled_out() {
        let (ingester, broadcaster) = ingester(Sampler::none()).await;
        let mut handle = broadcaster.subscribe().unwrap();

        ingester.handle_datagram(b"dropped", "127.0.0.1:9".parse().unwrap());

        assert!(handle.try_recv().is_none());
        assert_eq!(ingester.stats().snapshot().sampled_out, 1);
        assert_eq!(broadcaster.stats().published, 0);
    }

    #[tokio::test]
    async fn test_run_receives_from_socket() {
        let (ingester, broadcaster) = ingester(Sampler::all()).await;
        let addr = ingester.local_addr().unwrap();
        let mut handle = broadcaster.subscribe().unwrap();
        handle.activate();

        let task = tokio::spawn(async move { ingester.run().await });

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"hello", addr).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), handle.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.as_bytes(), b"hello");

        task.abort();
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let result = Ingester::bind(addr, Sampler::all(), Arc::new(Broadcaster::new())).await;
        assert!(matches!(result, Err(Error::Bind { what: "udp", .. })));
    }
}
