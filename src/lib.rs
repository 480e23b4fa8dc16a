//! SWIM (Scalable Weakly-consistent Infection-style Process Group
//! Membership) cluster-membership and failure-detection library.
//!
//! A process ("member") maintains a view of the cluster's live membership
//! by running a periodic failure-detection protocol against random peers
//! and disseminating state changes via piggybacked gossip. External
//! systems use [`List`] to coordinate routing, sharding, and failover.

pub mod address;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod faulty;
pub mod gossip;
pub mod logging;
pub mod membership;
pub mod numeric;
pub mod picker;
pub mod rtt;
pub mod scheduler;
pub mod stats;
pub mod transport;
pub mod wire;

use crate::config::MembershipConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::membership::Member;
use crate::scheduler::Scheduler;
use crate::transport::{ReliableTransport, TcpTransport, UdpTransport, UnreliableTransport};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The startable/stoppable membership list external systems talk to.
///
/// Owns the protocol engine, its background scheduler, and the inbound
/// listener tasks; `members()` reports the current view without exposing
/// any of the engine's internal locking. The UDP receive loop and TCP
/// accept loop never call into the engine themselves — they only decode
/// and decrypt inbound bytes and forward them over a channel that the
/// scheduler's own task drains, so `dispatch_datagram` is never running on
/// a different task than `direct_ping`/`indirect_ping`/
/// `end_of_protocol_period`/`list_request` (spec §5's single-task
/// exclusivity requirement).
pub struct List {
    engine: Arc<Engine>,
    scheduler: Scheduler,
    udp_receive_loop: Option<JoinHandle<()>>,
    tcp_accept_loop: Option<JoinHandle<()>>,
}

impl List {
    /// Bind transports per `config`, spawn the inbound listener tasks, and
    /// construct the engine, but do not yet start the background
    /// scheduler — call `start()` for that.
    pub async fn new(config: MembershipConfig) -> Result<Self> {
        let self_address = config.advertised()?;
        let keys = Arc::new(config.key_ring()?);

        let udp = Arc::new(UdpTransport::bind(config.bind_address, keys.clone()).await?);
        let tcp = Arc::new(TcpTransport::new(keys));

        let unreliable: Arc<dyn UnreliableTransport> = udp.clone();
        let reliable: Arc<dyn ReliableTransport> = tcp.clone();
        let engine = Arc::new(Engine::new(self_address, config.clone(), unreliable, reliable)?);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(engine.clone(), config.protocol_period, config.list_request_interval, inbound_rx);

        let udp_receive_loop = Some(tokio::spawn(run_udp_receive_loop(
            udp,
            config.max_datagram_length_receive,
            inbound_tx.clone(),
        )));
        let tcp_accept_loop = Some(tokio::spawn(run_tcp_accept_loop(tcp, config.bind_address, inbound_tx)));

        Ok(List { engine, scheduler, udp_receive_loop, tcp_accept_loop })
    }

    /// Start the background protocol-period driver.
    pub fn start(&mut self) {
        self.scheduler.start();
    }

    /// Cancel pending sleeps, drain in-flight operations, emit a final
    /// departure notification to every known peer, and stop listening.
    pub async fn stop(&mut self) {
        self.scheduler.stop().await;
        if let Some(handle) = self.udp_receive_loop.take() {
            handle.abort();
        }
        if let Some(handle) = self.tcp_accept_loop.take() {
            handle.abort();
        }
    }

    /// The current set of members this process believes are alive.
    pub fn members(&self) -> Vec<Member> {
        self.engine.members()
    }

    /// Handle for the underlying protocol engine, for advanced callers
    /// (e.g. test harnesses feeding synthetic datagrams).
    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }
}

/// Only reads and decrypts datagrams (already done by `UdpTransport::recv`)
/// and forwards them to the scheduler's task; never touches engine state.
async fn run_udp_receive_loop(udp: Arc<UdpTransport>, max_datagram_length: usize, inbound_tx: mpsc::UnboundedSender<BytesMut>) {
    let mut buf = vec![0u8; max_datagram_length];
    loop {
        match udp.recv(&mut buf).await {
            Ok((n, _from)) => {
                let datagram = BytesMut::from(&buf[..n]);
                if inbound_tx.send(datagram).is_err() {
                    tracing::warn!("inbound channel closed, dropping udp datagram");
                }
            }
            Err(e) => tracing::warn!(error = %e, "udp receive failed"),
        }
    }
}

/// Accepts connections and decrypts framed payloads (`TcpTransport::serve`
/// spawns one task per connection purely for that I/O), then forwards the
/// decoded bytes to the scheduler's task; never touches engine state.
async fn run_tcp_accept_loop(tcp: Arc<TcpTransport>, bind_address: std::net::SocketAddr, inbound_tx: mpsc::UnboundedSender<BytesMut>) {
    let result = tcp
        .serve(bind_address, move |_from, payload| {
            let datagram = BytesMut::from(&payload[..]);
            if inbound_tx.send(datagram).is_err() {
                tracing::warn!("inbound channel closed, dropping reliable payload");
            }
        })
        .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, "tcp accept loop exited");
    }
}
