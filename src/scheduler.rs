// Long-running protocol-period driver.
//
// A single cooperative task that, every protocol period, calls
// direct_ping, waits out the dynamic direct-ping timeout, calls
// indirect_ping, waits out the remainder of the period, then calls
// end_of_protocol_period. A second timer drives list_request at its own
// configured interval. Inbound datagrams (decoded by the UDP/TCP listener
// tasks, which never touch engine state themselves) arrive over an
// unbounded channel that this same task drains, so `dispatch_datagram`
// never runs concurrently with the period phases or `list_request` —
// exactly the "at most one of direct_ping/indirect_ping/
// end_of_protocol_period/dispatch_datagram/list_request may execute at any
// time" exclusivity spec §5 requires, enforced by construction (a single
// task) rather than by lock discipline alone.

use crate::engine::Engine;
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub struct Scheduler {
    engine: Arc<Engine>,
    protocol_period: Duration,
    list_request_interval: Duration,
    inbound_rx: Option<mpsc::UnboundedReceiver<BytesMut>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    /// `inbound_rx` is the receiving half of the channel the UDP receive
    /// loop and TCP accept loop feed decoded datagrams into; this struct
    /// takes ownership so every inbound datagram is dispatched from the
    /// same task that drives the protocol period.
    pub fn new(
        engine: Arc<Engine>,
        protocol_period: Duration,
        list_request_interval: Duration,
        inbound_rx: mpsc::UnboundedReceiver<BytesMut>,
    ) -> Self {
        Scheduler {
            engine,
            protocol_period,
            list_request_interval,
            inbound_rx: Some(inbound_rx),
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Start the background driver. Idempotent-unsafe: calling twice leaks
    /// the first task's shutdown sender; callers should `stop` first.
    pub fn start(&mut self) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let engine = self.engine.clone();
        let protocol_period = self.protocol_period;
        let list_request_interval = self.list_request_interval;
        let mut inbound_rx = self.inbound_rx.take().expect("scheduler already started");

        let handle = tokio::spawn(async move {
            let mut list_request_timer = tokio::time::interval(list_request_interval);
            list_request_timer.tick().await; // first tick fires immediately

            loop {
                let period_start = Instant::now();

                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::info!("scheduler received shutdown, draining in-flight period");
                        break;
                    }
                    _ = run_period(&engine, protocol_period, &mut inbound_rx) => {}
                }

                let elapsed = period_start.elapsed();
                if elapsed < protocol_period {
                    tokio::select! {
                        _ = &mut shutdown_rx => {
                            tracing::info!("scheduler received shutdown during period wait");
                            break;
                        }
                        _ = tokio::time::sleep(protocol_period - elapsed) => {}
                        _ = list_request_timer.tick() => {
                            if let Err(e) = engine.list_request().await {
                                tracing::warn!(error = %e, "list request failed");
                            }
                        }
                        Some(datagram) = inbound_rx.recv() => {
                            if let Err(e) = engine.dispatch_datagram(datagram).await {
                                tracing::warn!(error = %e, "inbound datagram dispatch failed");
                            }
                        }
                    }
                }
            }

            if let Err(e) = engine.shutdown().await {
                tracing::warn!(error = %e, "graceful shutdown notification failed");
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
    }

    /// Cancel the pending sleep and wait for the in-flight operation and
    /// shutdown notification to drain.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

/// One protocol period: direct ping, wait out the dynamic timeout (while
/// still draining and dispatching any inbound datagram that arrives, since
/// an ack during this wait is exactly what resolves the pending ping),
/// indirect ping, then end-of-period bookkeeping.
async fn run_period(engine: &Arc<Engine>, protocol_period: Duration, inbound_rx: &mut mpsc::UnboundedReceiver<BytesMut>) {
    if let Err(e) = engine.direct_ping().await {
        tracing::debug!(error = %e, "direct ping phase skipped");
        return;
    }

    wait_draining_inbound(engine, engine.direct_ping_timeout().min(protocol_period), inbound_rx).await;

    if let Err(e) = engine.indirect_ping().await {
        tracing::debug!(error = %e, "indirect ping phase skipped");
    }

    if let Err(e) = engine.end_of_protocol_period().await {
        tracing::warn!(error = %e, "end of protocol period failed");
    }
}

/// Sleep for `duration`, dispatching any inbound datagram that arrives in
/// the meantime. Each dispatch runs to completion before the next iteration
/// of the select loop, so this never overlaps with another engine-touching
/// call on this task.
async fn wait_draining_inbound(engine: &Engine, duration: Duration, inbound_rx: &mut mpsc::UnboundedReceiver<BytesMut>) {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => break,
            Some(datagram) = inbound_rx.recv() => {
                if let Err(e) = engine.dispatch_datagram(datagram).await {
                    tracing::warn!(error = %e, "inbound datagram dispatch failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::config::MembershipConfig;
    use crate::crypto::KeyRing;
    use crate::error::Result;
    use crate::transport::{ReliableTransport, UnreliableTransport};
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl UnreliableTransport for NullTransport {
        async fn send(&self, _address: Address, _buffer: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn recv(&self, _buf: &mut [u8]) -> Result<(usize, Address)> {
            Err(crate::error::SwimError::NoTargetAvailable)
        }

        fn local_addr(&self) -> Result<Address> {
            Address::new("127.0.0.1:9".parse().unwrap())
        }
    }

    #[async_trait]
    impl ReliableTransport for NullTransport {
        async fn send(&self, _address: Address, _buffer: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn scheduler_starts_and_stops_cleanly() {
        let _ = KeyRing::new(vec![]);
        let mut config = MembershipConfig::default();
        config.advertised_address = "10.0.0.1:7946".parse().unwrap();
        config.protocol_period = Duration::from_millis(20);
        config.direct_ping_timeout = Duration::from_millis(5);

        let self_address = config.advertised().unwrap();
        let engine = Arc::new(
            Engine::new(self_address, config.clone(), Arc::new(NullTransport), Arc::new(NullTransport)).unwrap(),
        );

        let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(engine, config.protocol_period, config.list_request_interval, inbound_rx);
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn scheduler_dispatches_inbound_datagrams_fed_through_channel() {
        let mut config = MembershipConfig::default();
        config.advertised_address = "10.0.0.1:7946".parse().unwrap();
        config.bootstrap_members = vec!["10.0.0.2:7946".parse().unwrap()];
        config.protocol_period = Duration::from_millis(200);
        config.direct_ping_timeout = Duration::from_millis(150);

        let self_address = config.advertised().unwrap();
        let engine = Arc::new(
            Engine::new(self_address, config.clone(), Arc::new(NullTransport), Arc::new(NullTransport)).unwrap(),
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler::new(engine.clone(), config.protocol_period, config.list_request_interval, inbound_rx);
        scheduler.start();

        // Feed an Alive gossip message for an unknown address through the
        // inbound channel, the same path the UDP/TCP listener tasks use —
        // not by calling dispatch_datagram directly — and confirm the
        // scheduler's own task picks it up and applies it to engine state.
        let peer = Address::new("10.0.0.9:7946".parse().unwrap()).unwrap();
        let mut buf = bytes::BytesMut::new();
        crate::wire::Message::Alive { destination: peer, incarnation: crate::numeric::IncarnationNumber::ZERO }
            .append_to_buffer(&mut buf);
        let _ = inbound_tx.send(buf);

        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.stop().await;

        assert!(engine.members().iter().any(|m| m.address == peer));
    }
}
