//! Relay session: live routing between a transport and the engine
//!
//! Two tasks run per session. The reader polls the transport and forwards
//! raw chunks; the engine task owns the [`RoutingEngine`] and the frame
//! decoder, routes every complete status frame and writes the control frame
//! back. Table edits arrive as commands on the engine task, so a frame is
//! always routed against one consistent table.
//!
//! Both tasks share the transport without a lock around it: a write never
//! waits for a poll in progress. Any receive error ends the session.

use crate::core::protocol::frame::{FrameDecoder, InboundFrame, OutboundFrame, INBOUND_MIN_LEN};
use crate::core::routing::{check_index, RoutingEngine, RoutingError, RoutingTable};
use crate::core::transport::{TransportError, TransportStats, TransportTrait};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type SharedTransport = Arc<dyn TransportTrait>;

/// Relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Rejected table edit
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// The session has stopped
    #[error("Relay session is not running")]
    Closed,
}

/// Relay runtime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Bytes per status frame
    pub frame_len: usize,
    /// Write a control frame back for every status frame
    pub auto_respond: bool,
    /// Resend the latest control frame at this interval
    pub repeat_interval: Option<Duration>,
    /// Reader pause after an empty poll
    pub idle_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            frame_len: INBOUND_MIN_LEN,
            auto_respond: true,
            repeat_interval: None,
            idle_backoff: Duration::from_millis(2),
        }
    }
}

/// Relay events
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A status frame was routed
    FrameRouted {
        /// Frame as received
        inbound: InboundFrame,
        /// Control frame produced for it
        outbound: OutboundFrame,
    },
    /// Bytes were dropped while looking for a frame marker
    FrameRejected {
        /// Bytes dropped by this chunk
        discarded: u64,
    },
    /// A routing table took effect
    TableChanged {
        /// Number of enabled entries
        active: usize,
    },
    /// Transport failure
    TransportError(String),
    /// The engine task has exited
    Stopped,
}

/// Point-in-time view of the engine task
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    /// Table in effect
    pub table: RoutingTable,
    /// Status frames routed
    pub frames_routed: u64,
    /// Control frames written to the transport
    pub responses_sent: u64,
    /// Bytes dropped by the decoder
    pub bytes_discarded: u64,
    /// Most recent status frame
    pub last_inbound: Option<InboundFrame>,
    /// Most recent control frame
    pub last_outbound: Option<OutboundFrame>,
    /// Input bits whose latch currently holds 1
    pub latched: Vec<usize>,
}

/// Engine commands
#[derive(Debug)]
enum RelayCommand {
    ReplaceTable(RoutingTable),
    SetOutput { input_bit: usize, output_bit: usize },
    SetEnabled { input_bit: usize, enabled: bool },
    SetLatch { input_bit: usize, latch: bool },
    ResetLatches,
    Shutdown,
}

/// A running relay
pub struct RelaySession {
    transport: SharedTransport,
    cmd_tx: mpsc::Sender<RelayCommand>,
    event_tx: broadcast::Sender<RelayEvent>,
    snapshot: Arc<RwLock<EngineSnapshot>>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    engine: Option<JoinHandle<()>>,
}

impl RelaySession {
    /// Connect the transport if needed and start relaying
    pub async fn start(
        transport: Box<dyn TransportTrait>,
        engine: RoutingEngine,
        config: RelayConfig,
    ) -> Result<Self, RelayError> {
        if !transport.is_connected() {
            transport.connect().await?;
        }
        tracing::info!("Relay started on {}", transport.connection_info());

        let transport: SharedTransport = Arc::from(transport);
        let (event_tx, _) = broadcast::channel(1024);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (chunk_tx, chunk_rx) = mpsc::channel(256);
        let running = Arc::new(AtomicBool::new(true));
        let snapshot = Arc::new(RwLock::new(EngineSnapshot {
            table: engine.table().clone(),
            ..EngineSnapshot::default()
        }));

        let reader = tokio::spawn(read_loop(
            transport.clone(),
            chunk_tx,
            event_tx.clone(),
            running.clone(),
            config.idle_backoff,
        ));

        let task = EngineTask {
            engine,
            decoder: FrameDecoder::new(config.frame_len),
            transport: transport.clone(),
            event_tx: event_tx.clone(),
            snapshot: snapshot.clone(),
            auto_respond: config.auto_respond,
        };
        let engine = tokio::spawn(task.run(chunk_rx, cmd_rx, config.repeat_interval));

        Ok(Self {
            transport,
            cmd_tx,
            event_tx,
            snapshot,
            running,
            reader: Some(reader),
            engine: Some(engine),
        })
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_tx.subscribe()
    }

    /// Copy of the engine state
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.read().clone()
    }

    /// Whether both tasks are still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.cmd_tx.is_closed()
    }

    /// Swap in a new routing table
    pub async fn replace_table(&self, table: RoutingTable) -> Result<(), RelayError> {
        self.command(RelayCommand::ReplaceTable(table)).await
    }

    /// Retarget one input bit
    pub async fn set_output(&self, input_bit: usize, output_bit: usize) -> Result<(), RelayError> {
        check_index(input_bit)?;
        check_index(output_bit)?;
        self.command(RelayCommand::SetOutput {
            input_bit,
            output_bit,
        })
        .await
    }

    /// Enable or disable one input bit
    pub async fn set_enabled(&self, input_bit: usize, enabled: bool) -> Result<(), RelayError> {
        check_index(input_bit)?;
        self.command(RelayCommand::SetEnabled { input_bit, enabled })
            .await
    }

    /// Switch latch mode of one input bit
    pub async fn set_latch(&self, input_bit: usize, latch: bool) -> Result<(), RelayError> {
        check_index(input_bit)?;
        self.command(RelayCommand::SetLatch { input_bit, latch })
            .await
    }

    /// Clear every latch
    pub async fn reset_latches(&self) -> Result<(), RelayError> {
        self.command(RelayCommand::ResetLatches).await
    }

    async fn command(&self, cmd: RelayCommand) -> Result<(), RelayError> {
        self.cmd_tx.send(cmd).await.map_err(|_| RelayError::Closed)
    }

    /// Stop both tasks, close the transport and return its statistics
    pub async fn shutdown(mut self) -> TransportStats {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(RelayCommand::Shutdown).await;

        for handle in [self.engine.take(), self.reader.take()].into_iter().flatten() {
            if let Err(e) = handle.await {
                tracing::error!("Relay task failed: {}", e);
            }
        }

        let stats = self.transport.stats();
        if let Err(e) = self.transport.disconnect().await {
            tracing::warn!("Disconnect failed: {}", e);
        }
        tracing::info!(
            "Relay stopped ({} bytes in, {} bytes out)",
            stats.bytes_received,
            stats.bytes_sent
        );
        stats
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

// ============ Reader task ============

async fn read_loop(
    transport: SharedTransport,
    chunk_tx: mpsc::Sender<Bytes>,
    event_tx: broadcast::Sender<RelayEvent>,
    running: Arc<AtomicBool>,
    idle_backoff: Duration,
) {
    while running.load(Ordering::SeqCst) {
        match transport.receive().await {
            Ok(bytes) if bytes.is_empty() => tokio::time::sleep(idle_backoff).await,
            Ok(bytes) => {
                if chunk_tx.send(bytes).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                if matches!(e, TransportError::Disconnected) {
                    tracing::warn!("Controller disconnected");
                } else {
                    tracing::error!("Receive failed, stopping relay: {}", e);
                }
                running.store(false, Ordering::SeqCst);
                let _ = event_tx.send(RelayEvent::TransportError(e.to_string()));
                break;
            }
        }
    }
    // Dropping chunk_tx ends the engine task
    tracing::debug!("Reader task exited");
}

// ============ Engine task ============

struct EngineTask {
    engine: RoutingEngine,
    decoder: FrameDecoder,
    transport: SharedTransport,
    event_tx: broadcast::Sender<RelayEvent>,
    snapshot: Arc<RwLock<EngineSnapshot>>,
    auto_respond: bool,
}

impl EngineTask {
    async fn run(
        mut self,
        mut chunk_rx: mpsc::Receiver<Bytes>,
        mut cmd_rx: mpsc::Receiver<RelayCommand>,
        repeat_interval: Option<Duration>,
    ) {
        let mut repeat = repeat_interval.map(|period| {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            // Commands first: an edit issued before a frame arrives applies to it
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(RelayCommand::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },
                chunk = chunk_rx.recv() => match chunk {
                    Some(chunk) => self.on_chunk(&chunk).await,
                    None => break,
                },
                _ = next_tick(repeat.as_mut()) => self.repeat_last().await,
            }
        }

        // Close both channels before announcing the stop
        drop(chunk_rx);
        drop(cmd_rx);
        let _ = self.event_tx.send(RelayEvent::Stopped);
        tracing::debug!("Engine task exited");
    }

    async fn on_chunk(&mut self, chunk: &[u8]) {
        let discarded_before = self.decoder.discarded();
        let frames = self.decoder.push(chunk);
        let discarded = self.decoder.discarded() - discarded_before;
        if discarded > 0 {
            self.snapshot.write().bytes_discarded += discarded;
            let _ = self.event_tx.send(RelayEvent::FrameRejected { discarded });
        }

        for inbound in frames {
            let outbound = self.engine.process(&inbound);
            {
                let mut snapshot = self.snapshot.write();
                snapshot.frames_routed += 1;
                snapshot.last_inbound = Some(inbound.clone());
                snapshot.last_outbound = Some(outbound);
                snapshot.latched = self.engine.latch_states().latched_on().collect();
            }
            if self.auto_respond {
                self.send(&outbound).await;
            }
            let _ = self.event_tx.send(RelayEvent::FrameRouted { inbound, outbound });
        }
    }

    fn on_command(&mut self, cmd: RelayCommand) {
        let result = match cmd {
            RelayCommand::ReplaceTable(table) => {
                self.engine.replace_table(table);
                Ok(())
            }
            RelayCommand::SetOutput {
                input_bit,
                output_bit,
            } => self.engine.set_output(input_bit, output_bit),
            RelayCommand::SetEnabled { input_bit, enabled } => {
                self.engine.set_enabled(input_bit, enabled)
            }
            RelayCommand::SetLatch { input_bit, latch } => self.engine.set_latch(input_bit, latch),
            RelayCommand::ResetLatches => {
                self.engine.reset_latches();
                Ok(())
            }
            RelayCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!("Routing command rejected: {}", e);
            return;
        }

        let active = self.engine.table().active_count();
        {
            let mut snapshot = self.snapshot.write();
            snapshot.table = self.engine.table().clone();
            snapshot.latched = self.engine.latch_states().latched_on().collect();
        }
        let _ = self.event_tx.send(RelayEvent::TableChanged { active });
    }

    async fn repeat_last(&mut self) {
        let last = self.snapshot.read().last_outbound;
        if let Some(outbound) = last {
            tracing::trace!("Repeating {:?}", outbound);
            self.send(&outbound).await;
        }
    }

    async fn send(&mut self, outbound: &OutboundFrame) {
        match self.transport.send(outbound.as_ref()).await {
            Ok(_) => self.snapshot.write().responses_sent += 1,
            Err(e) => {
                tracing::error!("Send failed: {}", e);
                let _ = self.event_tx.send(RelayEvent::TransportError(e.to_string()));
            }
        }
    }
}

async fn next_tick(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted transport: hands out queued chunks, records writes
    #[derive(Clone, Default)]
    struct Loopback {
        incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        connected: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TransportTrait for Loopback {
        async fn connect(&self) -> Result<(), TransportError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
            self.written.lock().push(data.to_vec());
            Ok(data.len())
        }

        async fn receive(&self) -> Result<Bytes, TransportError> {
            let next = self.incoming.lock().pop_front();
            Ok(next.map(Bytes::from).unwrap_or_default())
        }

        fn connection_info(&self) -> String {
            "loopback".to_string()
        }

        fn stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    fn status(d0: u8) -> Vec<u8> {
        let mut raw = vec![0u8; INBOUND_MIN_LEN];
        raw[0] = 0x5A;
        raw[1] = d0;
        raw
    }

    async fn wait_routed(events: &mut broadcast::Receiver<RelayEvent>) -> OutboundFrame {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let RelayEvent::FrameRouted { outbound, .. } = event {
                return outbound;
            }
        }
    }

    #[tokio::test]
    async fn test_routes_and_responds() {
        let transport = Loopback::default();
        let mut table = RoutingTable::new();
        table.set_enabled(0, true).unwrap();
        table.set_output(0, 9).unwrap();

        let session = RelaySession::start(
            Box::new(transport.clone()),
            RoutingEngine::new(table),
            RelayConfig::default(),
        )
        .await
        .unwrap();
        let mut events = session.subscribe();
        assert!(transport.is_connected());

        transport.incoming.lock().push_back(status(0x80));
        let outbound = wait_routed(&mut events).await;
        assert!(outbound.output(9));
        assert!(!outbound.output(0));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.frames_routed, 1);
        assert_eq!(snapshot.last_outbound, Some(outbound));

        let stats = session.shutdown().await;
        assert_eq!(stats, TransportStats::default());
        assert!(!transport.is_connected());
        assert_eq!(transport.written.lock().as_slice(), &[outbound.as_ref().to_vec()]);
    }

    #[tokio::test]
    async fn test_split_chunks_and_noise() {
        let transport = Loopback::default();
        let session = RelaySession::start(
            Box::new(transport.clone()),
            RoutingEngine::default(),
            RelayConfig {
                auto_respond: false,
                ..RelayConfig::default()
            },
        )
        .await
        .unwrap();
        let mut events = session.subscribe();

        let frame = status(0xFF);
        let mut first = vec![0x00, 0x13];
        first.extend_from_slice(&frame[..10]);
        {
            let mut incoming = transport.incoming.lock();
            incoming.push_back(first);
            incoming.push_back(frame[10..].to_vec());
        }

        wait_routed(&mut events).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.bytes_discarded, 2);
        assert_eq!(snapshot.responses_sent, 0);

        session.shutdown().await;
        assert!(transport.written.lock().is_empty());
    }

    #[tokio::test]
    async fn test_table_edits_apply_in_order() {
        let transport = Loopback::default();
        let session = RelaySession::start(
            Box::new(transport.clone()),
            RoutingEngine::default(),
            RelayConfig::default(),
        )
        .await
        .unwrap();
        let mut events = session.subscribe();

        assert!(matches!(
            session.set_enabled(192, true).await,
            Err(RelayError::Routing(_))
        ));
        session.set_enabled(7, true).await.unwrap();
        session.set_latch(7, true).await.unwrap();

        transport.incoming.lock().push_back(status(0x01));
        assert!(wait_routed(&mut events).await.output(7));
        transport.incoming.lock().push_back(status(0x00));
        assert!(wait_routed(&mut events).await.output(7));
        assert_eq!(session.snapshot().latched, vec![7]);

        session.reset_latches().await.unwrap();
        transport.incoming.lock().push_back(status(0x00));
        assert!(!wait_routed(&mut events).await.output(7));

        session.shutdown().await;
    }
}
