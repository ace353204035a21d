//! The session owner: sole mutator of connection state, sequence counters,
//! and timers. Runs as one Tokio task driven by a `select!` loop over
//! commands from the public [`crate::client::FixClient`] handle, frames
//! forwarded by a cooperating connection task, and timer deadlines.

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::codec::Codec;
use crate::config::SessionConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::FixError;
use crate::events::{EventBus, FixEvent};
use crate::ids::IdGenerator;
use crate::logging::SessionLogger;
use crate::message_builder::MessageBuilder;
use crate::sequence::{SequenceManager, SequenceStore, SequenceStream};
use crate::transport::{connect_tcp, Transport};

/// Session lifecycle state. Owned exclusively by [`SessionOwner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    LoggedIn,
    LoggingOut,
    SequenceReset,
    Error,
}

/// Opens a new transport on demand, so the session owner can reconnect
/// without the caller getting involved.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> io::Result<Box<dyn Transport>>;
}

/// Default connector: opens a fresh TCP connection to `host:port`.
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let transport = connect_tcp(&self.host, self.port, Duration::from_secs(30)).await?;
        Ok(Box::new(transport))
    }
}

/// A request sent from a [`crate::client::FixClient`] handle to the owner task.
pub(crate) enum Command {
    Connect,
    Disconnect,
    SubscribeMarketData {
        symbols: Vec<String>,
        entry_types: Vec<String>,
        subscription_type: String,
        respond_to: oneshot::Sender<Result<(), FixError>>,
    },
    RequestSecurityList {
        product: String,
        respond_to: oneshot::Sender<Result<(), FixError>>,
    },
    RequestTradingSessionStatus {
        respond_to: oneshot::Sender<Result<(), FixError>>,
    },
    RequestSecurityStatus {
        symbol: String,
        respond_to: oneshot::Sender<Result<(), FixError>>,
    },
    Shutdown,
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn recv_optional(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}

/// Multiplexes one transport between a writer (fed by the owner) and a
/// reader (forwarding complete frames to the owner). Moves no session
/// state; its only job is turning bytes into frames and frames into bytes.
async fn run_connection(
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<String>,
    codec: Codec,
) {
    let mut buf = bytes::BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if transport.write_all(frame.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        transport.shutdown().await;
                        break;
                    }
                }
            }
            read_result = transport.read(&mut chunk) => {
                match read_result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        for frame in codec.split(&mut buf) {
                            if inbound.send(frame).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

pub struct SessionOwner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    logger: Arc<dyn SessionLogger>,
    ids: Arc<dyn IdGenerator>,
    sequence_store: Arc<dyn SequenceStore>,
    codec: Codec,
    sequences: SequenceManager,
    dispatcher: Dispatcher,
    builder: MessageBuilder,
    commands: mpsc::Receiver<Command>,
    outbound: Option<mpsc::Sender<String>>,
    inbound: Option<mpsc::Receiver<String>>,
    state: SessionState,
    last_activity: Instant,
    test_requests_outstanding: u32,
    heartbeat_deadline: Option<Instant>,
    logon_delay_deadline: Option<Instant>,
    reconnect_deadline: Option<Instant>,
    reconnect_delay: Duration,
    shutting_down: bool,
    auto_reconnect: bool,
    trading_date: String,
}

impl SessionOwner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        logger: Arc<dyn SessionLogger>,
        ids: Arc<dyn IdGenerator>,
        sequence_store: Arc<dyn SequenceStore>,
        events: EventBus,
        commands: mpsc::Receiver<Command>,
        trading_date: String,
    ) -> Self {
        let sequences = SequenceManager::new(config.security_list_initial_outgoing);
        let builder = MessageBuilder::new(config.sender_comp_id.clone(), config.target_comp_id.clone());
        let reconnect_delay = Duration::from_secs(config.reconnect_delay_secs);

        Self {
            config,
            connector,
            logger,
            ids,
            sequence_store,
            codec: Codec::new(),
            sequences,
            dispatcher: Dispatcher::new(events),
            builder,
            commands,
            outbound: None,
            inbound: None,
            state: SessionState::Disconnected,
            last_activity: Instant::now(),
            test_requests_outstanding: 0,
            heartbeat_deadline: None,
            logon_delay_deadline: None,
            reconnect_deadline: None,
            reconnect_delay,
            shutting_down: false,
            auto_reconnect: true,
            trading_date,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn run(mut self) {
        self.restore_sequences().await;

        loop {
            let heartbeat_deadline = self.heartbeat_deadline;
            let logon_deadline = self.logon_delay_deadline;
            let reconnect_deadline = self.reconnect_deadline;

            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                frame = recv_optional(&mut self.inbound) => {
                    match frame {
                        Some(frame) => self.handle_frame(frame).await,
                        None => {
                            self.inbound = None;
                            self.close_transport().await;
                        }
                    }
                }
                _ = sleep_until_or_pending(heartbeat_deadline) => {
                    self.on_heartbeat_tick().await;
                }
                _ = sleep_until_or_pending(logon_deadline) => {
                    self.logon_delay_deadline = None;
                    self.send_logon().await;
                }
                _ = sleep_until_or_pending(reconnect_deadline) => {
                    self.reconnect_deadline = None;
                    self.do_connect().await;
                }
            }

            if self.shutting_down && matches!(self.state, SessionState::Disconnected) {
                break;
            }
        }
    }

    async fn restore_sequences(&mut self) {
        match self.sequence_store.load(&self.trading_date).await {
            Ok(Some(record)) => self.sequences.restore(record),
            Ok(None) => {}
            Err(e) => self.logger.warn("failed to load persisted sequence state", &[("error", &e.to_string())]),
        }
    }

    async fn persist_sequences(&self) {
        let record = self.sequences.snapshot();
        if let Err(e) = self.sequence_store.save(&self.trading_date, record).await {
            self.logger.warn("failed to persist sequence state", &[("error", &e.to_string())]);
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                self.auto_reconnect = true;
                if matches!(self.state, SessionState::Disconnected) {
                    self.do_connect().await;
                }
            }
            Command::Disconnect => {
                self.auto_reconnect = false;
                self.reconnect_deadline = None;
                self.begin_disconnect().await;
            }
            Command::SubscribeMarketData { symbols, entry_types, subscription_type, respond_to } => {
                let result = self.send_market_data_request(symbols, entry_types, subscription_type).await;
                let _ = respond_to.send(result);
            }
            Command::RequestSecurityList { product, respond_to } => {
                let result = self.send_security_list_request(product).await;
                let _ = respond_to.send(result);
            }
            Command::RequestTradingSessionStatus { respond_to } => {
                let result = self.send_trading_session_status_request().await;
                let _ = respond_to.send(result);
            }
            Command::RequestSecurityStatus { symbol, respond_to } => {
                let result = self.send_security_status_request(symbol).await;
                let _ = respond_to.send(result);
            }
            Command::Shutdown => {
                self.shutting_down = true;
                self.begin_disconnect().await;
            }
        }
    }

    async fn do_connect(&mut self) {
        self.state = SessionState::Connecting;
        let attempt = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            self.connector.connect(),
        )
        .await;

        match attempt {
            Ok(Ok(transport)) => {
                let (outbound_tx, outbound_rx) = mpsc::channel(64);
                let (inbound_tx, inbound_rx) = mpsc::channel(64);
                tokio::spawn(run_connection(transport, outbound_rx, inbound_tx, self.codec));
                self.outbound = Some(outbound_tx);
                self.inbound = Some(inbound_rx);
                self.state = SessionState::Connected;
                self.last_activity = Instant::now();
                self.dispatcher.events().publish(FixEvent::Connected);
                self.logon_delay_deadline = Some(Instant::now() + Duration::from_millis(500));
            }
            Ok(Err(e)) => {
                self.logger.error("connect failed", &[("error", &e.to_string())]);
                self.state = SessionState::Disconnected;
                self.dispatcher.events().publish(FixEvent::Error { message: e.to_string() });
                self.schedule_reconnect();
            }
            Err(_) => {
                self.logger.error("connect timed out", &[]);
                self.state = SessionState::Disconnected;
                self.dispatcher.events().publish(FixEvent::Error {
                    message: format!("connection timed out after {}ms", self.config.connect_timeout_ms),
                });
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        use rand::Rng;
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        self.reconnect_deadline = Some(Instant::now() + self.reconnect_delay + jitter);
        let max = Duration::from_secs(self.config.reconnect_delay_max_secs);
        self.reconnect_delay = (self.reconnect_delay * 2).min(max);
    }

    async fn write_frame(&mut self, frame: String) -> Result<(), FixError> {
        match &self.outbound {
            Some(tx) => {
                let write_timeout = Duration::from_secs(self.config.write_timeout_secs);
                match tokio::time::timeout(write_timeout, tx.send(frame)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(FixError::NotConnected),
                    Err(_) => Err(FixError::TransportError(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "write timed out",
                    ))),
                }
            }
            None => Err(FixError::NotConnected),
        }
    }

    async fn send_logon(&mut self) {
        let seq = self.sequences.next(SequenceStream::Regular);
        let frame = self.builder.logon(seq, &self.config);
        if self.write_frame(frame).await.is_ok() {
            self.sequences.advance(SequenceStream::Regular);
            self.persist_sequences().await;
        } else {
            self.logger.error("failed to send logon", &[]);
            self.close_transport().await;
        }
    }

    async fn send_market_data_request(
        &mut self,
        symbols: Vec<String>,
        entry_types: Vec<String>,
        subscription_type: String,
    ) -> Result<(), FixError> {
        if !matches!(self.state, SessionState::LoggedIn) {
            return Err(FixError::NotLoggedIn);
        }
        self.sequences.switch_to(SequenceStream::MarketData);
        let seq = self.sequences.next(SequenceStream::MarketData);
        let req_id = self.ids.next_id();
        let frame = self.builder.market_data_request(
            seq,
            &req_id,
            &subscription_type,
            &symbols,
            &entry_types,
            &self.config.party_id,
        );
        self.write_frame(frame).await?;
        self.sequences.advance(SequenceStream::MarketData);
        self.sequences.revert_to_regular();
        self.persist_sequences().await;
        Ok(())
    }

    async fn send_security_list_request(&mut self, product: String) -> Result<(), FixError> {
        if !matches!(self.state, SessionState::LoggedIn) {
            return Err(FixError::NotLoggedIn);
        }
        self.sequences.switch_to(SequenceStream::SecurityList);
        let seq = self.sequences.next(SequenceStream::SecurityList);
        let req_id = self.ids.next_id();
        let frame = self.builder.security_list_request(seq, &req_id, "0", &product);
        self.write_frame(frame).await?;
        self.sequences.advance(SequenceStream::SecurityList);
        self.sequences.revert_to_regular();
        self.persist_sequences().await;
        Ok(())
    }

    async fn send_trading_session_status_request(&mut self) -> Result<(), FixError> {
        if !matches!(self.state, SessionState::LoggedIn) {
            return Err(FixError::NotLoggedIn);
        }
        let seq = self.sequences.next(SequenceStream::Regular);
        let req_id = self.ids.next_id();
        let frame = self.builder.trading_session_status_request(seq, &req_id);
        self.write_frame(frame).await?;
        self.sequences.advance(SequenceStream::Regular);
        self.persist_sequences().await;
        Ok(())
    }

    async fn send_security_status_request(&mut self, symbol: String) -> Result<(), FixError> {
        if !matches!(self.state, SessionState::LoggedIn) {
            return Err(FixError::NotLoggedIn);
        }
        let seq = self.sequences.next(SequenceStream::Regular);
        let req_id = self.ids.next_id();
        let frame = self.builder.security_status_request(seq, &req_id, &symbol);
        self.write_frame(frame).await?;
        self.sequences.advance(SequenceStream::Regular);
        self.persist_sequences().await;
        Ok(())
    }

    async fn handle_frame(&mut self, raw: String) {
        self.last_activity = Instant::now();

        let parsed = match self.codec.parse(&raw) {
            Ok(p) => p,
            Err(e) => {
                self.logger.warn("dropping corrupt frame", &[("error", &e.to_string())]);
                return;
            }
        };

        let outcome = self.dispatcher.dispatch(&parsed, &mut self.sequences, self.logger.as_ref());
        self.persist_sequences().await;

        match outcome {
            DispatchOutcome::LogonAck { reset_outgoing } => {
                if let Some(outgoing) = reset_outgoing {
                    self.sequences.reset_all(outgoing);
                }
                self.state = SessionState::LoggedIn;
                self.test_requests_outstanding = 0;
                self.reconnect_delay = Duration::from_secs(self.config.reconnect_delay_secs);
                self.heartbeat_deadline =
                    Some(Instant::now() + Duration::from_secs(self.config.heartbeat_interval_secs));
            }
            DispatchOutcome::HeartbeatReceived => {
                self.test_requests_outstanding = 0;
            }
            DispatchOutcome::TestRequestReceived { test_req_id } => {
                let seq = self.sequences.next(SequenceStream::Regular);
                let frame = self.builder.heartbeat(seq, Some(&test_req_id));
                if self.write_frame(frame).await.is_ok() {
                    self.sequences.advance(SequenceStream::Regular);
                }
            }
            DispatchOutcome::SequenceError { stream, expected } => {
                let incoming = self.sequences.incoming(stream);
                self.sequences.reset(stream, expected, incoming);
                self.logger.warn(
                    "sequence error reported by counterparty; reconnecting",
                    &[("stream", &format!("{stream:?}")), ("expected", &expected.to_string())],
                );
                self.state = SessionState::SequenceReset;
                self.close_transport_with_delay(Duration::from_secs(2)).await;
            }
            DispatchOutcome::LogoutReceived => {
                self.close_transport().await;
            }
            DispatchOutcome::Continue => {}
        }
    }

    async fn on_heartbeat_tick(&mut self) {
        let interval = Duration::from_secs(self.config.heartbeat_interval_secs);
        let silence = Instant::now().saturating_duration_since(self.last_activity);

        if silence > interval * 2 {
            self.test_requests_outstanding += 1;
            if self.test_requests_outstanding > self.config.max_test_request_retries {
                self.logger.error("peer unresponsive after repeated test requests", &[]);
                self.close_transport().await;
                self.heartbeat_deadline = None;
                return;
            }
            let seq = self.sequences.next(SequenceStream::Regular);
            let req_id = self.ids.next_id();
            let frame = self.builder.test_request(seq, &req_id);
            if self.write_frame(frame).await.is_ok() {
                self.sequences.advance(SequenceStream::Regular);
            }
        } else {
            let seq = self.sequences.next(SequenceStream::Regular);
            let frame = self.builder.heartbeat(seq, None);
            if self.write_frame(frame).await.is_ok() {
                self.sequences.advance(SequenceStream::Regular);
            }
        }

        self.heartbeat_deadline = Some(Instant::now() + interval);
    }

    async fn begin_disconnect(&mut self) {
        if matches!(self.state, SessionState::LoggedIn) {
            self.state = SessionState::LoggingOut;
            let seq = self.sequences.next(SequenceStream::Regular);
            let frame = self.builder.logout(seq, None);
            let _ = self.write_frame(frame).await;
            self.sequences.advance(SequenceStream::Regular);
        }
        self.close_transport().await;
    }

    async fn close_transport(&mut self) {
        self.outbound = None;
        self.inbound = None;
        self.heartbeat_deadline = None;
        self.logon_delay_deadline = None;
        let was_connected = !matches!(self.state, SessionState::Disconnected);
        self.state = SessionState::Disconnected;
        if was_connected {
            self.dispatcher.events().publish(FixEvent::Disconnected);
        }
        if !self.shutting_down && self.auto_reconnect {
            self.schedule_reconnect();
        }
    }

    async fn close_transport_with_delay(&mut self, delay: Duration) {
        self.outbound = None;
        self.inbound = None;
        self.heartbeat_deadline = None;
        self.logon_delay_deadline = None;
        self.state = SessionState::Disconnected;
        self.dispatcher.events().publish(FixEvent::Disconnected);
        self.reconnect_deadline = Some(Instant::now() + delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::test_support::SequentialIdGenerator;
    use crate::logging::test_support::RecordingLogger;
    use crate::sequence::InMemorySequenceStore;
    use crate::transport::test_support::{duplex_pair, DuplexTransport};

    struct FixedConnector {
        transport: std::sync::Mutex<Option<DuplexTransport>>,
    }

    #[async_trait]
    impl Connector for FixedConnector {
        async fn connect(&self) -> io::Result<Box<dyn Transport>> {
            let transport = self
                .transport
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "already consumed"))?;
            Ok(Box::new(transport))
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            host: "unused".into(),
            port: 0,
            sender_comp_id: "realtime".into(),
            target_comp_id: "NMDUFISQ0001".into(),
            username: "realtime".into(),
            password: "secret".into(),
            heartbeat_interval_secs: 30,
            reset_on_logon: true,
            connect_timeout_ms: 2000,
            party_id: "realtime".into(),
            on_behalf_of_comp_id: None,
            raw_data: None,
            raw_data_length: None,
            max_test_request_retries: 3,
            reconnect_delay_secs: 5,
            reconnect_delay_max_secs: 30,
            write_timeout_secs: 5,
            security_list_initial_outgoing: 2,
        }
    }

    #[tokio::test]
    async fn full_logon_handshake_reaches_logged_in_state() {
        let (client_side, mut server_side) = duplex_pair(8192);
        let connector = Arc::new(FixedConnector { transport: std::sync::Mutex::new(Some(client_side)) });
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let events = EventBus::new();

        let owner = SessionOwner::new(
            test_config(),
            connector,
            Arc::new(RecordingLogger::default()),
            Arc::new(SequentialIdGenerator::new("REQ")),
            Arc::new(InMemorySequenceStore),
            events.clone(),
            commands_rx,
            "20260801".to_string(),
        );

        let mut logon_events = events.subscribe("logon");
        tokio::spawn(owner.run());

        commands_tx.send(Command::Connect).await.unwrap();

        let mut buf = [0u8; 4096];
        let n = server_side.read(&mut buf).await.unwrap();
        let logon_request = std::str::from_utf8(&buf[..n]).unwrap().to_string();
        assert!(logon_request.contains("35=A"));

        let codec = Codec::new();
        let ack = codec.serialize("A", "NMDUFISQ0001", "realtime", 1, &[(141, "Y".into())]);
        server_side.write_all(ack.as_bytes()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), logon_events.recv())
            .await
            .expect("logon event should arrive")
            .unwrap();
        assert_eq!(event, FixEvent::Logon);
    }

    #[tokio::test]
    async fn counterparty_closing_the_socket_is_detected_without_waiting_for_heartbeat_timeout() {
        let (client_side, server_side) = duplex_pair(8192);
        let connector = Arc::new(FixedConnector { transport: std::sync::Mutex::new(Some(client_side)) });
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let events = EventBus::new();

        let owner = SessionOwner::new(
            test_config(),
            connector,
            Arc::new(RecordingLogger::default()),
            Arc::new(SequentialIdGenerator::new("REQ")),
            Arc::new(InMemorySequenceStore),
            events.clone(),
            commands_rx,
            "20260801".to_string(),
        );

        let mut disconnected_events = events.subscribe("disconnected");
        tokio::spawn(owner.run());

        commands_tx.send(Command::Connect).await.unwrap();
        drop(server_side); // counterparty closes the socket

        let event = tokio::time::timeout(Duration::from_secs(1), disconnected_events.recv())
            .await
            .expect("disconnected event should arrive promptly, not after a heartbeat timeout")
            .unwrap();
        assert_eq!(event, FixEvent::Disconnected);
    }

    struct CountingConnector {
        transport: std::sync::Mutex<Option<DuplexTransport>>,
        attempts: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> io::Result<Box<dyn Transport>> {
            self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let transport = self
                .transport
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "already consumed"))?;
            Ok(Box::new(transport))
        }
    }

    #[tokio::test]
    async fn explicit_disconnect_does_not_trigger_automatic_reconnect() {
        let (client_side, mut server_side) = duplex_pair(8192);
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let connector = Arc::new(CountingConnector {
            transport: std::sync::Mutex::new(Some(client_side)),
            attempts: attempts.clone(),
        });
        let (commands_tx, commands_rx) = mpsc::channel(8);
        let events = EventBus::new();

        let mut config = test_config();
        config.reconnect_delay_secs = 0;
        let owner = SessionOwner::new(
            config,
            connector,
            Arc::new(RecordingLogger::default()),
            Arc::new(SequentialIdGenerator::new("REQ")),
            Arc::new(InMemorySequenceStore),
            events.clone(),
            commands_rx,
            "20260801".to_string(),
        );

        let mut disconnected_events = events.subscribe("disconnected");
        tokio::spawn(owner.run());

        commands_tx.send(Command::Connect).await.unwrap();
        let mut buf = [0u8; 4096];
        server_side.read(&mut buf).await.unwrap(); // Logon request

        commands_tx.send(Command::Disconnect).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), disconnected_events.recv())
            .await
            .expect("disconnected event should arrive")
            .unwrap();

        // Give a wrongly-scheduled reconnect ample time to fire before
        // asserting the connector was never asked for a second transport.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
