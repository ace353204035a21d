//! Public request API: one async method per operation, each posting a
//! command to the session owner's mailbox and awaiting its outcome.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::SessionConfig;
use crate::error::FixError;
use crate::events::{EventBus, FixEvent};
use crate::ids::{IdGenerator, UuidGenerator};
use crate::logging::{SessionLogger, TracingSessionLogger};
use crate::sequence::{InMemorySequenceStore, SequenceStore};
use crate::session::{Command, Connector, SessionOwner, TcpConnector};

/// A handle to a running FIX session. Cloning shares the same owner task.
#[derive(Clone)]
pub struct FixClient {
    commands: mpsc::Sender<Command>,
    events: EventBus,
}

impl FixClient {
    /// Spawns a session owner using the default Tokio-TCP transport,
    /// `tracing`-backed logger, UUID-based ID generator, and no sequence
    /// persistence.
    pub fn spawn(config: SessionConfig) -> Self {
        let connector = Arc::new(TcpConnector { host: config.host.clone(), port: config.port });
        Self::spawn_with(
            config,
            connector,
            Arc::new(TracingSessionLogger),
            Arc::new(UuidGenerator),
            Arc::new(InMemorySequenceStore),
        )
    }

    /// Spawns a session owner with explicit collaborators, for tests or
    /// embedders that want file-backed sequence persistence or a fake
    /// transport.
    pub fn spawn_with(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        logger: Arc<dyn SessionLogger>,
        ids: Arc<dyn IdGenerator>,
        sequence_store: Arc<dyn SequenceStore>,
    ) -> Self {
        let events = EventBus::new();
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let trading_date = chrono::Utc::now().format("%Y%m%d").to_string();

        let owner = SessionOwner::new(
            config,
            connector,
            logger,
            ids,
            sequence_store,
            events.clone(),
            commands_rx,
            trading_date,
        );
        tokio::spawn(owner.run());

        Self { commands: commands_tx, events }
    }

    /// Opens the transport and begins the Logon handshake. Returns once the
    /// command has been accepted by the owner, not once logon completes —
    /// subscribe to the `logon`/`logout` events to observe the outcome.
    pub async fn connect(&self) -> Result<(), FixError> {
        self.commands.send(Command::Connect).await.map_err(|_| FixError::NotConnected)
    }

    /// Sends a Logout (if logged in), closes the transport, and cancels the
    /// reconnect loop. Call `connect()` again to resume.
    pub async fn disconnect(&self) -> Result<(), FixError> {
        self.commands.send(Command::Disconnect).await.map_err(|_| FixError::NotConnected)
    }

    /// Stops automatic reconnection and closes the session permanently.
    pub async fn shutdown(&self) -> Result<(), FixError> {
        self.commands.send(Command::Shutdown).await.map_err(|_| FixError::NotConnected)
    }

    /// Subscribes to market data for `symbols`. `entry_types` are MDEntryType
    /// codes (`"0"` bid, `"1"` offer, `"2"` trade, ...). `subscription_type`
    /// is `"0"` snapshot, `"1"` snapshot+updates, `"2"` unsubscribe.
    pub async fn subscribe_market_data(
        &self,
        symbols: Vec<String>,
        entry_types: Vec<String>,
        subscription_type: &str,
    ) -> Result<(), FixError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(Command::SubscribeMarketData {
                symbols,
                entry_types,
                subscription_type: subscription_type.to_string(),
                respond_to,
            })
            .await
            .map_err(|_| FixError::NotConnected)?;
        response.await.map_err(|_| FixError::NotConnected)?
    }

    /// Requests the security list for `product` (`"4"` EQUITY, `"5"` INDEX).
    pub async fn request_security_list(&self, product: &str) -> Result<(), FixError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(Command::RequestSecurityList { product: product.to_string(), respond_to })
            .await
            .map_err(|_| FixError::NotConnected)?;
        response.await.map_err(|_| FixError::NotConnected)?
    }

    pub async fn request_trading_session_status(&self) -> Result<(), FixError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(Command::RequestTradingSessionStatus { respond_to })
            .await
            .map_err(|_| FixError::NotConnected)?;
        response.await.map_err(|_| FixError::NotConnected)?
    }

    pub async fn request_security_status(&self, symbol: &str) -> Result<(), FixError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(Command::RequestSecurityStatus { symbol: symbol.to_string(), respond_to })
            .await
            .map_err(|_| FixError::NotConnected)?;
        response.await.map_err(|_| FixError::NotConnected)?
    }

    /// Subscribes to a category of [`FixEvent`] (see [`FixEvent::category`]).
    pub fn subscribe(&self, category: &'static str) -> broadcast::Receiver<FixEvent> {
        self.events.subscribe(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::test_support::SequentialIdGenerator;
    use crate::logging::test_support::RecordingLogger;
    use crate::session::Connector;
    use async_trait::async_trait;
    use std::io;

    struct NeverConnects;

    #[async_trait]
    impl Connector for NeverConnects {
        async fn connect(&self) -> io::Result<Box<dyn crate::transport::Transport>> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no server"))
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            host: "127.0.0.1".into(),
            port: 1,
            sender_comp_id: "realtime".into(),
            target_comp_id: "NMDUFISQ0001".into(),
            username: "realtime".into(),
            password: "secret".into(),
            heartbeat_interval_secs: 30,
            reset_on_logon: true,
            connect_timeout_ms: 200,
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
    async fn subscribing_market_data_before_logon_is_rejected() {
        let client = FixClient::spawn_with(
            test_config(),
            Arc::new(NeverConnects),
            Arc::new(RecordingLogger::default()),
            Arc::new(SequentialIdGenerator::new("REQ")),
            Arc::new(InMemorySequenceStore),
        );

        let result = client
            .subscribe_market_data(vec!["OGDC".to_string()], vec!["0".to_string()], "1")
            .await;
        assert!(matches!(result, Err(FixError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn event_subscription_is_independent_of_connection_state() {
        let client = FixClient::spawn_with(
            test_config(),
            Arc::new(NeverConnects),
            Arc::new(RecordingLogger::default()),
            Arc::new(SequentialIdGenerator::new("REQ")),
            Arc::new(InMemorySequenceStore),
        );
        let mut rx = client.subscribe("error");
        client.connect().await.unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("an error event should arrive after a failed connect")
            .unwrap();
        assert!(matches!(event, FixEvent::Error { .. }));
    }
}
