//! Typed domain events and their publish/subscribe fan-out.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One entry within a MarketData response's repeating group. `price`/`size`
/// are `None` when the field was absent or not parseable as a decimal —
/// the engine still surfaces the entry rather than dropping it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDataEntry {
    pub entry_type: String,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
}

/// One entry within a SecurityList response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityListEntry {
    pub symbol: String,
    pub security_type: String,
}

/// Everything the session owner can hand to an embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixEvent {
    Connected,
    Disconnected,
    Logon,
    Logout { text: Option<String> },
    Reject { text: String },
    Message { msg_type: String, raw: String },
    MarketData {
        req_id: String,
        symbol: String,
        entries: Vec<MarketDataEntry>,
    },
    MarketDataReject { req_id: String, text: String },
    SecurityList {
        req_id: String,
        securities: Vec<SecurityListEntry>,
    },
    TradingSessionStatus { session_id: String, status: String },
    TradingStatus { symbol: String, status: String },
    KseData { raw_data: String },
    Error { message: String },
}

impl FixEvent {
    /// The channel key subscribers register under. Stable across variants
    /// so an embedder can subscribe before the first event of that kind.
    pub fn category(&self) -> &'static str {
        match self {
            FixEvent::Connected => "connected",
            FixEvent::Disconnected => "disconnected",
            FixEvent::Logon => "logon",
            FixEvent::Logout { .. } => "logout",
            FixEvent::Reject { .. } => "reject",
            FixEvent::Message { .. } => "message",
            FixEvent::MarketData { .. } => "marketData",
            FixEvent::MarketDataReject { .. } => "marketDataReject",
            FixEvent::SecurityList { .. } => "securityList",
            FixEvent::TradingSessionStatus { .. } => "tradingSessionStatus",
            FixEvent::TradingStatus { .. } => "tradingStatus",
            FixEvent::KseData { .. } => "kseData",
            FixEvent::Error { .. } => "error",
        }
    }
}

/// Per-category broadcast fan-out. A category with no subscribers simply
/// drops published events, same as an unsubscribed topic.
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<DashMap<&'static str, broadcast::Sender<FixEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    fn get_or_create_channel(&self, category: &'static str) -> broadcast::Sender<FixEvent> {
        self.channels
            .entry(category)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribes to every event carrying `category` (see [`FixEvent::category`]).
    pub fn subscribe(&self, category: &'static str) -> broadcast::Receiver<FixEvent> {
        self.get_or_create_channel(category).subscribe()
    }

    pub fn publish(&self, event: FixEvent) {
        if let Some(sender) = self.channels.get(event.category()) {
            let _ = sender.send(event);
        }
    }

    pub fn subscriber_count(&self, category: &str) -> usize {
        self.channels
            .get(category)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
