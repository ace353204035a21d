//! Classifies inbound frames, updates sequence state, and emits events.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::codec::ParsedMessage;
use crate::events::{EventBus, FixEvent, MarketDataEntry, SecurityListEntry};
use crate::logging::SessionLogger;
use crate::sequence::{SequenceManager, SequenceStream};

/// What the session owner must do in response to a dispatched frame. The
/// dispatcher itself never touches the transport or the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Logon acknowledged; `reset_outgoing` is `Some(2)` when `141=Y` was set.
    LogonAck { reset_outgoing: Option<u64> },
    HeartbeatReceived,
    TestRequestReceived { test_req_id: String },
    /// A Reject or Logout carried a recoverable sequence error.
    SequenceError { stream: SequenceStream, expected: u64 },
    LogoutReceived,
    Continue,
}

/// Parses no bytes itself; operates on an already-parsed frame.
#[derive(Clone)]
pub struct Dispatcher {
    events: EventBus,
}

impl Dispatcher {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn dispatch(
        &self,
        parsed: &ParsedMessage,
        sequences: &mut SequenceManager,
        logger: &dyn SessionLogger,
    ) -> DispatchOutcome {
        let Some(msg_type) = parsed.msg_type() else {
            logger.warn("frame missing MsgType", &[]);
            return DispatchOutcome::Continue;
        };
        let msg_type = msg_type.to_string();

        let stream = stream_for(&msg_type);
        sequences.switch_to(stream);

        if !parsed.has_poss_dup() {
            if let Some(seq) = parsed.get_u64(34) {
                sequences.observe(stream, seq);
            }
        }

        self.events.publish(FixEvent::Message {
            msg_type: msg_type.clone(),
            raw: format!("{parsed:?}"),
        });

        let outcome = match msg_type.as_str() {
            "A" => self.handle_logon(parsed),
            "0" => DispatchOutcome::HeartbeatReceived,
            "1" => self.handle_test_request(parsed),
            "2" => {
                logger.warn("ResendRequest received but not implemented", &[]);
                DispatchOutcome::Continue
            }
            "3" => self.handle_reject(parsed, stream),
            "4" => self.handle_sequence_reset(parsed, sequences, stream),
            "5" => self.handle_logout(parsed, stream),
            "V" | "W" | "X" | "Y" => self.handle_market_data(parsed, &msg_type),
            "y" => self.handle_security_list(parsed),
            "h" => self.handle_trading_session_status(parsed),
            "f" => self.handle_security_trading_status(parsed),
            other => {
                logger.debug("unhandled MsgType", &[("msgType", other)]);
                DispatchOutcome::Continue
            }
        };

        if matches!(msg_type.as_str(), "V" | "W" | "X" | "Y" | "y") {
            sequences.revert_to_regular();
        }

        outcome
    }

    fn handle_logon(&self, parsed: &ParsedMessage) -> DispatchOutcome {
        self.events.publish(FixEvent::Logon);
        let reset_outgoing = if parsed.get(141) == Some("Y") {
            Some(2)
        } else {
            None
        };
        DispatchOutcome::LogonAck { reset_outgoing }
    }

    fn handle_test_request(&self, parsed: &ParsedMessage) -> DispatchOutcome {
        let test_req_id = parsed.get(112).unwrap_or_default().to_string();
        DispatchOutcome::TestRequestReceived { test_req_id }
    }

    fn handle_reject(&self, parsed: &ParsedMessage, stream: SequenceStream) -> DispatchOutcome {
        let text = parsed.get(58).unwrap_or_default().to_string();
        self.events.publish(FixEvent::Reject { text: text.clone() });
        match extract_expected_sequence(&text) {
            Some(expected) => DispatchOutcome::SequenceError { stream, expected },
            None => DispatchOutcome::Continue,
        }
    }

    fn handle_sequence_reset(
        &self,
        parsed: &ParsedMessage,
        sequences: &mut SequenceManager,
        stream: SequenceStream,
    ) -> DispatchOutcome {
        if let Some(new_seq_no) = parsed.get_u64(36) {
            sequences.reset(stream, sequences.next(stream), new_seq_no.saturating_sub(1));
        }
        DispatchOutcome::Continue
    }

    fn handle_logout(&self, parsed: &ParsedMessage, stream: SequenceStream) -> DispatchOutcome {
        let text = parsed.get(58).unwrap_or_default().to_string();
        if let Some(expected) = extract_expected_sequence(&text) {
            return DispatchOutcome::SequenceError { stream, expected };
        }
        self.events.publish(FixEvent::Logout {
            text: if text.is_empty() { None } else { Some(text) },
        });
        DispatchOutcome::LogoutReceived
    }

    fn handle_market_data(&self, parsed: &ParsedMessage, msg_type: &str) -> DispatchOutcome {
        let req_id = parsed.get(262).unwrap_or_default().to_string();
        let symbol = parsed.get(55).unwrap_or_default().to_string();

        if msg_type == "Y" {
            let text = parsed.get(58).unwrap_or_default().to_string();
            self.events
                .publish(FixEvent::MarketDataReject { req_id, text });
            return DispatchOutcome::Continue;
        }

        let mut entries = Vec::new();
        for index in parsed.group_entries(268) {
            let Some(entry_type) = parsed.indexed(269, index) else {
                break;
            };
            let price = parsed.indexed(270, index).and_then(|v| Decimal::from_str(v).ok());
            let size = parsed.indexed(271, index).and_then(|v| Decimal::from_str(v).ok());
            entries.push(MarketDataEntry {
                entry_type: entry_type.to_string(),
                price,
                size,
            });
        }

        self.events.publish(FixEvent::MarketData {
            req_id,
            symbol,
            entries,
        });
        DispatchOutcome::Continue
    }

    fn handle_security_list(&self, parsed: &ParsedMessage) -> DispatchOutcome {
        let req_id = parsed.get(320).unwrap_or_default().to_string();
        let mut securities = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for index in parsed.group_entries(146) {
            let Some(symbol) = parsed.indexed(55, index) else {
                break;
            };
            if !seen.insert(symbol.to_string()) {
                continue;
            }
            let security_type = parsed.indexed(167, index).unwrap_or_default().to_string();
            securities.push(SecurityListEntry {
                symbol: symbol.to_string(),
                security_type,
            });
        }

        self.events
            .publish(FixEvent::SecurityList { req_id, securities });
        DispatchOutcome::Continue
    }

    fn handle_trading_session_status(&self, parsed: &ParsedMessage) -> DispatchOutcome {
        let session_id = parsed.get(336).unwrap_or_default().to_string();
        let status = parsed.get(102).unwrap_or_default().to_string();
        self.events
            .publish(FixEvent::TradingSessionStatus { session_id, status });
        DispatchOutcome::Continue
    }

    fn handle_security_trading_status(&self, parsed: &ParsedMessage) -> DispatchOutcome {
        let symbol = parsed.get(55).unwrap_or_default().to_string();
        let status = parsed.get(326).unwrap_or_default().to_string();
        self.events
            .publish(FixEvent::TradingStatus { symbol, status });
        DispatchOutcome::Continue
    }
}

fn stream_for(msg_type: &str) -> SequenceStream {
    match msg_type {
        "V" | "W" | "X" | "Y" => SequenceStream::MarketData,
        "x" | "y" => SequenceStream::SecurityList,
        _ => SequenceStream::Regular,
    }
}

/// Extracts an expected sequence number from reject/logout text such as
/// `"MsgSeqNum too large, expected '15' but received '20'"`.
fn extract_expected_sequence(text: &str) -> Option<u64> {
    let lower = text.to_ascii_lowercase();
    if !(lower.contains("msgseqnum") || lower.contains("too large") || lower.contains("sequence"))
    {
        return None;
    }
    let marker = lower.find("expected")?;
    let rest = &text[marker + "expected".len()..];
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
