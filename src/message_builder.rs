//! Assembles typed outbound messages with correct field ordering.
//!
//! One builder per session knows the PSX-specific field extensions
//! (FIXT.1.1 DefaultApplVerID, RawData, PartyID triple) needed for each of
//! the eight outbound message types.
//!
//! The builder never touches the `SequenceManager`: callers fetch the next
//! sequence number, pass it in, and only call `advance()` after the
//! resulting frame has been handed to the transport.

use crate::codec::{Codec, OutField};
use crate::config::SessionConfig;

/// Builds outbound FIX frames for one session's SenderCompID/TargetCompID pair.
pub struct MessageBuilder {
    codec: Codec,
    sender_comp_id: String,
    target_comp_id: String,
}

impl MessageBuilder {
    pub fn new(sender_comp_id: impl Into<String>, target_comp_id: impl Into<String>) -> Self {
        Self {
            codec: Codec::new(),
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
        }
    }

    fn serialize(&self, msg_type: &str, seq_num: u64, body: &[OutField]) -> String {
        self.codec
            .serialize(msg_type, &self.sender_comp_id, &self.target_comp_id, seq_num, body)
    }

    /// Logon (35=A). PSX always resets sequence numbers on logon (141=Y).
    pub fn logon(&self, seq_num: u64, config: &SessionConfig) -> String {
        let mut body: Vec<OutField> = vec![
            (98, "0".into()),
            (108, config.heartbeat_interval_secs.to_string()),
            (141, "Y".into()),
            (553, config.username.clone()),
            (554, config.password.clone()),
            (1137, "9".into()),
            (1408, "FIX5.00_PSX_1.00".into()),
        ];
        if let Some(obo) = &config.on_behalf_of_comp_id {
            body.push((115, obo.clone()));
        }
        if let (Some(raw_data), Some(raw_data_len)) = (&config.raw_data, &config.raw_data_length) {
            body.push((96, raw_data.clone()));
            body.push((95, raw_data_len.clone()));
        }
        self.serialize("A", seq_num, &body)
    }

    /// Logout (35=5), with optional Text (58).
    pub fn logout(&self, seq_num: u64, text: Option<&str>) -> String {
        let mut body: Vec<OutField> = Vec::new();
        if let Some(t) = text {
            body.push((58, t.to_string()));
        }
        self.serialize("5", seq_num, &body)
    }

    /// Heartbeat (35=0), optionally echoing a TestReqID (112).
    pub fn heartbeat(&self, seq_num: u64, test_req_id: Option<&str>) -> String {
        let mut body: Vec<OutField> = Vec::new();
        if let Some(id) = test_req_id {
            body.push((112, id.to_string()));
        }
        self.serialize("0", seq_num, &body)
    }

    /// Test Request (35=1).
    pub fn test_request(&self, seq_num: u64, test_req_id: &str) -> String {
        self.serialize("1", seq_num, &[(112, test_req_id.to_string())])
    }

    /// Market Data Request (35=V). `subscription_request_type` is `"0"`
    /// snapshot, `"1"` snapshot+updates, `"2"` unsubscribe.
    pub fn market_data_request(
        &self,
        seq_num: u64,
        md_req_id: &str,
        subscription_request_type: &str,
        symbols: &[String],
        entry_types: &[String],
        party_id: &str,
    ) -> String {
        let mut body: Vec<OutField> = vec![
            (262, md_req_id.to_string()),
            (263, subscription_request_type.to_string()),
            (264, "0".into()),
            (265, "0".into()),
            (453, "1".into()),
            (448, party_id.to_string()),
            (447, "D".into()),
            (452, "3".into()),
            (146, symbols.len().to_string()),
        ];
        for symbol in symbols {
            body.push((55, symbol.clone()));
        }
        body.push((267, entry_types.len().to_string()));
        for entry_type in entry_types {
            body.push((269, entry_type.clone()));
        }
        self.serialize("V", seq_num, &body)
    }

    /// Security List Request (35=x). `product` is `"4"` EQUITY or `"5"` INDEX.
    pub fn security_list_request(
        &self,
        seq_num: u64,
        security_req_id: &str,
        request_type: &str,
        product: &str,
    ) -> String {
        let body: Vec<OutField> = vec![
            (320, security_req_id.to_string()),
            (559, request_type.to_string()),
            (55, "NA".into()),
            (460, product.to_string()),
            (336, "REG".into()),
        ];
        self.serialize("x", seq_num, &body)
    }

    /// Trading Session Status Request (35=g).
    pub fn trading_session_status_request(&self, seq_num: u64, trad_ses_req_id: &str) -> String {
        let body: Vec<OutField> = vec![
            (335, trad_ses_req_id.to_string()),
            (263, "0".into()),
            (336, "REG".into()),
        ];
        self.serialize("g", seq_num, &body)
    }

    /// Security Status Request (35=e).
    pub fn security_status_request(
        &self,
        seq_num: u64,
        security_status_req_id: &str,
        symbol: &str,
    ) -> String {
        let body: Vec<OutField> = vec![
            (324, security_status_req_id.to_string()),
            (55, symbol.to_string()),
            (263, "0".into()),
        ];
        self.serialize("e", seq_num, &body)
    }
}
