//! Byte-accurate FIX frame serialization and parsing.
//!
//! Handles strict header-field ordering, insertion-order body fields, and
//! trailing checksum on the way out; tag=value split on SOH, BodyLength and
//! Checksum verification, and chunk-boundary-independent buffer splitting
//! on the way in.

mod frame;

pub use frame::{ParsedMessage, GROUP_COUNT_TAGS};

use bytes::BytesMut;
use chrono::Utc;
use std::collections::HashMap;

use crate::error::FixError;

/// FIXT.1.1 field delimiter.
pub const SOH: u8 = 0x01;
pub const BEGIN_STRING: &str = "FIXT.1.1";

/// Header fields placed before the caller-supplied body, in this exact order.
const HEADER_ORDER: [u32; 4] = [35, 49, 56, 34];

/// A field to serialize: (tag, value), in caller-supplied order. The caller
/// is responsible for repeating-group ordering (count tag first, then each
/// entry's fields contiguously) — the codec does not reorder body fields.
pub type OutField = (u32, String);

/// Byte-accurate FIX frame codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }

    /// Serialize a message. `msg_type` is tag 35; `sender_comp_id` and
    /// `target_comp_id` are tags 49/56; `seq_num` is tag 34. `body` carries
    /// every other field (including 52/SendingTime if the caller wants to
    /// override the auto-generated one) in the order they should appear on
    /// the wire.
    pub fn serialize(
        &self,
        msg_type: &str,
        sender_comp_id: &str,
        target_comp_id: &str,
        seq_num: u64,
        body: &[OutField],
    ) -> String {
        let mut rendered_body = String::new();
        rendered_body.push_str(&format!("35={msg_type}\x01"));
        rendered_body.push_str(&format!("49={sender_comp_id}\x01"));
        rendered_body.push_str(&format!("56={target_comp_id}\x01"));
        rendered_body.push_str(&format!("34={seq_num}\x01"));

        let has_sending_time = body.iter().any(|(tag, _)| *tag == 52);
        if !has_sending_time {
            let sending_time = Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string();
            rendered_body.push_str(&format!("52={sending_time}\x01"));
        }

        for (tag, value) in body {
            if HEADER_ORDER.contains(tag) {
                continue;
            }
            rendered_body.push_str(&format!("{tag}={value}\x01"));
        }

        let mut message = String::new();
        message.push_str(&format!("8={BEGIN_STRING}\x01"));
        message.push_str(&format!("9={}\x01", rendered_body.len()));
        message.push_str(&rendered_body);

        let checksum = Self::checksum(&message);
        message.push_str(&format!("10={checksum:03}\x01"));
        message
    }

    /// Sum of all bytes up to and including the SOH preceding `10=`, mod 256.
    fn checksum(message_up_to_trailer: &str) -> u8 {
        message_up_to_trailer
            .bytes()
            .fold(0u32, |acc, b| acc + b as u32) as u8
    }

    /// Consume complete frames from `buffer`, leaving any trailing partial
    /// frame for the next call. A frame is complete when the buffer contains
    /// `\x0110=` followed by three digits and a trailing SOH. Frames not
    /// beginning with `8=FIX` are dropped (logged by the caller).
    pub fn split(&self, buffer: &mut BytesMut) -> Vec<String> {
        let mut frames = Vec::new();

        loop {
            let haystack = &buffer[..];
            let Some(trailer_at) = find_subslice(haystack, b"\x0110=") else {
                break;
            };
            // trailer_at points at the SOH before "10="; the checksum value
            // starts 4 bytes later (\x01 1 0 =).
            let checksum_start = trailer_at + 4;
            if haystack.len() < checksum_start + 4 {
                break; // not enough bytes yet for "ddd\x01"
            }
            let checksum_digits = &haystack[checksum_start..checksum_start + 3];
            if !checksum_digits.iter().all(u8::is_ascii_digit) {
                break;
            }
            if haystack[checksum_start + 3] != SOH {
                break;
            }

            let frame_end = checksum_start + 4;
            let frame_bytes = buffer.split_to(frame_end);

            match std::str::from_utf8(&frame_bytes) {
                Ok(s) if s.starts_with("8=FIX") => frames.push(s.to_string()),
                _ => {
                    // malformed or non-FIX frame: drop silently, caller logs
                }
            }
        }

        frames
    }

    /// Parse a complete frame, verifying BodyLength and Checksum first.
    pub fn parse(&self, frame: &str) -> Result<ParsedMessage, FixError> {
        self.verify(frame)?;

        let mut fields: HashMap<u32, String> = HashMap::new();
        let mut indexed: HashMap<String, String> = HashMap::new();
        let mut group_counts: HashMap<u32, usize> = HashMap::new();
        let mut occurrence: HashMap<u32, usize> = HashMap::new();
        let mut in_group_scope = false;

        for part in frame.split(SOH as char) {
            if part.is_empty() {
                continue;
            }
            let Some((tag_str, value)) = part.split_once('=') else {
                return Err(FixError::FrameCorrupt(format!(
                    "field without '=': {part:?}"
                )));
            };
            let tag: u32 = tag_str
                .parse()
                .map_err(|_| FixError::FrameCorrupt(format!("non-numeric tag: {tag_str:?}")))?;

            fields.entry(tag).or_insert_with(|| value.to_string());

            if GROUP_COUNT_TAGS.contains(&tag) {
                let n = value.parse::<usize>().unwrap_or(0);
                group_counts.insert(tag, n);
                occurrence.clear();
                in_group_scope = true;
                continue;
            }

            if in_group_scope {
                let idx = occurrence.entry(tag).or_insert(0);
                indexed.insert(format!("{tag}.{idx}"), value.to_string());
                *idx += 1;
            }
        }

        Ok(ParsedMessage::new(fields, indexed, group_counts))
    }

    /// Recompute BodyLength and Checksum and compare against the tags on the wire.
    fn verify(&self, frame: &str) -> Result<(), FixError> {
        let body_start = frame
            .find("\x019=")
            .map(|i| i + 1)
            .ok_or_else(|| FixError::FrameCorrupt("missing BodyLength tag".into()))?;
        let body_len_field_end = frame[body_start..]
            .find(SOH as char)
            .map(|i| body_start + i)
            .ok_or_else(|| FixError::FrameCorrupt("unterminated BodyLength".into()))?;
        let declared_len: usize = frame[body_start + 2..body_len_field_end]
            .parse()
            .map_err(|_| FixError::FrameCorrupt("non-numeric BodyLength".into()))?;

        let body_begin = body_len_field_end + 1;
        let trailer_at = frame
            .rfind("\x0110=")
            .ok_or_else(|| FixError::FrameCorrupt("missing Checksum tag".into()))?;
        let body_end = trailer_at + 1; // include the SOH preceding "10="

        if body_end < body_begin || body_end - body_begin != declared_len {
            return Err(FixError::FrameCorrupt(format!(
                "BodyLength mismatch: declared {declared_len}, actual {}",
                body_end.saturating_sub(body_begin)
            )));
        }

        let checksum_start = trailer_at + 4;
        let declared_checksum: u8 = frame
            .get(checksum_start..checksum_start + 3)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| FixError::FrameCorrupt("non-numeric Checksum".into()))?;

        let actual_checksum = Self::checksum(&frame[..body_end]);
        if actual_checksum != declared_checksum {
            return Err(FixError::FrameCorrupt(format!(
                "Checksum mismatch: declared {declared_checksum:03}, actual {actual_checksum:03}"
            )));
        }

        Ok(())
    }

    /// Replace SOH with `|` for human-readable logging.
    pub fn format_for_display(message: &str) -> String {
        message.replace(SOH as char, "|")
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
