//! Multi-stream outgoing/incoming sequence-number bookkeeping.
//!
//! PSX assigns independent expected sequence windows to different message
//! families, so a single `(outgoing, incoming)` pair is not enough: this
//! module tracks three independent streams and a pointer selecting which
//! one the message builder and dispatcher currently read from.

pub mod store;

pub use store::{InMemorySequenceStore, SequenceStore, SequenceStoreRecord};

use std::collections::HashMap;
use tracing::warn;

/// Which sequence stream a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceStream {
    /// Admin messages (Logon, Logout, Heartbeat, TestRequest) and
    /// Trading-Session-Status requests.
    Regular,
    /// Security List requests and responses.
    SecurityList,
    /// Market-Data requests and responses.
    MarketData,
}

impl SequenceStream {
    pub const ALL: [SequenceStream; 3] = [
        SequenceStream::Regular,
        SequenceStream::SecurityList,
        SequenceStream::MarketData,
    ];
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    outgoing: u64,
    incoming: u64,
}

/// Tracks the three sequence streams and which one is currently selected.
pub struct SequenceManager {
    counters: HashMap<SequenceStream, Counters>,
    current: SequenceStream,
    security_list_initial_outgoing: u64,
}

impl SequenceManager {
    /// `security_list_initial_outgoing` is 1 or 2 per the session config
    /// (see `SessionConfig::security_list_initial_outgoing`).
    pub fn new(security_list_initial_outgoing: u64) -> Self {
        let mut counters = HashMap::new();
        counters.insert(SequenceStream::Regular, Counters { outgoing: 1, incoming: 0 });
        counters.insert(
            SequenceStream::SecurityList,
            Counters {
                outgoing: security_list_initial_outgoing,
                incoming: 0,
            },
        );
        counters.insert(SequenceStream::MarketData, Counters { outgoing: 1, incoming: 0 });

        Self {
            counters,
            current: SequenceStream::Regular,
            security_list_initial_outgoing,
        }
    }

    pub fn current_stream(&self) -> SequenceStream {
        self.current
    }

    /// Select the stream the builder/dispatcher should read from next.
    pub fn switch_to(&mut self, stream: SequenceStream) {
        self.current = stream;
    }

    /// Revert to the default stream after a scoped operation completes.
    pub fn revert_to_regular(&mut self) {
        self.current = SequenceStream::Regular;
    }

    /// The value that will be assigned to the next outbound message on `stream`.
    pub fn next(&self, stream: SequenceStream) -> u64 {
        self.counters.get(&stream).map(|c| c.outgoing).unwrap_or(1)
    }

    /// Increment `stream`'s outgoing counter. Called only after a frame has
    /// been successfully handed to the transport.
    pub fn advance(&mut self, stream: SequenceStream) {
        self.counters.entry(stream).or_default().outgoing += 1;
    }

    /// Update `stream`'s incoming counter from an inbound MsgSeqNum. Only
    /// advances (never decreases); a non-increasing value is logged as a
    /// possible duplicate/out-of-order message and otherwise ignored.
    pub fn observe(&mut self, stream: SequenceStream, seq_in: u64) {
        let counters = self.counters.entry(stream).or_default();
        if seq_in > counters.incoming {
            counters.incoming = seq_in;
        } else {
            warn!(
                stream = ?stream,
                seq_in,
                current = counters.incoming,
                "inbound MsgSeqNum did not advance sequence; possible duplicate"
            );
        }
    }

    pub fn incoming(&self, stream: SequenceStream) -> u64 {
        self.counters.get(&stream).map(|c| c.incoming).unwrap_or(0)
    }

    /// Explicitly reset a single stream (the only way counters may decrease).
    pub fn reset(&mut self, stream: SequenceStream, outgoing: u64, incoming: u64) {
        self.counters.insert(stream, Counters { outgoing, incoming });
    }

    /// Reset every stream's outgoing counter to `outgoing`, leaving incoming
    /// counters untouched. Used when a Logon ack carries `141=Y`.
    pub fn reset_all(&mut self, outgoing: u64) {
        for stream in SequenceStream::ALL {
            self.counters.entry(stream).or_default().outgoing = outgoing;
        }
    }

    /// Reset every stream to its session-start initial value (used at the
    /// start of a new trading day, see `SequenceStore`).
    pub fn reset_to_initial(&mut self) {
        self.counters.insert(SequenceStream::Regular, Counters { outgoing: 1, incoming: 0 });
        self.counters.insert(
            SequenceStream::SecurityList,
            Counters {
                outgoing: self.security_list_initial_outgoing,
                incoming: 0,
            },
        );
        self.counters.insert(SequenceStream::MarketData, Counters { outgoing: 1, incoming: 0 });
    }

    pub fn snapshot(&self) -> SequenceStoreRecord {
        SequenceStoreRecord {
            regular_out: self.next(SequenceStream::Regular),
            regular_in: self.incoming(SequenceStream::Regular),
            security_list_out: self.next(SequenceStream::SecurityList),
            security_list_in: self.incoming(SequenceStream::SecurityList),
            market_data_out: self.next(SequenceStream::MarketData),
            market_data_in: self.incoming(SequenceStream::MarketData),
        }
    }

    pub fn restore(&mut self, record: SequenceStoreRecord) {
        self.reset(SequenceStream::Regular, record.regular_out, record.regular_in);
        self.reset(
            SequenceStream::SecurityList,
            record.security_list_out,
            record.security_list_in,
        );
        self.reset(
            SequenceStream::MarketData,
            record.market_data_out,
            record.market_data_in,
        );
    }
}
