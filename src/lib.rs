pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod ids;
pub mod logging;
pub mod message_builder;
pub mod sequence;
pub mod session;
pub mod transport;

pub use client::FixClient;
pub use config::SessionConfig;
pub use error::FixError;
pub use events::FixEvent;
pub use sequence::SequenceStream;
pub use session::SessionState;
