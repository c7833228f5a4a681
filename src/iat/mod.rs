//! Wire protocol of the streaming recognition service
//!
//! - `messages`: outbound frame and inbound envelope types
//! - `decoder`: inbound message decoding and transcript accumulation
//! - `transport`: connection traits and the WebSocket implementation

pub mod decoder;
pub mod messages;
pub mod transport;

pub use decoder::{decode, DecodedMessage, Fragment, Transcript};
pub use messages::{FrameStatus, InboundEnvelope, OutboundFrame, RecognitionParams, RecognitionText};
pub use transport::{Connector, Transport, WsConnector};
