pub mod audio;
pub mod auth;
pub mod config;
pub mod error;
pub mod iat;
pub mod session;
pub mod transfer;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource,
    ChunkConfig, FileBackend, FrameChunker,
};
pub use auth::{build_authorization, connection_url, Authorization, Credentials};
pub use config::Config;
pub use error::{VoiceError, VoiceResult};
pub use iat::{Connector, Transport, WsConnector};
pub use session::{
    listener_fn, SessionConfig, SessionEvent, SessionState, SessionStats, TranscriptListener,
    VoiceSession,
};
pub use transfer::{FileTranscriber, TransferConfig};
