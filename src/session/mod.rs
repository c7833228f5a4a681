//! Recognition session management
//!
//! This module provides the `VoiceSession` client that manages:
//! - Authenticated connection setup
//! - Audio capture and conversion to 16 kHz mono PCM16
//! - Paced frame streaming (Start / Continuation / Final)
//! - Transcript assembly and listener callbacks
//! - Session statistics and state management

mod config;
mod listener;
mod machine;
mod session;
mod stats;

pub use config::{SessionConfig, DEFAULT_HOST, DEFAULT_PATH};
pub use listener::{listener_fn, FnListener, SessionEvent, TranscriptListener};
pub use machine::{OpenPhase, SessionMachine, SessionState, MAX_SEQ};
pub use session::VoiceSession;
pub use stats::SessionStats;
