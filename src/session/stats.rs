use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a recognition session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier used in logs
    pub session_id: String,

    /// When the connection attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// Total duration in seconds (set at teardown)
    pub duration_secs: f64,

    /// Frames sent, Start and Final included
    pub frames_sent: usize,

    /// Audio bytes carried by those frames
    pub audio_bytes_sent: usize,

    /// Queued bytes dropped at stop (less than one frame)
    pub bytes_discarded: usize,

    /// Inbound messages received
    pub messages_received: usize,

    /// Inbound messages that could not be decoded
    pub decode_warnings: usize,

    /// Sequence number of the last frame sent
    pub last_seq: Option<u32>,
}
