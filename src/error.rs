use thiserror::Error;

/// Result alias used across the session, transport and signing layers
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Failures a recognition session can hit
///
/// Every variant carries owned strings so the same value can be handed to the
/// listener and returned to the caller. Only `Malformed` is non-fatal: a single
/// undecodable message is skipped and the session keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    /// Invalid or inconsistent configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One or more credentials are absent (field names listed)
    #[error("missing credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    /// The OS refused access to the audio input device
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio input device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Connection refused, dropped or failed to send
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider reported a nonzero status code
    #[error("provider error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// An inbound message could not be decoded
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Frame sequence counter ran past the protocol limit
    #[error("frame sequence exhausted")]
    SequenceExhausted,

    /// A configured wait elapsed
    #[error("timed out: {0}")]
    Timeout(String),
}

impl VoiceError {
    /// Whether this error ends the session
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VoiceError::Malformed(_))
    }

    /// Whether this is a configuration-class failure, raised before any I/O
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            VoiceError::Configuration(_) | VoiceError::MissingCredentials(_)
        )
    }
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Malformed(err.to_string())
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::Malformed(format!("invalid base64: {}", err))
    }
}
