use std::time::Duration;

use crate::audio::ChunkConfig;
use crate::auth::Credentials;
use crate::error::VoiceResult;
use crate::iat::RecognitionParams;

/// Default recognition service host
pub const DEFAULT_HOST: &str = "iat.xf-yun.com";

/// Default recognition service path
pub const DEFAULT_PATH: &str = "/v1";

/// Configuration for a recognition session
#[derive(Clone)]
pub struct SessionConfig {
    pub app_id: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,

    /// Service host (no scheme)
    pub host: String,

    /// Service path, starting with `/`
    pub path: String,

    /// Sent once in the Start frame
    pub recognition: RecognitionParams,

    /// Frame size and dispatch cadence
    pub chunk: ChunkConfig,

    /// Give up if the connection is not open after this long (no limit when unset)
    pub connect_timeout: Option<Duration>,

    /// After stop, how long to wait for the terminal result before closing
    pub final_result_timeout: Duration,
}

impl SessionConfig {
    /// Validated credentials; lists every missing field
    pub fn credentials(&self) -> VoiceResult<Credentials> {
        Credentials::new(
            self.app_id.as_deref(),
            self.api_key.as_deref(),
            self.api_secret.as_deref(),
        )
    }

    pub fn with_credentials(
        mut self,
        app_id: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        self.app_id = Some(app_id.into());
        self.api_key = Some(api_key.into());
        self.api_secret = Some(api_secret.into());
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            api_key: None,
            api_secret: None,
            host: DEFAULT_HOST.to_string(),
            path: DEFAULT_PATH.to_string(),
            recognition: RecognitionParams::default(),
            chunk: ChunkConfig::default(),
            connect_timeout: None,
            final_result_timeout: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("SessionConfig")
            .field("app_id", &self.app_id)
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("host", &self.host)
            .field("path", &self.path)
            .field("recognition", &self.recognition)
            .field("chunk", &self.chunk)
            .field("connect_timeout", &self.connect_timeout)
            .field("final_result_timeout", &self.final_result_timeout)
            .finish()
    }
}
