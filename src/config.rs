use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audio::ChunkConfig;
use crate::auth::Credentials;
use crate::error::{VoiceError, VoiceResult};
use crate::iat::RecognitionParams;
use crate::session::{SessionConfig, DEFAULT_HOST, DEFAULT_PATH};
use crate::transfer::{TransferConfig, DEFAULT_RESULT_URL, DEFAULT_UPLOAD_URL};

/// Default config file, resolved by the `config` crate with any supported extension
pub const DEFAULT_CONFIG_PATH: &str = "config/voice-iat";

/// Environment variable prefix (`IAT_CREDENTIALS__API_KEY`, ...)
const ENV_PREFIX: &str = "IAT";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub endpoint: EndpointConfig,
    pub recognition: RecognitionParams,
    pub session: SessionTiming,
    pub transfer: TransferSettings,
}

#[derive(Deserialize, Default)]
pub struct CredentialsConfig {
    pub app_id: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Used by the file transfer API only
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("CredentialsConfig")
            .field("app_id", &self.app_id)
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("secret_key", &redact(&self.secret_key))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionTiming {
    pub frame_interval_ms: u64,
    pub frame_bytes: usize,
    pub connect_timeout_ms: Option<u64>,
    pub final_result_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct TransferSettings {
    pub upload_url: String,
    pub result_url: String,
    pub language: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Config {
    /// Defaults, then `path` if it exists, then `IAT_*` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let defaults = RecognitionParams::default();
        let settings = config::Config::builder()
            .set_default("endpoint.host", DEFAULT_HOST)?
            .set_default("endpoint.path", DEFAULT_PATH)?
            .set_default("recognition.domain", defaults.domain)?
            .set_default("recognition.language", defaults.language)?
            .set_default("recognition.accent", defaults.accent)?
            .set_default("recognition.eos_ms", i64::from(defaults.eos_ms))?
            .set_default("session.frame_interval_ms", 40)?
            .set_default("session.frame_bytes", 1280)?
            .set_default("session.final_result_timeout_ms", 5000)?
            .set_default("transfer.upload_url", DEFAULT_UPLOAD_URL)?
            .set_default("transfer.result_url", DEFAULT_RESULT_URL)?
            .set_default("transfer.language", "cn")?
            .set_default("transfer.poll_interval_ms", 1500)?
            .set_default("transfer.max_polls", 20)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let mut cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.credentials.normalize();
        Ok(cfg)
    }

    /// Streaming credentials, listing every missing field
    pub fn validate_credentials(&self) -> VoiceResult<Credentials> {
        Credentials::new(
            self.credentials.app_id.as_deref(),
            self.credentials.api_key.as_deref(),
            self.credentials.api_secret.as_deref(),
        )
    }

    pub fn session_config(&self) -> VoiceResult<SessionConfig> {
        if self.session.frame_bytes == 0 || self.session.frame_bytes % 2 != 0 {
            return Err(VoiceError::Configuration(format!(
                "frame_bytes must be a positive even number, got {}",
                self.session.frame_bytes
            )));
        }
        if self.session.frame_interval_ms == 0 {
            return Err(VoiceError::Configuration(
                "frame_interval_ms must be positive".to_string(),
            ));
        }

        Ok(SessionConfig {
            app_id: self.credentials.app_id.clone(),
            api_key: self.credentials.api_key.clone(),
            api_secret: self.credentials.api_secret.clone(),
            host: self.endpoint.host.clone(),
            path: self.endpoint.path.clone(),
            recognition: self.recognition.clone(),
            chunk: ChunkConfig {
                frame_bytes: self.session.frame_bytes,
                frame_interval: Duration::from_millis(self.session.frame_interval_ms),
            },
            connect_timeout: self.session.connect_timeout_ms.map(Duration::from_millis),
            final_result_timeout: Duration::from_millis(self.session.final_result_timeout_ms),
        })
    }

    pub fn transfer_config(&self) -> VoiceResult<TransferConfig> {
        let app_id = self.credentials.app_id.clone();
        let secret_key = self.credentials.secret_key.clone();
        let (app_id, secret_key) = match (app_id, secret_key) {
            (Some(a), Some(s)) => (a, s),
            (a, s) => {
                let mut missing = Vec::new();
                if a.is_none() {
                    missing.push("app_id");
                }
                if s.is_none() {
                    missing.push("secret_key");
                }
                return Err(VoiceError::MissingCredentials(missing));
            }
        };

        Ok(TransferConfig {
            upload_url: self.transfer.upload_url.clone(),
            result_url: self.transfer.result_url.clone(),
            language: self.transfer.language.clone(),
            poll_interval: Duration::from_millis(self.transfer.poll_interval_ms),
            max_polls: self.transfer.max_polls,
            ..TransferConfig::new(app_id, secret_key)
        })
    }
}

impl CredentialsConfig {
    /// Treat blank values as absent
    fn normalize(&mut self) {
        for field in [
            &mut self.app_id,
            &mut self.api_key,
            &mut self.api_secret,
            &mut self.secret_key,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
    }
}
