//! Handshake signing for the recognition WebSocket
//!
//! The provider authenticates the upgrade request through query parameters:
//! an HMAC-SHA256 over `host`, `date` and the request line, wrapped in a
//! base64 descriptor that names the key and the signed headers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{VoiceError, VoiceResult};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "hmac-sha256";
const SIGNED_HEADERS: &str = "host date request-line";

/// The three provider credentials, all required for the streaming client
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: String,
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    /// Build credentials, treating empty strings as absent
    pub fn new(
        app_id: Option<&str>,
        api_key: Option<&str>,
        api_secret: Option<&str>,
    ) -> VoiceResult<Self> {
        let present = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(String::from);

        let mut missing = Vec::new();
        let app_id = present(app_id);
        let api_key = present(api_key);
        let api_secret = present(api_secret);
        if app_id.is_none() {
            missing.push("app_id");
        }
        if api_key.is_none() {
            missing.push("api_key");
        }
        if api_secret.is_none() {
            missing.push("api_secret");
        }

        match (app_id, api_key, api_secret) {
            (Some(app_id), Some(api_key), Some(api_secret)) => Ok(Self {
                app_id,
                api_key,
                api_secret,
            }),
            _ => Err(VoiceError::MissingCredentials(missing)),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Output of the signing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// base64(HMAC-SHA256(secret, canonical string))
    pub signature: String,
    /// base64 of the full authorization descriptor
    pub authorization: String,
    /// RFC 1123 date that was signed
    pub date: String,
}

/// Format a timestamp as an RFC 1123 HTTP date (`Tue, 07 Oct 2025 08:00:00 GMT`)
pub fn rfc1123_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// The three signed lines, newline-joined without a trailing newline
pub fn canonical_string(host: &str, path: &str, date: &str) -> String {
    format!("host: {}\ndate: {}\nGET {} HTTP/1.1", host, date, path)
}

/// Sign a handshake for the current time
pub fn build_authorization(
    host: &str,
    path: &str,
    api_key: &str,
    api_secret: &str,
) -> VoiceResult<Authorization> {
    let date = rfc1123_date(Utc::now());
    build_authorization_with_date(host, path, api_key, api_secret, &date)
}

/// Sign a handshake for a fixed date; a pure function of its inputs
pub fn build_authorization_with_date(
    host: &str,
    path: &str,
    api_key: &str,
    api_secret: &str,
    date: &str,
) -> VoiceResult<Authorization> {
    let mut missing = Vec::new();
    if api_key.is_empty() {
        missing.push("api_key");
    }
    if api_secret.is_empty() {
        missing.push("api_secret");
    }
    if !missing.is_empty() {
        return Err(VoiceError::MissingCredentials(missing));
    }

    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .map_err(|e| VoiceError::Configuration(format!("invalid api secret: {}", e)))?;
    mac.update(canonical_string(host, path, date).as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let descriptor = format!(
        "api_key=\"{}\", algorithm=\"{}\", headers=\"{}\", signature=\"{}\"",
        api_key, ALGORITHM, SIGNED_HEADERS, signature
    );

    Ok(Authorization {
        signature,
        authorization: BASE64.encode(descriptor.as_bytes()),
        date: date.to_string(),
    })
}

/// Signed connection URL
///
/// `authorization` goes in as-is (standard base64, not percent-encoded) while
/// `date` is percent-encoded. The provider's reference client does exactly
/// this; keep the asymmetry unless the provider documents otherwise.
pub fn connection_url(host: &str, path: &str, auth: &Authorization) -> String {
    format!(
        "wss://{}{}?authorization={}&date={}&host={}",
        host,
        path,
        auth.authorization,
        urlencoding::encode(&auth.date),
        host
    )
}
