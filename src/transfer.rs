//! Record-then-transcribe over the file transfer API
//!
//! The whole recording is converted to a 16 kHz mono WAV, uploaded once, and
//! the order is polled until the provider reports a final status.

use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use serde_json::Value;
use sha1::Sha1;
use tracing::{debug, info, warn};

use crate::audio::{to_pcm16_bytes, TARGET_SAMPLE_RATE};
use crate::error::{VoiceError, VoiceResult};

pub const DEFAULT_UPLOAD_URL: &str = "https://raasr.xfyun.cn/v2/api/upload";
pub const DEFAULT_RESULT_URL: &str = "https://raasr.xfyun.cn/v2/api/getResult";

/// Order finished
const ORDER_DONE: i64 = 4;
/// Order failed
const ORDER_FAILED: i64 = -1;

/// Settings for the transfer API
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub app_id: String,
    pub secret_key: String,
    pub upload_url: String,
    pub result_url: String,
    pub language: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl TransferConfig {
    pub fn new(app_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            secret_key: secret_key.into(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            result_url: DEFAULT_RESULT_URL.to_string(),
            language: "cn".to_string(),
            poll_interval: Duration::from_millis(1500),
            max_polls: 20,
        }
    }
}

/// base64(HMAC-SHA1(key = secret_key, msg = hex(MD5(app_id + ts))))
pub fn build_signa(app_id: &str, ts: i64, secret_key: &str) -> VoiceResult<String> {
    let digest = Md5::digest(format!("{}{}", app_id, ts).as_bytes());
    let md5_hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

    let mut mac = Hmac::<Sha1>::new_from_slice(secret_key.as_bytes())
        .map_err(|e| VoiceError::Configuration(format!("invalid secret key: {}", e)))?;
    mac.update(md5_hex.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// 16 kHz mono 16-bit WAV bytes from float samples at `sample_rate`
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let pcm = to_pcm16_bytes(samples, sample_rate);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Concatenate the best candidates of every sentence in an order result
///
/// Accepts the result either as a JSON string or as an already parsed object;
/// pieces that do not have the expected shape are skipped.
pub fn extract_order_text(order_result: &Value) -> String {
    let parsed;
    let obj = match order_result {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v) => {
                parsed = v;
                &parsed
            }
            Err(_) => return s.clone(),
        },
        Value::Null => return String::new(),
        other => other,
    };

    let lattices = obj
        .get("lattice")
        .or_else(|| obj.get("lattice2"))
        .and_then(Value::as_array);
    let Some(lattices) = lattices else {
        return String::new();
    };

    let mut text = String::new();
    for item in lattices {
        let best = match item.get("json_1best") {
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(v) => v,
                Err(_) => continue,
            },
            Some(v @ Value::Object(_)) => v.clone(),
            _ => continue,
        };
        let Some(rts) = best.pointer("/st/rt").and_then(Value::as_array) else {
            continue;
        };
        for rt in rts {
            let Some(ws) = rt.get("ws").and_then(Value::as_array) else {
                continue;
            };
            for seg in ws {
                if let Some(w) = seg.pointer("/cw/0/w").and_then(Value::as_str) {
                    text.push_str(w);
                }
            }
        }
    }
    text
}

/// Find `key` at the top level or under `content` / `data`
fn lookup<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    body.get(key)
        .or_else(|| body.get("content").and_then(|c| c.get(key)))
        .or_else(|| body.get("data").and_then(|c| c.get(key)))
}

fn order_id(body: &Value) -> Option<String> {
    match lookup(body, "orderId")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// What one poll of the order said
#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Done(String),
    Pending(i64),
}

/// Interpret one getResult response body
pub fn parse_order_status(body: &Value) -> VoiceResult<OrderStatus> {
    let info = lookup(body, "orderInfo");
    let status = info
        .and_then(|i| i.get("status"))
        .and_then(Value::as_i64)
        .unwrap_or_default();

    match status {
        ORDER_DONE => {
            let text = lookup(body, "orderResult")
                .map(extract_order_text)
                .unwrap_or_default();
            if text.is_empty() {
                return Err(VoiceError::Malformed(
                    "order finished without any text".to_string(),
                ));
            }
            Ok(OrderStatus::Done(text))
        }
        ORDER_FAILED => {
            let fail_type = info
                .and_then(|i| i.get("failType"))
                .map(Value::to_string)
                .unwrap_or_else(|| "unknown".to_string());
            Err(VoiceError::Protocol {
                code: ORDER_FAILED,
                message: format!("transcription failed, failType={}", fail_type),
            })
        }
        other => Ok(OrderStatus::Pending(other)),
    }
}

/// Uploads a recording and polls for its transcript
pub struct FileTranscriber {
    config: TransferConfig,
    client: reqwest::Client,
}

impl FileTranscriber {
    pub fn new(config: TransferConfig) -> VoiceResult<Self> {
        if config.app_id.trim().is_empty() || config.secret_key.trim().is_empty() {
            let mut missing = Vec::new();
            if config.app_id.trim().is_empty() {
                missing.push("app_id");
            }
            if config.secret_key.trim().is_empty() {
                missing.push("secret_key");
            }
            return Err(VoiceError::MissingCredentials(missing));
        }
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    /// Transcribe float samples recorded at `sample_rate`
    pub async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        let wav = encode_wav(samples, sample_rate)
            .map_err(|e| VoiceError::Configuration(format!("encode wav: {}", e)))?;
        let duration_ms = if sample_rate == 0 {
            0
        } else {
            (samples.len() as u64 * 1000) / sample_rate as u64
        };

        let order_id = self.upload(wav, duration_ms).await?;
        info!("Uploaded recording, order {}", order_id);
        self.poll(&order_id).await
    }

    async fn upload(&self, wav: Vec<u8>, duration_ms: u64) -> VoiceResult<String> {
        let ts = chrono::Utc::now().timestamp();
        let signa = build_signa(&self.config.app_id, ts, &self.config.secret_key)?;
        let file_size = wav.len().to_string();
        let ts = ts.to_string();
        let duration = duration_ms.to_string();

        let resp = self
            .client
            .post(&self.config.upload_url)
            .query(&[
                ("appId", self.config.app_id.as_str()),
                ("ts", ts.as_str()),
                ("signa", signa.as_str()),
                ("fileName", "recording.wav"),
                ("fileSize", file_size.as_str()),
                ("duration", duration.as_str()),
                ("language", self.config.language.as_str()),
                ("audioMode", "fileStream"),
                ("standardWav", "1"),
            ])
            .header("Content-Type", "application/octet-stream")
            .body(wav)
            .send()
            .await
            .map_err(|e| VoiceError::Transport(format!("upload failed: {}", e)))?;

        let body = read_json(resp, "upload").await?;
        order_id(&body).ok_or_else(|| {
            VoiceError::Malformed(format!("upload response without orderId: {}", body))
        })
    }

    async fn poll(&self, order_id: &str) -> VoiceResult<String> {
        for attempt in 1..=self.config.max_polls {
            let ts = chrono::Utc::now().timestamp();
            let signa = build_signa(&self.config.app_id, ts, &self.config.secret_key)?;
            let ts = ts.to_string();

            let resp = self
                .client
                .get(&self.config.result_url)
                .query(&[
                    ("appId", self.config.app_id.as_str()),
                    ("ts", ts.as_str()),
                    ("signa", signa.as_str()),
                    ("orderId", order_id),
                ])
                .send()
                .await
                .map_err(|e| VoiceError::Transport(format!("getResult failed: {}", e)))?;

            let body = read_json(resp, "getResult").await?;
            match parse_order_status(&body)? {
                OrderStatus::Done(text) => return Ok(text),
                OrderStatus::Pending(status) => {
                    debug!("Order {} pending (status {}), poll {}", order_id, status, attempt)
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        warn!("Order {} not finished after {} polls", order_id, self.config.max_polls);
        Err(VoiceError::Timeout(format!(
            "no transcript after {} polls",
            self.config.max_polls
        )))
    }
}

async fn read_json(resp: reqwest::Response, what: &str) -> VoiceResult<Value> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| VoiceError::Transport(format!("{} body: {}", what, e)))?;
    if !status.is_success() {
        return Err(VoiceError::Transport(format!(
            "{} rejected: HTTP {} {}",
            what,
            status,
            text.trim()
        )));
    }
    Ok(serde_json::from_str(&text)?)
}
