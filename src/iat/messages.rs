use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::audio::TARGET_SAMPLE_RATE;

/// Frame status tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// First frame: carries recognition parameters plus audio
    Start = 0,
    /// Any frame between first and last
    Continuation = 1,
    /// End of input
    Final = 2,
}

impl FrameStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FrameStatus::Start),
            1 => Some(FrameStatus::Continuation),
            2 => Some(FrameStatus::Final),
            _ => None,
        }
    }
}

/// Recognition parameters sent once, in the Start frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionParams {
    pub domain: String,
    pub language: String,
    pub accent: String,
    /// End-of-speech silence threshold in milliseconds
    pub eos_ms: u32,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            domain: "slm".to_string(),
            language: "zh_cn".to_string(),
            accent: "mandarin".to_string(),
            eos_ms: 6000,
        }
    }
}

/// Outbound frame envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub header: FrameHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<FrameParameter>,
    pub payload: FramePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub app_id: String,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameParameter {
    pub iat: IatParameter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IatParameter {
    pub domain: String,
    pub language: String,
    pub accent: String,
    pub eos: u32,
    pub vinfo: u8,
    pub dwa: String,
    pub result: ResultFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFormat {
    pub encoding: String,
    pub compress: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub audio: AudioPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub seq: u32,
    pub status: u8,
    pub audio: String, // Base64-encoded PCM bytes
}

impl OutboundFrame {
    /// Build a frame; recognition parameters are attached only to `Start`
    pub fn new(
        app_id: &str,
        status: FrameStatus,
        seq: u32,
        audio: &[u8],
        params: &RecognitionParams,
    ) -> Self {
        let parameter = (status == FrameStatus::Start).then(|| FrameParameter {
            iat: IatParameter {
                domain: params.domain.clone(),
                language: params.language.clone(),
                accent: params.accent.clone(),
                eos: params.eos_ms,
                vinfo: 1,
                dwa: "wpgs".to_string(),
                result: ResultFormat {
                    encoding: "utf8".to_string(),
                    compress: "raw".to_string(),
                    format: "json".to_string(),
                },
            },
        });

        Self {
            header: FrameHeader {
                app_id: app_id.to_string(),
                status: status.code(),
            },
            parameter,
            payload: FramePayload {
                audio: AudioPayload {
                    encoding: "raw".to_string(),
                    sample_rate: TARGET_SAMPLE_RATE,
                    channels: 1,
                    bit_depth: 16,
                    seq,
                    status: status.code(),
                    audio: BASE64.encode(audio),
                },
            },
        }
    }

    pub fn status(&self) -> Option<FrameStatus> {
        FrameStatus::from_code(self.header.status)
    }

    pub fn seq(&self) -> u32 {
        self.payload.audio.seq
    }

    /// Decoded audio payload
    pub fn audio_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.payload.audio.audio)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Inbound message envelope from the recognition service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub header: InboundHeader,
    #[serde(default)]
    pub payload: Option<InboundPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundHeader {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundPayload {
    #[serde(default)]
    pub result: Option<RecognitionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Base64 of the inner result JSON
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub seq: Option<i64>,
}

/// Inner result JSON carried (base64-encoded) in `result.text`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognitionText {
    #[serde(default)]
    pub ws: Vec<WordSegment>,
    /// Last segment of the utterance
    #[serde(default)]
    pub ls: bool,
    /// Sentence number (dynamic correction)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sn: Option<u32>,
    /// `apd` (append) or `rpl` (replace sentences `rg`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rg: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WordSegment {
    #[serde(default)]
    pub cw: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub w: String,
}
