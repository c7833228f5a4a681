use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::messages::{InboundEnvelope, RecognitionText};
use crate::error::{VoiceError, VoiceResult};

/// Status value (header or result) that marks the last message of a session
const STATUS_LAST: i64 = 2;

/// Text decoded from one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// First candidate of every word segment, concatenated
    pub text: String,
    /// Sentence number, when the provider sends one
    pub sn: Option<u32>,
    /// Inclusive sentence range this fragment replaces
    pub replaces: Option<(u32, u32)>,
}

/// One decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub fragment: Option<Fragment>,
    /// Terminal message for the session
    pub is_last: bool,
    /// Set when the inner result could not be decoded; the envelope still counts
    pub warning: Option<VoiceError>,
    pub sid: Option<String>,
}

/// Decode a raw inbound message
///
/// Fails with `Malformed` when the envelope is not valid JSON of the expected
/// shape and with `Protocol` when the provider reports a nonzero code. A bad
/// inner payload is reported through `warning` so a terminal status on the same
/// message is not lost.
pub fn decode(raw: &str) -> VoiceResult<DecodedMessage> {
    let envelope: InboundEnvelope = serde_json::from_str(raw)?;

    if envelope.header.code != 0 {
        return Err(VoiceError::Protocol {
            code: envelope.header.code,
            message: envelope
                .header
                .message
                .unwrap_or_else(|| "unknown error".to_string()),
        });
    }

    let result = envelope.payload.and_then(|p| p.result);
    let mut is_last = envelope.header.status == Some(STATUS_LAST)
        || result.as_ref().and_then(|r| r.status) == Some(STATUS_LAST);

    let mut fragment = None;
    let mut warning = None;
    if let Some(text) = result.and_then(|r| r.text) {
        match decode_result_text(&text) {
            Ok(inner) => {
                is_last |= inner.ls;
                fragment = Some(Fragment {
                    text: best_text(&inner),
                    sn: inner.sn,
                    replaces: replace_range(&inner),
                });
            }
            Err(e) => warning = Some(e),
        }
    }

    Ok(DecodedMessage {
        fragment,
        is_last,
        warning,
        sid: envelope.header.sid,
    })
}

/// base64 → UTF-8 → inner result JSON
pub fn decode_result_text(encoded: &str) -> VoiceResult<RecognitionText> {
    let bytes = BASE64.decode(encoded.trim())?;
    let json = String::from_utf8(bytes)
        .map_err(|e| VoiceError::Malformed(format!("result text is not UTF-8: {}", e)))?;
    Ok(serde_json::from_str(&json)?)
}

/// Concatenate the first candidate of every word segment
pub fn best_text(inner: &RecognitionText) -> String {
    inner
        .ws
        .iter()
        .filter_map(|seg| seg.cw.first())
        .map(|cw| cw.w.as_str())
        .collect()
}

fn replace_range(inner: &RecognitionText) -> Option<(u32, u32)> {
    if inner.pgs.as_deref() != Some("rpl") {
        return None;
    }
    match inner.rg.as_deref() {
        Some([start, end, ..]) => Some((*start, *end)),
        _ => None,
    }
}

/// Running transcript
///
/// Fragments append in arrival order. A fragment with a replace range first
/// drops the earlier sentences whose numbers fall inside it.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    sentences: Vec<(Option<u32>, String)>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, fragment: &Fragment) {
        if let Some((start, end)) = fragment.replaces {
            self.sentences
                .retain(|(sn, _)| !matches!(sn, Some(n) if *n >= start && *n <= end));
        }
        self.sentences.push((fragment.sn, fragment.text.clone()));
    }

    /// Transcript so far, joined with no separator
    pub fn text(&self) -> String {
        self.sentences.iter().map(|(_, t)| t.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.iter().all(|(_, t)| t.is_empty())
    }

    pub fn clear(&mut self) {
        self.sentences.clear();
    }
}
