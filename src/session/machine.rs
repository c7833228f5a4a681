use chrono::Utc;
use tracing::{debug, warn};

use super::listener::SessionEvent;
use super::stats::SessionStats;
use crate::audio::resample::{downmix_to_mono, to_pcm16_bytes};
use crate::audio::{AudioFrame, FrameChunker};
use crate::error::{VoiceError, VoiceResult};
use crate::iat::{decode, FrameStatus, OutboundFrame, RecognitionParams, Transcript};

/// Highest sequence number the protocol accepts
pub const MAX_SEQ: u32 = 999_999;

/// Phase of an open connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenPhase {
    /// Connected, Start frame not sent yet
    AwaitingFirstFrame,
    /// Start frame sent, continuations flowing
    Streaming,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open(OpenPhase),
    Closing,
    Closed,
}

impl SessionState {
    pub fn is_open(self) -> bool {
        matches!(self, SessionState::Open(_))
    }

    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

/// Protocol state machine for one recognition session
///
/// Pure bookkeeping: no I/O and no timers. The async driver feeds it capture
/// buffers, timer ticks, inbound messages and stop requests, and sends whatever
/// frames it hands back. Owning the byte queue here keeps append and dequeue on
/// the driver task, so they never interleave.
pub struct SessionMachine {
    app_id: String,
    params: RecognitionParams,
    state: SessionState,
    chunker: FrameChunker,
    seq: u32,
    first_frame_sent: bool,
    transcript: Transcript,
    stats: SessionStats,
}

impl SessionMachine {
    pub fn new(app_id: impl Into<String>, params: RecognitionParams, frame_bytes: usize) -> Self {
        Self {
            app_id: app_id.into(),
            params,
            state: SessionState::Idle,
            chunker: FrameChunker::new(frame_bytes),
            seq: 0,
            first_frame_sent: false,
            transcript: Transcript::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Idle → Connecting
    pub fn begin_connecting(&mut self, session_id: &str) {
        if self.state != SessionState::Idle {
            warn!("begin_connecting in state {:?}, ignoring", self.state);
            return;
        }
        self.stats = SessionStats {
            session_id: session_id.to_string(),
            started_at: Some(Utc::now()),
            ..SessionStats::default()
        };
        self.transition(SessionState::Connecting);
    }

    /// Connecting → Open(AwaitingFirstFrame)
    pub fn on_open(&mut self) {
        if self.state == SessionState::Connecting {
            self.transition(SessionState::Open(OpenPhase::AwaitingFirstFrame));
        }
    }

    /// Resample and queue one capture buffer
    pub fn on_capture(&mut self, frame: &AudioFrame) {
        if !self.state.is_open() {
            return;
        }
        let mono = downmix_to_mono(&frame.samples, frame.channels);
        let pcm = to_pcm16_bytes(&mono, frame.sample_rate);
        self.chunker.append(&pcm);
    }

    /// Queue already-converted PCM16 bytes
    pub fn on_pcm(&mut self, bytes: &[u8]) {
        if self.state.is_open() {
            self.chunker.append(bytes);
        }
    }

    /// Timer tick: emit at most one frame
    ///
    /// The first frame is `Start` at sequence 0, then `Continuation`s. Returns
    /// `None` when less than a frame is queued.
    pub fn on_tick(&mut self) -> VoiceResult<Option<OutboundFrame>> {
        if !self.state.is_open() || !self.chunker.has_frame() {
            return Ok(None);
        }
        if self.seq > MAX_SEQ {
            return Err(VoiceError::SequenceExhausted);
        }
        let Some(audio) = self.chunker.next_frame() else {
            return Ok(None);
        };

        let status = if self.first_frame_sent {
            FrameStatus::Continuation
        } else {
            FrameStatus::Start
        };
        let frame = OutboundFrame::new(&self.app_id, status, self.seq, &audio, &self.params);

        if !self.first_frame_sent {
            self.first_frame_sent = true;
            self.transition(SessionState::Open(OpenPhase::Streaming));
        }
        self.record_sent(self.seq, audio.len());
        self.seq += 1;

        Ok(Some(frame))
    }

    /// Stop requested: enter Closing
    ///
    /// Returns the `Final` frame when a `Start` frame went out; a Final with no
    /// Start would break frame ordering, so none is produced in that case, nor
    /// once the sequence range is used up.
    /// Queued audio shorter than a frame is discarded.
    pub fn on_stop(&mut self) -> Option<OutboundFrame> {
        match self.state {
            SessionState::Closing | SessionState::Closed => return None,
            SessionState::Idle => {
                self.transition(SessionState::Closed);
                return None;
            }
            _ => {}
        }

        self.stats.bytes_discarded += self.chunker.clear();
        self.transition(SessionState::Closing);

        if !self.first_frame_sent {
            return None;
        }
        if self.seq > MAX_SEQ {
            warn!("Sequence range used up, no Final frame sent");
            return None;
        }

        let frame = OutboundFrame::new(
            &self.app_id,
            FrameStatus::Final,
            self.seq,
            &[],
            &self.params,
        );
        self.record_sent(self.seq, 0);
        Some(frame)
    }

    /// Decode one inbound message into listener events
    ///
    /// A terminal event (`End` or `Error`) is always last in the returned list.
    pub fn on_message(&mut self, raw: &str) -> Vec<SessionEvent> {
        if !matches!(self.state, SessionState::Open(_) | SessionState::Closing) {
            debug!("Ignoring message in state {:?}", self.state);
            return Vec::new();
        }
        self.stats.messages_received += 1;

        let decoded = match decode(raw) {
            Ok(decoded) => decoded,
            Err(e) if e.is_fatal() => return vec![SessionEvent::Error(e)],
            Err(e) => {
                self.stats.decode_warnings += 1;
                warn!("Skipping undecodable message: {}", e);
                return vec![SessionEvent::Warning(e)];
            }
        };

        let mut events = Vec::new();
        if let Some(warning) = decoded.warning {
            self.stats.decode_warnings += 1;
            warn!("Skipping undecodable result: {}", warning);
            events.push(SessionEvent::Warning(warning));
        }
        if let Some(fragment) = decoded.fragment {
            self.transcript.apply(&fragment);
            events.push(SessionEvent::Result(self.transcript.text()));
        }
        if decoded.is_last {
            events.push(SessionEvent::End(self.transcript.text()));
        }
        events
    }

    /// Enter Closed and drop all per-session state
    ///
    /// Returns `false` when already closed.
    pub fn teardown(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.stats.bytes_discarded += self.chunker.clear();
        self.first_frame_sent = false;
        self.seq = 0;
        if let Some(started) = self.stats.started_at {
            let elapsed = Utc::now().signed_duration_since(started);
            self.stats.duration_secs = elapsed.num_milliseconds() as f64 / 1000.0;
        }
        self.transition(SessionState::Closed);
        true
    }

    pub fn transcript(&self) -> String {
        self.transcript.text()
    }

    pub fn pending_bytes(&self) -> usize {
        self.chunker.pending_bytes()
    }

    /// Whether a whole frame is waiting for the next tick
    pub fn has_frame(&self) -> bool {
        self.chunker.has_frame()
    }

    pub fn first_frame_sent(&self) -> bool {
        self.first_frame_sent
    }

    /// Sequence number the next frame will carry
    pub fn next_seq(&self) -> u32 {
        self.seq
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    fn record_sent(&mut self, seq: u32, bytes: usize) {
        self.stats.frames_sent += 1;
        self.stats.audio_bytes_sent += bytes;
        self.stats.last_seq = Some(seq);
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
