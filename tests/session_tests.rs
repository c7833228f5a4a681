// Tests for the recognition session
//
// The protocol state machine is driven directly for the frame-level scenarios.
// The async client runs against an in-memory connector and a scripted capture
// backend, so whole sessions are exercised without network or audio hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use voice_iat::audio::{AudioBackend, AudioFrame, ChunkConfig};
use voice_iat::iat::{Connector, FrameStatus, OutboundFrame, RecognitionParams, Transport};
use voice_iat::session::{
    OpenPhase, SessionConfig, SessionEvent, SessionMachine, SessionState, VoiceSession, MAX_SEQ,
};
use voice_iat::{VoiceError, VoiceResult};

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeTransport {
    sent: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send_text(&mut self, text: String) -> VoiceResult<()> {
        self.sent
            .send(text)
            .map_err(|_| VoiceError::Transport("test receiver gone".to_string()))
    }

    async fn next_message(&mut self) -> Option<VoiceResult<String>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> VoiceResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Test-side ends of a fake connection
struct Server {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
}

impl Server {
    async fn next_frame(&mut self) -> OutboundFrame {
        let raw = timeout(WAIT, self.sent.recv())
            .await
            .expect("frame not sent in time")
            .expect("session dropped the transport");
        serde_json::from_str(&raw).expect("outbound frame is valid JSON")
    }

    fn reply(&self, message: String) {
        if let Some(inbound) = &self.inbound {
            inbound.send(message).expect("session still listening");
        }
    }

    /// Close the connection from the server side
    fn hang_up(&mut self) {
        self.inbound = None;
    }
}

struct FakeConnector {
    transport: std::sync::Mutex<Option<FakeTransport>>,
    connects: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &str) -> VoiceResult<Box<dyn Transport>> {
        assert!(url.starts_with("wss://iat.xf-yun.com/v1?authorization="));
        self.connects.fetch_add(1, Ordering::SeqCst);
        let transport = self.transport.lock().unwrap().take();
        match transport {
            Some(t) => Ok(Box::new(t)),
            None => Err(VoiceError::Transport("already used".to_string())),
        }
    }
}

fn fake_connection() -> (FakeConnector, Server) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let connects = Arc::new(AtomicUsize::new(0));

    let connector = FakeConnector {
        transport: std::sync::Mutex::new(Some(FakeTransport {
            sent: sent_tx,
            inbound: inbound_rx,
            closed: Arc::clone(&closed),
        })),
        connects: Arc::clone(&connects),
    };
    let server = Server {
        sent: sent_rx,
        inbound: Some(inbound_tx),
        closed,
        connects,
    };
    (connector, server)
}

/// Connector whose handshake never completes
struct PendingConnector;

#[async_trait::async_trait]
impl Connector for PendingConnector {
    async fn connect(&self, _url: &str) -> VoiceResult<Box<dyn Transport>> {
        std::future::pending().await
    }
}

/// Capture backend that plays back a fixed list of frames
struct ScriptedBackend {
    frames: Vec<AudioFrame>,
    /// Close the capture channel after the last frame
    end_of_input: bool,
    fail_with: Option<VoiceError>,
    /// Device error delivered after the last frame
    fail_after: Option<VoiceError>,
    tx: Option<mpsc::Sender<VoiceResult<AudioFrame>>>,
    stops: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    fn new(frames: Vec<AudioFrame>) -> (Self, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let backend = Self {
            frames,
            end_of_input: false,
            fail_with: None,
            fail_after: None,
            tx: None,
            stops: Arc::clone(&stops),
        };
        (backend, stops)
    }
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedBackend {
    async fn start(&mut self) -> VoiceResult<mpsc::Receiver<VoiceResult<AudioFrame>>> {
        if let Some(err) = self.fail_with.clone() {
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(self.frames.len() + 1);
        for frame in self.frames.drain(..) {
            tx.try_send(Ok(frame)).expect("channel sized for the script");
        }
        if let Some(err) = self.fail_after.take() {
            tx.try_send(Err(err)).expect("channel sized for the script");
        }
        if !self.end_of_input {
            self.tx = Some(tx);
        }
        Ok(rx)
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        self.tx = None;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.tx.is_some()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_config() -> SessionConfig {
    SessionConfig {
        chunk: ChunkConfig {
            frame_bytes: 1280,
            frame_interval: Duration::from_millis(10),
        },
        final_result_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
    .with_credentials("app-id", "api-key", "api-secret")
}

/// 100 ms of silence at 16 kHz: 3200 bytes once converted
fn silence_100ms() -> AudioFrame {
    AudioFrame::mono(vec![0.0; 1600], 16000)
}

fn result_message(status: i64, sn: u32, word: &str) -> String {
    let inner = json!({"sn": sn, "ls": status == 2, "ws": [{"cw": [{"w": word}]}]});
    json!({
        "header": {"code": 0, "message": "success", "sid": "iat-test", "status": status},
        "payload": {"result": {"text": BASE64.encode(inner.to_string()), "status": status}}
    })
    .to_string()
}

async fn collect_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut all = Vec::new();
    while let Ok(Some(event)) = timeout(WAIT, events.recv()).await {
        all.push(event);
    }
    all
}

fn assert_frame(frame: &OutboundFrame, status: FrameStatus, seq: u32, audio_len: usize) {
    assert_eq!(frame.status(), Some(status));
    assert_eq!(frame.payload.audio.status, status.code());
    assert_eq!(frame.seq(), seq);
    assert_eq!(frame.audio_bytes().unwrap().len(), audio_len);
    assert_eq!(frame.parameter.is_some(), status == FrameStatus::Start);
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

fn open_machine() -> SessionMachine {
    let mut machine = SessionMachine::new("app-id", RecognitionParams::default(), 1280);
    machine.begin_connecting("test");
    machine.on_open();
    machine
}

#[test]
fn test_frames_for_200ms_of_audio_then_stop() {
    let mut machine = open_machine();
    assert_eq!(machine.state(), SessionState::Open(OpenPhase::AwaitingFirstFrame));

    machine.on_capture(&silence_100ms());
    assert_eq!(machine.pending_bytes(), 3200);

    let start = machine.on_tick().unwrap().unwrap();
    assert_frame(&start, FrameStatus::Start, 0, 1280);
    assert!(start.audio_bytes().unwrap().iter().all(|b| *b == 0));
    assert_eq!(machine.state(), SessionState::Open(OpenPhase::Streaming));

    let params = start.parameter.as_ref().unwrap();
    assert_eq!(params.iat.domain, "slm");
    assert_eq!(params.iat.language, "zh_cn");
    assert_eq!(params.iat.accent, "mandarin");
    assert_eq!(params.iat.eos, 6000);
    assert_eq!(params.iat.dwa, "wpgs");

    let cont = machine.on_tick().unwrap().unwrap();
    assert_frame(&cont, FrameStatus::Continuation, 1, 1280);

    // 640 bytes left: the tick is a no-op
    assert!(machine.on_tick().unwrap().is_none());
    assert_eq!(machine.pending_bytes(), 640);

    let last = machine.on_stop().unwrap();
    assert_frame(&last, FrameStatus::Final, 2, 0);
    assert_eq!(machine.state(), SessionState::Closing);
    assert_eq!(machine.pending_bytes(), 0);

    let stats = machine.stats();
    assert_eq!(stats.frames_sent, 3);
    assert_eq!(stats.audio_bytes_sent, 2560);
    assert_eq!(stats.bytes_discarded, 640);
    assert_eq!(stats.last_seq, Some(2));
}

#[test]
fn test_outbound_frame_wire_shape() {
    let mut machine = open_machine();
    machine.on_pcm(&[0u8; 1280]);
    let frame = machine.on_tick().unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

    assert_eq!(value["header"]["app_id"], "app-id");
    assert_eq!(value["header"]["status"], 0);
    assert_eq!(value["parameter"]["iat"]["result"]["encoding"], "utf8");
    assert_eq!(value["payload"]["audio"]["encoding"], "raw");
    assert_eq!(value["payload"]["audio"]["sample_rate"], 16000);
    assert_eq!(value["payload"]["audio"]["channels"], 1);
    assert_eq!(value["payload"]["audio"]["bit_depth"], 16);
    assert_eq!(value["payload"]["audio"]["seq"], 0);

    machine.on_pcm(&[0u8; 1280]);
    let frame = machine.on_tick().unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
    assert!(value.get("parameter").is_none());
}

#[test]
fn test_sequence_numbers_increase_by_one() {
    let mut machine = open_machine();
    machine.on_pcm(&vec![0u8; 1280 * 25]);

    let mut seqs = Vec::new();
    while let Some(frame) = machine.on_tick().unwrap() {
        seqs.push(frame.seq());
    }
    assert_eq!(seqs, (0..25).collect::<Vec<u32>>());
    assert_eq!(machine.next_seq(), 25);
    assert_eq!(machine.on_stop().unwrap().seq(), 25);
}

#[test]
fn test_stop_before_first_frame_sends_nothing() {
    let mut machine = open_machine();
    machine.on_pcm(&[0u8; 1000]);

    assert!(machine.on_stop().is_none());
    assert_eq!(machine.stats().bytes_discarded, 1000);
    assert!(!machine.first_frame_sent());
}

#[test]
fn test_capture_ignored_unless_open() {
    let mut machine = SessionMachine::new("app-id", RecognitionParams::default(), 1280);
    machine.on_capture(&silence_100ms());
    assert_eq!(machine.pending_bytes(), 0);

    machine.begin_connecting("test");
    machine.on_pcm(&[0u8; 1280]);
    assert!(machine.on_tick().unwrap().is_none());

    machine.on_open();
    machine.on_pcm(&[0u8; 1280]);
    machine.on_stop();
    machine.on_pcm(&[0u8; 1280]);
    assert_eq!(machine.pending_bytes(), 0);
}

#[test]
fn test_messages_become_events() {
    let mut machine = open_machine();

    assert_eq!(
        machine.on_message(&result_message(1, 1, "你好")),
        vec![SessionEvent::Result("你好".to_string())]
    );

    let events = machine.on_message("{broken");
    assert!(matches!(events.as_slice(), [SessionEvent::Warning(VoiceError::Malformed(_))]));

    assert_eq!(
        machine.on_message(&result_message(2, 2, "世界")),
        vec![
            SessionEvent::Result("你好世界".to_string()),
            SessionEvent::End("你好世界".to_string()),
        ]
    );

    let error = json!({"header": {"code": 10165, "message": "invalid handle"}}).to_string();
    let events = machine.on_message(&error);
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
    assert!(matches!(events[0], SessionEvent::Error(VoiceError::Protocol { code: 10165, .. })));

    assert_eq!(machine.stats().messages_received, 4);
    assert_eq!(machine.stats().decode_warnings, 1);
}

#[test]
fn test_teardown_is_idempotent() {
    let mut machine = open_machine();
    machine.on_pcm(&[0u8; 3000]);
    machine.on_tick().unwrap();

    assert!(machine.teardown());
    assert!(machine.state().is_closed());
    assert_eq!(machine.pending_bytes(), 0);
    assert_eq!(machine.next_seq(), 0);
    assert!(!machine.first_frame_sent());

    assert!(!machine.teardown());
    assert!(machine.on_message(&result_message(1, 1, "x")).is_empty());
    assert!(machine.on_stop().is_none());
}

#[test]
fn test_stop_on_idle_machine_sends_nothing() {
    let mut machine = SessionMachine::new("app-id", RecognitionParams::default(), 1280);
    assert_eq!(machine.state(), SessionState::Idle);

    assert!(machine.on_stop().is_none());
    assert!(machine.state().is_closed());
    assert_eq!(machine.stats().frames_sent, 0);
    assert!(machine.on_stop().is_none());
}

#[test]
fn test_no_final_frame_after_sequence_exhausted() {
    // Two-byte frames keep a million ticks cheap
    let mut machine = SessionMachine::new("app-id", RecognitionParams::default(), 2);
    machine.begin_connecting("test");
    machine.on_open();
    machine.on_pcm(&vec![0u8; 2 * (MAX_SEQ as usize + 2)]);

    let mut last = None;
    for _ in 0..=MAX_SEQ {
        last = machine.on_tick().unwrap().map(|f| f.seq());
    }
    assert_eq!(last, Some(MAX_SEQ));
    assert_eq!(machine.on_tick().unwrap_err(), VoiceError::SequenceExhausted);

    assert!(machine.on_stop().is_none());
    assert_eq!(machine.state(), SessionState::Closing);
    assert_eq!(machine.stats().last_seq, Some(MAX_SEQ));
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_without_start_is_a_no_op() -> Result<()> {
    let (connector, server) = fake_connection();
    let (backend, stops) = ScriptedBackend::new(Vec::new());
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    session.stop();
    session.stop();

    assert!(session.closed().await.is_none());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_active());
    assert_eq!(server.connects.load(Ordering::SeqCst), 0);
    assert_eq!(stops.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_device_failure_mid_session_is_an_error() -> Result<()> {
    let (connector, mut server) = fake_connection();
    let (mut backend, stops) = ScriptedBackend::new(vec![silence_100ms()]);
    backend.fail_after = Some(VoiceError::DeviceUnavailable("device unplugged".to_string()));
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    let events = collect_events(events).await;
    assert_eq!(
        events,
        vec![SessionEvent::Error(VoiceError::DeviceUnavailable(
            "device unplugged".to_string()
        ))]
    );

    timeout(WAIT, session.closed()).await?;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(server.closed.load(Ordering::SeqCst));
    assert!(stops.load(Ordering::SeqCst) >= 1);
    // No Final frame follows a capture failure
    while let Ok(raw) = server.sent.try_recv() {
        let frame: OutboundFrame = serde_json::from_str(&raw)?;
        assert_ne!(frame.status(), Some(FrameStatus::Final));
    }
    Ok(())
}

#[tokio::test]
async fn test_session_streams_and_ends_with_final_result() -> Result<()> {
    let (connector, mut server) = fake_connection();
    let (backend, stops) = ScriptedBackend::new(vec![silence_100ms()]);
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    assert_frame(&server.next_frame().await, FrameStatus::Start, 0, 1280);
    assert_frame(&server.next_frame().await, FrameStatus::Continuation, 1, 1280);

    session.stop();
    assert_frame(&server.next_frame().await, FrameStatus::Final, 2, 0);

    server.reply(result_message(2, 1, "你好"));

    let events = collect_events(events).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Result("你好".to_string()),
            SessionEvent::End("你好".to_string()),
        ]
    );

    let stats = timeout(WAIT, session.closed()).await?.unwrap();
    assert_eq!(stats.frames_sent, 3);
    assert_eq!(stats.bytes_discarded, 640);
    assert_eq!(stats.messages_received, 1);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(server.closed.load(Ordering::SeqCst));
    assert!(stops.load(Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn test_server_close_after_stop_ends_with_partial_transcript() -> Result<()> {
    let (connector, mut server) = fake_connection();
    let (backend, _) = ScriptedBackend::new(vec![silence_100ms()]);
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    server.next_frame().await;
    server.reply(result_message(1, 1, "今天"));
    session.stop();

    // Drain up to the Final frame, then hang up without a terminal message
    loop {
        if server.next_frame().await.status() == Some(FrameStatus::Final) {
            break;
        }
    }
    server.hang_up();

    let events = collect_events(events).await;
    assert_eq!(events.last(), Some(&SessionEvent::End("今天".to_string())));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    timeout(WAIT, session.closed()).await?;
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_provider_error_ends_session() -> Result<()> {
    let (connector, mut server) = fake_connection();
    let (backend, stops) = ScriptedBackend::new(vec![silence_100ms()]);
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    server.next_frame().await;
    server.reply("not json at all".to_string());
    server.reply(json!({"header": {"code": 10165, "message": "invalid handle"}}).to_string());

    let events = collect_events(events).await;
    assert!(matches!(events[0], SessionEvent::Warning(VoiceError::Malformed(_))));
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Error(VoiceError::Protocol {
            code: 10165,
            message: "invalid handle".to_string()
        }))
    );
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::End(_))));

    timeout(WAIT, session.closed()).await?;
    assert!(server.closed.load(Ordering::SeqCst));
    assert!(stops.load(Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn test_unexpected_server_close_is_an_error() -> Result<()> {
    let (connector, mut server) = fake_connection();
    let (backend, _) = ScriptedBackend::new(vec![silence_100ms()]);
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    server.next_frame().await;
    server.hang_up();

    let events = collect_events(events).await;
    assert!(matches!(events.last(), Some(SessionEvent::Error(VoiceError::Transport(_)))));
    timeout(WAIT, session.closed()).await?;
    Ok(())
}

#[tokio::test]
async fn test_file_input_drains_and_finishes_by_itself() -> Result<()> {
    let (connector, mut server) = fake_connection();
    let (mut backend, stops) = ScriptedBackend::new(vec![silence_100ms()]);
    backend.end_of_input = true;
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    assert_frame(&server.next_frame().await, FrameStatus::Start, 0, 1280);
    assert_frame(&server.next_frame().await, FrameStatus::Continuation, 1, 1280);
    assert_frame(&server.next_frame().await, FrameStatus::Final, 2, 0);

    server.reply(result_message(2, 1, "好"));
    let events = collect_events(events).await;
    assert_eq!(events.last(), Some(&SessionEvent::End("好".to_string())));

    timeout(WAIT, session.closed()).await?;
    assert!(stops.load(Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn test_stop_before_connection_opens() -> Result<()> {
    let (backend, stops) = ScriptedBackend::new(vec![silence_100ms()]);
    let mut session = VoiceSession::new(test_config(), Arc::new(PendingConnector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;
    session.stop();
    session.stop();

    let events = collect_events(events).await;
    assert_eq!(events, vec![SessionEvent::End(String::new())]);

    let stats = timeout(WAIT, session.closed()).await?.unwrap();
    assert_eq!(stats.frames_sent, 0);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.is_active());
    // Release is a no-op on a backend that never started, but it is still requested
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_stop_before_first_frame_sends_no_final() -> Result<()> {
    let (connector, mut server) = fake_connection();
    let (backend, _) = ScriptedBackend::new(Vec::new());
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    let mut state = session.watch_state();
    timeout(WAIT, state.wait_for(|s| s.is_open())).await??;
    session.stop();

    let events = collect_events(events).await;
    assert_eq!(events, vec![SessionEvent::End(String::new())]);
    timeout(WAIT, session.closed()).await?;

    assert!(server.sent.try_recv().is_err());
    assert!(server.closed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_missing_credentials_fail_before_connecting() -> Result<()> {
    let (connector, server) = fake_connection();
    let (backend, _) = ScriptedBackend::new(Vec::new());
    let config = SessionConfig {
        app_id: Some("app-id".to_string()),
        ..SessionConfig::default()
    };
    let mut session = VoiceSession::new(config, Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    let err = session.start(tx).unwrap_err();
    assert_eq!(err, VoiceError::MissingCredentials(vec!["api_key", "api_secret"]));

    let events = collect_events(events).await;
    assert_eq!(events, vec![SessionEvent::Error(err)]);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(server.connects.load(Ordering::SeqCst), 0);
    assert!(session.closed().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_capture_permission_denied() -> Result<()> {
    let (connector, server) = fake_connection();
    let (mut backend, _) = ScriptedBackend::new(Vec::new());
    backend.fail_with = Some(VoiceError::PermissionDenied("blocked by user".to_string()));
    let mut session = VoiceSession::new(test_config(), Arc::new(connector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    let events = collect_events(events).await;
    assert_eq!(
        events,
        vec![SessionEvent::Error(VoiceError::PermissionDenied(
            "blocked by user".to_string()
        ))]
    );
    timeout(WAIT, session.closed()).await?;
    assert!(server.closed.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_connect_timeout() -> Result<()> {
    let (backend, _) = ScriptedBackend::new(Vec::new());
    let config = SessionConfig {
        connect_timeout: Some(Duration::from_millis(50)),
        ..test_config()
    };
    let mut session = VoiceSession::new(config, Arc::new(PendingConnector), Box::new(backend));

    let (tx, events) = mpsc::unbounded_channel();
    session.start(tx)?;

    let events = collect_events(events).await;
    assert!(matches!(events.as_slice(), [SessionEvent::Error(VoiceError::Timeout(_))]));
    timeout(WAIT, session.closed()).await?;
    Ok(())
}

#[tokio::test]
async fn test_second_start_while_running_is_rejected() -> Result<()> {
    let (backend, _) = ScriptedBackend::new(Vec::new());
    let mut session = VoiceSession::new(test_config(), Arc::new(PendingConnector), Box::new(backend));

    let (tx, _events) = mpsc::unbounded_channel();
    session.start(tx.clone())?;
    assert!(matches!(session.start(tx), Err(VoiceError::Configuration(_))));

    session.stop();
    timeout(WAIT, session.closed()).await?;
    Ok(())
}

#[tokio::test]
async fn test_session_can_run_again_after_close() -> Result<()> {
    let (backend, stops) = ScriptedBackend::new(Vec::new());
    let mut session = VoiceSession::new(test_config(), Arc::new(PendingConnector), Box::new(backend));

    for _ in 0..2 {
        let (tx, events) = mpsc::unbounded_channel();
        session.start(tx)?;
        session.stop();
        assert_eq!(collect_events(events).await, vec![SessionEvent::End(String::new())]);
        timeout(WAIT, session.closed()).await?;
        assert_eq!(session.state(), SessionState::Closed);
    }
    assert_eq!(stops.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_closure_listener_receives_error() -> Result<()> {
    use std::sync::Mutex as StdMutex;
    use voice_iat::session::listener_fn;

    let errors = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let listener = listener_fn(
        |_: &str| panic!("no results expected"),
        move |e: &VoiceError| sink.lock().unwrap().push(e.clone()),
        |_: &str| panic!("no end expected"),
    );

    let (backend, _) = ScriptedBackend::new(Vec::new());
    let mut session = VoiceSession::new(
        SessionConfig::default(),
        Arc::new(PendingConnector),
        Box::new(backend),
    );
    assert!(session.start(listener).is_err());

    let errors = errors.lock().unwrap();
    assert_eq!(
        *errors,
        vec![VoiceError::MissingCredentials(vec!["app_id", "api_key", "api_secret"])]
    );
    Ok(())
}
