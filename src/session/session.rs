use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::SessionConfig;
use super::listener::{SessionEvent, TranscriptListener};
use super::machine::{SessionMachine, SessionState};
use super::stats::SessionStats;
use crate::audio::{AudioBackend, AudioFrame};
use crate::auth::{build_authorization, connection_url};
use crate::error::{VoiceError, VoiceResult};
use crate::iat::{Connector, OutboundFrame, Transport};

type SharedBackend = Arc<Mutex<Box<dyn AudioBackend>>>;

/// A streaming recognition client
///
/// Each `start()` runs one session on its own task: connect, capture, stream
/// frames every tick, fold results into the transcript, and tear everything
/// down through a single cleanup path. `stop()` is the only cancellation entry
/// point and may be called in any state.
pub struct VoiceSession {
    /// Session configuration
    config: SessionConfig,

    /// Opens the connection for each session
    connector: Arc<dyn Connector>,

    /// Capture device, reused across sessions but never shared between two
    backend: SharedBackend,

    /// Current state of the latest session
    state_rx: watch::Receiver<SessionState>,

    /// Stop signal for the running session
    stop_tx: Option<watch::Sender<bool>>,

    /// Handle for the session task
    task: Option<JoinHandle<SessionStats>>,

    /// Stats of the last finished session
    last_stats: Option<SessionStats>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        backend: Box<dyn AudioBackend>,
    ) -> Self {
        let (_, state_rx) = watch::channel(SessionState::Idle);
        Self {
            config,
            connector,
            backend: Arc::new(Mutex::new(backend)),
            state_rx,
            stop_tx: None,
            task: None,
            last_stats: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a session; returns as soon as the connection attempt is under way
    ///
    /// Missing credentials fail immediately: the listener's `on_error` fires, the
    /// state goes straight to `Closed` and nothing touches the network.
    pub fn start(&mut self, listener: impl TranscriptListener) -> VoiceResult<()> {
        let mut listener: Box<dyn TranscriptListener> = Box::new(listener);

        if self.is_active() {
            warn!("Session already running");
            return Err(VoiceError::Configuration(
                "a session is already running".to_string(),
            ));
        }

        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        self.state_rx = state_rx;

        let credentials = match self.config.credentials() {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Cannot start session: {}", e);
                state_tx.send_replace(SessionState::Closed);
                listener.on_error(&e);
                return Err(e);
            }
        };

        let auth = match build_authorization(
            &self.config.host,
            &self.config.path,
            &credentials.api_key,
            &credentials.api_secret,
        ) {
            Ok(auth) => auth,
            Err(e) => {
                error!("Cannot sign handshake: {}", e);
                state_tx.send_replace(SessionState::Closed);
                listener.on_error(&e);
                return Err(e);
            }
        };
        let url = connection_url(&self.config.host, &self.config.path, &auth);

        let session_id = uuid::Uuid::new_v4().to_string();
        let machine = SessionMachine::new(
            credentials.app_id,
            self.config.recognition.clone(),
            self.config.chunk.frame_bytes,
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let driver = Driver {
            machine,
            listener,
            state_tx,
            backend: Arc::clone(&self.backend),
        };
        let run = Run {
            session_id: session_id.clone(),
            url,
            connector: Arc::clone(&self.connector),
            stop_rx,
            frame_interval: self.config.chunk.frame_interval,
            connect_timeout: self.config.connect_timeout,
            final_result_timeout: self.config.final_result_timeout,
        };

        info!(
            "Starting recognition session {} against {}{}",
            session_id, self.config.host, self.config.path
        );

        let span = info_span!("iat_session", session_id = %session_id);
        self.task = Some(tokio::spawn(run.execute(driver).instrument(span)));
        self.stop_tx = Some(stop_tx);
        self.last_stats = None;

        Ok(())
    }

    /// Request the session to stop
    ///
    /// Safe in any state and idempotent. Resources are released by the session
    /// task shortly after; await [`VoiceSession::closed`] to observe that.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = &self.stop_tx {
            stop_tx.send_replace(true);
        }
    }

    /// Wait until the current session is fully torn down
    pub async fn closed(&mut self) -> Option<SessionStats> {
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(stats) => self.last_stats = Some(stats),
                Err(e) => error!("Session task panicked: {}", e),
            }
            self.stop_tx = None;
        }
        self.last_stats.clone()
    }

    /// State of the latest session
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Receiver that follows state changes of the latest session
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Whether a session task is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-session state owned by the session task
struct Driver {
    machine: SessionMachine,
    listener: Box<dyn TranscriptListener>,
    state_tx: watch::Sender<SessionState>,
    backend: SharedBackend,
}

impl Driver {
    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state());
    }

    /// Single cleanup path for every way a session can end
    async fn finish(&mut self, transport: Option<Box<dyn Transport>>, outcome: VoiceResult<String>) {
        match &outcome {
            Ok(transcript) => {
                info!("Session finished ({} chars)", transcript.chars().count());
                self.listener.on_end(transcript);
            }
            Err(e) => {
                error!("Session failed: {}", e);
                self.listener.on_error(e);
            }
        }

        release_capture(&self.backend).await;
        if let Some(mut transport) = transport {
            if let Err(e) = transport.close().await {
                debug!("Close after session end: {}", e);
            }
        }
        self.machine.teardown();
        self.publish();
    }
}

/// Inputs of one session run
struct Run {
    session_id: String,
    url: String,
    connector: Arc<dyn Connector>,
    stop_rx: watch::Receiver<bool>,
    frame_interval: Duration,
    connect_timeout: Option<Duration>,
    final_result_timeout: Duration,
}

impl Run {
    async fn execute(mut self, mut driver: Driver) -> SessionStats {
        driver.machine.begin_connecting(&self.session_id);
        driver.publish();

        let connected = tokio::select! {
            biased;
            _ = self.stop_rx.changed() => None,
            res = connect(self.connector.as_ref(), &self.url, self.connect_timeout) => Some(res),
        };

        let mut transport = match connected {
            None => {
                info!("Stopped before the connection opened");
                driver.machine.on_stop();
                driver.publish();
                driver.finish(None, Ok(String::new())).await;
                return self.summary(&driver);
            }
            Some(Err(e)) => {
                driver.finish(None, Err(e)).await;
                return self.summary(&driver);
            }
            Some(Ok(transport)) => transport,
        };

        driver.machine.on_open();
        driver.publish();

        let capture = {
            let mut backend = driver.backend.lock().await;
            info!("Acquiring audio input: {}", backend.name());
            backend.start().await
        };
        let outcome = match capture {
            Ok(capture_rx) => self.stream(&mut driver, transport.as_mut(), capture_rx).await,
            Err(e) => Err(e),
        };

        driver.finish(Some(transport), outcome).await;
        self.summary(&driver)
    }

    /// Event loop of an open session; returns the terminal outcome
    async fn stream(
        &mut self,
        driver: &mut Driver,
        transport: &mut dyn Transport,
        mut capture_rx: mpsc::Receiver<VoiceResult<AudioFrame>>,
    ) -> VoiceResult<String> {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut capture_open = true;
        let mut input_exhausted = false;
        let mut final_deadline: Option<Instant> = None;

        loop {
            let closing = final_deadline.is_some();
            let deadline = final_deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                _ = self.stop_rx.changed(), if !closing => {
                    info!("Stop requested");
                    if !begin_closing(driver, transport).await {
                        return Ok(driver.machine.transcript());
                    }
                    final_deadline = Some(Instant::now() + self.final_result_timeout);
                    capture_open = false;
                }

                inbound = transport.next_message() => match inbound {
                    Some(Ok(text)) => {
                        for event in driver.machine.on_message(&text) {
                            match event {
                                SessionEvent::End(transcript) => return Ok(transcript),
                                SessionEvent::Error(e) => return Err(e),
                                other => driver.listener.dispatch(&other),
                            }
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None if closing => {
                        info!("Connection closed before the final result");
                        return Ok(driver.machine.transcript());
                    }
                    None => {
                        return Err(VoiceError::Transport(
                            "connection closed by the server".to_string(),
                        ))
                    }
                },

                frame = capture_rx.recv(), if capture_open => match frame {
                    Some(Ok(frame)) => driver.machine.on_capture(&frame),
                    Some(Err(e)) => {
                        error!("Capture failed mid-session: {}", e);
                        return Err(e);
                    }
                    None => {
                        debug!("Capture source ended");
                        capture_open = false;
                        input_exhausted = true;
                    }
                },

                _ = ticker.tick(), if !closing => {
                    if let Some(frame) = driver.machine.on_tick()? {
                        send_frame(transport, &frame).await?;
                    } else if input_exhausted {
                        info!("Capture exhausted, finishing input");
                        if !begin_closing(driver, transport).await {
                            return Ok(driver.machine.transcript());
                        }
                        final_deadline = Some(Instant::now() + self.final_result_timeout);
                    }
                    driver.publish();
                }

                _ = tokio::time::sleep_until(deadline), if closing => {
                    warn!("No final result within {:?}", self.final_result_timeout);
                    return Ok(driver.machine.transcript());
                }
            }
        }
    }

    fn summary(&self, driver: &Driver) -> SessionStats {
        let stats = driver.machine.stats().clone();
        info!(
            "Session {} summary: {} frames ({} bytes), {} messages, {} warnings, {} bytes discarded, {:.1}s",
            self.session_id,
            stats.frames_sent,
            stats.audio_bytes_sent,
            stats.messages_received,
            stats.decode_warnings,
            stats.bytes_discarded,
            stats.duration_secs
        );
        stats
    }
}

async fn release_capture(backend: &SharedBackend) {
    let mut backend = backend.lock().await;
    if let Err(e) = backend.stop().await {
        warn!("Failed to release {}: {}", backend.name(), e);
    }
}

async fn connect(
    connector: &dyn Connector,
    url: &str,
    limit: Option<Duration>,
) -> VoiceResult<Box<dyn Transport>> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, connector.connect(url))
            .await
            .map_err(|_| VoiceError::Timeout(format!("connection not open after {:?}", limit)))?,
        None => connector.connect(url).await,
    }
}

/// Send the Final frame and release capture
///
/// Returns `false` when there is nothing left to wait for: no Start frame was
/// ever sent, or the Final frame could not be delivered.
async fn begin_closing(driver: &mut Driver, transport: &mut dyn Transport) -> bool {
    let final_frame = driver.machine.on_stop();
    driver.publish();
    release_capture(&driver.backend).await;

    match final_frame {
        Some(frame) => match send_frame(transport, &frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Final frame not delivered: {}", e);
                false
            }
        },
        None => false,
    }
}

async fn send_frame(transport: &mut dyn Transport, frame: &OutboundFrame) -> VoiceResult<()> {
    let json = frame
        .to_json()
        .map_err(|e| VoiceError::Transport(format!("encode frame: {}", e)))?;
    debug!(
        "Sending frame seq={} status={} ({} base64 chars)",
        frame.seq(),
        frame.header.status,
        frame.payload.audio.audio.len()
    );
    transport.send_text(json).await
}
