use tokio::sync::mpsc;

use crate::error::VoiceError;

/// Everything a session reports to its caller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transcript so far; may fire any number of times
    Result(String),
    /// Non-fatal problem with a single message
    Warning(VoiceError),
    /// Graceful completion with the final transcript (terminal)
    End(String),
    /// Fatal failure (terminal)
    Error(VoiceError),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::End(_) | SessionEvent::Error(_))
    }
}

/// Callbacks invoked by a running session
///
/// Exactly one of `on_end` / `on_error` is invoked per started session.
pub trait TranscriptListener: Send + 'static {
    fn on_result(&mut self, transcript: &str);

    fn on_error(&mut self, error: &VoiceError);

    fn on_end(&mut self, transcript: &str);

    fn on_warning(&mut self, warning: &VoiceError) {
        let _ = warning;
    }

    fn dispatch(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Result(text) => self.on_result(text),
            SessionEvent::Warning(w) => self.on_warning(w),
            SessionEvent::End(text) => self.on_end(text),
            SessionEvent::Error(e) => self.on_error(e),
        }
    }
}

/// Forward every callback into a channel
impl TranscriptListener for mpsc::UnboundedSender<SessionEvent> {
    fn on_result(&mut self, transcript: &str) {
        let _ = self.send(SessionEvent::Result(transcript.to_string()));
    }

    fn on_error(&mut self, error: &VoiceError) {
        let _ = self.send(SessionEvent::Error(error.clone()));
    }

    fn on_end(&mut self, transcript: &str) {
        let _ = self.send(SessionEvent::End(transcript.to_string()));
    }

    fn on_warning(&mut self, warning: &VoiceError) {
        let _ = self.send(SessionEvent::Warning(warning.clone()));
    }
}

/// Listener built from three closures
pub struct FnListener<R, E, N> {
    on_result: R,
    on_error: E,
    on_end: N,
}

/// `start(on_result, on_error, on_end)` style listener
pub fn listener_fn<R, E, N>(on_result: R, on_error: E, on_end: N) -> FnListener<R, E, N>
where
    R: FnMut(&str) + Send + 'static,
    E: FnMut(&VoiceError) + Send + 'static,
    N: FnMut(&str) + Send + 'static,
{
    FnListener {
        on_result,
        on_error,
        on_end,
    }
}

impl<R, E, N> TranscriptListener for FnListener<R, E, N>
where
    R: FnMut(&str) + Send + 'static,
    E: FnMut(&VoiceError) + Send + 'static,
    N: FnMut(&str) + Send + 'static,
{
    fn on_result(&mut self, transcript: &str) {
        (self.on_result)(transcript)
    }

    fn on_error(&mut self, error: &VoiceError) {
        (self.on_error)(error)
    }

    fn on_end(&mut self, transcript: &str) {
        (self.on_end)(transcript)
    }
}
