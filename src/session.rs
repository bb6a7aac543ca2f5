//! Casting sessions and the parameters they are started with.

use std::fmt;

pub type SessionId = u64;

/// Lifecycle of a session as reported by the `State` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(i32)]
pub enum SessionState {
    #[default]
    Null = 0,
    Connecting = 1,
    CapsExchanging = 2,
    Established = 3,
    SettingUp = 4,
    Paused = 5,
    Playing = 6,
    TearingDown = 7,
    Destroyed = 8,
}

impl SessionState {
    /// Whether the control channel is up, i.e. pausing and resuming make sense.
    pub fn is_established(self) -> bool {
        (SessionState::Established..=SessionState::Playing).contains(&self)
    }

    /// Whether the session is going away and should leave the registry.
    pub fn is_ending(self) -> bool {
        matches!(self, SessionState::TearingDown | SessionState::Destroyed)
    }
}

impl From<SessionState> for i32 {
    fn from(state: SessionState) -> Self {
        state as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// This host casts to a sink.
    Out,
    /// A remote source casts to this host.
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayServer {
    X,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioServer {
    PulseAudio,
}

/// What to capture for the video stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayTarget {
    pub server: DisplayServer,
    pub name: String,
    pub params: Option<String>,
    pub auth: String,
    pub rect: Rectangle,
}

/// Where to capture the audio stream from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTarget {
    pub server: AudioServer,
    pub device: String,
}

/// Identity of the process that asked for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

pub struct Session {
    id: SessionId,
    direction: Direction,
    sink: Option<String>,
    state: SessionState,
    url: Option<String>,
    display: Option<DisplayTarget>,
    audio: Option<AudioTarget>,
    client: Option<Credentials>,
    runtime_path: Option<String>,
}

impl Session {
    /// Creates a session cast from this host to the sink labelled `sink`.
    pub fn new_out(id: SessionId, sink: &str) -> Self {
        Self::new(id, Direction::Out, Some(sink.to_string()))
    }

    /// Creates a session initiated by a remote source.
    pub fn new_in(id: SessionId) -> Self {
        Self::new(id, Direction::In, None)
    }

    fn new(id: SessionId, direction: Direction, sink: Option<String>) -> Self {
        Self {
            id,
            direction,
            sink,
            state: SessionState::Null,
            url: None,
            display: None,
            audio: None,
            client: None,
            runtime_path: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Label of the sink an outbound session belongs to.
    pub fn sink_label(&self) -> Option<&str> {
        match self.direction {
            Direction::Out => self.sink.as_deref(),
            Direction::In => None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Presentation URL, once negotiated.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn display(&self) -> Option<&DisplayTarget> {
        self.display.as_ref()
    }

    pub fn set_display(&mut self, display: DisplayTarget) {
        self.display = Some(display);
    }

    pub fn audio(&self) -> Option<&AudioTarget> {
        self.audio.as_ref()
    }

    pub fn set_audio(&mut self, audio: AudioTarget) {
        self.audio = Some(audio);
    }

    pub fn client(&self) -> Option<Credentials> {
        self.client
    }

    pub fn set_client(&mut self, client: Credentials) {
        self.client = Some(client);
    }

    /// `XDG_RUNTIME_DIR` of the client, needed to reach its display and audio servers.
    pub fn runtime_path(&self) -> Option<&str> {
        self.runtime_path.as_deref()
    }

    pub fn set_runtime_path(&mut self, path: String) {
        self.runtime_path = Some(path);
    }

    /// Engine hook: move to a new lifecycle state.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Engine hook: record the negotiated presentation URL.
    pub fn set_url(&mut self, url: Option<String>) {
        self.url = url;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("sink", &self.sink)
            .field("state", &self.state)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}
