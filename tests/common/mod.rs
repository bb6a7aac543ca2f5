#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use zbus::names::UniqueName;
use zbus::zvariant::OwnedObjectPath;

use miracle_wfd::credentials::CallerIdentity;
use miracle_wfd::engine::{CastEngine, Verb};
use miracle_wfd::error::{Error, Result};
use miracle_wfd::login::RuntimeDirResolver;
use miracle_wfd::notify::{Notification, Notifier};
use miracle_wfd::orchestrator::StartRequest;
use miracle_wfd::session::{Credentials, Rectangle, Session, SessionState};
use miracle_wfd::sink::{DeviceInfo, Sink};
use miracle_wfd::{Context, Registry};

pub const CALLER: &str = ":1.42";

pub fn caller() -> UniqueName<'static> {
    UniqueName::try_from(CALLER).unwrap()
}

/// Notifications as plain strings, e.g. `added /org/.../session/1`.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl Notifier for Recorder {
    fn notify(&self, notification: Notification) -> Result<()> {
        let event = match notification {
            Notification::ObjectAdded { path, .. } => format!("added {}", path.as_str()),
            Notification::ObjectRemoved { path, .. } => format!("removed {}", path.as_str()),
            Notification::PropertiesChanged {
                path, properties, ..
            } => format!("changed {} {}", path.as_str(), properties.join(",")),
            Notification::Flush(done) => {
                let _ = done.send(());
                return Ok(());
            }
        };
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Engine that records verbs and can be told to fail them.
#[derive(Default)]
pub struct ScriptedEngine {
    pub calls: Mutex<Vec<Verb>>,
    pub fail_with: Mutex<Option<i32>>,
}

impl ScriptedEngine {
    pub fn fail_next(&self, errno: i32) {
        *self.fail_with.lock().unwrap() = Some(errno);
    }

    pub fn calls(&self) -> Vec<Verb> {
        self.calls.lock().unwrap().clone()
    }

    fn step(&self, verb: Verb, session: &mut Session, state: SessionState) -> io::Result<()> {
        self.calls.lock().unwrap().push(verb);
        if let Some(errno) = self.fail_with.lock().unwrap().take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        session.set_state(state);
        Ok(())
    }
}

impl CastEngine for ScriptedEngine {
    fn start(&self, session: &mut Session) -> io::Result<()> {
        self.step(Verb::Start, session, SessionState::Connecting)
    }

    fn pause(&self, session: &mut Session) -> io::Result<()> {
        self.step(Verb::Pause, session, SessionState::Paused)
    }

    fn resume(&self, session: &mut Session) -> io::Result<()> {
        self.step(Verb::Resume, session, SessionState::Playing)
    }

    fn teardown(&self, session: &mut Session) -> io::Result<()> {
        self.step(Verb::Teardown, session, SessionState::TearingDown)
    }
}

pub struct FakeIdentity {
    pub credentials: Credentials,
}

#[async_trait]
impl CallerIdentity for FakeIdentity {
    async fn caller_pid(&self, sender: &UniqueName<'_>) -> Result<u32> {
        assert_eq!(sender.as_str(), CALLER);
        Ok(self.credentials.pid)
    }

    async fn credentials_for_pid(&self, pid: u32) -> Result<Credentials> {
        assert_eq!(pid, self.credentials.pid);
        Ok(self.credentials)
    }
}

/// Login resolver that can be held until the test releases it.
#[derive(Default)]
pub struct FakeLogin {
    pub gated: bool,
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl RuntimeDirResolver for FakeLogin {
    async fn runtime_path(&self, uid: u32) -> Result<String> {
        if self.gated {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if uid == 4242 {
            return Err(Error::Fdo(zbus::fdo::Error::Failed("no such user".into())));
        }
        Ok(format!("/run/user/{uid}"))
    }
}

pub struct Harness {
    pub ctx: Context,
    pub recorder: Arc<Recorder>,
    pub engine: Arc<ScriptedEngine>,
    pub login: Arc<FakeLogin>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(1000, FakeLogin::default())
    }

    pub fn with(uid: u32, login: FakeLogin) -> Self {
        let recorder = Arc::new(Recorder::default());
        let engine = Arc::new(ScriptedEngine::default());
        let login = Arc::new(login);
        let registry = Registry::new(recorder.clone(), engine.clone()).into_shared();
        let identity = Arc::new(FakeIdentity {
            credentials: Credentials {
                pid: 4711,
                uid,
                gid: uid,
            },
        });
        let ctx = Context::new(registry, identity, login.clone());

        Self {
            ctx,
            recorder,
            engine,
            login,
        }
    }

    pub async fn add_sink(&self, label: &str) -> OwnedObjectPath {
        let sink = Sink::new(
            label,
            DeviceInfo {
                device_info: 0x1,
                rtsp_port: 7236,
                max_throughput: 300,
            },
        )
        .unwrap();
        self.ctx.registry.lock().await.add_sink(sink).unwrap();
        self.recorder.take();
        miracle_wfd::path::sink_path(label).unwrap()
    }

    pub async fn set_state(&self, session: &OwnedObjectPath, state: SessionState) {
        let id = miracle_wfd::path::decode_session(session.as_str())
            .flatten()
            .unwrap();
        self.ctx
            .registry
            .lock()
            .await
            .set_session_state(id, state)
            .unwrap();
    }
}

pub fn request(uri: &str) -> StartRequest {
    StartRequest {
        auth: String::new(),
        uri: uri.to_string(),
        rect: Rectangle {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        },
        audio_device: "alsa_output.monitor".to_string(),
    }
}
