//! Turns a `StartSession` call into a running session.
//!
//! The session is created and attached in one registry turn, so a second
//! request for the same sink is refused right away. The caller's identity and
//! runtime directory are then resolved without holding the registry, and the
//! engine is only started once both are known. If the sink or its session
//! went away in the meantime the start is canceled; any other failure detaches
//! the half-built session again.

use tracing::{debug, info, warn};
use zbus::names::UniqueName;

use crate::context::Context;
use crate::engine::Verb;
use crate::error::{Error, Result};
use crate::session::{
    AudioServer, AudioTarget, DisplayServer, DisplayTarget, Rectangle, SessionId,
};
use crate::sink::Sink;

/// Arguments of `StartSession`.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub auth: String,
    pub uri: String,
    pub rect: Rectangle,
    pub audio_device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ResolvingIdentity,
    ResolvingRuntimeDir,
    Starting,
    Done,
}

/// Splits a `x://<display>[?<params>]` URI into display name and parameters.
pub fn parse_display_uri(uri: &str) -> Result<(String, Option<String>)> {
    let invalid = || Error::InvalidArgument(format!("malformed display URI {uri:?}"));

    let (scheme, rest) = uri.split_once("://").ok_or_else(invalid)?;
    if scheme.is_empty() || scheme.contains(':') {
        return Err(invalid());
    }
    if scheme != "x" {
        return Err(Error::InvalidArgument(format!(
            "unsupported display server {scheme:?}"
        )));
    }

    let rest = rest.split_whitespace().next().ok_or_else(invalid)?;
    Ok(match rest.split_once('?') {
        Some((name, params)) => (name.to_string(), Some(params.to_string())),
        None => (rest.to_string(), None),
    })
}

fn display_target(request: &StartRequest) -> Result<DisplayTarget> {
    let (name, params) = parse_display_uri(&request.uri)?;
    if request.rect.width == 0 || request.rect.height == 0 {
        return Err(Error::InvalidArgument(format!(
            "empty capture area {}x{}",
            request.rect.width, request.rect.height
        )));
    }

    Ok(DisplayTarget {
        server: DisplayServer::X,
        name,
        params,
        auth: request.auth.clone(),
        rect: request.rect,
    })
}

/// Runs the whole start sequence for the sink `label`.
pub async fn start_session(
    ctx: &Context,
    label: &str,
    sender: Option<&UniqueName<'_>>,
    request: StartRequest,
) -> Result<SessionId> {
    let display = display_target(&request)?;
    let audio = AudioTarget {
        server: AudioServer::PulseAudio,
        device: request.audio_device,
    };
    let sender = sender.ok_or(Error::MissingSender)?;

    let id = {
        let mut registry = ctx.registry.lock().await;
        let id = registry.create_session(label)?;
        if let Some(session) = registry.session_mut(id) {
            session.set_display(display);
            session.set_audio(audio);
        }
        id
    };
    info!(sink = %label, session = id, "Starting session");

    let mut start = PendingStart {
        ctx,
        label,
        id,
        stage: Stage::ResolvingIdentity,
    };
    match start.run(sender).await {
        Ok(()) => Ok(id),
        Err(err) => {
            start.abort(&err).await;
            Err(err)
        }
    }
}

struct PendingStart<'a> {
    ctx: &'a Context,
    label: &'a str,
    id: SessionId,
    stage: Stage,
}

impl PendingStart<'_> {
    async fn run(&mut self, sender: &UniqueName<'_>) -> Result<()> {
        self.stage = Stage::ResolvingIdentity;
        let pid = self.ctx.identity.caller_pid(sender).await?;
        let client = self.ctx.identity.credentials_for_pid(pid).await?;
        debug!(session = self.id, ?client, "Resolved client");

        self.stage = Stage::ResolvingRuntimeDir;
        if client.uid == 0 {
            return Err(Error::InvalidArgument(
                "uid 0 has no logind runtime directory".to_string(),
            ));
        }
        let runtime_path = self.ctx.login.runtime_path(client.uid).await?;

        self.stage = Stage::Starting;
        let mut registry = self.ctx.registry.lock().await;
        if registry.sink(self.label).and_then(Sink::session) != Some(self.id) {
            return Err(Error::Canceled);
        }
        let session = registry.session_mut(self.id).ok_or(Error::Canceled)?;
        session.set_client(client);
        session.set_runtime_path(runtime_path);
        registry.drive(self.id, Verb::Start)?;

        self.stage = Stage::Done;
        Ok(())
    }

    async fn abort(&self, err: &Error) {
        warn!(
            sink = %self.label,
            session = self.id,
            stage = ?self.stage,
            %err,
            "Session start failed"
        );

        let mut registry = self.ctx.registry.lock().await;
        if registry.sink(self.label).and_then(Sink::session) != Some(self.id) {
            return;
        }
        if let Err(err) = registry.attach_session(self.label, None) {
            warn!(sink = %self.label, %err, "Failed to detach session");
        }
    }
}
