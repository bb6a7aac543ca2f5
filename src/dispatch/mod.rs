//! Remote operations on the collection root, sinks and sessions.
//!
//! Every per-object call first resolves its path to the live entity: the
//! sink subtree is tried first, then the session subtree, and a path neither
//! knows about is an unknown object. The handlers here are transport-free;
//! [`objects`] wires them to the bus.

use std::collections::HashMap;

use tracing::{debug, info};
use zbus::names::UniqueName;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

use crate::context::Context;
use crate::engine::Verb;
use crate::error::{Error, Result};
use crate::notify;
use crate::orchestrator::{self, StartRequest};
use crate::path::{self, SESSION_INTERFACE, SINK_INTERFACE};
use crate::registry::{self, Lookup, Registry};
use crate::session::{Session, SessionId};
use crate::sink::Sink;

pub mod objects;

/// Interfaces and their property values, keyed by object path.
pub type ManagedObjects = HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>>;

/// A live entity an object path resolved to.
#[derive(Debug)]
pub enum Resolved<'a> {
    Sink(&'a Sink),
    Session(&'a Session),
}

pub fn resolve<'a>(registry: &'a Registry, path: &str) -> Result<Resolved<'a>> {
    match registry.find_sink(path) {
        Lookup::Found(sink) => return Ok(Resolved::Sink(sink)),
        Lookup::NotFound => return Err(unknown(path)),
        Lookup::NotApplicable => {}
    }

    match registry.find_session(path) {
        Lookup::Found(session) => Ok(Resolved::Session(session)),
        Lookup::NotFound | Lookup::NotApplicable => Err(unknown(path)),
    }
}

fn unknown(path: &str) -> Error {
    // stale client caches hit this all the time
    debug!(path, "Call for unknown object");
    Error::UnknownObject(path.to_string())
}

fn sink_at<'a>(registry: &'a Registry, path: &str) -> Result<&'a Sink> {
    match resolve(registry, path)? {
        Resolved::Sink(sink) => Ok(sink),
        Resolved::Session(_) => Err(unknown(path)),
    }
}

fn session_at<'a>(registry: &'a Registry, path: &str) -> Result<&'a Session> {
    match resolve(registry, path)? {
        Resolved::Session(session) => Ok(session),
        Resolved::Sink(_) => Err(unknown(path)),
    }
}

/// `Shutdown()` on the collection root.
pub async fn shutdown(ctx: &Context) -> Result<()> {
    info!("Shutdown requested over the bus");
    ctx.registry.lock().await.shutdown();
    ctx.request_shutdown();
    Ok(())
}

/// `StartSession(...)` on a sink; replies with the new session's path.
pub async fn start_session(
    ctx: &Context,
    path: &str,
    sender: Option<&UniqueName<'_>>,
    request: StartRequest,
) -> Result<OwnedObjectPath> {
    let label = {
        let registry = ctx.registry.lock().await;
        sink_at(&registry, path)?.label().to_string()
    };

    let id = orchestrator::start_session(ctx, &label, sender, request).await?;

    // the reply must not overtake the session object's export
    let notifier = ctx.registry.lock().await.notifier();
    notify::flush(notifier.as_ref()).await;

    path::session_path(id)
}

/// `Session` property of a sink.
pub async fn sink_session(ctx: &Context, path: &str) -> Result<OwnedObjectPath> {
    let registry = ctx.registry.lock().await;
    match sink_at(&registry, path)?.session() {
        Some(id) => path::session_path(id),
        None => Ok(path::none_path()),
    }
}

/// `Peer` property of a sink.
pub async fn sink_peer(ctx: &Context, path: &str) -> Result<OwnedObjectPath> {
    let registry = ctx.registry.lock().await;
    path::peer_path(sink_at(&registry, path)?.label())
}

/// `Resume()` on a session.
pub async fn session_resume(ctx: &Context, path: &str) -> Result<()> {
    drive_established(ctx, path, Verb::Resume).await
}

/// `Pause()` on a session.
pub async fn session_pause(ctx: &Context, path: &str) -> Result<()> {
    drive_established(ctx, path, Verb::Pause).await
}

async fn drive_established(ctx: &Context, path: &str, verb: Verb) -> Result<()> {
    let mut registry = ctx.registry.lock().await;
    let session = session_at(&registry, path)?;
    if !session.state().is_established() {
        return Err(Error::NotConnected);
    }

    let id = session.id();
    debug!(session = id, verb = verb.as_str(), "Driving session");
    registry.drive(id, verb)
}

/// `Teardown()` on a session, valid in any state.
pub async fn session_teardown(ctx: &Context, path: &str) -> Result<()> {
    let mut registry = ctx.registry.lock().await;
    let id: SessionId = session_at(&registry, path)?.id();
    debug!(session = id, "Tearing session down");
    registry.drive(id, Verb::Teardown)
}

/// `Sink` property of a session.
pub async fn session_sink(ctx: &Context, path: &str) -> Result<OwnedObjectPath> {
    let registry = ctx.registry.lock().await;
    registry::session_sink_path(session_at(&registry, path)?)
}

/// `Url` property of a session, empty until negotiated.
pub async fn session_url(ctx: &Context, path: &str) -> Result<String> {
    let registry = ctx.registry.lock().await;
    Ok(session_at(&registry, path)?.url().unwrap_or_default().to_string())
}

/// `State` property of a session.
pub async fn session_state(ctx: &Context, path: &str) -> Result<i32> {
    let registry = ctx.registry.lock().await;
    Ok(session_at(&registry, path)?.state().into())
}

/// Answer to `GetManagedObjects` on the collection root.
pub fn managed_objects(registry: &Registry) -> Result<ManagedObjects> {
    let mut objects = ManagedObjects::new();

    for node in registry.enumerate(path::ROOT_PATH)? {
        let (interface, properties) = match resolve(registry, node.as_str())? {
            Resolved::Sink(sink) => (SINK_INTERFACE, sink_properties(sink)?),
            Resolved::Session(session) => (SESSION_INTERFACE, session_properties(session)?),
        };
        objects.insert(node, HashMap::from([(interface.to_string(), properties)]));
    }

    Ok(objects)
}

fn sink_properties(sink: &Sink) -> Result<HashMap<String, OwnedValue>> {
    let session = match sink.session() {
        Some(id) => path::session_path(id)?,
        None => path::none_path(),
    };
    let peer = path::peer_path(sink.label())?;

    Ok(HashMap::from([
        ("Session".to_string(), owned(Value::from(session.into_inner()))?),
        ("Peer".to_string(), owned(Value::from(peer.into_inner()))?),
    ]))
}

fn session_properties(session: &Session) -> Result<HashMap<String, OwnedValue>> {
    let sink = registry::session_sink_path(session)?;
    let url = session.url().unwrap_or_default().to_string();
    let state: i32 = session.state().into();

    Ok(HashMap::from([
        ("Sink".to_string(), owned(Value::from(sink.into_inner()))?),
        ("Url".to_string(), owned(Value::from(url))?),
        ("State".to_string(), owned(Value::from(state))?),
    ]))
}

fn owned(value: Value<'_>) -> Result<OwnedValue> {
    Ok(value.try_into()?)
}
