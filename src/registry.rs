//! The live sink and session collections.
//!
//! The registry is the single owner of every [`Session`]: a sink only keeps
//! the id of the session attached to it, and [`Registry::attach_session`] is
//! the only place that link changes. A session is dropped exactly when it
//! leaves the collection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;

use crate::engine::{CastEngine, Verb};
use crate::error::{Error, Result};
use crate::notify::{self, Notifier};
use crate::path::{self, ROOT_PATH, SESSION_INTERFACE, SINK_INTERFACE};
use crate::session::{Direction, Session, SessionId, SessionState};
use crate::sink::Sink;

pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Outcome of resolving an object path against one subtree.
#[derive(Debug)]
pub enum Lookup<T> {
    /// The path belongs to another subtree.
    NotApplicable,
    NotFound,
    Found(T),
}

pub struct Registry {
    sinks: Vec<Sink>,
    sessions: BTreeMap<SessionId, Session>,
    /// Sessions created for a sink but not yet attached to it.
    pending: HashMap<SessionId, Session>,
    next_session_id: SessionId,
    notifier: Arc<dyn Notifier>,
    engine: Arc<dyn CastEngine>,
}

impl Registry {
    pub fn new(notifier: Arc<dyn Notifier>, engine: Arc<dyn CastEngine>) -> Self {
        Self {
            sinks: Vec::new(),
            sessions: BTreeMap::new(),
            pending: HashMap::new(),
            next_session_id: 1,
            notifier,
            engine,
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn n_sinks(&self) -> usize {
        self.sinks.len()
    }

    pub fn n_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn sinks(&self) -> impl Iterator<Item = &Sink> {
        self.sinks.iter()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn sink(&self, label: &str) -> Option<&Sink> {
        self.sinks.iter().find(|sink| sink.label() == label)
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Hands out the next process-wide session id.
    pub fn alloc_session_id(&mut self) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    /// Paths of every live sink followed by every live session.
    ///
    /// Only the collection root has children; other parents enumerate empty.
    pub fn enumerate(&self, parent: &str) -> Result<Vec<OwnedObjectPath>> {
        if parent != ROOT_PATH {
            return Ok(Vec::new());
        }

        let mut nodes = Vec::with_capacity(self.sinks.len() + self.sessions.len());
        for sink in &self.sinks {
            nodes.push(path::sink_path(sink.label())?);
        }
        for id in self.sessions.keys() {
            nodes.push(path::session_path(*id)?);
        }
        Ok(nodes)
    }

    pub fn find_sink(&self, path: &str) -> Lookup<&Sink> {
        match path::decode_sink(path) {
            None => Lookup::NotApplicable,
            Some(label) => self.sink(&label).map_or(Lookup::NotFound, Lookup::Found),
        }
    }

    pub fn find_session(&self, path: &str) -> Lookup<&Session> {
        match path::decode_session(path) {
            None => Lookup::NotApplicable,
            Some(None) => Lookup::NotFound,
            Some(Some(id)) => self.session(id).map_or(Lookup::NotFound, Lookup::Found),
        }
    }

    pub fn add_sink(&mut self, sink: Sink) -> Result<()> {
        if self.sink(sink.label()).is_some() {
            return Err(Error::InvalidArgument(format!(
                "sink {} is already registered",
                sink.label()
            )));
        }

        let sink_path = path::sink_path(sink.label())?;
        info!(sink = %sink.label(), "Sink appeared");
        self.sinks.push(sink);
        self.report(notify::object_added(
            self.notifier.as_ref(),
            sink_path,
            &[SINK_INTERFACE],
        ));
        Ok(())
    }

    /// Drops a sink, detaching its session first.
    pub fn remove_sink(&mut self, label: &str) -> Result<()> {
        let sink_path = path::sink_path(label)?;
        if self.sink(label).is_none() {
            return Err(Error::UnknownObject(sink_path.to_string()));
        }

        self.attach_session(label, None)?;
        self.sinks.retain(|sink| sink.label() != label);
        info!(sink = %label, "Sink disappeared");
        self.report(notify::object_removed(
            self.notifier.as_ref(),
            sink_path,
            &[SINK_INTERFACE],
        ));
        Ok(())
    }

    /// Creates an outbound session for `label` and attaches it.
    pub fn create_session(&mut self, label: &str) -> Result<SessionId> {
        let sink = self
            .sink(label)
            .ok_or_else(|| Error::UnknownObject(label.to_string()))?;
        if sink.is_session_started() {
            return Err(Error::AlreadyInProgress);
        }

        let id = self.alloc_session_id();
        self.pending.insert(id, Session::new_out(id, label));
        if let Err(err) = self.attach_session(label, Some(id)) {
            self.pending.remove(&id);
            return Err(err);
        }
        Ok(id)
    }

    /// Replaces the session attached to the sink `label`.
    ///
    /// A new session is published to the collection before the sink points
    /// at it, and a replaced one leaves the collection before the sink lets
    /// go of it. Attaching the session that is already attached does nothing.
    pub fn attach_session(&mut self, label: &str, session: Option<SessionId>) -> Result<()> {
        let index = self
            .sinks
            .iter()
            .position(|sink| sink.label() == label)
            .ok_or_else(|| Error::UnknownObject(label.to_string()))?;

        let current = self.sinks[index].session;
        if current == session {
            return Ok(());
        }

        if let Some(id) = session {
            self.publish_for_sink(label, id)?;
        }

        if let Some(old) = current {
            debug!(sink = %label, session = old, "Detaching session");
            self.unpublish_session(old);
        }

        self.sinks[index].session = session;
        match path::sink_path(label) {
            Ok(sink_path) => self.report(notify::properties_changed(
                self.notifier.as_ref(),
                sink_path,
                SINK_INTERFACE,
                &["Session"],
            )),
            Err(err) => warn!(sink = %label, ?err, "Cannot announce session change"),
        }
        Ok(())
    }

    fn publish_for_sink(&mut self, label: &str, id: SessionId) -> Result<()> {
        let owner = self
            .pending
            .get(&id)
            .or_else(|| self.sessions.get(&id))
            .ok_or_else(|| Error::UnknownObject(format!("session {id}")))?
            .sink_label();
        if owner != Some(label) {
            return Err(Error::InvalidArgument(format!(
                "session {id} does not belong to sink {label}"
            )));
        }

        if let Some(session) = self.pending.remove(&id) {
            self.publish(session)?;
        }
        Ok(())
    }

    /// Adds a session that no sink owns, e.g. one initiated by a remote source.
    pub fn add_session(&mut self, session: Session) -> Result<()> {
        if self.sessions.contains_key(&session.id()) || self.pending.contains_key(&session.id()) {
            return Err(Error::InvalidArgument(format!(
                "session {} is already registered",
                session.id()
            )));
        }
        self.publish(session)
    }

    fn publish(&mut self, session: Session) -> Result<()> {
        let id = session.id();
        let session_path = path::session_path(id)?;
        info!(session = id, direction = ?session.direction(), "Session created");
        self.sessions.insert(id, session);
        self.report(notify::object_added(
            self.notifier.as_ref(),
            session_path,
            &[SESSION_INTERFACE],
        ));
        Ok(())
    }

    /// Removes a session from the collection.
    ///
    /// Sessions attached to a sink are detached from it instead, so the sink
    /// never points at a session the collection no longer has.
    pub fn remove_session(&mut self, id: SessionId) -> Result<()> {
        let session = self
            .sessions
            .get(&id)
            .ok_or_else(|| Error::UnknownObject(format!("session {id}")))?;

        let owner = session
            .sink_label()
            .filter(|label| self.sink(label).and_then(Sink::session) == Some(id))
            .map(str::to_string);
        match owner {
            Some(label) => self.attach_session(&label, None),
            None => {
                self.unpublish_session(id);
                Ok(())
            }
        }
    }

    fn unpublish_session(&mut self, id: SessionId) {
        if self.sessions.remove(&id).is_none() {
            return;
        }

        info!(session = id, "Session released");
        match path::session_path(id) {
            Ok(session_path) => self.report(notify::object_removed(
                self.notifier.as_ref(),
                session_path,
                &[SESSION_INTERFACE],
            )),
            Err(err) => warn!(session = id, ?err, "Cannot announce session removal"),
        }
    }

    /// Runs an engine verb on a session and announces what it changed.
    ///
    /// A verb that leaves the session tearing down or destroyed ends it.
    pub fn drive(&mut self, id: SessionId, verb: Verb) -> Result<()> {
        let engine = self.engine.clone();
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownObject(format!("session {id}")))?;

        let state = session.state();
        let url = session.url().map(str::to_string);
        let result = engine.run(verb, session);
        let changed = changed_properties(state, url.as_deref(), session);

        let ending = session.state().is_ending();

        if let Err(err) = &result {
            warn!(session = id, verb = verb.as_str(), %err, "Session engine failed");
        }
        self.announce_session_change(id, &changed);
        result.map_err(Error::Engine)?;

        if ending {
            self.session_ended(id)?;
        }
        Ok(())
    }

    /// Engine callback: the session moved to `state`.
    ///
    /// Moving to a teardown state ends the session.
    pub fn set_session_state(&mut self, id: SessionId, state: SessionState) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownObject(format!("session {id}")))?;
        if session.state() == state {
            return Ok(());
        }

        debug!(session = id, from = ?session.state(), to = ?state, "Session state changed");
        session.set_state(state);
        self.announce_session_change(id, &["State"]);

        if state.is_ending() {
            self.session_ended(id)?;
        }
        Ok(())
    }

    /// Engine callback: the presentation URL was negotiated or dropped.
    pub fn set_session_url(&mut self, id: SessionId, url: Option<String>) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownObject(format!("session {id}")))?;
        if session.url() == url.as_deref() {
            return Ok(());
        }

        session.set_url(url);
        self.announce_session_change(id, &["Url"]);
        Ok(())
    }

    /// Engine callback: the session is over and can be released.
    pub fn session_ended(&mut self, id: SessionId) -> Result<()> {
        info!(session = id, "Session ended");
        self.remove_session(id)
    }

    fn announce_session_change(&self, id: SessionId, properties: &[&'static str]) {
        if properties.is_empty() {
            return;
        }

        match path::session_path(id) {
            Ok(session_path) => self.report(notify::properties_changed(
                self.notifier.as_ref(),
                session_path,
                SESSION_INTERFACE,
                properties,
            )),
            Err(err) => warn!(session = id, ?err, "Cannot announce property change"),
        }
    }

    /// Tears every session down and empties the registry.
    pub fn shutdown(&mut self) {
        info!(
            sinks = self.sinks.len(),
            sessions = self.sessions.len(),
            "Shutting down registry"
        );

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in &ids {
            // errors are already logged by drive
            let _ = self.drive(*id, Verb::Teardown);
        }

        while let Some(label) = self.sinks.last().map(|sink| sink.label().to_string()) {
            if let Err(err) = self.remove_sink(&label) {
                warn!(sink = %label, %err, "Failed to remove sink");
                self.sinks.pop();
            }
        }

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.unpublish_session(id);
        }
        self.pending.clear();
    }

    fn report(&self, result: Result<()>) {
        if let Err(err) = result {
            warn!(%err, "Failed to queue bus notification");
        }
    }
}

fn changed_properties(state: SessionState, url: Option<&str>, session: &Session) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if session.state() != state {
        changed.push("State");
    }
    if session.url() != url {
        changed.push("Url");
    }
    changed
}

/// Path a session's `Sink` property reports.
pub fn session_sink_path(session: &Session) -> Result<OwnedObjectPath> {
    match (session.direction(), session.sink_label()) {
        (Direction::Out, Some(label)) => path::sink_path(label),
        _ => Ok(path::none_path()),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::engine::PassiveEngine;
    use crate::notify::Notification;
    use crate::sink::DeviceInfo;

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<String>>);

    impl Notifier for Recorder {
        fn notify(&self, notification: Notification) -> Result<()> {
            let line = match notification {
                Notification::ObjectAdded { path, .. } => format!("added {path}"),
                Notification::ObjectRemoved { path, .. } => format!("removed {path}"),
                Notification::PropertiesChanged {
                    path, properties, ..
                } => format!("changed {path} {}", properties.join(",")),
                Notification::Flush(_) => return Ok(()),
            };
            self.0.lock().unwrap().push(line);
            Ok(())
        }
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct Engine;

    impl CastEngine for Engine {
        fn start(&self, session: &mut Session) -> io::Result<()> {
            session.set_state(SessionState::Connecting);
            Ok(())
        }
        fn pause(&self, _session: &mut Session) -> io::Result<()> {
            Err(io::Error::from_raw_os_error(5))
        }
        fn resume(&self, _session: &mut Session) -> io::Result<()> {
            Ok(())
        }
        fn teardown(&self, session: &mut Session) -> io::Result<()> {
            session.set_state(SessionState::TearingDown);
            Ok(())
        }
    }

    fn registry() -> (Registry, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let registry = Registry::new(recorder.clone(), Arc::new(Engine));
        (registry, recorder)
    }

    fn session_node(id: SessionId) -> String {
        path::session_path(id).unwrap().to_string()
    }

    fn sink(label: &str) -> Sink {
        let info = DeviceInfo {
            device_info: 0x0011,
            rtsp_port: 7236,
            max_throughput: 300,
        };
        Sink::new(label, info).unwrap()
    }

    #[test]
    fn enumeration_lists_sinks_then_sessions() {
        let (mut registry, _) = registry();
        registry.add_sink(sink("AA")).unwrap();
        registry.add_sink(sink("BB")).unwrap();
        let id = registry.create_session("BB").unwrap();
        let inbound = registry.alloc_session_id();
        registry.add_session(Session::new_in(inbound)).unwrap();

        let nodes: Vec<String> = registry
            .enumerate(ROOT_PATH)
            .unwrap()
            .iter()
            .map(|node| node.to_string())
            .collect();
        assert_eq!(
            nodes,
            [
                "/org/freedesktop/miracle/wfd/sink/AA".to_string(),
                "/org/freedesktop/miracle/wfd/sink/BB".to_string(),
                session_node(id),
                session_node(id + 1),
            ]
        );

        assert!(registry.enumerate("/").unwrap().is_empty());
        assert!(registry.enumerate(path::SINK_PREFIX).unwrap().is_empty());
    }

    #[test]
    fn attaching_the_same_session_twice_notifies_once() {
        let (mut registry, recorder) = registry();
        registry.add_sink(sink("AA")).unwrap();
        let id = registry.create_session("AA").unwrap();
        recorder.take();

        registry.attach_session("AA", Some(id)).unwrap();
        registry.attach_session("AA", Some(id)).unwrap();
        assert!(recorder.take().is_empty());

        registry.attach_session("AA", None).unwrap();
        registry.attach_session("AA", None).unwrap();
        assert_eq!(
            recorder.take(),
            [
                format!("removed {}", session_node(id)),
                "changed /org/freedesktop/miracle/wfd/sink/AA Session".to_string(),
            ]
        );
    }

    #[test]
    fn session_is_published_before_the_sink_points_at_it() {
        let (mut registry, recorder) = registry();
        registry.add_sink(sink("AA")).unwrap();
        recorder.take();

        let id = registry.create_session("AA").unwrap();
        assert_eq!(
            recorder.take(),
            [
                format!("added {}", session_node(id)),
                "changed /org/freedesktop/miracle/wfd/sink/AA Session".to_string(),
            ]
        );
        assert_eq!(registry.sink("AA").unwrap().session(), Some(id));
        assert!(registry.session(id).is_some());
    }

    #[test]
    fn replacing_a_session_releases_the_old_one() {
        let (mut registry, _) = registry();
        registry.add_sink(sink("AA")).unwrap();
        let first = registry.create_session("AA").unwrap();

        let second = registry.alloc_session_id();
        registry.pending.insert(second, Session::new_out(second, "AA"));
        registry.attach_session("AA", Some(second)).unwrap();

        assert!(registry.session(first).is_none());
        assert!(registry.session(second).is_some());
        assert_eq!(registry.n_sessions(), 1);
    }

    #[test]
    fn foreign_sessions_cannot_be_attached() {
        let (mut registry, _) = registry();
        registry.add_sink(sink("AA")).unwrap();
        registry.add_sink(sink("BB")).unwrap();
        let id = registry.create_session("AA").unwrap();

        let err = registry.attach_session("BB", Some(id)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(registry.sink("BB").unwrap().session(), None);
    }

    #[test]
    fn second_session_on_a_sink_is_refused() {
        let (mut registry, _) = registry();
        registry.add_sink(sink("AA")).unwrap();
        registry.create_session("AA").unwrap();

        assert!(matches!(
            registry.create_session("AA"),
            Err(Error::AlreadyInProgress)
        ));
        assert_eq!(registry.n_sessions(), 1);
    }

    #[test]
    fn removing_a_sink_removes_its_session_first() {
        let (mut registry, recorder) = registry();
        registry.add_sink(sink("AA")).unwrap();
        let id = registry.create_session("AA").unwrap();
        recorder.take();

        registry.remove_sink("AA").unwrap();
        assert_eq!(
            recorder.take(),
            [
                format!("removed {}", session_node(id)),
                "changed /org/freedesktop/miracle/wfd/sink/AA Session".to_string(),
                "removed /org/freedesktop/miracle/wfd/sink/AA".to_string(),
            ]
        );
        assert_eq!(registry.n_sessions(), 0);
        assert_eq!(registry.n_sinks(), 0);
    }

    #[test]
    fn ended_sessions_are_detached_from_their_sink() {
        let (mut registry, _) = registry();
        registry.add_sink(sink("AA")).unwrap();
        let id = registry.create_session("AA").unwrap();

        registry.session_ended(id).unwrap();
        assert_eq!(registry.sink("AA").unwrap().session(), None);
        assert!(registry.session(id).is_none());
    }

    #[test]
    fn destroyed_sessions_leave_the_registry() {
        let (mut registry, recorder) = registry();
        registry.add_sink(sink("AA")).unwrap();
        let id = registry.create_session("AA").unwrap();
        recorder.take();

        registry.set_session_state(id, SessionState::Destroyed).unwrap();
        assert_eq!(
            recorder.take(),
            [
                format!("changed {} State", session_node(id)),
                format!("removed {}", session_node(id)),
                "changed /org/freedesktop/miracle/wfd/sink/AA Session".to_string(),
            ]
        );
        assert_eq!(registry.sink("AA").unwrap().session(), None);
        assert!(registry.session(id).is_none());
    }

    #[test]
    fn passive_teardown_frees_the_sink_for_a_new_session() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = Registry::new(recorder, Arc::new(PassiveEngine));
        registry.add_sink(sink("AA")).unwrap();
        let first = registry.create_session("AA").unwrap();
        registry.drive(first, Verb::Start).unwrap();

        registry.drive(first, Verb::Teardown).unwrap();
        assert!(registry.session(first).is_none());
        assert_eq!(registry.sink("AA").unwrap().session(), None);

        let second = registry.create_session("AA").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn drive_announces_only_what_changed() {
        let (mut registry, recorder) = registry();
        registry.add_sink(sink("AA")).unwrap();
        let id = registry.create_session("AA").unwrap();
        recorder.take();

        registry.drive(id, Verb::Start).unwrap();
        assert_eq!(
            recorder.take(),
            [format!("changed {} State", session_node(id))]
        );

        registry.drive(id, Verb::Resume).unwrap();
        assert!(recorder.take().is_empty());

        let err = registry.drive(id, Verb::Pause).unwrap_err();
        assert!(matches!(err, Error::Engine(ref io) if io.raw_os_error() == Some(5)));
        assert_eq!(registry.session(id).unwrap().state(), SessionState::Connecting);

        registry
            .set_session_url(id, Some("rtsp://10.0.0.2/wfd1.0".into()))
            .unwrap();
        registry
            .set_session_url(id, Some("rtsp://10.0.0.2/wfd1.0".into()))
            .unwrap();
        assert_eq!(
            recorder.take(),
            [format!("changed {} Url", session_node(id))]
        );
    }

    #[test]
    fn lookups_distinguish_foreign_paths_from_missing_objects() {
        let (mut registry, _) = registry();
        registry.add_sink(sink("AA:BB:CC")).unwrap();
        let sink_path = path::sink_path("AA:BB:CC").unwrap();

        assert!(matches!(registry.find_sink(sink_path.as_str()), Lookup::Found(_)));
        assert!(matches!(
            registry.find_session(sink_path.as_str()),
            Lookup::NotApplicable
        ));
        assert!(matches!(
            registry.find_session(path::session_path(99).unwrap().as_str()),
            Lookup::NotFound
        ));
        assert!(matches!(
            registry.find_sink(path::sink_path("DD").unwrap().as_str()),
            Lookup::NotFound
        ));
    }

    #[test]
    fn shutdown_tears_down_and_empties_everything() {
        let (mut registry, recorder) = registry();
        registry.add_sink(sink("AA")).unwrap();
        registry.create_session("AA").unwrap();
        let inbound = registry.alloc_session_id();
        registry.add_session(Session::new_in(inbound)).unwrap();
        recorder.take();

        registry.shutdown();
        assert_eq!(registry.n_sinks(), 0);
        assert_eq!(registry.n_sessions(), 0);

        let events = recorder.take();
        let removed = events.iter().filter(|line| line.starts_with("removed")).count();
        assert_eq!(removed, 3);
    }
}
