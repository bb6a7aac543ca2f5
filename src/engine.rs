//! Seam to the Wifi-Display streaming engine.
//!
//! Capability negotiation, RTSP and RTP live behind [`CastEngine`]. The
//! registry only drives the verbs below and reports what changed.

use std::io;

use tracing::info;

use crate::session::{Session, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Start,
    Pause,
    Resume,
    Teardown,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Start => "start",
            Verb::Pause => "pause",
            Verb::Resume => "resume",
            Verb::Teardown => "teardown",
        }
    }
}

/// Verbs update the session in place. Leaving it in `TearingDown` or
/// `Destroyed` ends the session; an engine that finishes later reports the
/// final state through [`Registry::set_session_state`] instead.
///
/// [`Registry::set_session_state`]: crate::registry::Registry::set_session_state
pub trait CastEngine: Send + Sync {
    fn start(&self, session: &mut Session) -> io::Result<()>;
    fn pause(&self, session: &mut Session) -> io::Result<()>;
    fn resume(&self, session: &mut Session) -> io::Result<()>;
    fn teardown(&self, session: &mut Session) -> io::Result<()>;

    fn run(&self, verb: Verb, session: &mut Session) -> io::Result<()> {
        match verb {
            Verb::Start => self.start(session),
            Verb::Pause => self.pause(session),
            Verb::Resume => self.resume(session),
            Verb::Teardown => self.teardown(session),
        }
    }
}

/// Bookkeeping-only engine for running the control plane without a
/// streaming backend linked in. Sessions never get past `Connecting`.
#[derive(Debug, Default)]
pub struct PassiveEngine;

impl CastEngine for PassiveEngine {
    fn start(&self, session: &mut Session) -> io::Result<()> {
        info!(session = session.id(), "No streaming backend, session stays connecting");
        session.set_state(SessionState::Connecting);
        Ok(())
    }

    fn pause(&self, session: &mut Session) -> io::Result<()> {
        session.set_state(SessionState::Paused);
        Ok(())
    }

    fn resume(&self, session: &mut Session) -> io::Result<()> {
        session.set_state(SessionState::Playing);
        Ok(())
    }

    fn teardown(&self, session: &mut Session) -> io::Result<()> {
        session.set_state(SessionState::TearingDown);
        Ok(())
    }
}
