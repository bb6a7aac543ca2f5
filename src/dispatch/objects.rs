//! zbus interface objects for the collection root, sinks and sessions.
//!
//! Sink and session objects are exported when their entity appears and
//! removed when it goes away. They only remember their own path and resolve
//! the entity again on every call.

use tracing::debug;
use zbus::fdo;
use zbus::interface;
use zbus::message::Header;
use zbus::object_server::ObjectServer;
use zbus::zvariant::OwnedObjectPath;

use crate::context::Context;
use crate::dispatch::{self, ManagedObjects};
use crate::error::BusError;
use crate::orchestrator::StartRequest;
use crate::path::{ROOT_PATH, SESSION_INTERFACE, SINK_INTERFACE};
use crate::session::Rectangle;

/// `org.freedesktop.miracle.wfd` at the collection root.
pub struct RootObject {
    ctx: Context,
}

#[interface(name = "org.freedesktop.miracle.wfd")]
impl RootObject {
    /// Tears the registry down and ends the service.
    async fn shutdown(&self) -> Result<(), BusError> {
        Ok(dispatch::shutdown(&self.ctx).await?)
    }
}

/// `org.freedesktop.DBus.ObjectManager` at the collection root.
pub struct ObjectManager {
    ctx: Context,
}

#[interface(name = "org.freedesktop.DBus.ObjectManager")]
impl ObjectManager {
    async fn get_managed_objects(&self) -> fdo::Result<ManagedObjects> {
        let registry = self.ctx.registry.lock().await;
        Ok(dispatch::managed_objects(&registry)?)
    }
}

pub struct SinkObject {
    ctx: Context,
    path: OwnedObjectPath,
}

#[interface(name = "org.freedesktop.miracle.wfd.Sink")]
impl SinkObject {
    /// Casts the caller's X display (and audio device) to this sink.
    #[allow(clippy::too_many_arguments)]
    async fn start_session(
        &self,
        auth: String,
        uri: String,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        audio_dev: String,
        #[zbus(header)] header: Header<'_>,
    ) -> Result<OwnedObjectPath, BusError> {
        debug!(sink = %self.path, %uri, width, height, "StartSession called");

        let request = StartRequest {
            auth,
            uri,
            rect: Rectangle {
                x,
                y,
                width,
                height,
            },
            audio_device: audio_dev,
        };
        Ok(dispatch::start_session(&self.ctx, self.path.as_str(), header.sender(), request).await?)
    }

    #[zbus(property)]
    async fn session(&self) -> fdo::Result<OwnedObjectPath> {
        Ok(dispatch::sink_session(&self.ctx, self.path.as_str()).await?)
    }

    #[zbus(property)]
    async fn peer(&self) -> fdo::Result<OwnedObjectPath> {
        Ok(dispatch::sink_peer(&self.ctx, self.path.as_str()).await?)
    }
}

pub struct SessionObject {
    ctx: Context,
    path: OwnedObjectPath,
}

#[interface(name = "org.freedesktop.miracle.wfd.Session")]
impl SessionObject {
    async fn resume(&self) -> Result<(), BusError> {
        Ok(dispatch::session_resume(&self.ctx, self.path.as_str()).await?)
    }

    async fn pause(&self) -> Result<(), BusError> {
        Ok(dispatch::session_pause(&self.ctx, self.path.as_str()).await?)
    }

    async fn teardown(&self) -> Result<(), BusError> {
        Ok(dispatch::session_teardown(&self.ctx, self.path.as_str()).await?)
    }

    #[zbus(property)]
    async fn sink(&self) -> fdo::Result<OwnedObjectPath> {
        Ok(dispatch::session_sink(&self.ctx, self.path.as_str()).await?)
    }

    #[zbus(property)]
    async fn url(&self) -> fdo::Result<String> {
        Ok(dispatch::session_url(&self.ctx, self.path.as_str()).await?)
    }

    #[zbus(property)]
    async fn state(&self) -> fdo::Result<i32> {
        Ok(dispatch::session_state(&self.ctx, self.path.as_str()).await?)
    }
}

/// Exports the administrative root and its object manager.
pub async fn export_root(server: &ObjectServer, ctx: &Context) -> zbus::Result<()> {
    server.at(ROOT_PATH, RootObject { ctx: ctx.clone() }).await?;
    server.at(ROOT_PATH, ObjectManager { ctx: ctx.clone() }).await?;
    Ok(())
}

pub async fn unexport_root(server: &ObjectServer) -> zbus::Result<()> {
    server.remove::<RootObject, _>(ROOT_PATH).await?;
    server.remove::<ObjectManager, _>(ROOT_PATH).await?;
    Ok(())
}

/// Makes a freshly announced sink or session reachable.
pub async fn export(
    server: &ObjectServer,
    ctx: &Context,
    path: &OwnedObjectPath,
    interface: &str,
) -> zbus::Result<bool> {
    let ctx = ctx.clone();
    let path = path.clone();
    match interface {
        SINK_INTERFACE => server.at(path.clone(), SinkObject { ctx, path }).await,
        SESSION_INTERFACE => server.at(path.clone(), SessionObject { ctx, path }).await,
        _ => Ok(false),
    }
}

/// Drops the bus object of a sink or session that went away.
pub async fn unexport(
    server: &ObjectServer,
    path: &OwnedObjectPath,
    interface: &str,
) -> zbus::Result<bool> {
    match interface {
        SINK_INTERFACE => server.remove::<SinkObject, _>(path.clone()).await,
        SESSION_INTERFACE => server.remove::<SessionObject, _>(path.clone()).await,
        _ => Ok(false),
    }
}
