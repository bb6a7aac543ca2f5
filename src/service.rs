//! Bus presence of the registry: exported objects, signals and the name.
//!
//! A forwarder task drains the registry's notification queue. For each
//! appearing object it exports the zbus interface before announcing it, and
//! for each disappearing one it unexports first, so a client reacting to a
//! signal always sees the matching object state.

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::Connection;

use crate::context::Context;
use crate::dispatch::objects;
use crate::notify::{self, Notification};

pub struct WfdService {
    connection: Connection,
    service_name: Option<String>,
    forwarder: JoinHandle<()>,
}

impl WfdService {
    /// Starts forwarding notifications from `rx` onto `connection`.
    pub fn new(
        connection: Connection,
        ctx: Context,
        rx: UnboundedReceiver<Notification>,
    ) -> Self {
        let forwarder = tokio::spawn(forward(connection.clone(), ctx, rx));

        Self {
            connection,
            service_name: None,
            forwarder,
        }
    }

    /// Exports the collection root and claims `service_name`.
    ///
    /// Failure is logged and leaves the service unexposed; the process keeps
    /// running either way.
    pub async fn expose(&mut self, ctx: &Context, service_name: &str) -> bool {
        if let Err(err) = objects::export_root(&self.connection.object_server(), ctx).await {
            warn!(%err, "Failed to export the wfd root object");
            return false;
        }

        match self.connection.request_name(service_name).await {
            Ok(()) => {
                info!(service_name, "Exposed wfd interface on the bus");
                self.service_name = Some(service_name.to_string());
                true
            }
            Err(err) => {
                warn!(service_name, %err, "Failed to acquire bus name");
                if let Err(err) = objects::unexport_root(&self.connection.object_server()).await {
                    debug!(%err, "Failed to drop the wfd root object");
                }
                false
            }
        }
    }

    pub fn is_exposed(&self) -> bool {
        self.service_name.is_some()
    }

    /// Releases the name and stops forwarding.
    ///
    /// Call it after the registry was shut down so the final removals make it
    /// onto the bus; the queue is drained up to the point of this call.
    pub async fn shutdown(mut self, ctx: &Context) {
        let notifier = ctx.registry.lock().await.notifier();
        notify::flush(notifier.as_ref()).await;

        if let Some(name) = self.service_name.take() {
            if let Err(err) = self.connection.release_name(name.as_str()).await {
                warn!(service_name = %name, %err, "Failed to release bus name");
            }
            if let Err(err) = objects::unexport_root(&self.connection.object_server()).await {
                debug!(%err, "Failed to drop the wfd root object");
            }
        }

        self.forwarder.abort();
        info!("wfd service stopped");
    }
}

async fn forward(connection: Connection, ctx: Context, mut rx: UnboundedReceiver<Notification>) {
    let server = connection.object_server();

    while let Some(notification) = rx.recv().await {
        match notification {
            Notification::ObjectAdded { path, interfaces } => {
                for interface in &interfaces {
                    if let Err(err) = objects::export(&server, &ctx, &path, interface).await {
                        warn!(%path, interface, %err, "Failed to export object");
                    }
                }
                if let Err(err) = notify::emit_interfaces_added(&connection, &path, &interfaces).await
                {
                    warn!(%path, %err, "Failed to emit InterfacesAdded");
                }
            }
            Notification::ObjectRemoved { path, interfaces } => {
                for interface in &interfaces {
                    if let Err(err) = objects::unexport(&server, &path, interface).await {
                        debug!(%path, interface, %err, "Object was not exported");
                    }
                }
                if let Err(err) =
                    notify::emit_interfaces_removed(&connection, &path, &interfaces).await
                {
                    warn!(%path, %err, "Failed to emit InterfacesRemoved");
                }
            }
            Notification::PropertiesChanged {
                path,
                interface,
                properties,
            } => {
                if let Err(err) =
                    notify::emit_properties_changed(&connection, &path, interface, &properties)
                        .await
                {
                    warn!(%path, interface, %err, "Failed to emit PropertiesChanged");
                }
            }
            Notification::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!("Notification queue closed");
}
