//! Object-appeared, object-removed and properties-changed notifications.
//!
//! Registry code raises [`Notification`]s synchronously while it mutates
//! state. On the bus they are queued to the service's forwarder task, which
//! exports or unexports the affected object and then emits the signal. A
//! notification that cannot be delivered never undoes the state change that
//! raised it.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use zbus::names::BusName;
use zbus::zvariant::{OwnedObjectPath, Value};
use zbus::Connection;

use crate::error::{Error, Result};
use crate::path::ROOT_PATH;

const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

#[derive(Debug)]
pub enum Notification {
    ObjectAdded {
        path: OwnedObjectPath,
        interfaces: Vec<&'static str>,
    },
    ObjectRemoved {
        path: OwnedObjectPath,
        interfaces: Vec<&'static str>,
    },
    PropertiesChanged {
        path: OwnedObjectPath,
        interface: &'static str,
        properties: Vec<&'static str>,
    },
    /// Resolved once every notification queued before it has been handled.
    Flush(oneshot::Sender<()>),
}

/// Sink for registry notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<()>;
}

/// Queues notifications for the service's forwarder task.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) -> Result<()> {
        // The receiving half only goes away with the service itself.
        self.tx.send(notification).map_err(|_| Error::Canceled)
    }
}

pub fn object_added(
    notifier: &dyn Notifier,
    path: OwnedObjectPath,
    interfaces: &[&'static str],
) -> Result<()> {
    notifier.notify(Notification::ObjectAdded {
        path,
        interfaces: interfaces.to_vec(),
    })
}

pub fn object_removed(
    notifier: &dyn Notifier,
    path: OwnedObjectPath,
    interfaces: &[&'static str],
) -> Result<()> {
    notifier.notify(Notification::ObjectRemoved {
        path,
        interfaces: interfaces.to_vec(),
    })
}

pub fn properties_changed(
    notifier: &dyn Notifier,
    path: OwnedObjectPath,
    interface: &'static str,
    properties: &[&'static str],
) -> Result<()> {
    notifier.notify(Notification::PropertiesChanged {
        path,
        interface,
        properties: properties.to_vec(),
    })
}

/// Waits until everything queued so far has reached the bus.
pub async fn flush(notifier: &dyn Notifier) {
    let (tx, rx) = oneshot::channel();
    if notifier.notify(Notification::Flush(tx)).is_ok() {
        // A dropped barrier just means nobody is forwarding.
        let _ = rx.await;
    }
}

/// Emits `InterfacesAdded` on the collection root.
///
/// Properties are not inlined, readers fetch them separately.
pub async fn emit_interfaces_added(
    connection: &Connection,
    path: &OwnedObjectPath,
    interfaces: &[&str],
) -> zbus::Result<()> {
    let payload: HashMap<&str, HashMap<&str, Value<'_>>> = interfaces
        .iter()
        .map(|interface| (*interface, HashMap::new()))
        .collect();

    connection
        .emit_signal(
            None::<BusName<'_>>,
            ROOT_PATH,
            OBJECT_MANAGER_INTERFACE,
            "InterfacesAdded",
            &(path, payload),
        )
        .await
}

/// Emits `InterfacesRemoved` on the collection root.
pub async fn emit_interfaces_removed(
    connection: &Connection,
    path: &OwnedObjectPath,
    interfaces: &[&str],
) -> zbus::Result<()> {
    connection
        .emit_signal(
            None::<BusName<'_>>,
            ROOT_PATH,
            OBJECT_MANAGER_INTERFACE,
            "InterfacesRemoved",
            &(path, interfaces.to_vec()),
        )
        .await
}

/// Emits `PropertiesChanged` with the names listed as invalidated.
pub async fn emit_properties_changed(
    connection: &Connection,
    path: &OwnedObjectPath,
    interface: &str,
    properties: &[&str],
) -> zbus::Result<()> {
    let changed: HashMap<&str, Value<'_>> = HashMap::new();

    connection
        .emit_signal(
            None::<BusName<'_>>,
            path.as_str(),
            PROPERTIES_INTERFACE,
            "PropertiesChanged",
            &(interface, changed, properties.to_vec()),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{sink_path, SINK_INTERFACE};

    #[tokio::test]
    async fn channel_notifier_preserves_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let path = sink_path("AA").unwrap();

        object_added(&notifier, path.clone(), &[SINK_INTERFACE]).unwrap();
        properties_changed(&notifier, path.clone(), SINK_INTERFACE, &["Session"]).unwrap();
        object_removed(&notifier, path, &[SINK_INTERFACE]).unwrap();

        assert!(matches!(rx.recv().await, Some(Notification::ObjectAdded { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(Notification::PropertiesChanged { properties, .. }) if properties == ["Session"]
        ));
        assert!(matches!(rx.recv().await, Some(Notification::ObjectRemoved { .. })));
    }

    #[tokio::test]
    async fn closed_channel_reports_canceled() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);

        let err = object_added(&notifier, sink_path("AA").unwrap(), &[SINK_INTERFACE])
            .expect_err("nobody is listening");
        assert!(matches!(err, Error::Canceled));

        // must not hang
        flush(&notifier).await;
    }
}
