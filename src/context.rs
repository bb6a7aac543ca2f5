//! Everything a handler needs, passed explicitly instead of fetched globally.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::credentials::CallerIdentity;
use crate::login::RuntimeDirResolver;
use crate::registry::SharedRegistry;

#[derive(Clone)]
pub struct Context {
    pub registry: SharedRegistry,
    pub identity: Arc<dyn CallerIdentity>,
    pub login: Arc<dyn RuntimeDirResolver>,
    shutdown: Arc<Notify>,
}

impl Context {
    pub fn new(
        registry: SharedRegistry,
        identity: Arc<dyn CallerIdentity>,
        login: Arc<dyn RuntimeDirResolver>,
    ) -> Self {
        Self {
            registry,
            identity,
            login,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Asks the process to leave its service role.
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once [`Context::request_shutdown`] was called.
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }
}
