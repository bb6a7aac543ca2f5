//! Runtime directory lookup through systemd-logind.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};
use zbus::proxy::CacheProperties;
use zbus::Connection;

use crate::error::{Error, Result};

#[zbus::proxy(
    interface = "org.freedesktop.login1.User",
    default_service = "org.freedesktop.login1"
)]
trait LoginUser {
    /// `XDG_RUNTIME_DIR` of the user.
    #[zbus(property)]
    fn runtime_path(&self) -> zbus::Result<String>;
}

#[async_trait]
pub trait RuntimeDirResolver: Send + Sync {
    async fn runtime_path(&self, uid: u32) -> Result<String>;
}

pub fn user_path(uid: u32) -> String {
    format!("/org/freedesktop/login1/user/_{uid}")
}

pub struct LoginClient {
    connection: Connection,
    call_timeout: Duration,
}

impl LoginClient {
    pub fn new(connection: Connection, call_timeout: Duration) -> Self {
        Self {
            connection,
            call_timeout,
        }
    }
}

#[async_trait]
impl RuntimeDirResolver for LoginClient {
    async fn runtime_path(&self, uid: u32) -> Result<String> {
        let proxy = LoginUserProxy::builder(&self.connection)
            .path(user_path(uid))?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;

        let path = match timeout(self.call_timeout, proxy.runtime_path()).await {
            Ok(Ok(path)) => path,
            Ok(Err(err)) => {
                warn!(uid, %err, "logind refused runtime path");
                return Err(err.into());
            }
            Err(_) => {
                warn!(uid, timeout_ms = self.call_timeout.as_millis(), "logind did not answer");
                return Err(Error::Fdo(zbus::fdo::Error::TimedOut(format!(
                    "RuntimePath of uid {uid}"
                ))));
            }
        };

        debug!(uid, %path, "Resolved runtime path");
        Ok(path)
    }
}
