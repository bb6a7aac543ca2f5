//! Resolving who is calling us.
//!
//! The bus daemon only vouches for the caller's pid. Uid and gid are then
//! looked up freshly for that pid instead of trusting the first snapshot.

use std::io;

use async_trait::async_trait;
use tracing::debug;
use zbus::fdo::DBusProxy;
use zbus::names::{BusName, UniqueName};
use zbus::Connection;

use crate::error::{Error, Result};
use crate::session::Credentials;

#[async_trait]
pub trait CallerIdentity: Send + Sync {
    /// Process id of the connection that sent a message.
    async fn caller_pid(&self, sender: &UniqueName<'_>) -> Result<u32>;

    /// Uid and gid of a running process.
    async fn credentials_for_pid(&self, pid: u32) -> Result<Credentials>;
}

/// Asks the bus daemon for the pid and reads the ids from procfs.
pub struct BusCallerIdentity {
    connection: Connection,
}

impl BusCallerIdentity {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CallerIdentity for BusCallerIdentity {
    async fn caller_pid(&self, sender: &UniqueName<'_>) -> Result<u32> {
        let proxy = DBusProxy::new(&self.connection).await?;
        let pid = proxy
            .get_connection_unix_process_id(BusName::Unique(sender.clone()))
            .await?;
        debug!(%sender, pid, "Resolved caller pid");
        Ok(pid)
    }

    async fn credentials_for_pid(&self, pid: u32) -> Result<Credentials> {
        let status = tokio::fs::read_to_string(format!("/proc/{pid}/status"))
            .await
            .map_err(|source| Error::Credentials { pid, source })?;

        parse_proc_status(pid, &status).ok_or_else(|| Error::Credentials {
            pid,
            source: io::Error::new(io::ErrorKind::InvalidData, "no Uid/Gid lines"),
        })
    }
}

/// Picks the real uid and gid out of a `/proc/<pid>/status` dump.
pub fn parse_proc_status(pid: u32, status: &str) -> Option<Credentials> {
    let mut uid = None;
    let mut gid = None;

    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            uid = rest.split_whitespace().next().and_then(|v| v.parse().ok());
        } else if let Some(rest) = line.strip_prefix("Gid:") {
            gid = rest.split_whitespace().next().and_then(|v| v.parse().ok());
        }
    }

    Some(Credentials {
        pid,
        uid: uid?,
        gid: gid?,
    })
}
