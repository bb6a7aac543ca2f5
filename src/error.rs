//! Error types for the registry and its bus surface.

use std::io;

use thiserror::Error;
use zbus::{fdo, zvariant, DBusError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation already in progress")]
    AlreadyInProgress,
    #[error("session is not connected")]
    NotConnected,
    #[error("unknown object {0}")]
    UnknownObject(String),
    #[error("service is shutting down")]
    Canceled,
    #[error("method call carries no sender")]
    MissingSender,
    #[error("session engine failed: {0}")]
    Engine(#[source] io::Error),
    #[error("failed to read credentials of pid {pid}: {source}")]
    Credentials {
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Bus(#[from] zbus::Error),
    #[error(transparent)]
    Fdo(#[from] fdo::Error),
    #[error("bad bus value: {0}")]
    Value(#[from] zvariant::Error),
}

/// Errors returned to remote callers.
#[derive(Debug, DBusError)]
#[zbus(prefix = "org.freedesktop.miracle.wfd.Error")]
pub enum BusError {
    #[zbus(error)]
    ZBus(zbus::Error),
    InvalidArgs(String),
    AlreadyInProgress(String),
    NotConnected(String),
    UnknownObject(String),
    Canceled(String),
    Failed(String),
}

impl From<Error> for BusError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::InvalidArgument(_) => BusError::InvalidArgs(message),
            Error::AlreadyInProgress => BusError::AlreadyInProgress(message),
            Error::NotConnected => BusError::NotConnected(message),
            Error::UnknownObject(_) => BusError::UnknownObject(message),
            Error::Canceled => BusError::Canceled(message),
            Error::Bus(err) => BusError::ZBus(err),
            Error::Fdo(err) => BusError::ZBus(zbus::Error::FDO(Box::new(err))),
            Error::MissingSender
            | Error::Engine(_)
            | Error::Credentials { .. }
            | Error::Value(_) => BusError::Failed(message),
        }
    }
}

impl From<Error> for fdo::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::UnknownObject(path) => fdo::Error::UnknownObject(path),
            Error::InvalidArgument(message) => fdo::Error::InvalidArgs(message),
            Error::Fdo(err) => err,
            other => fdo::Error::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_errors_carry_their_condition() {
        let err = BusError::from(Error::AlreadyInProgress);
        assert_eq!(
            err.name().as_str(),
            "org.freedesktop.miracle.wfd.Error.AlreadyInProgress"
        );

        let err = BusError::from(Error::NotConnected);
        assert_eq!(
            err.name().as_str(),
            "org.freedesktop.miracle.wfd.Error.NotConnected"
        );
    }

    #[test]
    fn engine_errors_keep_the_os_code() {
        let err = BusError::from(Error::Engine(io::Error::from_raw_os_error(110)));
        match err {
            BusError::Failed(message) => assert!(message.contains("os error 110"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_objects_map_to_the_standard_property_error() {
        let err = fdo::Error::from(Error::UnknownObject("/x".into()));
        assert_eq!(err.name().as_str(), "org.freedesktop.DBus.Error.UnknownObject");
    }
}
