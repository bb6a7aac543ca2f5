//! Control plane of the Wifi-Display daemon.
//!
//! Sinks discovered on the P2P link and the casting sessions started towards
//! them are kept in a [`registry::Registry`] and published on the bus under
//! `/org/freedesktop/miracle/wfd`.

pub mod config;
pub mod context;
pub mod credentials;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod login;
pub mod notify;
pub mod orchestrator;
pub mod path;
pub mod registry;
pub mod service;
pub mod session;
pub mod sink;

pub use context::Context;
pub use error::{BusError, Error, Result};
pub use registry::{Registry, SharedRegistry};
pub use service::WfdService;
