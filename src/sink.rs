//! Display-capable peers discovered on the P2P link.

use crate::error::{Error, Result};
use crate::session::SessionId;

/// WFD device information subelement advertised by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub device_info: u16,
    pub rtsp_port: u16,
    pub max_throughput: u16,
}

const DEVICE_TYPE_MASK: u16 = 0x3;
const DEVICE_TYPE_SOURCE: u16 = 0;

impl DeviceInfo {
    /// Primary sinks, secondary sinks and dual-role devices can all receive.
    pub fn is_sink(&self) -> bool {
        self.device_info & DEVICE_TYPE_MASK != DEVICE_TYPE_SOURCE
    }
}

#[derive(Debug)]
pub struct Sink {
    label: String,
    dev_info: DeviceInfo,
    pub(crate) session: Option<SessionId>,
}

impl Sink {
    /// `label` is the identity of the peer the sink was discovered from.
    pub fn new(label: impl Into<String>, dev_info: DeviceInfo) -> Result<Self> {
        let label = label.into();
        if !dev_info.is_sink() {
            return Err(Error::InvalidArgument(format!(
                "peer {label} does not advertise a sink device"
            )));
        }

        Ok(Self {
            label,
            dev_info,
            session: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dev_info(&self) -> &DeviceInfo {
        &self.dev_info
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn is_session_started(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_are_rejected() {
        let source = DeviceInfo {
            device_info: 0x0010,
            rtsp_port: 7236,
            max_throughput: 50,
        };
        assert!(matches!(
            Sink::new("AA:BB", source),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn primary_and_dual_role_devices_are_sinks() {
        for device_info in [0x0001, 0x0002, 0x0003, 0x0111] {
            let info = DeviceInfo {
                device_info,
                ..DeviceInfo::default()
            };
            let sink = Sink::new("AA:BB", info).unwrap();
            assert!(!sink.is_session_started());
        }
    }
}
