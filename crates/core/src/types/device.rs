//! Device selection

use std::fmt;

/// Target device of a request
///
/// Immutable and cheap to clone; used as the key of the capability cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    /// Device with the given serial number
    Serial(String),

    /// Device with the given daemon transport id
    TransportId(u64),

    /// The only connected device
    Any,

    /// The only device connected over USB
    Usb,

    /// The only local (emulator/TCP) device
    Local,
}

impl DeviceSelector {
    pub fn serial(serial: impl Into<String>) -> Self {
        Self::Serial(serial.into())
    }

    /// Request switching a daemon connection to this device
    pub fn transport_request(&self) -> String {
        match self {
            Self::Serial(serial) => format!("host:transport:{}", serial),
            Self::TransportId(id) => format!("host:transport-id:{}", id),
            Self::Any => "host:transport-any".to_string(),
            Self::Usb => "host:transport-usb".to_string(),
            Self::Local => "host:transport-local".to_string(),
        }
    }

    /// Host query for the device feature list
    pub fn features_request(&self) -> String {
        format!("{}:features", self.host_prefix())
    }

    fn host_prefix(&self) -> String {
        match self {
            Self::Serial(serial) => format!("host-serial:{}", serial),
            Self::TransportId(id) => format!("host-transport-id:{}", id),
            Self::Any => "host".to_string(),
            Self::Usb => "host-usb".to_string(),
            Self::Local => "host-local".to_string(),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(serial) => write!(f, "serial '{}'", serial),
            Self::TransportId(id) => write!(f, "transport-id {}", id),
            Self::Any => f.write_str("any"),
            Self::Usb => f.write_str("usb"),
            Self::Local => f.write_str("local"),
        }
    }
}
