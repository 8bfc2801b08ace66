//! Device capability discovery

pub mod capabilities;

pub use capabilities::{
    feature, CapabilityCache, CapabilitySource, DaemonCapabilitySource, DeviceCapabilities,
};
