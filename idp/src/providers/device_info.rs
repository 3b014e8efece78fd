//! Device metadata.

use crate::models::DeviceInformation;

/// Supplies name, model and OS of the running device.
pub trait DeviceInfoProvider: Send + Sync {
    /// Metadata of this device.
    fn device_information(&self) -> DeviceInformation;
}

/// Fixed device metadata, for hosts that resolve it once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDeviceInfo(pub DeviceInformation);

impl DeviceInfoProvider for StaticDeviceInfo {
    fn device_information(&self) -> DeviceInformation {
        self.0.clone()
    }
}
