// ── Instance entity ──

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::device_id::DeviceId;

/// (DeviceId, ObjectPath, InstanceNumber, Parameters-by-name).
/// `ObjectPath` ends in `.`; `InstanceNumber` is a positive integer;
/// `(DeviceId, ObjectPath, InstanceNumber)` is unique. Created by
/// `addObject`, destroyed by `deleteObject`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub device_id: DeviceId,
    pub object_path: String,
    pub instance_number: u32,
    pub parameters: HashMap<String, String>,
}

impl Instance {
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}{}", self.device_id.canonical(), self.object_path, self.instance_number)
    }

    /// The full instance path, e.g. `Device.WiFi.SSID.3.`.
    #[must_use]
    pub fn instance_path(&self) -> String {
        format!("{}{}.", self.object_path, self.instance_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_path_appends_number_and_dot() {
        let inst = Instance {
            device_id: DeviceId::modern_agent("a1"),
            object_path: "Device.WiFi.SSID.".into(),
            instance_number: 3,
            parameters: HashMap::new(),
        };
        assert_eq!(inst.instance_path(), "Device.WiFi.SSID.3.");
    }
}
