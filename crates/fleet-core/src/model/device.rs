// ── Device entity ──

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::device_id::DeviceId;

/// Credentials for the outbound connection-request callback to a legacy
/// CPE. `None` for a device the core has never been told a callback
/// password for -- the callback is then skipped and the device is only
/// reachable on its own `PeriodicInform` cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequestCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Static descriptor fields reported by the device (manufacturer,
/// model, software/hardware version). Separate from `Device` so it can
/// be replaced wholesale on re-registration without touching liveness
/// state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub manufacturer: String,
    pub model_name: String,
    pub software_version: String,
    pub hardware_version: String,
}

/// Where the core would reach this device to push work: the legacy
/// connection-request URL, or the last-seen transport address for a
/// USP agent (endpoint id used by a C3 adapter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransportHint {
    ConnectionRequestUrl(String),
    AgentEndpoint(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub descriptor: DeviceDescriptor,
    pub transport_hint: Option<TransportHint>,
    pub last_contact: chrono::DateTime<chrono::Utc>,
    pub registered_at: chrono::DateTime<chrono::Utc>,
    /// Back-reference to the device's current session, if any. A weak
    /// handle by design (§9 "Cyclic references") -- lookups always go
    /// through the owning engine's session table, this id alone never
    /// lets you reach session internals.
    pub current_session_id: Option<String>,
    pub connection_request_failures: u32,
    pub connection_request_credentials: Option<ConnectionRequestCredentials>,
}

impl Device {
    #[must_use]
    pub fn new(id: DeviceId, descriptor: DeviceDescriptor, transport_hint: Option<TransportHint>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            descriptor,
            transport_hint,
            // Open Question 3: a device that has registered but never
            // informed has undefined liveness in the source; we treat
            // registration time as the initial LastContact.
            last_contact: now,
            registered_at: now,
            current_session_id: None,
            connection_request_failures: 0,
            connection_request_credentials: None,
        }
    }

    #[must_use]
    pub fn is_online(&self, liveness_window: std::time::Duration) -> bool {
        let elapsed = chrono::Utc::now().signed_duration_since(self.last_contact);
        elapsed.to_std().map(|e| e <= liveness_window).unwrap_or(false)
    }

    pub fn touch(&mut self) {
        self.last_contact = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_device_is_online_immediately() {
        let d = Device::new(DeviceId::modern_agent("a1"), DeviceDescriptor::default(), None);
        assert!(d.is_online(Duration::from_secs(60)));
        assert_eq!(d.last_contact, d.registered_at);
    }

    #[test]
    fn touch_advances_last_contact() {
        let mut d = Device::new(DeviceId::modern_agent("a1"), DeviceDescriptor::default(), None);
        let before = d.last_contact;
        std::thread::sleep(Duration::from_millis(5));
        d.touch();
        assert!(d.last_contact >= before);
    }
}
