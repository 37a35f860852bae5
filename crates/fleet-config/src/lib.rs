// ── Runtime configuration ──
//
// These types describe *how* the core behaves: timeouts, transport
// endpoints, liveness windows. They carry credential data and tuning
// knobs, but never touch disk or the environment -- the excluded
// CLI/config-file layer builds these and hands them in.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

/// How the core authenticates an outbound connection-request callback.
///
/// Named to mirror the `connectionRequestAuth` option in the external
/// interface surface; both variants carry no data of their own, since the
/// actual username/password live on the `Device`'s stored credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRequestAuth {
    Basic,
    #[default]
    Digest,
}

/// TLS verification strategy for outbound connections the core makes
/// (connection-request callbacks, broker and socket transports).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum TlsVerification {
    /// System CA store (strict). Default for anything but local dev.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed certs, local test rigs).
    DangerAcceptInvalid,
}

impl PartialEq for TlsVerification {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::SystemDefaults, Self::SystemDefaults)
            | (Self::DangerAcceptInvalid, Self::DangerAcceptInvalid) => true,
            (Self::CustomCa(a), Self::CustomCa(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TlsVerification {}

/// `tls: {enabled, cert, key, ca}` from the configuration surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert: Option<std::path::PathBuf>,
    pub key: Option<std::path::PathBuf>,
    pub ca: Option<std::path::PathBuf>,
}

/// Exponential backoff tuning shared by every reconnecting transport adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectBackoff {
    pub min: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

/// Credentials an adapter authenticates to its endpoint with.
#[derive(Debug, Clone)]
pub enum TransportCredentials {
    UserSecret { user: String, secret: SecretString },
    ClientCert { cert: std::path::PathBuf, key: std::path::PathBuf },
    None,
}

impl Default for TransportCredentials {
    fn default() -> Self {
        Self::None
    }
}

/// The ENUMERATED transport configuration set from the transport
/// abstraction: `{enabled, endpoint, credentials, keepalive, maxInflight,
/// reconnectBackoff}`. One instance per C3 adapter (QueueBroker,
/// TopicBroker, Datagram, PersistentSocket).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub enabled: bool,
    pub endpoint: Url,
    pub credentials: TransportCredentials,
    pub keepalive: Duration,
    pub max_inflight: u32,
    pub reconnect_backoff: ReconnectBackoff,
    pub tls: TlsConfig,
}

impl TransportConfig {
    /// A disabled adapter config, useful as a placeholder before an
    /// operator wires in real endpoints.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            endpoint: "unix:///dev/null".parse().expect("static URL is valid"),
            credentials: TransportCredentials::None,
            keepalive: Duration::from_secs(30),
            max_inflight: 64,
            reconnect_backoff: ReconnectBackoff::default(),
            tls: TlsConfig::default(),
        }
    }
}

/// Per-engine configuration for the USP message engine (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UspEngineConfig {
    /// Default timeout applied to a `request()` call when the caller
    /// doesn't specify one.
    pub default_timeout: Duration,
    /// Upper bound on outstanding correlation-table entries before the
    /// engine starts rejecting new requests with `Pushback`.
    pub correlation_table_cap: usize,
    /// Largest inbound or outbound USP frame accepted before the engine
    /// rejects it with `ResourcesExceeded`.
    pub max_envelope_size: usize,
    /// How long a `Subscription` is retained without renewal.
    pub subscription_ttl: Duration,
}

impl Default for UspEngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
            correlation_table_cap: 50_000,
            max_envelope_size: 2 * 1024 * 1024,
            subscription_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Per-engine configuration for the CWMP session engine (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CwmpEngineConfig {
    /// Window after which a session with no activity is considered lost.
    pub session_timeout: Duration,
    /// Cadence of the background sweep that expires sessions past
    /// `session_timeout` and fails their in-flight RPC with `SessionLost`.
    pub session_sweep_interval: Duration,
    /// Value communicated to devices as the requested `PeriodicInformInterval`.
    pub inform_interval: Duration,
    /// Largest SOAP envelope accepted before a 9004 fault is returned.
    pub max_envelope_size: usize,
    /// Preferred connection-request auth scheme (§9 Open Question 1).
    pub connection_request_auth: ConnectionRequestAuth,
    pub tls: TlsConfig,
}

impl Default for CwmpEngineConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            session_sweep_interval: Duration::from_secs(5),
            inform_interval: Duration::from_secs(300),
            max_envelope_size: 2 * 1024 * 1024,
            connection_request_auth: ConnectionRequestAuth::default(),
            tls: TlsConfig::default(),
        }
    }
}

/// Device Registry (C6) tuning: `{livenessWindow}` plus the janitor
/// sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub liveness_window: Duration,
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_request_auth_defaults_to_digest() {
        assert_eq!(ConnectionRequestAuth::default(), ConnectionRequestAuth::Digest);
    }

    #[test]
    fn tls_verification_equality_ignores_danger_payload() {
        assert_eq!(TlsVerification::DangerAcceptInvalid, TlsVerification::DangerAcceptInvalid);
        assert_ne!(TlsVerification::SystemDefaults, TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn reconnect_backoff_default_is_sane() {
        let b = ReconnectBackoff::default();
        assert!(b.min < b.max);
        assert!(b.factor > 1.0);
    }

    #[test]
    fn disabled_transport_config_is_inert() {
        let cfg = TransportConfig::disabled();
        assert!(!cfg.enabled);
    }
}
