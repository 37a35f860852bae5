// ── Device identity ──
//
// `DeviceId` is a tagged union over the two protocol worlds this core
// speaks: a USP agent identifies itself with a free-form string at
// handshake time, while a CWMP CPE is identified by the four-tuple it
// reports in every `Inform`. Both resolve to exactly one canonical
// string used as the primary store key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical device identity. Every `DeviceId` resolves to at most one
/// `Device` entity; a collision during registration is rejected, never
/// silently merged (see `DeviceRegistry::register`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    /// A USP agent id assigned by the agent itself at first handshake,
    /// e.g. `"proto::001122-SN1"`. Globally unique by construction.
    ModernAgent(String),
    /// A CWMP CPE identified by its `Inform`-reported four-tuple. The
    /// tuple itself is the sort key; the canonical string form
    /// concatenates the fields with `::`.
    LegacyCpe {
        manufacturer: String,
        oui: String,
        product_class: String,
        serial_number: String,
    },
}

impl DeviceId {
    pub fn modern_agent(id: impl Into<String>) -> Self {
        Self::ModernAgent(id.into())
    }

    pub fn legacy_cpe(
        manufacturer: impl Into<String>,
        oui: impl Into<String>,
        product_class: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self::LegacyCpe {
            manufacturer: manufacturer.into(),
            oui: oui.into(),
            product_class: product_class.into(),
            serial_number: serial_number.into(),
        }
    }

    /// `true` if this id names a USP agent rather than a CWMP CPE.
    #[must_use]
    pub fn is_modern(&self) -> bool {
        matches!(self, Self::ModernAgent(_))
    }

    /// The canonical string form used as the primary store key. Stable
    /// and injective: distinct `DeviceId`s never collide.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::ModernAgent(id) => format!("usp::{id}"),
            Self::LegacyCpe { manufacturer, oui, product_class, serial_number } => {
                format!("cwmp::{manufacturer}::{oui}::{product_class}::{serial_number}")
            }
        }
    }

    /// The sort key used for `listLive`/range-scans: the tuple for a
    /// legacy CPE, the canonical string for a modern agent.
    #[must_use]
    pub fn sort_key(&self) -> String {
        self.canonical()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl PartialOrd for DeviceId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeviceId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modern_agent_canonical_form() {
        let id = DeviceId::modern_agent("proto::oui-serial");
        assert_eq!(id.canonical(), "usp::proto::oui-serial");
        assert!(id.is_modern());
    }

    #[test]
    fn legacy_cpe_canonical_form() {
        let id = DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1");
        assert_eq!(id.canonical(), "cwmp::Acme::001122::Router::SN1");
        assert!(!id.is_modern());
    }

    #[test]
    fn distinct_ids_have_distinct_canonical_forms() {
        let a = DeviceId::legacy_cpe("Acme", "001122", "Router", "SN1");
        let b = DeviceId::legacy_cpe("Acme", "001122", "Router", "SN2");
        assert_ne!(a.canonical(), b.canonical());
        assert_ne!(a, b);
    }

    #[test]
    fn ordering_is_by_canonical_string() {
        let a = DeviceId::modern_agent("a");
        let b = DeviceId::modern_agent("b");
        assert!(a < b);
    }
}
