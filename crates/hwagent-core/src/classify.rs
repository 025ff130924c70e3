//! Port-signature classification and protocol selection
//!
//! Classification is a pure function of a host's open ports and the configured
//! signature tables. Configured tables always win over the built-in fallback
//! heuristics, and tables are tried in [`DeviceType`] declaration order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::device::{DeviceType, Protocol};

/// Fallback heuristics, tried in order after the configured tables
const FALLBACK_RULES: &[(DeviceType, &[u16])] = &[
    (DeviceType::Printer, &[9100, 631, 515]),
    (DeviceType::Camera, &[8080, 554, 1935]),
    (DeviceType::BarcodeScanner, &[9100, 9101, 9200, 9201]),
];

/// Port-to-protocol mapping, in the order protocols are listed on a device
const PROTOCOL_PORTS: &[(Protocol, &[u16])] = &[
    (Protocol::Http, &[80, 8080]),
    (Protocol::Https, &[443, 8443]),
    (Protocol::Raw, &[9100]),
    (Protocol::Ipp, &[631]),
    (Protocol::Lpr, &[515]),
    (Protocol::Rtsp, &[554]),
];

/// Configured device type to expected port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Vec<u16>>",
    into = "BTreeMap<String, Vec<u16>>"
)]
pub struct Signatures(BTreeMap<DeviceType, Vec<u16>>);

impl TryFrom<BTreeMap<String, Vec<u16>>> for Signatures {
    type Error = String;

    fn try_from(raw: BTreeMap<String, Vec<u16>>) -> Result<Self, Self::Error> {
        raw.into_iter()
            .map(|(name, ports)| Ok((name.parse::<DeviceType>()?, ports)))
            .collect::<Result<BTreeMap<_, _>, String>>()
            .map(Self)
    }
}

impl From<Signatures> for BTreeMap<String, Vec<u16>> {
    fn from(signatures: Signatures) -> Self {
        signatures
            .0
            .into_iter()
            .map(|(t, ports)| (t.as_str().to_string(), ports))
            .collect()
    }
}

impl Signatures {
    pub fn new(tables: BTreeMap<DeviceType, Vec<u16>>) -> Self {
        Self(tables)
    }

    /// No configured tables; classification relies on fallback heuristics only
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn ports_for(&self, device_type: DeviceType) -> &[u16] {
        self.0.get(&device_type).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Union of every configured port, sorted
    pub fn all_ports(&self) -> BTreeSet<u16> {
        self.0.values().flatten().copied().collect()
    }

    /// Tables in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = (DeviceType, &[u16])> {
        self.0.iter().map(|(t, p)| (*t, p.as_slice()))
    }
}

impl Default for Signatures {
    fn default() -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(DeviceType::BarcodeScanner, vec![9100, 9101, 23]);
        tables.insert(DeviceType::NfcReader, vec![8080, 8081, 14443]);
        tables.insert(DeviceType::QrScanner, vec![9200, 9201, 8080]);
        tables.insert(DeviceType::Printer, vec![9100, 631, 515]);
        tables.insert(DeviceType::Camera, vec![8080, 554, 1935]);
        Self(tables)
    }
}

/// Classify a host by its open ports
///
/// Returns [`DeviceType::Unknown`] only when neither a configured table nor a
/// fallback heuristic matched.
pub fn classify(open_ports: &[u16], signatures: &Signatures) -> DeviceType {
    let intersects = |table: &[u16]| table.iter().any(|p| open_ports.contains(p));

    for (device_type, table) in signatures.iter() {
        if device_type != DeviceType::Unknown && intersects(table) {
            return device_type;
        }
    }

    FALLBACK_RULES
        .iter()
        .find(|(_, table)| intersects(table))
        .map(|(device_type, _)| *device_type)
        .unwrap_or(DeviceType::Unknown)
}

/// Protocols a device supports, derived from its open ports
pub fn derive_protocols(open_ports: &[u16]) -> Vec<Protocol> {
    PROTOCOL_PORTS
        .iter()
        .filter(|(_, ports)| ports.iter().any(|p| open_ports.contains(p)))
        .map(|(protocol, _)| *protocol)
        .collect()
}

/// Ordered protocol attempts for a connection: HTTP, then raw TCP, then IPP
///
/// Only protocols whose port is open are included. HTTP prefers port 80
/// over 8080.
pub fn connection_plan(open_ports: &[u16]) -> Vec<(Protocol, u16)> {
    let mut plan = Vec::new();
    if let Some(port) = [80, 8080].into_iter().find(|p| open_ports.contains(p)) {
        plan.push((Protocol::Http, port));
    }
    if open_ports.contains(&9100) {
        plan.push((Protocol::Raw, 9100));
    }
    if open_ports.contains(&631) {
        plan.push((Protocol::Ipp, 631));
    }
    plan
}

/// Check a link-layer address against the allow-list (empty list allows all)
pub fn is_mac_allowed(mac: &str, allowed: &[String]) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a.eq_ignore_ascii_case(mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(device_type: DeviceType, ports: &[u16]) -> Signatures {
        let mut tables = BTreeMap::new();
        tables.insert(device_type, ports.to_vec());
        Signatures::new(tables)
    }

    #[test]
    fn test_configured_tables_in_declaration_order() {
        let signatures = Signatures::default();
        // 9100 is in both the barcode scanner and printer tables
        assert_eq!(classify(&[9100], &signatures), DeviceType::BarcodeScanner);
        // 8080 is shared by nfc, qr and camera
        assert_eq!(classify(&[8080], &signatures), DeviceType::NfcReader);
        assert_eq!(classify(&[631], &signatures), DeviceType::Printer);
        assert_eq!(classify(&[1935], &signatures), DeviceType::Camera);
        assert_eq!(classify(&[9201], &signatures), DeviceType::QrScanner);
    }

    #[test]
    fn test_configured_table_beats_fallback() {
        let signatures = only(DeviceType::Camera, &[9100]);
        assert_eq!(classify(&[9100], &signatures), DeviceType::Camera);
    }

    #[test]
    fn test_fallback_heuristics() {
        let signatures = Signatures::empty();
        assert_eq!(classify(&[9100], &signatures), DeviceType::Printer);
        assert_eq!(classify(&[515, 22], &signatures), DeviceType::Printer);
        assert_eq!(classify(&[554], &signatures), DeviceType::Camera);
        assert_eq!(classify(&[9200], &signatures), DeviceType::BarcodeScanner);
    }

    #[test]
    fn test_unknown_when_nothing_matches() {
        let signatures = Signatures::default();
        assert_eq!(classify(&[22, 53, 443], &signatures), DeviceType::Unknown);
        assert_eq!(classify(&[], &signatures), DeviceType::Unknown);
    }

    #[test]
    fn test_unknown_table_never_matches() {
        let signatures = only(DeviceType::Unknown, &[22]);
        assert_eq!(classify(&[22], &signatures), DeviceType::Unknown);
    }

    #[test]
    fn test_all_ports_union() {
        let ports: Vec<u16> = Signatures::default().all_ports().into_iter().collect();
        assert_eq!(
            ports,
            vec![23, 515, 554, 631, 1935, 8080, 8081, 9100, 9101, 9200, 9201, 14443]
        );
    }

    #[test]
    fn test_derive_protocols() {
        assert_eq!(
            derive_protocols(&[80, 443, 515, 554, 631, 9100]),
            vec![
                Protocol::Http,
                Protocol::Https,
                Protocol::Raw,
                Protocol::Ipp,
                Protocol::Lpr,
                Protocol::Rtsp
            ]
        );
        assert!(derive_protocols(&[22]).is_empty());
    }

    #[test]
    fn test_connection_plan_order() {
        assert_eq!(
            connection_plan(&[631, 8080, 9100]),
            vec![
                (Protocol::Http, 8080),
                (Protocol::Raw, 9100),
                (Protocol::Ipp, 631)
            ]
        );
        assert_eq!(connection_plan(&[80, 8080]), vec![(Protocol::Http, 80)]);
        assert_eq!(connection_plan(&[9100]), vec![(Protocol::Raw, 9100)]);
        assert!(connection_plan(&[515, 554]).is_empty());
    }

    #[test]
    fn test_mac_allow_list() {
        assert!(is_mac_allowed("AA:BB:CC:DD:EE:FF", &[]));
        let allowed = vec!["aa:bb:cc:dd:ee:ff".to_string()];
        assert!(is_mac_allowed("AA:BB:CC:DD:EE:FF", &allowed));
        assert!(!is_mac_allowed("11:22:33:44:55:66", &allowed));
    }

    #[test]
    fn test_signatures_reject_unknown_type() {
        let result: Result<Signatures, _> = toml::from_str("toaster = [1]");
        assert!(result.is_err());
    }

    #[test]
    fn test_signatures_from_toml() {
        let signatures: Signatures = toml::from_str(
            r#"
            printer = [9100]
            camera = [554]
            "#,
        )
        .unwrap();
        assert_eq!(signatures.ports_for(DeviceType::Printer), &[9100]);
        assert_eq!(signatures.ports_for(DeviceType::Camera), &[554]);
        assert!(signatures.ports_for(DeviceType::NfcReader).is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn known_ports(signatures: &Signatures) -> BTreeSet<u16> {
        let mut ports = signatures.all_ports();
        ports.extend(FALLBACK_RULES.iter().flat_map(|(_, table)| table.iter().copied()));
        ports
    }

    proptest! {
        /// Hosts with no configured or fallback port are never classified
        #[test]
        fn unmatched_ports_classify_as_unknown(ports in any::<Vec<u16>>()) {
            let signatures = Signatures::default();
            let known = known_ports(&signatures);
            let ports: Vec<u16> = ports.into_iter().filter(|p| !known.contains(p)).collect();
            prop_assert_eq!(classify(&ports, &signatures), DeviceType::Unknown);
        }

        /// One configured port is enough to classify a host
        #[test]
        fn configured_port_always_classifies(
            mut ports in any::<Vec<u16>>(),
            pick in any::<prop::sample::Index>(),
            position in any::<prop::sample::Index>(),
        ) {
            let signatures = Signatures::default();
            let configured: Vec<u16> = signatures.all_ports().into_iter().collect();
            let port = configured[pick.index(configured.len())];
            ports.insert(position.index(ports.len() + 1), port);
            prop_assert_ne!(classify(&ports, &signatures), DeviceType::Unknown);
        }

        /// The fallback heuristics alone still classify any fallback port
        #[test]
        fn fallback_port_classifies_without_tables(
            mut ports in any::<Vec<u16>>(),
            pick in any::<prop::sample::Index>(),
        ) {
            let fallback: Vec<u16> = known_ports(&Signatures::empty()).into_iter().collect();
            ports.push(fallback[pick.index(fallback.len())]);
            prop_assert_ne!(classify(&ports, &Signatures::empty()), DeviceType::Unknown);
        }
    }
}
