//! Heuristic device identification.
//!
//! Turns one advertisement into a human-readable label. Three tiers, first
//! match wins: broadcast name, manufacturer-data company tag, MAC address
//! prefix (OUI). Pure and deterministic, so it is trivially testable.

use crate::scan::{AdvertisementRecord, RadioKind};

/// Placeholder when no heuristic matches a BLE record.
const SENTINEL: &str = "-";
/// Placeholder for a nameless Classic device.
const UNKNOWN_CLASSIC: &str = "Unknown Classic Device";
/// Manufacturer data present but the company tag is not in the table.
const UNKNOWN_SMART: &str = "Unknown Smart Device";

/// Leading two bytes of BLE manufacturer data (little-endian Bluetooth SIG
/// company identifiers).
const COMPANY_TAGS: &[([u8; 2], &str)] = &[
    ([0x4C, 0x00], "Apple Device"),
    ([0x06, 0x00], "Microsoft Device"),
    ([0x75, 0x00], "Samsung Device"),
    ([0xE0, 0x00], "Google Device"),
];

/// OUI prefixes for vendors commonly seen advertising without a name.
const OUI_PREFIXES: &[(&str, &str)] = &[
    ("24:6f:28", "Espressif Device"),
    ("30:ae:a4", "Espressif Device"),
    ("e8:db:84", "Espressif Device"),
    ("b8:27:eb", "Raspberry Pi"),
    ("dc:a6:32", "Raspberry Pi"),
    ("f0:18:98", "Apple Device"),
    ("a4:c1:38", "Telink Sensor"),
    ("00:02:5b", "Cambridge Silicon Radio"),
];

/// Resolve a label for one observed advertisement. Never returns an empty
/// string.
pub fn identify(adv: &AdvertisementRecord) -> String {
    if let Some(name) = adv.name.as_deref() {
        if !name.is_empty() {
            return name.to_string();
        }
    }

    // A payload shorter than the company tag falls through to the OUI tier.
    if let Some(data) = adv.manufacturer_data.as_deref() {
        if data.len() >= 2 {
            for (tag, label) in COMPANY_TAGS {
                if data[..2] == tag[..] {
                    return (*label).to_string();
                }
            }
            return UNKNOWN_SMART.to_string();
        }
    }

    // Radio stacks report addresses in mixed case.
    let addr = adv.addr.to_ascii_lowercase();
    for (prefix, label) in OUI_PREFIXES {
        if addr.starts_with(prefix) {
            return (*label).to_string();
        }
    }

    match adv.kind {
        RadioKind::Classic => UNKNOWN_CLASSIC.to_string(),
        RadioKind::Ble => SENTINEL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(
        addr: &str,
        name: Option<&str>,
        manufacturer_data: Option<&[u8]>,
        kind: RadioKind,
    ) -> AdvertisementRecord {
        AdvertisementRecord {
            addr: addr.to_string(),
            rssi: -60,
            name: name.map(str::to_string),
            manufacturer_data: manufacturer_data.map(<[u8]>::to_vec),
            kind,
        }
    }

    #[test]
    fn test_broadcast_name_wins_over_everything() {
        let record = adv(
            "4c:00:00:11:22:33",
            Some("Living Room TV"),
            Some(&[0x4C, 0x00, 0x10]),
            RadioKind::Ble,
        );
        assert_eq!(identify(&record), "Living Room TV");
    }

    #[test]
    fn test_company_tag_beats_oui() {
        // Espressif OUI, but the payload says Apple.
        let record = adv("24:6f:28:aa:bb:cc", None, Some(&[0x4C, 0x00]), RadioKind::Ble);
        assert_eq!(identify(&record), "Apple Device");
    }

    #[test]
    fn test_apple_company_tag() {
        let record = adv("4c:00:00:11:22:33", None, Some(&[0x4C, 0x00]), RadioKind::Ble);
        assert_eq!(identify(&record), "Apple Device");
    }

    #[test]
    fn test_unmatched_company_tag_is_unknown_smart() {
        let record = adv("11:22:33:44:55:66", None, Some(&[0xAB, 0xCD]), RadioKind::Ble);
        assert_eq!(identify(&record), "Unknown Smart Device");
    }

    #[test]
    fn test_short_payload_falls_through_to_oui() {
        let record = adv("24:6f:28:aa:bb:cc", None, Some(&[0x4C]), RadioKind::Ble);
        assert_eq!(identify(&record), "Espressif Device");
    }

    #[test]
    fn test_espressif_oui() {
        let record = adv("24:6f:28:aa:bb:cc", None, None, RadioKind::Ble);
        assert_eq!(identify(&record), "Espressif Device");
    }

    #[test]
    fn test_oui_match_is_case_insensitive() {
        let record = adv("24:6F:28:AA:BB:CC", None, None, RadioKind::Ble);
        assert_eq!(identify(&record), "Espressif Device");
    }

    #[test]
    fn test_ble_sentinel() {
        let record = adv("02:00:00:00:00:01", None, None, RadioKind::Ble);
        assert_eq!(identify(&record), "-");
    }

    #[test]
    fn test_classic_sentinel() {
        let record = adv("02:00:00:00:00:01", Some(""), None, RadioKind::Classic);
        assert_eq!(identify(&record), "Unknown Classic Device");
    }

    #[test]
    fn test_label_never_empty() {
        let records = [
            adv("", None, None, RadioKind::Ble),
            adv("", Some(""), None, RadioKind::Classic),
            adv("ff:ff:ff:ff:ff:ff", None, Some(&[]), RadioKind::Ble),
            adv("24:6f:28:00:00:00", Some(""), Some(&[0x00]), RadioKind::Ble),
        ];
        for record in &records {
            assert!(!identify(record).is_empty());
        }
    }

    #[test]
    fn test_identify_is_deterministic() {
        let record = adv("4c:00:00:11:22:33", None, Some(&[0x4C, 0x00]), RadioKind::Ble);
        assert_eq!(identify(&record), identify(&record));
    }
}
