//! Vendored canonical license texts, keyed by lower-case SPDX identifier.
//!
//! Every identifier in the default whitelist must have an entry here;
//! configuration validation rejects whitelist entries that do not.

/// Identifier of the license covering the build infrastructure itself.
pub const INFRASTRUCTURE_LICENSE_ID: &str = "unlicense";

const VENDORED: &[(&str, &str)] = &[
    ("apache-2.0", include_str!("../../licenses/apache-2.0.txt")),
    ("bsd-2-clause", include_str!("../../licenses/bsd-2-clause.txt")),
    ("bsd-3-clause", include_str!("../../licenses/bsd-3-clause.txt")),
    ("cc0-1.0", include_str!("../../licenses/cc0-1.0.txt")),
    ("isc", include_str!("../../licenses/isc.txt")),
    ("mit", include_str!("../../licenses/mit.txt")),
    ("unlicense", include_str!("../../licenses/unlicense.txt")),
];

/// Canonical text for `license_id`, if vendored.
pub fn vendored_text(license_id: &str) -> Option<&'static str> {
    let wanted = license_id.trim().to_ascii_lowercase();
    VENDORED
        .iter()
        .find(|(id, _)| *id == wanted)
        .map(|(_, text)| *text)
}

/// All vendored identifiers, sorted.
pub fn vendored_ids() -> impl Iterator<Item = &'static str> {
    VENDORED.iter().map(|(id, _)| *id)
}

/// Public-domain dedication shipped with every bundle.
pub fn infrastructure_license() -> &'static str {
    // The table is static and always carries the infrastructure entry.
    vendored_text(INFRASTRUCTURE_LICENSE_ID).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_WHITELIST;

    #[test]
    fn test_every_default_whitelisted_id_is_vendored() {
        for id in DEFAULT_WHITELIST {
            let text = vendored_text(id).unwrap_or_else(|| panic!("{id} not vendored"));
            assert!(!text.trim().is_empty(), "{id} text is empty");
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(vendored_text("MIT").is_some());
        assert!(vendored_text(" Apache-2.0 ").is_some());
        assert!(vendored_text("gpl-3.0").is_none());
    }

    #[test]
    fn test_texts_match_their_identifiers() {
        assert!(vendored_text("mit").unwrap().starts_with("MIT License"));
        assert!(vendored_text("apache-2.0").unwrap().contains("Apache License"));
        assert!(vendored_text("bsd-3-clause")
            .unwrap()
            .contains("Neither the name of the copyright holder"));
        assert!(!vendored_text("bsd-2-clause")
            .unwrap()
            .contains("Neither the name of the copyright holder"));
        assert!(vendored_text("cc0-1.0").unwrap().contains("CC0 1.0 Universal"));
        assert!(vendored_text("isc").unwrap().starts_with("ISC License"));
    }

    #[test]
    fn test_infrastructure_license_is_public_domain_dedication() {
        assert!(infrastructure_license().contains("released into the public domain"));
    }

    #[test]
    fn test_vendored_ids_sorted() {
        let ids: Vec<&str> = vendored_ids().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), DEFAULT_WHITELIST.len());
    }
}
