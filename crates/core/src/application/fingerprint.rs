// Build Fingerprint
//
// Canonical form: the output-relevant config fields, ordered by name, each
// written as u32-BE length-prefixed name and value, followed by the sorted
// source file hashes in the same framing. The digest is sha-256 hex.

use crate::domain::BuildConfig;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Config fields that take part in the fingerprint, keyed by wire name
pub fn relevant_fields(config: &BuildConfig) -> BTreeMap<&'static str, String> {
    let mut fields = BTreeMap::new();
    fields.insert("buildType", config.build_type().as_str().to_string());
    fields.insert("packageId", config.package_id().to_string());
    fields.insert("version", config.version().to_string());

    match config {
        BuildConfig::Publish(c) => {
            if let Some(prev) = &c.previous_version {
                fields.insert("previousVersion", prev.clone());
            }
            if let Some(prev_pkg) = &c.previous_version_package_id {
                fields.insert("previousVersionPackageId", prev_pkg.clone());
            }
        }
        BuildConfig::Changelog(c) => {
            fields.insert("previousVersion", c.previous_version.clone());
            fields.insert(
                "previousVersionPackageId",
                c.previous_version_package_id.clone(),
            );
            if let Some(rev) = c.comparison_revision {
                fields.insert("comparisonRevision", rev.to_string());
            }
            if let Some(rev) = c.comparison_prev_revision {
                fields.insert("comparisonPrevRevision", rev.to_string());
            }
        }
        BuildConfig::DocumentGroup(c) => {
            fields.insert("apiType", c.target.api_type.as_str().to_string());
            fields.insert("groupName", c.target.group_name.clone());
            fields.insert("format", "json".to_string());
        }
        BuildConfig::MergedSpecification(c) => {
            fields.insert("apiType", c.target.api_type.as_str().to_string());
            fields.insert("groupName", c.target.group_name.clone());
            fields.insert("format", c.format.as_str().to_string());
        }
        BuildConfig::ReducedSourceSpecifications(c) => {
            fields.insert("apiType", c.target.api_type.as_str().to_string());
            fields.insert("groupName", c.target.group_name.clone());
        }
    }
    fields
}

fn push_framed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Canonical byte string of a config plus its source hashes
pub fn canonical_bytes(config: &BuildConfig, source_hashes: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    for (name, value) in relevant_fields(config) {
        push_framed(&mut buf, name.as_bytes());
        push_framed(&mut buf, value.as_bytes());
    }

    let mut hashes: Vec<&str> = source_hashes.iter().map(String::as_str).collect();
    hashes.sort_unstable();
    push_framed(&mut buf, b"sources");
    buf.extend_from_slice(&(hashes.len() as u32).to_be_bytes());
    for hash in hashes {
        push_framed(&mut buf, hash.as_bytes());
    }
    buf
}

/// Deduplication key of a build
pub fn fingerprint(config: &BuildConfig, source_hashes: &[String]) -> String {
    hex::encode(Sha256::digest(canonical_bytes(config, source_hashes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::test_support::{changelog_config, publish_config};

    #[test]
    fn test_mutators_do_not_affect_fingerprint() {
        let a = publish_config("pkg", "v1");
        let mut b = a.clone();
        b.set_created_by("someone-else");
        assert_eq!(fingerprint(&a, &[]), fingerprint(&b, &[]));
    }

    #[test]
    fn test_source_order_is_irrelevant() {
        let config = publish_config("pkg", "v1");
        let x = vec!["aa".to_string(), "bb".to_string()];
        let y = vec!["bb".to_string(), "aa".to_string()];
        assert_eq!(fingerprint(&config, &x), fingerprint(&config, &y));
        assert_ne!(fingerprint(&config, &x), fingerprint(&config, &[]));
    }

    #[test]
    fn test_relevant_field_changes_fingerprint() {
        assert_ne!(
            fingerprint(&publish_config("pkg", "v1"), &[]),
            fingerprint(&publish_config("pkg", "v2"), &[])
        );
        assert_ne!(
            fingerprint(&changelog_config("pkg", "v2", "v1"), &[]),
            fingerprint(&changelog_config("pkg", "v3", "v1"), &[])
        );
    }

    #[test]
    fn test_length_prefix_prevents_concatenation_collisions() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = publish_config("ab", "c");
        let b = publish_config("a", "bc");
        assert_ne!(canonical_bytes(&a, &[]), canonical_bytes(&b, &[]));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&publish_config("pkg", "v1"), &[]);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
