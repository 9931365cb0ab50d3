//! Drift detection for webhook descriptions.
//!
//! The hash produced here is a non-cryptographic equality fingerprint. It is stored as a label
//! on every installed webhook configuration and only answers the question "was this object
//! reconciled from the current description?". It must never be used for anything security
//! related, and it is not a deduplication key.
use std::io;

use crate::descriptor::WebhookDescription;

/// Characters used by [`safe_encode`]. Vowels and easily confused characters are left out, so
/// encoded strings never spell words and are always valid label values.
pub(crate) const SAFE_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// A 32 bit FNV-1a hasher. The hash is defined over bytes only, so it is stable across
/// processes, machines and releases.
#[derive(Debug)]
struct Fnv32a(u32);

impl Default for Fnv32a {
    fn default() -> Self {
        Self(FNV_OFFSET_BASIS)
    }
}

impl io::Write for Fnv32a {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for byte in buf {
            self.0 ^= u32::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encodes `input` using only characters which are safe to use in label values and names.
pub fn safe_encode(input: &str) -> String {
    input
        .bytes()
        .map(|byte| char::from(SAFE_ALPHABET[usize::from(byte) % SAFE_ALPHABET.len()]))
        .collect()
}

/// Computes the drift hash of a webhook description.
///
/// The complete description (in field declaration order) is fed into a 32 bit FNV-1a hash.
/// The decimal representation of the hash is then [safely encoded](safe_encode), so that the
/// result can be used as a label value. Equal descriptions always hash equally, changing any
/// field changes the hash with high probability.
pub fn hash_webhook_description(description: &WebhookDescription) -> String {
    let mut hasher = Fnv32a::default();

    // Descriptions contain no maps with non-string keys, which is the only thing serde_json
    // refuses to serialize. Writing into the hasher itself never fails.
    serde_json::to_writer(&mut hasher, description)
        .expect("webhook descriptions always serialize to JSON");

    safe_encode(&hasher.0.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::descriptor::WebhookAdmissionType;

    #[fixture]
    fn description() -> WebhookDescription {
        WebhookDescription {
            generate_name: "webhook.test.com".to_owned(),
            admission_type: WebhookAdmissionType::Validating,
            deployment_name: "webhook-dep".to_owned(),
            container_port: 443,
            rules: vec![RuleWithOperations {
                api_groups: Some(vec!["apps".to_owned()]),
                api_versions: Some(vec!["v1".to_owned()]),
                operations: Some(vec!["CREATE".to_owned()]),
                resources: Some(vec!["deployments".to_owned()]),
                scope: None,
            }],
            failure_policy: Some("Fail".to_owned()),
            match_policy: None,
            object_selector: None,
            side_effects: "None".to_owned(),
            timeout_seconds: Some(10),
            admission_review_versions: vec!["v1beta1".to_owned(), "v1".to_owned()],
            reinvocation_policy: None,
            webhook_path: Some("/validate".to_owned()),
            conversion_crd: None,
        }
    }

    #[test]
    fn fnv_reference_values() {
        let mut hasher = Fnv32a::default();
        assert_eq!(hasher.0, 0x811c_9dc5);

        hasher.write_all(b"a").unwrap();
        assert_eq!(hasher.0, 0xe40c_292c);

        let mut hasher = Fnv32a::default();
        hasher.write_all(b"foobar").unwrap();
        assert_eq!(hasher.0, 0xbf9c_f968);
    }

    #[rstest]
    #[case("", "")]
    #[case("0", "4")]
    #[case("123", "567")]
    fn safe_encoding(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(safe_encode(input), expected);
    }

    #[rstest]
    fn hash_is_deterministic(description: WebhookDescription) {
        let hash = hash_webhook_description(&description);

        assert_eq!(hash, hash_webhook_description(&description.clone()));
        assert!(!hash.is_empty() && hash.len() <= 10);
        assert!(hash.bytes().all(|byte| SAFE_ALPHABET.contains(&byte)));
    }

    #[rstest]
    #[case::generate_name(|d: &mut WebhookDescription| d.generate_name.push_str("-changed"))]
    #[case::admission_type(|d: &mut WebhookDescription| d.admission_type = WebhookAdmissionType::Mutating)]
    #[case::container_port(|d: &mut WebhookDescription| d.container_port = 8443)]
    #[case::rules(|d: &mut WebhookDescription| d.rules.clear())]
    #[case::review_version_order(|d: &mut WebhookDescription| d.admission_review_versions.reverse())]
    #[case::side_effects(|d: &mut WebhookDescription| d.side_effects = "NoneOnDryRun".to_owned())]
    #[case::conversion_crd(|d: &mut WebhookDescription| d.conversion_crd = Some("crontabs.stable.example.com".to_owned()))]
    fn hash_changes_with_description(
        description: WebhookDescription,
        #[case] change: fn(&mut WebhookDescription),
    ) {
        let mut changed = description.clone();
        change(&mut changed);

        assert_ne!(
            hash_webhook_description(&description),
            hash_webhook_description(&changed)
        );
    }
}
