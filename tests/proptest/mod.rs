// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for migration-policy-webhook.
//!
//! Uses proptest to generate random inputs and verify invariants.

#[allow(dead_code)]
#[path = "../common/fixtures.rs"]
mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use fixtures::MigrationPolicyBuilder;
use migration_policy_webhook::cluster::{InMemoryNamespaces, SeccompCapabilities, psa};
use migration_policy_webhook::quantity::{ParsedQuantity, Sign};
use migration_policy_webhook::{AdmitContext, Decision, MigrationPolicyAdmitter, ReviewRequest};

/// Strategy for generating suffixes accepted by the quantity grammar.
fn any_suffix() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(""),
        Just("m"),
        Just("k"),
        Just("M"),
        Just("G"),
        Just("T"),
        Just("P"),
        Just("E"),
        Just("Ki"),
        Just("Mi"),
        Just("Gi"),
        Just("Ti"),
        Just("Pi"),
        Just("Ei"),
        Just("e3"),
        Just("E-2"),
    ]
}

/// Strategy for generating the numeric part of a quantity.
fn any_number() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u64..=u64::MAX).prop_map(|n| n.to_string()),
        (0u32..100_000, 0u32..1_000).prop_map(|(w, f)| format!("{w}.{f:03}")),
        "[0-9]{20,40}",
    ]
}

fn is_all_zero(number: &str) -> bool {
    number.chars().all(|c| c == '0' || c == '.')
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(future)
}

fn admit(review: serde_json::Value, allows_userfaultfd: bool) -> Decision {
    let request = ReviewRequest::from_value(review).unwrap();
    let admitter = MigrationPolicyAdmitter::new(
        Arc::new(
            InMemoryNamespaces::new()
                .with_namespace("virt-privileged", [(psa::ENFORCE_LABEL, "privileged")])
                .with_namespace("virt-restricted", [(psa::ENFORCE_LABEL, "restricted")]),
        ),
        Arc::new(SeccompCapabilities::new(allows_userfaultfd)),
    );
    block_on(admitter.admit(&request, &AdmitContext::with_timeout(Duration::from_secs(5))))
}

fn cause_fields(decision: &Decision) -> Vec<String> {
    match decision {
        Decision::Allowed => vec![],
        Decision::Denied(causes) => causes.iter().map(|c| c.field.clone()).collect(),
        Decision::Errored(e) => panic!("unexpected error decision: {e}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The sign of a quantity follows its leading sign character.
    #[test]
    fn quantity_sign_follows_prefix(
        number in any_number(),
        suffix in any_suffix(),
        negative in any::<bool>(),
    ) {
        let input = format!("{}{number}{suffix}", if negative { "-" } else { "" });
        let parsed = ParsedQuantity::parse(&input).unwrap();

        let expected = if is_all_zero(&number) {
            Sign::Zero
        } else if negative {
            Sign::Negative
        } else {
            Sign::Positive
        };
        prop_assert_eq!(parsed.sign(), expected, "input {}", input);
    }

    /// An explicit plus sign never changes the sign.
    #[test]
    fn explicit_plus_is_positive(number in any_number(), suffix in any_suffix()) {
        let plain = ParsedQuantity::parse(&format!("{number}{suffix}")).unwrap();
        let signed = ParsedQuantity::parse(&format!("+{number}{suffix}")).unwrap();
        prop_assert_eq!(plain.sign(), signed.sign());
    }

    /// Integers that fit are kept exact.
    #[test]
    fn small_integers_are_exact(value in any::<i64>()) {
        let parsed = ParsedQuantity::parse(&value.to_string()).unwrap();
        prop_assert_eq!(parsed.as_i64(), Some(value));
    }

    /// A negative timeout yields exactly one cause; any other value none.
    #[test]
    fn timeout_cause_iff_negative(timeout in any::<i64>()) {
        let review = MigrationPolicyBuilder::default()
            .completion_timeout(timeout)
            .review("virt-restricted");
        let fields = cause_fields(&admit(review, false));

        if timeout < 0 {
            prop_assert_eq!(fields, vec!["spec.completionTimeoutPerGiB".to_string()]);
        } else {
            prop_assert!(fields.is_empty());
        }
    }

    /// Causes always appear in check order and each field at most once.
    #[test]
    fn causes_follow_check_order(
        timeout in -5i64..5,
        bandwidth in -5i64..5,
        post_copy in any::<bool>(),
        privileged in any::<bool>(),
        allows_userfaultfd in any::<bool>(),
    ) {
        let namespace = if privileged { "virt-privileged" } else { "virt-restricted" };
        let review = MigrationPolicyBuilder::default()
            .completion_timeout(timeout)
            .bandwidth(format!("{bandwidth}Mi"))
            .allow_post_copy(post_copy)
            .review(namespace);
        let fields = cause_fields(&admit(review, allows_userfaultfd));

        let mut expected = Vec::new();
        if timeout < 0 {
            expected.push("spec.completionTimeoutPerGiB".to_string());
        }
        if bandwidth < 0 {
            expected.push("spec.bandwidthPerMigration".to_string());
        }
        if post_copy && !privileged && !allows_userfaultfd {
            expected.push("spec.allowPostCopy".to_string());
        }
        prop_assert_eq!(fields, expected);
    }
}
