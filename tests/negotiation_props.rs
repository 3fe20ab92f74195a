//! Property tests for negotiation and relay ordering.

mod common;

use std::collections::BTreeMap;

use common::{next_line, send, PipeInterface, PipeModel};
use modlink::{
    negotiate, CapabilityRequirements, CapabilitySupport, CompatibilityVerdict, Config, Controller,
};
use proptest::prelude::*;

fn names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-f]", 0..6)
}

fn support_map() -> impl Strategy<Value = BTreeMap<String, bool>> {
    prop::collection::btree_map("[a-f]", any::<bool>(), 0..6)
}

/// Unsupported names in first-seen order, each once
fn unsupported(names: &[String], support: &BTreeMap<String, bool>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !support.get(name).copied().unwrap_or(false) && !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}

proptest! {
    #[test]
    fn verdict_is_the_set_difference(
        required in names(),
        optional in names(),
        support in support_map(),
    ) {
        let requirements = CapabilityRequirements::new(required.clone(), optional.clone());
        let capabilities: CapabilitySupport =
            support.iter().map(|(name, ok)| (name.clone(), *ok)).collect();

        let verdict = negotiate(Some(&requirements), &capabilities);
        let missing_required = unsupported(&required, &support);
        let missing_optional = unsupported(&optional, &support);

        let expected = if !missing_required.is_empty() {
            CompatibilityVerdict::Incompatible(missing_required)
        } else if !missing_optional.is_empty() {
            CompatibilityVerdict::PartiallyCompatible(missing_optional)
        } else {
            CompatibilityVerdict::Compatible
        };
        prop_assert_eq!(&verdict, &expected);
        prop_assert_eq!(verdict.allows_mediation(), !matches!(expected, CompatibilityVerdict::Incompatible(_)));
    }

    #[test]
    fn no_declaration_is_always_compatible(support in support_map()) {
        let capabilities: CapabilitySupport = support.into_iter().collect();
        prop_assert_eq!(negotiate(None, &capabilities), CompatibilityVerdict::Compatible);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn raw_lines_arrive_in_order_unmodified(
        lines in prop::collection::vec("[a-zA-Z0-9 ,.:!?-]{0,40}", 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let received = runtime.block_on(async {
            let (front, front_slot) = PipeInterface::text();
            let (back, back_slot) = PipeModel::text();
            let mut controller = Controller::new(Config::default());
            controller.connect(Box::new(front), Box::new(back)).await.unwrap();
            controller.start().unwrap();

            let (_, mut front_writer) = front_slot.take();
            let (mut back_lines, _back_writer) = back_slot.take();

            for line in &lines {
                send(&mut front_writer, line.as_bytes()).await;
            }
            let mut received = Vec::with_capacity(lines.len());
            for _ in 0..lines.len() {
                received.push(next_line(&mut back_lines).await.unwrap());
            }
            controller.close().await;
            received
        });

        let expected: Vec<Vec<u8>> = lines.iter().map(|l| format!("{l}\n").into_bytes()).collect();
        prop_assert_eq!(received, expected);
    }
}
