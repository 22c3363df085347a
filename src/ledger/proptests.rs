//! Property-based tests for the ledger
//!
//! Random interleavings of sent/received records must always read back as a
//! time-ordered, duplicate-free conversation.

use super::*;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Sent { id: u8, at: i64 },
    Received { id: u8, at: i64 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..20, 0i64..10).prop_map(|(id, at)| Op::Sent { id, at }),
        (0u8..20, 0i64..10).prop_map(|(id, at)| Op::Received { id, at }),
    ]
}

/// Few ids and timestamps, so ties and cross-bucket duplicates are common
fn arb_tied_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, 0i64..3).prop_map(|(id, at)| Op::Sent { id, at }),
        (0u8..8, 0i64..3).prop_map(|(id, at)| Op::Received { id, at }),
    ]
}

fn arb_user() -> impl Strategy<Value = String> {
    "[a-z_0-9]{1,8}"
}

fn apply(ledger: &mut Ledger, key: &ConversationKey, op: &Op) {
    match *op {
        Op::Sent { id, at } => ledger.record_sent(
            key,
            Message::sent(format!("m{id}"), "a", "text", None, stamp(at)),
        ),
        Op::Received { id, at } => ledger.record_received(
            key,
            Message::received(format!("m{id}"), "b", "text", None, stamp(at)),
        ),
    }
}

fn stamp(at: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + at, 0).unwrap()
}

proptest! {
    #[test]
    fn prop_conversation_sorted_and_unique(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let key = ConversationKey::new("a", "b");
        let mut ledger = Ledger::new();
        for op in &ops {
            apply(&mut ledger, &key, op);
        }

        let view = ledger.conversation(&key);
        let messages: Vec<_> = view.iter().collect();

        for pair in messages.windows(2) {
            prop_assert!(pair[0].created_at <= pair[1].created_at);
        }

        let mut ids: Vec<_> = messages.iter().map(|m| m.id.clone()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), total);
    }

    #[test]
    fn prop_conversation_is_stable_on_ties(count in 1usize..15) {
        let key = ConversationKey::new("a", "b");
        let mut ledger = Ledger::new();
        for i in 0..count {
            ledger.record_sent(&key, Message::sent(format!("s{i}"), "a", "t", None, stamp(0)));
        }

        let ids: Vec<_> = ledger.conversation(&key).iter().map(|m| m.id.clone()).collect();
        let expected: Vec<_> = (0..count).map(|i| format!("s{i}")).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn prop_active_view_matches_conversation(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let key = ConversationKey::new("a", "b");
        let mut ledger = Ledger::new();
        ledger.open(key.clone());
        for op in &ops {
            apply(&mut ledger, &key, op);
        }

        let live = ledger.view().to_vec();
        prop_assert_eq!(&ledger.conversation(&key).to_vec(), &live);

        ledger.clear_active();
        ledger.open(key.clone());
        prop_assert_eq!(ledger.view(), live.as_slice());
    }

    #[test]
    fn prop_ties_across_buckets_keep_arrival_order(ops in proptest::collection::vec(arb_tied_op(), 0..40)) {
        let key = ConversationKey::new("a", "b");
        let mut ledger = Ledger::new();
        ledger.open(key.clone());
        for op in &ops {
            apply(&mut ledger, &key, op);
        }

        // Expected: first arrival of each id, then a stable sort by time
        let mut seen = std::collections::HashSet::new();
        let mut expected: Vec<(i64, String)> = ops
            .iter()
            .map(|op| match *op {
                Op::Sent { id, at } | Op::Received { id, at } => (at, format!("m{id}")),
            })
            .filter(|(_, id)| seen.insert(id.clone()))
            .collect();
        expected.sort_by_key(|(at, _)| *at);
        let expected: Vec<String> = expected.into_iter().map(|(_, id)| id).collect();

        let merged: Vec<String> = ledger.conversation(&key).iter().map(|m| m.id.clone()).collect();
        let live: Vec<String> = ledger.view().iter().map(|m| m.id.clone()).collect();
        prop_assert_eq!(&merged, &expected);
        prop_assert_eq!(&live, &expected);
    }

    #[test]
    fn prop_key_is_symmetric(a in arb_user(), b in arb_user()) {
        prop_assert_eq!(ConversationKey::new(&a, &b), ConversationKey::new(&b, &a));
    }

    #[test]
    fn prop_key_identifies_the_pair(
        a in "[ab:\\\\]{0,4}",
        b in "[ab:\\\\]{0,4}",
        c in "[ab:\\\\]{0,4}",
        d in "[ab:\\\\]{0,4}",
    ) {
        let sorted = |x: &str, y: &str| {
            let (low, high) = if x <= y { (x, y) } else { (y, x) };
            (low.to_string(), high.to_string())
        };
        let key = ConversationKey::new(&a, &b);
        prop_assert_eq!(key.participants(), Some(sorted(&a, &b)));
        prop_assert_eq!(key == ConversationKey::new(&c, &d), sorted(&a, &b) == sorted(&c, &d));
    }

    #[test]
    fn prop_unknown_status_update_is_noop(ops in proptest::collection::vec(arb_op(), 0..20)) {
        let key = ConversationKey::new("a", "b");
        let mut ledger = Ledger::new();
        ledger.open(key.clone());
        for op in &ops {
            apply(&mut ledger, &key, op);
        }
        let before = ledger.snapshot();

        prop_assert!(!ledger.update_status("unknown", MessageStatus::Read));
        prop_assert_eq!(ledger.snapshot(), before);
    }
}
