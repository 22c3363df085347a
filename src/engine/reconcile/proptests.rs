//! Property-based tests for history reconciliation

use super::*;
use crate::message::MessageStatus;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

fn stamp(at: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + at, 0).unwrap()
}

/// (id, timestamp, authored by the syncing user)
fn arb_records() -> impl Strategy<Value = Vec<(u8, i64, bool)>> {
    proptest::collection::vec((0u8..25, 0i64..8, any::<bool>()), 0..30)
}

fn to_message(user: &str, other: &str, (id, at, mine): (u8, i64, bool)) -> Message {
    let message = if mine {
        Message::sent(format!("m{id}"), user, "text", None, stamp(at))
    } else {
        Message::received(format!("m{id}"), other, "text", None, stamp(at))
    };
    message.with_status(MessageStatus::Read)
}

fn seeded_ledger(user: &str, other: &str, client: &[(u8, i64, bool)]) -> Ledger {
    let key = ConversationKey::new(user, other);
    let mut ledger = Ledger::new();
    for record in client {
        ledger.record(&key, to_message(user, other, *record));
    }
    ledger
}

proptest! {
    #[test]
    fn prop_scoped_sync_is_idempotent(client in arb_records(), server in arb_records()) {
        let mut ledger = seeded_ledger("b", "a", &client);
        let server: Vec<Message> = server.into_iter().map(|r| to_message("b", "a", r)).collect();

        let first_len = reconcile(&mut ledger, "b", Some("a"), server.clone());
        let first = ledger.view().to_vec();
        let bucketed = ledger.len();

        let second_len = reconcile(&mut ledger, "b", Some("a"), server);
        prop_assert_eq!(first_len, second_len);
        prop_assert_eq!(&first, &ledger.view().to_vec());
        prop_assert_eq!(bucketed, ledger.len());
    }

    #[test]
    fn prop_unscoped_sync_is_idempotent(client in arb_records(), server in arb_records()) {
        let mut ledger = seeded_ledger("b", "a", &client);
        let server: Vec<Message> = server.into_iter().map(|r| to_message("b", "c", r)).collect();

        reconcile(&mut ledger, "b", None, server.clone());
        let first = ledger.view().to_vec();
        reconcile(&mut ledger, "b", None, server);
        prop_assert_eq!(first, ledger.view().to_vec());
    }

    #[test]
    fn prop_sync_view_sorted_unique_and_keeps_client(client in arb_records(), server in arb_records()) {
        let mut ledger = seeded_ledger("b", "a", &client);
        let client_ids: Vec<String> = ledger.all_messages().map(|m| m.id.clone()).collect();
        let server: Vec<Message> = server.into_iter().map(|r| to_message("b", "a", r)).collect();

        reconcile(&mut ledger, "b", Some("a"), server);
        let view = ledger.view();

        for pair in view.windows(2) {
            prop_assert!(pair[0].created_at <= pair[1].created_at);
        }
        let mut ids: Vec<&str> = view.iter().map(|m| m.id.as_str()).collect();
        ids.sort_unstable();
        let total = ids.len();
        ids.dedup();
        prop_assert_eq!(ids.len(), total);
        for id in &client_ids {
            prop_assert!(ids.contains(&id.as_str()));
        }
    }
}
