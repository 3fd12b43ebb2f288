#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property-based tests for entry sealing and the inactivity timer.

use std::sync::Arc;

use owly_vault::{
    Capability, CryptoEngine, EntryPayload, LocalKeyEngine, LedgerRecord, ManualClock,
    OwnerAddress, SessionManager, UnlockProof, VaultEntry,
};
use owly_vault::{BlobId, Category, RecordId};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn owner() -> OwnerAddress {
    OwnerAddress::parse("0x0b1e").unwrap()
}

fn engine() -> LocalKeyEngine {
    LocalKeyEngine::with_iterations(owner(), 1_000)
}

fn capability(rt: &tokio::runtime::Runtime, password: &str) -> Capability {
    rt.block_on(engine().establish(UnlockProof::password(password)))
        .unwrap()
}

fn record(category: Category) -> LedgerRecord {
    LedgerRecord {
        id: RecordId("0x1".into()),
        owner: owner(),
        blob_id: BlobId("blob".into()),
        category,
        created_at: 0,
    }
}

fn arb_payload() -> impl Strategy<Value = EntryPayload> {
    prop_oneof![
        (
            ".{0,32}",
            ".{0,256}",
            proptest::collection::vec("[a-z]{1,8}", 0..4),
            proptest::option::of("#[0-9a-f]{6}"),
        )
            .prop_map(|(title, body, tags, background_color)| EntryPayload::Note {
                title,
                body,
                tags,
                background_color,
                images: None,
            }),
        (
            ".{0,32}",
            ".{0,32}",
            ".{0,64}",
            proptest::option::of("https://[a-z]{1,12}\\.com"),
        )
            .prop_map(|(title, username, secret, url)| EntryPayload::Password {
                title,
                username,
                secret,
                url,
                notes: None,
            }),
    ]
}

#[derive(Debug, Clone)]
enum Step {
    Advance(u64),
    Touch,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![(0u64..400).prop_map(Step::Advance), Just(Step::Touch)]
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any entry sealed under a capability opens under the same one.
    #[test]
    fn entries_survive_sealing(payload in arb_payload(), created_at in 0u64..4_000_000_000) {
        let rt = runtime();
        let cap = capability(&rt, "property password");
        let entry = VaultEntry { payload, created_at, updated_at: created_at };
        let category = entry.category();

        let blob = rt.block_on(engine().encrypt(&entry, &cap)).unwrap();
        let opened = rt.block_on(engine().decrypt(&blob, &cap, &record(category))).unwrap();
        prop_assert_eq!(opened, entry);
    }

    /// A capability from another password never opens an entry.
    #[test]
    fn other_password_never_opens(payload in arb_payload(), password in "[a-z]{8,16}") {
        prop_assume!(password != "property password");
        let rt = runtime();
        let cap = capability(&rt, "property password");
        let other = capability(&rt, &password);
        let entry = VaultEntry { payload, created_at: 1, updated_at: 1 };

        let blob = rt.block_on(engine().encrypt(&entry, &cap)).unwrap();
        prop_assert!(rt.block_on(engine().decrypt(&blob, &other, &record(entry.category()))).is_err());
    }

    /// Remaining time never exceeds the timeout, only grows on activity,
    /// and a locked session never comes back on its own.
    #[test]
    fn inactivity_timer_is_monotonic(
        minutes in 1u32..=60,
        steps in proptest::collection::vec(arb_step(), 1..40),
    ) {
        let rt = runtime();
        let clock = Arc::new(ManualClock::new(1_000));
        let session = SessionManager::new(clock.clone(), minutes, 60);
        let cap = capability(&rt, "property password");
        rt.block_on(session.create(async { Ok(cap) })).unwrap();

        let timeout = u64::from(minutes) * 60;
        let mut previous = session.time_remaining();
        prop_assert_eq!(previous, timeout);
        let mut locked = false;

        for step in steps {
            match step {
                Step::Advance(secs) => {
                    clock.advance(secs);
                    let now = session.time_remaining();
                    prop_assert!(now <= previous);
                    previous = now;
                }
                Step::Touch => {
                    session.touch();
                    previous = session.time_remaining();
                    if !locked {
                        prop_assert_eq!(previous, timeout);
                    }
                }
            }
            prop_assert!(previous <= timeout);
            if previous == 0 {
                locked = true;
            }
            if locked {
                prop_assert!(!session.is_unlocked());
                prop_assert_eq!(previous, 0);
            }
        }
    }
}
