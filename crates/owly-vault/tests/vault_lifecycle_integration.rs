#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
//! Integration tests for the vault lifecycle: unlock, entry CRUD, locking
//! and the inactivity timeout, against in-memory stores.

mod common;

use common::{login, note, LocalHarness, PASSWORD};
use owly_vault::{
    EntryPayload, ListedEntry, LockStatus, SessionPhase, SupersededRecord, UnlockProof,
    VaultError,
};

// ---------------------------------------------------------------------------
// Unlock
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_vault_unlocks_with_any_password_and_stores_entries() {
    let h = LocalHarness::new();
    assert!(!h.vault.is_unlocked());

    let info = h.vault.unlock(UnlockProof::password(PASSWORD)).await.unwrap();
    assert_eq!(info.created_at, common::START);
    assert!(h.vault.is_unlocked());

    let id = h.vault.create_entry(login("Mail", "hunter2!")).await.unwrap();
    let entry = h.vault.read_entry(&id).await.unwrap();
    assert_eq!(entry.payload, login("Mail", "hunter2!"));
    assert_eq!(entry.created_at, common::START);
    assert_eq!(h.blobs.len(), 1);
    assert_eq!(h.ledger.len(), 1);
}

#[tokio::test]
async fn wrong_password_is_rejected_and_vault_stays_locked() {
    let h = LocalHarness::unlocked().await;
    h.vault.create_entry(note("Diary", "day one")).await.unwrap();

    let reopened = h.reopen();
    let err = reopened
        .unlock(UnlockProof::password("not the password"))
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::AuthFailure));
    assert_eq!(err.code(), "UNLOCK_FAILED");
    assert!(!reopened.is_unlocked());
    assert_eq!(*reopened.subscribe().borrow(), SessionPhase::Locked);

    reopened.unlock(UnlockProof::password(PASSWORD)).await.unwrap();
    assert!(reopened.is_unlocked());
}

#[tokio::test]
async fn empty_password_is_rejected() {
    let h = LocalHarness::new();
    let err = h.vault.unlock(UnlockProof::password("")).await.unwrap_err();
    assert!(matches!(err, VaultError::AuthFailure));
    assert!(!h.vault.is_unlocked());
}

#[tokio::test]
async fn password_vault_issues_no_challenge() {
    let h = LocalHarness::new();
    let err = h.vault.request_challenge().await.unwrap_err();
    assert!(matches!(err, VaultError::Unsupported(_)));
}

// ---------------------------------------------------------------------------
// Locking and inactivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn locked_vault_refuses_entry_operations() {
    let h = LocalHarness::unlocked().await;
    let id = h.vault.create_entry(note("a", "b")).await.unwrap();

    h.vault.lock();
    h.vault.lock();
    assert!(!h.vault.is_unlocked());
    assert_eq!(h.vault.time_remaining(), 0);
    assert_eq!(h.vault.lock_status(), LockStatus::Locked);

    assert!(matches!(
        h.vault.read_entry(&id).await.unwrap_err(),
        VaultError::NotUnlocked
    ));
    assert!(matches!(
        h.vault.create_entry(note("c", "d")).await.unwrap_err(),
        VaultError::NotUnlocked
    ));
    assert!(matches!(
        h.vault.list_entries().await.unwrap_err(),
        VaultError::NotUnlocked
    ));
    assert_eq!(h.ledger.len(), 1);
}

#[tokio::test]
async fn idle_session_locks_after_timeout() {
    let h = LocalHarness::unlocked().await;
    assert_eq!(h.vault.time_remaining(), 15 * 60);

    h.clock.advance(10 * 60);
    assert_eq!(h.vault.time_remaining(), 5 * 60);

    h.clock.advance(5 * 60);
    assert!(!h.vault.is_unlocked());
    assert_eq!(h.vault.time_remaining(), 0);
}

#[tokio::test]
async fn entry_operations_count_as_activity() {
    let h = LocalHarness::unlocked().await;
    h.clock.advance(14 * 60);
    h.vault.create_entry(note("keep", "alive")).await.unwrap();

    h.clock.advance(14 * 60);
    assert!(h.vault.is_unlocked());
    assert_eq!(h.vault.time_remaining(), 60);
}

#[tokio::test]
async fn warning_is_reported_near_the_deadline() {
    let h = LocalHarness::unlocked().await;
    h.clock.advance(15 * 60 - 30);
    assert_eq!(
        h.vault.lock_status(),
        LockStatus::Warning { remaining_secs: 30 }
    );
}

#[tokio::test]
async fn shortening_the_timeout_recomputes_remaining_time() {
    let h = LocalHarness::unlocked().await;
    h.clock.advance(3 * 60);

    let remaining = h.vault.set_inactivity_timeout(5).unwrap();
    assert_eq!(remaining, 2 * 60);
    assert_eq!(h.vault.config().auto_lock_minutes, 5);

    let remaining = h.vault.set_inactivity_timeout(1).unwrap();
    assert_eq!(remaining, 0);
    assert!(!h.vault.is_unlocked());
}

#[tokio::test]
async fn out_of_range_timeout_is_rejected() {
    let h = LocalHarness::unlocked().await;
    for minutes in [0, 61, 1_000] {
        let err = h.vault.set_inactivity_timeout(minutes).unwrap_err();
        assert!(matches!(err, VaultError::InvalidRequest(_)));
    }
    assert_eq!(h.vault.config().auto_lock_minutes, 15);
    assert!(h.vault.is_unlocked());
}

#[tokio::test]
async fn dropping_the_vault_locks_it() {
    let h = LocalHarness::unlocked().await;
    let phases = h.vault.subscribe();
    assert_eq!(*phases.borrow(), SessionPhase::Unlocked);

    drop(h.vault);
    assert_eq!(*phases.borrow(), SessionPhase::Locked);
}

// ---------------------------------------------------------------------------
// Entry CRUD
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_replaces_the_record() {
    let h = LocalHarness::unlocked().await;
    let id = h.vault.create_entry(note("Groceries", "milk")).await.unwrap();

    h.clock.advance(60);
    let mut entry = h.vault.read_entry(&id).await.unwrap();
    entry.payload = note("Groceries", "milk, eggs");
    let outcome = h.vault.update_entry(&id, entry).await.unwrap();

    assert_ne!(outcome.id, id);
    assert_eq!(outcome.superseded, SupersededRecord::Deleted(id.clone()));
    assert_eq!(h.ledger.len(), 1);

    let updated = h.vault.read_entry(&outcome.id).await.unwrap();
    assert_eq!(updated.payload, note("Groceries", "milk, eggs"));
    assert_eq!(updated.created_at, common::START);
    assert_eq!(updated.updated_at, common::START + 60);

    assert!(matches!(
        h.vault.read_entry(&id).await.unwrap_err(),
        VaultError::NotFound(_)
    ));
}

#[tokio::test]
async fn failed_delete_during_update_keeps_both_records() {
    let h = LocalHarness::unlocked().await;
    let id = h.vault.create_entry(note("v1", "first")).await.unwrap();
    h.ledger.fail_delete_of(id.clone());

    let entry = h.vault.read_entry(&id).await.unwrap();
    let outcome = h.vault.update_entry(&id, entry).await.unwrap();

    match outcome.superseded {
        SupersededRecord::Retained { id: kept, reason } => {
            assert_eq!(kept, id);
            assert!(!reason.is_empty());
        }
        SupersededRecord::Deleted(_) => panic!("old record should have been retained"),
    }
    assert_eq!(h.ledger.len(), 2);
    assert!(h.vault.read_entry(&id).await.is_ok());
    assert!(h.vault.read_entry(&outcome.id).await.is_ok());
}

#[tokio::test]
async fn failed_new_version_leaves_old_record_untouched() {
    let h = LocalHarness::unlocked().await;
    let id = h.vault.create_entry(note("v1", "first")).await.unwrap();
    h.blobs.fail_puts_after(Some(0));

    let entry = h.vault.read_entry(&id).await.unwrap();
    let err = h.vault.update_entry(&id, entry).await.unwrap_err();
    assert!(matches!(err, VaultError::Store(_)));

    assert_eq!(h.ledger.len(), 1);
    assert_eq!(
        h.vault.read_entry(&id).await.unwrap().payload,
        note("v1", "first")
    );
}

#[tokio::test]
async fn failed_ledger_write_leaves_only_an_unreferenced_blob() {
    let h = LocalHarness::unlocked().await;
    h.ledger.fail_creates_after(Some(0));

    let err = h.vault.create_entry(note("lost", "?")).await.unwrap_err();
    assert!(matches!(err, VaultError::Store(_)));
    assert!(err.is_recoverable());
    assert_eq!(h.blobs.len(), 1);
    assert!(h.ledger.is_empty());
    assert!(h.vault.list_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_removes_the_record() {
    let h = LocalHarness::unlocked().await;
    let id = h.vault.create_entry(note("gone", "soon")).await.unwrap();

    h.vault.delete_entry(&id).await.unwrap();
    assert!(h.ledger.is_empty());
    assert!(matches!(
        h.vault.delete_entry(&id).await.unwrap_err(),
        VaultError::NotFound(_)
    ));
}

#[tokio::test]
async fn list_returns_newest_first() {
    let h = LocalHarness::unlocked().await;
    let first = h.vault.create_entry(note("first", "1")).await.unwrap();
    h.clock.advance(10);
    let second = h.vault.create_entry(login("second", "pw-2")).await.unwrap();
    h.clock.advance(10);
    let third = h.vault.create_entry(note("third", "3")).await.unwrap();

    let listed = h.vault.list_entries().await.unwrap();
    let ids: Vec<_> = listed.iter().map(|e| e.record().id.clone()).collect();
    assert_eq!(ids, vec![third, second, first]);

    let ListedEntry::Live { entry, record } = &listed[1] else {
        panic!("expected a live entry");
    };
    assert!(matches!(entry.payload, EntryPayload::Password { .. }));
    assert_eq!(record.category, entry.category());
}

#[tokio::test]
async fn records_of_other_owners_are_invisible() {
    let alice = LocalHarness::unlocked().await;
    let id = alice.vault.create_entry(note("private", "x")).await.unwrap();

    let bob = alice.stranger();
    bob.unlock(UnlockProof::password(PASSWORD)).await.unwrap();
    assert!(matches!(
        bob.read_entry(&id).await.unwrap_err(),
        VaultError::NotFound(_)
    ));
    assert!(bob.list_entries().await.unwrap().is_empty());
}
