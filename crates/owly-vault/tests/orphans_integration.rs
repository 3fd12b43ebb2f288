#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
//! Integration tests for records whose blob has expired from the blob
//! store: classification, listing and cleanup.

mod common;

use common::{note, LocalHarness};
use owly_vault::{BlobStore, Ledger, ListedEntry, RecordId, VaultError};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

async fn evict_blob_of(h: &LocalHarness, id: &RecordId) {
    let record = h.ledger.get_record(id).await.unwrap();
    assert!(h.blobs.evict(&record.blob_id));
    assert!(h.blobs.get(&record.blob_id).await.is_err());
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reading_an_expired_blob_reports_an_orphan() {
    let h = LocalHarness::unlocked().await;
    let id = h.vault.create_entry(note("old", "faded")).await.unwrap();
    evict_blob_of(&h, &id).await;

    let err = h.vault.read_entry(&id).await.unwrap_err();
    match &err {
        VaultError::Orphaned { record_id, .. } => assert_eq!(record_id, &id.to_string()),
        other => panic!("expected Orphaned, got {other:?}"),
    }
    assert_eq!(err.code(), "ORPHANED");
}

#[tokio::test]
async fn retention_expiry_orphans_every_record() {
    let h = LocalHarness::unlocked().await;
    let a = h.vault.create_entry(note("a", "1")).await.unwrap();
    h.clock.advance(1);
    let b = h.vault.create_entry(note("b", "2")).await.unwrap();

    h.blobs.advance_epochs(u64::from(h.vault.config().storage_epochs));

    let mut orphans = h.vault.list_orphans(h.vault.owner()).await.unwrap();
    orphans.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(orphans, expected);
}

#[tokio::test]
async fn listing_keeps_orphans_distinct_from_live_entries() {
    let h = LocalHarness::unlocked().await;
    let live = h.vault.create_entry(note("live", "here")).await.unwrap();
    h.clock.advance(1);
    let gone = h.vault.create_entry(note("gone", "away")).await.unwrap();
    evict_blob_of(&h, &gone).await;

    let listed = h.vault.list_entries().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(matches!(&listed[0], ListedEntry::Orphaned { record } if record.id == gone));
    assert!(matches!(&listed[1], ListedEntry::Live { record, .. } if record.id == live));
}

#[tokio::test]
async fn unavailable_blob_store_is_not_an_orphan() {
    let h = LocalHarness::unlocked().await;
    let id = h.vault.create_entry(note("fine", "ok")).await.unwrap();
    h.blobs.set_unavailable(true);

    let err = h.vault.list_orphans(h.vault.owner()).await.unwrap_err();
    assert!(matches!(err, VaultError::Store(_)));
    let err = h.vault.read_entry(&id).await.unwrap_err();
    assert!(matches!(err, VaultError::Store(_)));

    h.blobs.set_unavailable(false);
    assert!(h.vault.list_orphans(h.vault.owner()).await.unwrap().is_empty());
}

#[tokio::test]
async fn unlock_skips_orphans_when_checking_the_password() {
    let h = LocalHarness::unlocked().await;
    h.vault.create_entry(note("older", "still here")).await.unwrap();
    h.clock.advance(1);
    let newest = h.vault.create_entry(note("newer", "expired")).await.unwrap();
    evict_blob_of(&h, &newest).await;

    let reopened = h.reopen();
    reopened
        .unlock(owly_vault::UnlockProof::password(common::PASSWORD))
        .await
        .unwrap();
    assert!(reopened.is_unlocked());
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deleting_orphans_removes_their_records() {
    let h = LocalHarness::unlocked().await;
    let keep = h.vault.create_entry(note("keep", "me")).await.unwrap();
    let drop_me = h.vault.create_entry(note("drop", "me")).await.unwrap();
    evict_blob_of(&h, &drop_me).await;

    let orphans = h.vault.list_orphans(h.vault.owner()).await.unwrap();
    assert_eq!(orphans, vec![drop_me.clone()]);

    let report = h.vault.delete_orphans(&orphans).await.unwrap();
    assert_eq!(report.deleted, vec![drop_me]);
    assert!(report.failed.is_empty());
    assert_eq!(h.ledger.len(), 1);
    assert!(h.vault.read_entry(&keep).await.is_ok());
}

#[tokio::test]
async fn cleanup_reports_each_failure_separately() {
    let h = LocalHarness::unlocked().await;
    let a = h.vault.create_entry(note("a", "1")).await.unwrap();
    let b = h.vault.create_entry(note("b", "2")).await.unwrap();
    evict_blob_of(&h, &a).await;
    evict_blob_of(&h, &b).await;
    h.ledger.fail_delete_of(b.clone());

    let report = h
        .vault
        .delete_orphans(&[a.clone(), b.clone()])
        .await
        .unwrap();
    assert_eq!(report.deleted, vec![a]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, b);
    assert_eq!(h.vault.list_orphans(h.vault.owner()).await.unwrap(), vec![b]);
}

#[tokio::test]
async fn orphans_are_never_removed_implicitly() {
    let h = LocalHarness::unlocked().await;
    let id = h.vault.create_entry(note("x", "y")).await.unwrap();
    evict_blob_of(&h, &id).await;

    let _ = h.vault.read_entry(&id).await;
    let _ = h.vault.list_entries().await.unwrap();
    let _ = h.vault.list_orphans(h.vault.owner()).await.unwrap();
    assert_eq!(h.ledger.len(), 1);
}
