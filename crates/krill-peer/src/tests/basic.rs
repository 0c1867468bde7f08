//! Single-node control surface tests.

use super::helpers::{spawn_peer, spawn_peer_with, test_data, TestNet};
use crate::error::PeerError;

#[tokio::test]
async fn test_backup_and_restore_roundtrip() {
    let net = TestNet::new();
    let peer = spawn_peer(&net, 4100, None).await;

    let content = test_data(3000);
    let path = peer.source_file("report.dat", &content);

    let outcome = peer.node.backup(&path, 1).await.unwrap();
    assert_eq!(outcome.chunks, 3);
    assert_eq!(outcome.copies_stored, 3);
    assert_eq!(outcome.copies_requested, 3);

    let dest = peer.node.restore(&path).await.unwrap();
    assert_eq!(std::fs::read(dest).unwrap(), content);
}

#[tokio::test]
async fn test_restore_goes_to_staging_not_source() {
    let net = TestNet::new();
    let peer = spawn_peer(&net, 4100, None).await;

    let content = test_data(100);
    let path = peer.source_file("original.bin", &content);
    peer.node.backup(&path, 1).await.unwrap();

    // Corrupt the source; the restore must not touch it.
    std::fs::write(&path, b"scribbled over").unwrap();
    let dest = peer.node.restore(&path).await.unwrap();

    assert_ne!(dest.to_str().unwrap(), path);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
    assert_eq!(std::fs::read(&path).unwrap(), b"scribbled over");
}

#[tokio::test]
async fn test_empty_file_backs_up_with_no_chunks() {
    let net = TestNet::new();
    let peer = spawn_peer(&net, 4100, None).await;

    let path = peer.source_file("empty.bin", &[]);
    let outcome = peer.node.backup(&path, 2).await.unwrap();
    assert_eq!(outcome.chunks, 0);
    assert_eq!(outcome.copies_stored, 0);

    let dest = peer.node.restore(&path).await.unwrap();
    assert_eq!(std::fs::read(dest).unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn test_backup_of_missing_file_fails() {
    let net = TestNet::new();
    let peer = spawn_peer(&net, 4100, None).await;
    assert!(matches!(
        peer.node.backup("/no/such/file", 1).await,
        Err(PeerError::Io(_))
    ));
}

#[tokio::test]
async fn test_oversized_file_rejected_up_front() {
    let net = TestNet::new();
    let peer = spawn_peer_with(&net, 4100, |config| config.max_file_size = 100).await;

    let path = peer.source_file("big.bin", &test_data(101));
    assert!(matches!(
        peer.node.backup(&path, 1).await,
        Err(PeerError::Catalog(
            krill_catalog::CatalogError::FileTooLarge { .. }
        ))
    ));
    // Nothing was placed.
    assert_eq!(peer.node.store().used(), 0);
}

#[tokio::test]
async fn test_restore_of_untracked_path_fails() {
    let net = TestNet::new();
    let peer = spawn_peer(&net, 4100, None).await;
    assert!(matches!(
        peer.node.restore("/never/backed/up").await,
        Err(PeerError::Catalog(krill_catalog::CatalogError::NotTracked(_)))
    ));
}

#[tokio::test]
async fn test_delete_forgets_backup_and_frees_space() {
    let net = TestNet::new();
    let peer = spawn_peer(&net, 4100, None).await;

    let path = peer.source_file("doomed.bin", &test_data(2500));
    peer.node.backup(&path, 1).await.unwrap();
    assert!(peer.node.store().used() > 0);

    let acked = peer.node.delete(&path).await.unwrap();
    assert_eq!(acked, 3);
    assert_eq!(peer.node.store().used(), 0);
    assert!(peer.node.restore(&path).await.is_err());
}

#[tokio::test]
async fn test_backup_notes_degrees_on_locally_placed_copies() {
    let net = TestNet::new();
    let peer = spawn_peer(&net, 4100, None).await;

    let path = peer.source_file("counted.bin", &test_data(1500));
    let outcome = peer.node.backup(&path, 2).await.unwrap();
    assert_eq!(outcome.copies_stored, 4);

    // A singleton holds every copy itself, so each record carries the
    // degrees the backup knew.
    let records = peer.node.store().local_records();
    assert_eq!(records.len(), 4);
    for record in records {
        assert_eq!(record.desired, 2);
        assert_eq!(record.observed, 2);
    }
}

#[tokio::test]
async fn test_state_report_covers_ring_storage_and_backups() {
    let net = TestNet::new();
    let peer = spawn_peer(&net, 4100, None).await;

    let path = peer.source_file("seen.bin", &test_data(10));
    peer.node.backup(&path, 1).await.unwrap();

    let report = peer.node.state_report();
    assert!(report.contains("successor"));
    assert!(report.contains("unlimited"));
    assert!(report.contains(&path));
    assert!(report.contains("observed 1"));
}
