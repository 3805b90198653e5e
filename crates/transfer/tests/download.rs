mod common;

use std::sync::Arc;

use geos3_checksum::{ChecksumAlgorithm, RunningChecksum};
use geos3_client::mock::{Fault, MockOperation, MockS3, Target};
use geos3_protocol::constants::RANGE;
use geos3_transfer::{
    MultipartDownload, PartStatus, ResumeContext, SessionStatus, TransferError, TransferEvent,
    TransferResult,
};

use common::{KIB, MIB, client, config, drain, payload};

fn download_config() -> geos3_client::ClientConfig {
    let mut config = config();
    config.transfer.download_part_size = MIB;
    config.transfer.download_concurrency = 3;
    config
}

#[tokio::test]
async fn ranged_download_reassembles_the_object() {
    let mock = Arc::new(MockS3::new());
    let data = payload(3 * MIB + MIB / 2);
    mock.insert_object("b", "k", data.clone());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.bin");

    let client = client(&mock, download_config());
    let mut download = MultipartDownload::new(client, "b", "k", &path);
    let mut events = download.take_events().unwrap();
    let handle = download.handle();

    let summary = download.run().await.into_result().unwrap();
    assert_eq!(summary.part_count, 4);
    assert_eq!(summary.size, data.len() as u64);
    assert_eq!(summary.etag, mock.object_etag("b", "k"));
    assert_eq!(
        summary.checksum,
        Some(RunningChecksum::digest(ChecksumAlgorithm::Crc32, &data))
    );
    assert_eq!(std::fs::read(&path).unwrap(), data);
    assert_eq!(mock.calls(MockOperation::GetObject), 4);
    assert_eq!(handle.status(), SessionStatus::Completed);

    let events = drain(&mut events);
    let furthest = events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress {
                transferred, total, ..
            } => Some((*transferred, *total)),
            _ => None,
        })
        .max();
    assert_eq!(furthest, Some((data.len() as u64, data.len() as u64)));
}

#[tokio::test]
async fn corrupted_range_is_fetched_again() {
    let mock = Arc::new(MockS3::new());
    let data = payload(3 * MIB);
    mock.insert_object("b", "k", data.clone());
    mock.inject(
        MockOperation::GetObject,
        Target::RangeStart(MIB),
        1,
        Fault::CorruptBody,
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.bin");

    let client = client(&mock, download_config());
    let mut download = MultipartDownload::new(client, "b", "k", &path);
    let mut events = download.take_events().unwrap();

    assert!(download.run().await.is_completed());
    assert_eq!(std::fs::read(&path).unwrap(), data);
    assert_eq!(mock.calls(MockOperation::GetObject), 4);

    let events = drain(&mut events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, TransferEvent::ChecksumMismatch { part: 2, .. }))
    );
}

#[tokio::test]
async fn small_object_downloads_as_one_part() {
    let mock = Arc::new(MockS3::new());
    let data = payload(10 * KIB);
    mock.insert_object("b", "small", data.clone());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("small.bin");

    let client = client(&mock, download_config());
    let download = MultipartDownload::new(client, "b", "small", &path);
    let summary = download.run().await.into_result().unwrap();
    assert_eq!(summary.part_count, 1);
    assert_eq!(std::fs::read(&path).unwrap(), data);
}

#[tokio::test]
async fn missing_object_fails_without_writing() {
    let mock = Arc::new(MockS3::new());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("none.bin");

    let client = client(&mock, download_config());
    let download = MultipartDownload::new(client, "b", "none", &path);
    match download.run().await {
        TransferResult::Failed { error, .. } => {
            assert!(matches!(error, TransferError::Client(_)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!path.exists());
    assert_eq!(mock.calls(MockOperation::GetObject), 0);
}

/// Aborts while the third range is requested, leaving two parts on disk.
async fn aborted_download(mock: &Arc<MockS3>, path: &std::path::Path) -> ResumeContext {
    let mut config = download_config();
    config.transfer.download_concurrency = 1;
    mock.inject(
        MockOperation::GetObject,
        Target::RangeStart(2 * MIB),
        1,
        Fault::reset(),
    );
    let download = MultipartDownload::new(client(mock, config), "b", "k", path);
    let handle = download.handle();
    {
        let handle = handle.clone();
        mock.on_request(move |operation, request| {
            let third = request
                .request()
                .header(RANGE)
                .is_some_and(|r| r.starts_with(&format!("bytes={}-", 2 * MIB)));
            if operation == MockOperation::GetObject && third {
                handle.abort();
            }
        });
    }

    assert!(matches!(
        download.run().await,
        TransferResult::Aborted {
            cleanup_error: None
        }
    ));
    assert_eq!(handle.status(), SessionStatus::Aborted);
    handle.resume_context().unwrap()
}

#[tokio::test]
async fn aborted_download_keeps_progress_and_resumes() {
    let mock = Arc::new(MockS3::new());
    let data = payload(4 * MIB);
    mock.insert_object("b", "k", data.clone());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.bin");

    let context = aborted_download(&mock, &path).await;
    assert!(path.exists());
    let verified: Vec<u32> = context
        .parts
        .iter()
        .filter(|p| p.status == PartStatus::Verified)
        .map(|p| p.number)
        .collect();
    assert_eq!(verified, vec![1, 2]);
    assert_eq!(mock.calls(MockOperation::GetObject), 3);

    let saved = dir.path().join("out.bin.resume");
    context.save(&saved).unwrap();
    let context = ResumeContext::load(&saved).unwrap();

    let client = client(&mock, download_config());
    let mut resumed = MultipartDownload::resume(client, &path, context).unwrap();
    let mut events = resumed.take_events().unwrap();
    let summary = resumed.run().await.into_result().unwrap();

    assert_eq!(summary.part_count, 4);
    assert_eq!(
        summary.checksum,
        Some(RunningChecksum::digest(ChecksumAlgorithm::Crc32, &data))
    );
    assert_eq!(std::fs::read(&path).unwrap(), data);
    // Two remaining parts plus the retried third.
    assert_eq!(mock.calls(MockOperation::GetObject), 5);
    assert!(matches!(
        drain(&mut events).first(),
        Some(TransferEvent::Started { resumed: true, .. })
    ));
}

#[tokio::test]
async fn resume_refetches_parts_damaged_on_disk() {
    let mock = Arc::new(MockS3::new());
    let data = payload(4 * MIB);
    mock.insert_object("b", "k", data.clone());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.bin");

    let context = aborted_download(&mock, &path).await;
    let mut on_disk = std::fs::read(&path).unwrap();
    on_disk[10] ^= 0xff;
    std::fs::write(&path, &on_disk).unwrap();

    let client = client(&mock, download_config());
    let resumed = MultipartDownload::resume(client, &path, context).unwrap();
    assert!(resumed.run().await.is_completed());
    assert_eq!(std::fs::read(&path).unwrap(), data);
    // Part 1 is fetched again alongside parts 3 and 4.
    assert_eq!(mock.calls(MockOperation::GetObject), 6);
}

#[tokio::test]
async fn resume_rejects_a_replaced_object() {
    let mock = Arc::new(MockS3::new());
    mock.insert_object("b", "k", payload(4 * MIB));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.bin");

    let context = aborted_download(&mock, &path).await;
    let mut replaced = payload(4 * MIB);
    replaced[0] ^= 0xff;
    mock.insert_object("b", "k", replaced);

    let client = client(&mock, download_config());
    let resumed = MultipartDownload::resume(client, &path, context).unwrap();
    let err = resumed.run().await.into_result().unwrap_err();
    assert!(matches!(err, TransferError::SourceChanged(_)));
}

#[tokio::test]
async fn ranges_without_content_md5_rely_on_the_object_etag() {
    let mock = Arc::new(MockS3::new().without_range_md5());
    let data = payload(2 * MIB);
    mock.insert_object("b", "k", data.clone());
    let dir = tempfile::tempdir().unwrap();

    let clean = dir.path().join("clean.bin");
    let download = MultipartDownload::new(client(&mock, download_config()), "b", "k", &clean);
    assert!(download.run().await.is_completed());
    assert_eq!(std::fs::read(&clean).unwrap(), data);

    // Nothing announces the damaged range, so only the ETag check sees it.
    mock.inject(
        MockOperation::GetObject,
        Target::RangeStart(MIB),
        1,
        Fault::CorruptBody,
    );
    let damaged = dir.path().join("damaged.bin");
    let download = MultipartDownload::new(client(&mock, download_config()), "b", "k", &damaged);
    let err = download.run().await.into_result().unwrap_err();
    assert!(matches!(
        err,
        TransferError::ContentVerificationFailed {
            part_number: None,
            ..
        }
    ));
    assert_eq!(mock.calls(MockOperation::GetObject), 4);
}
