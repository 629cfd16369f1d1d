use docdrop_core::{BlobStorage, InMemoryBlobStorage, UploadOutcome, materialize_temp_file, percent};
use tempfile::TempDir;

#[tokio::test]
async fn inmemory_upload_stores_bytes_and_reports_progress() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("report.pdf");
    let data: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, &data).unwrap();

    let storage = InMemoryBlobStorage::new();
    let mut handle = storage.begin_upload(&path, "report.pdf").unwrap();

    let mut percents = Vec::new();
    while let Some(p) = handle.next_progress().await {
        assert_eq!(p.total_bytes, data.len() as u64);
        percents.push(percent(p.bytes_transferred, p.total_bytes));
    }
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*percents.last().unwrap(), 100);

    match handle.wait().await {
        UploadOutcome::Completed => {}
        other => panic!("expected Completed, got {other:?}"),
    }

    assert_eq!(storage.get("report.pdf").await, Some(data));
    assert_eq!(storage.object_count().await, 1);
    assert_eq!(storage.uploaded_count(), 1);
}

#[tokio::test]
async fn inmemory_upload_honors_cancellation() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("report.pdf");
    std::fs::write(&path, [7u8; 1024]).unwrap();

    let storage = InMemoryBlobStorage::new();
    let handle = storage.begin_upload(&path, "report.pdf").unwrap();
    handle.cancel();

    match handle.wait().await {
        UploadOutcome::Cancelled => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }

    assert_eq!(storage.object_count().await, 0);
    assert_eq!(storage.uploaded_count(), 0);
}

#[tokio::test]
async fn missing_file_surfaces_io_error() {
    let temp = TempDir::new().unwrap();
    let storage = InMemoryBlobStorage::new();
    let handle = storage
        .begin_upload(&temp.path().join("gone.pdf"), "gone.pdf")
        .unwrap();

    match handle.wait().await {
        UploadOutcome::Failed(docdrop_core::Error::Io(_)) => {}
        other => panic!("expected Failed(Io), got {other:?}"),
    }
}

#[tokio::test]
async fn materialize_copies_bytes_into_suffixed_temp_file() {
    let temp = TempDir::new().unwrap();
    let mut reader: &[u8] = b"%PDF-1.4 not really a pdf";

    let path = materialize_temp_file(&mut reader, temp.path(), ".pdf")
        .await
        .unwrap();

    assert_eq!(path.parent(), Some(temp.path()));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("pdf"));
    assert_eq!(
        std::fs::read(&path).unwrap(),
        b"%PDF-1.4 not really a pdf"
    );
}
