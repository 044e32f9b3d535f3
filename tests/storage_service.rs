mod common;

use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::{StreamExt, stream};
use ipfs_gateway::{
    cid::compute_cid,
    models::car::CarExport,
    services::storage_service::{ListParams, StorageError},
};
use serde_json::json;
use std::{fs, io, path::Path, time::Duration as StdDuration};

const HELLO_CID: &str = "Qm2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7";

#[tokio::test]
async fn add_bytes_stores_payload_under_sharded_cid_path() {
    let t = common::store().await;

    let obj = t
        .storage
        .add_bytes("hello.txt", "text/plain", &b"hello"[..])
        .await
        .expect("add failed");

    assert_eq!(obj.cid, HELLO_CID);
    assert_eq!(obj.name, "hello.txt");
    assert_eq!(obj.size_bytes, 5);
    assert_eq!(obj.mime_type, "text/plain");
    assert!(!obj.pinned);

    let expected_path = t.storage.base_path.join("2c").join("f2").join(HELLO_CID);
    assert_eq!(Path::new(&obj.local_path), expected_path);
    assert_eq!(fs::read(&expected_path).unwrap(), b"hello");

    let fetched = t.storage.get(HELLO_CID).await.unwrap();
    assert_eq!(fetched, obj);
}

#[tokio::test]
async fn re_adding_content_keeps_pin_and_refreshes_name() {
    let t = common::store().await;

    t.storage
        .add_bytes("first.txt", "text/plain", &b"hello"[..])
        .await
        .unwrap();
    t.storage.pin(HELLO_CID).await.unwrap();

    let again = t
        .storage
        .add_bytes("second.md", "text/markdown", &b"hello"[..])
        .await
        .unwrap();

    assert_eq!(again.cid, HELLO_CID);
    assert_eq!(again.name, "second.md");
    assert_eq!(again.mime_type, "text/markdown");
    assert!(again.pinned);
    assert_eq!(t.storage.ls_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn add_file_uses_file_name_and_extension() {
    let t = common::store().await;
    let src = t.dir.path().join("NOTES.md");
    fs::write(&src, "# notes\n").unwrap();

    let obj = t.storage.add_file(&src).await.unwrap();

    assert_eq!(obj.name, "NOTES.md");
    assert_eq!(obj.mime_type, "text/markdown");
    assert_eq!(obj.cid, compute_cid(b"# notes\n"));
    assert_eq!(obj.size_bytes, 8);
}

#[tokio::test]
async fn add_file_rejects_missing_paths_and_directories() {
    let t = common::store().await;

    let missing = t.storage.add_file(t.dir.path().join("nope.txt")).await;
    assert!(matches!(missing, Err(StorageError::SourceNotFound(_))));

    let dir = t.storage.add_file(t.dir.path()).await;
    assert!(matches!(dir, Err(StorageError::SourceNotFound(_))));
}

#[tokio::test]
async fn add_json_hashes_the_pretty_printed_document() {
    let t = common::store().await;
    let doc = json!({"name": "gateway", "tags": ["ipfs", "pin"]});

    let obj = t.storage.add_json(&doc, None).await.unwrap();
    let expected = serde_json::to_vec_pretty(&doc).unwrap();

    assert_eq!(obj.name, "data.json");
    assert_eq!(obj.mime_type, "application/json");
    assert_eq!(obj.cid, compute_cid(&expected));
    assert_eq!(fs::read(&obj.local_path).unwrap(), expected);

    let named = t
        .storage
        .add_json(&json!([1, 2, 3]), Some("numbers.json"))
        .await
        .unwrap();
    assert_eq!(named.name, "numbers.json");
}

#[tokio::test]
async fn unknown_and_malformed_cids_are_distinguished() {
    let t = common::store().await;

    assert!(matches!(
        t.storage.get(HELLO_CID).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        t.storage.pin(HELLO_CID).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        t.storage.unpin("../../etc/passwd").await,
        Err(StorageError::InvalidCid(_))
    ));
    assert!(matches!(
        t.storage.stat("Qm").await,
        Err(StorageError::InvalidCid(_))
    ));
}

#[tokio::test]
async fn pin_and_unpin_are_idempotent() {
    let t = common::store().await;
    t.storage
        .add_bytes("a", "text/plain", &b"hello"[..])
        .await
        .unwrap();

    assert!(t.storage.pin(HELLO_CID).await.unwrap().pinned);
    assert!(t.storage.pin(HELLO_CID).await.unwrap().pinned);
    assert!(!t.storage.unpin(HELLO_CID).await.unwrap().pinned);
    assert!(!t.storage.unpin(HELLO_CID).await.unwrap().pinned);
}

#[tokio::test]
async fn stat_reports_block_count() {
    let t = common::store().await;
    let payload = vec![7u8; 256 * 1024 + 1];
    let obj = t
        .storage
        .add_bytes("blob.bin", "application/octet-stream", payload)
        .await
        .unwrap();

    let stat = t.storage.stat(&obj.cid).await.unwrap();
    assert_eq!(stat.size_bytes, 256 * 1024 + 1);
    assert_eq!(stat.blocks, 2);
    assert_eq!(stat.name, "blob.bin");
}

#[tokio::test]
async fn gc_removes_only_unpinned_content_past_the_cutoff() {
    let t = common::store().await;
    let keep = t
        .storage
        .add_bytes("keep.txt", "text/plain", &b"keep me"[..])
        .await
        .unwrap();
    let stale = t
        .storage
        .add_bytes("drop.txt", "text/plain", &b"drop me"[..])
        .await
        .unwrap();
    t.storage.pin(&keep.cid).await.unwrap();

    // Nothing is older than a day yet.
    let report = t.storage.gc(Duration::hours(24)).await.unwrap();
    assert!(report.removed.is_empty());

    let report = t
        .storage
        .gc_older_than(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(report.removed, vec![stale.cid.clone()]);
    assert!(report.failed.is_empty());

    assert!(matches!(
        t.storage.get(&stale.cid).await,
        Err(StorageError::NotFound(_))
    ));
    assert!(!Path::new(&stale.local_path).exists());
    assert!(Path::new(&keep.local_path).exists());
    assert!(t.storage.get(&keep.cid).await.unwrap().pinned);
}

#[tokio::test]
async fn gc_leaves_content_added_after_the_cutoff() {
    let t = common::store().await;
    let older = t
        .storage
        .add_bytes("old.txt", "text/plain", &b"old"[..])
        .await
        .unwrap();
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    let cutoff = Utc::now();
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    let newer = t
        .storage
        .add_bytes("new.txt", "text/plain", &b"new"[..])
        .await
        .unwrap();

    let report = t.storage.gc_older_than(cutoff).await.unwrap();
    assert_eq!(report.removed, vec![older.cid.clone()]);
    assert_eq!(t.storage.get(&newer.cid).await.unwrap(), newer);
    assert!(Path::new(&newer.local_path).exists());
}

#[tokio::test]
async fn gc_with_unrepresentable_age_collects_nothing() {
    let t = common::store().await;
    let obj = t
        .storage
        .add_bytes("a", "text/plain", &b"hello"[..])
        .await
        .unwrap();

    let report = t.storage.gc(Duration::MAX).await.unwrap();
    assert!(report.removed.is_empty());
    assert!(t.storage.get(&obj.cid).await.is_ok());
}

#[tokio::test]
async fn abandoned_upload_leaves_no_temp_file() {
    let t = common::store().await;
    let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"partial"))])
        .chain(stream::pending());

    let upload = t.storage.add_stream("stuck.bin", "application/octet-stream", body);
    let result = tokio::time::timeout(StdDuration::from_millis(200), upload).await;
    assert!(result.is_err(), "upload should still be waiting for data");

    assert!(temp_files(&t.storage.base_path).is_empty());
    assert!(t.storage.ls_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn gc_sweeps_stale_temp_files() {
    let t = common::store().await;
    fs::create_dir_all(&t.storage.base_path).unwrap();
    fs::write(t.storage.base_path.join(".tmp-left-behind"), b"partial").unwrap();

    let report = t.storage.gc(Duration::hours(24)).await.unwrap();
    assert_eq!(report.stale_uploads, 0);
    assert_eq!(temp_files(&t.storage.base_path).len(), 1);

    let report = t
        .storage
        .gc_older_than(Utc::now() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(report.stale_uploads, 1);
    assert!(temp_files(&t.storage.base_path).is_empty());
}

#[tokio::test]
async fn gc_prunes_empty_shard_directories() {
    let t = common::store().await;
    let obj = t
        .storage
        .add_bytes("a", "text/plain", &b"hello"[..])
        .await
        .unwrap();

    t.storage
        .gc_older_than(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();

    assert!(!t.storage.base_path.join("2c").exists());
    assert!(t.storage.base_path.exists());
    assert!(!Path::new(&obj.local_path).exists());
}

#[tokio::test]
async fn gc_drops_rows_whose_payload_is_already_gone() {
    let t = common::store().await;
    let obj = t
        .storage
        .add_bytes("a", "text/plain", &b"hello"[..])
        .await
        .unwrap();
    fs::remove_file(&obj.local_path).unwrap();

    assert!(matches!(
        t.storage.open(&obj.cid).await,
        Err(StorageError::NotFound(_))
    ));

    let report = t
        .storage
        .gc_older_than(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(report.removed, vec![obj.cid]);
    assert!(t.storage.ls_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn ls_pages_in_cid_order() {
    let t = common::store().await;
    let mut cids = Vec::new();
    for i in 0..5 {
        let obj = t
            .storage
            .add_bytes(&format!("item-{i}"), "text/plain", format!("item {i}").into_bytes())
            .await
            .unwrap();
        cids.push(obj.cid);
    }
    cids.sort();

    let first = t
        .storage
        .ls(ListParams {
            limit: Some(2),
            ..ListParams::default()
        })
        .await
        .unwrap();
    assert!(first.is_truncated);
    assert_eq!(
        first.objects.iter().map(|o| o.cid.clone()).collect::<Vec<_>>(),
        cids[..2].to_vec()
    );
    assert_eq!(first.next_start_after.as_deref(), Some(cids[1].as_str()));

    let rest = t
        .storage
        .ls(ListParams {
            start_after: first.next_start_after,
            limit: Some(10),
            ..ListParams::default()
        })
        .await
        .unwrap();
    assert!(!rest.is_truncated);
    assert_eq!(rest.next_start_after, None);
    assert_eq!(
        rest.objects.iter().map(|o| o.cid.clone()).collect::<Vec<_>>(),
        cids[2..].to_vec()
    );

    let single = t
        .storage
        .ls(ListParams {
            cid: Some(cids[3].clone()),
            ..ListParams::default()
        })
        .await
        .unwrap();
    assert_eq!(single.objects.len(), 1);

    let missing = t
        .storage
        .ls(ListParams {
            cid: Some(HELLO_CID.to_string()),
            ..ListParams::default()
        })
        .await
        .unwrap();
    assert!(missing.objects.is_empty());
}

#[tokio::test]
async fn export_skips_unknown_cids_and_writes_manifest() {
    let t = common::store().await;
    let obj = t
        .storage
        .add_bytes("a", "text/plain", &b"hello"[..])
        .await
        .unwrap();
    let unknown = compute_cid(b"never added");
    let cids = vec![unknown, obj.cid.clone(), "garbage".to_string()];

    let output = t.dir.path().join("export.json");
    let export = t.storage.export_car_to(&cids, &output).await.unwrap();
    assert_eq!(export.version, 1);
    assert_eq!(export.objects, vec![obj]);

    let written: CarExport = serde_json::from_slice(&fs::read(&output).unwrap()).unwrap();
    assert_eq!(written, export);
}

#[tokio::test]
async fn public_url_uses_configured_or_explicit_gateway() {
    let t = common::store().await;

    assert_eq!(
        t.storage.public_url(HELLO_CID, None).unwrap(),
        format!("https://gateway.test/ipfs/{HELLO_CID}")
    );
    assert_eq!(
        t.storage
            .public_url(HELLO_CID, Some("https://ipfs.io/"))
            .unwrap(),
        format!("https://ipfs.io/ipfs/{HELLO_CID}")
    );
    assert!(t.storage.public_url("nope", None).is_err());
}

fn temp_files(root: &Path) -> Vec<String> {
    fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with(".tmp-"))
                .collect()
        })
        .unwrap_or_default()
}
