//! src/services/storage_service.rs
//!
//! StorageService — content-addressed storage backed by SQLite for metadata
//! and local disk for payloads. Blobs are written once under
//! `base_path/{shard}/{shard}/{cid}` and never modified afterwards; only
//! their metadata rows change (pin state, name, upload time).

use crate::{
    cid::{self, CidHasher},
    mime_type,
    models::{car::CarExport, content::ContentObject, stat::ObjectStat},
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::{Stream, StreamExt, pin_mut};
use serde::Serialize;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Public gateway used when none is configured.
pub const DEFAULT_PUBLIC_GATEWAY: &str = "https://ipfs.io";

/// Name given to JSON documents added without one.
pub const DEFAULT_JSON_NAME: &str = "data.json";

const MAX_LIST_LIMIT: usize = 1000;

/// Rows fetched per GC query; the write lock is released between batches.
const GC_BATCH_SIZE: i64 = 256;

/// File name prefix of in-flight uploads in the store root.
const TEMP_PREFIX: &str = ".tmp-";

const OBJECT_COLUMNS: &str = "cid, name, size_bytes, mime_type, pinned, uploaded_at, local_path";

#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub cid: Option<String>,
    pub start_after: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug)]
pub struct ListResult {
    pub objects: Vec<ContentObject>,
    pub is_truncated: bool,
    pub next_start_after: Option<String>,
}

/// Outcome of a garbage-collection sweep.
///
/// `failed` lists objects whose metadata was dropped but whose payload
/// could not be deleted from disk.
#[derive(Debug, Default, Serialize, PartialEq)]
pub struct GcReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
    /// Abandoned upload temp files deleted from the store root.
    pub stale_uploads: usize,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("content `{0}` not found")]
    NotFound(String),
    #[error("invalid cid `{0}`")]
    InvalidCid(String),
    #[error("file not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the gateway's content operations:
/// - Add content (streams bytes to disk, derives the CID, upserts metadata)
/// - Get / open / stat content by CID
/// - Pin and unpin
/// - List, export and garbage collect
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,

    /// Gateway that `public_url` points at by default.
    pub public_gateway: String,

    /// Serializes blob placement against garbage collection so a sweep never
    /// deletes a blob that a concurrent add is re-registering.
    write_lock: Arc<Mutex<()>>,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_gateway: DEFAULT_PUBLIC_GATEWAY.to_string(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_public_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.public_gateway = gateway.into();
        self
    }

    fn ensure_cid_safe(&self, cid: &str) -> StorageResult<()> {
        if cid::is_valid_cid(cid) {
            Ok(())
        } else {
            Err(StorageError::InvalidCid(cid.to_string()))
        }
    }

    /// Construct the payload path for a (validated) CID.
    ///
    /// Shards on the first four digest characters to keep directories small.
    fn blob_path(&self, cid: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(&cid[2..4]);
        path.push(&cid[4..6]);
        path.push(cid);
        path
    }

    async fn fetch_object(&self, cid: &str) -> StorageResult<ContentObject> {
        sqlx::query_as::<_, ContentObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE cid = ?"
        ))
        .bind(cid)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::NotFound(cid.to_string()))
    }

    /// Stream content into the store.
    ///
    /// - Writes bytes to a temporary file while hashing and counting them.
    /// - Moves the file to its CID-derived location, or discards it if an
    ///   identical blob is already present.
    /// - Upserts the metadata row. Re-adding known content refreshes name,
    ///   type and upload time but keeps the pin.
    pub async fn add_stream<S>(
        &self,
        name: &str,
        mime_type: &str,
        stream: S,
    ) -> StorageResult<ContentObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(&self.base_path).await?;
        let mut tmp = TempBlob::new(
            self.base_path
                .join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4())),
        );

        let (size_bytes, cid) = write_temp(&tmp.path, stream).await?;

        let _guard = self.write_lock.lock().await;
        let file_path = self.blob_path(&cid);
        let created = self.place_blob(&tmp.path, &file_path).await?;
        tmp.disarm();

        let uploaded_at = Utc::now();
        let local_path = file_path.to_string_lossy().into_owned();

        let upsert = sqlx::query_as::<_, ContentObject>(&format!(
            r#"
            INSERT INTO objects (cid, name, size_bytes, mime_type, pinned, uploaded_at, local_path)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(cid) DO UPDATE SET
                name = excluded.name,
                size_bytes = excluded.size_bytes,
                mime_type = excluded.mime_type,
                uploaded_at = excluded.uploaded_at,
                local_path = excluded.local_path
            RETURNING {OBJECT_COLUMNS}
            "#
        ))
        .bind(&cid)
        .bind(name)
        .bind(size_bytes)
        .bind(mime_type)
        .bind(uploaded_at)
        .bind(&local_path)
        .fetch_one(&*self.db)
        .await;

        match upsert {
            Ok(obj) => {
                debug!(cid = %obj.cid, name = %obj.name, size = obj.size_bytes, "stored content");
                Ok(obj)
            }
            Err(err) => {
                if created {
                    let _ = fs::remove_file(&file_path).await;
                }
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Move a finished temp file into place.
    ///
    /// Returns `false` when the blob already existed and the temp file was
    /// discarded instead.
    async fn place_blob(&self, tmp_path: &Path, file_path: &Path) -> StorageResult<bool> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        if fs::try_exists(file_path).await? {
            fs::remove_file(tmp_path).await?;
            debug!("blob {} already present", file_path.display());
            return Ok(false);
        }

        fs::rename(tmp_path, file_path).await?;
        Ok(true)
    }

    /// Add an in-memory buffer.
    pub async fn add_bytes(
        &self,
        name: &str,
        mime_type: &str,
        data: impl Into<Bytes>,
    ) -> StorageResult<ContentObject> {
        let data = data.into();
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(data) });
        self.add_stream(name, mime_type, stream).await
    }

    /// Add a file from the local filesystem.
    ///
    /// The object takes the file's name and a type guessed from its
    /// extension.
    pub async fn add_file(&self, path: impl AsRef<Path>) -> StorageResult<ContentObject> {
        let path = path.as_ref();
        let meta = match fs::metadata(path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::SourceNotFound(path.to_path_buf()));
            }
            Err(err) => return Err(StorageError::Io(err)),
        };
        if !meta.is_file() {
            return Err(StorageError::SourceNotFound(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime = mime_type::mime_for_name(&name);

        let file = File::open(path).await?;
        self.add_stream(&name, mime, ReaderStream::new(file)).await
    }

    /// Serialize `value` as pretty-printed JSON and add it.
    pub async fn add_json(
        &self,
        value: &serde_json::Value,
        name: Option<&str>,
    ) -> StorageResult<ContentObject> {
        let body = serde_json::to_vec_pretty(value)?;
        self.add_bytes(name.unwrap_or(DEFAULT_JSON_NAME), mime_type::JSON, body)
            .await
    }

    /// Fetch object metadata by CID.
    pub async fn get(&self, cid: &str) -> StorageResult<ContentObject> {
        self.ensure_cid_safe(cid)?;
        self.fetch_object(cid).await
    }

    /// Fetch an object for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// Returns NotFound if metadata exists but the payload is missing.
    pub async fn open(&self, cid: &str) -> StorageResult<(ContentObject, File)> {
        let object = self.get(cid).await?;
        let file = File::open(&object.local_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                warn!(cid = %cid, path = %object.local_path, "payload missing for indexed content");
                StorageError::NotFound(cid.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((object, file))
    }

    pub async fn pin(&self, cid: &str) -> StorageResult<ContentObject> {
        self.set_pinned(cid, true).await
    }

    pub async fn unpin(&self, cid: &str) -> StorageResult<ContentObject> {
        self.set_pinned(cid, false).await
    }

    async fn set_pinned(&self, cid: &str, pinned: bool) -> StorageResult<ContentObject> {
        self.ensure_cid_safe(cid)?;
        let updated = sqlx::query_as::<_, ContentObject>(&format!(
            "UPDATE objects SET pinned = ? WHERE cid = ? RETURNING {OBJECT_COLUMNS}"
        ))
        .bind(pinned)
        .bind(cid)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::NotFound(cid.to_string()))?;
        debug!(cid = %cid, pinned, "updated pin state");
        Ok(updated)
    }

    /// List objects ordered by CID.
    ///
    /// With `params.cid` the result holds at most that one object. Otherwise
    /// results are keyset-paginated: pass the previous page's
    /// `next_start_after` as `start_after`.
    pub async fn ls(&self, params: ListParams) -> StorageResult<ListResult> {
        if let Some(cid) = params.cid.as_deref() {
            self.ensure_cid_safe(cid)?;
            let objects = match self.fetch_object(cid).await {
                Ok(obj) => vec![obj],
                Err(StorageError::NotFound(_)) => Vec::new(),
                Err(err) => return Err(err),
            };
            return Ok(ListResult {
                objects,
                is_truncated: false,
                next_start_after: None,
            });
        }

        let limit = params
            .limit
            .unwrap_or(MAX_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE 1 = 1"
        ));
        if let Some(after) = &params.start_after {
            builder.push(" AND cid > ");
            builder.push_bind(after);
        }
        builder.push(" ORDER BY cid ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut objects: Vec<ContentObject> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut is_truncated = false;
        let mut next_start_after = None;
        if objects.len() == fetch_limit {
            objects.pop();
            next_start_after = objects.last().map(|obj| obj.cid.clone());
            is_truncated = true;
        }

        Ok(ListResult {
            objects,
            is_truncated,
            next_start_after,
        })
    }

    /// Walk every page of `ls` and collect all objects.
    pub async fn ls_all(&self) -> StorageResult<Vec<ContentObject>> {
        let mut all = Vec::new();
        let mut start_after = None;
        loop {
            let page = self
                .ls(ListParams {
                    cid: None,
                    start_after,
                    limit: Some(MAX_LIST_LIMIT),
                })
                .await?;
            all.extend(page.objects);
            if !page.is_truncated {
                return Ok(all);
            }
            start_after = page.next_start_after;
        }
    }

    pub async fn stat(&self, cid: &str) -> StorageResult<ObjectStat> {
        self.get(cid).await.map(ObjectStat::from)
    }

    /// Collect unpinned content added more than `max_age` ago.
    ///
    /// A negative age counts as zero. An age reaching back past the earliest
    /// representable time collects nothing.
    pub async fn gc(&self, max_age: Duration) -> StorageResult<GcReport> {
        let cutoff = Utc::now()
            .checked_sub_signed(max_age.max(Duration::zero()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.gc_older_than(cutoff).await
    }

    /// Remove every unpinned object uploaded before `cutoff`, plus abandoned
    /// upload temp files last touched before it.
    ///
    /// The metadata row goes first, guarded on `pinned = 0`, so an object
    /// pinned mid-sweep keeps its payload. Payload deletion failures are
    /// logged and reported, never fatal.
    pub async fn gc_older_than(&self, cutoff: DateTime<Utc>) -> StorageResult<GcReport> {
        let mut report = GcReport::default();

        // Every row handled in a batch leaves the candidate set (deleted, or
        // pinned meanwhile), so re-querying from the start always advances.
        loop {
            let _guard = self.write_lock.lock().await;

            // sqlx stores DateTime<Utc> as RFC 3339 text in UTC, which sorts
            // chronologically, so this comparison can use idx_objects_gc.
            let batch: Vec<ContentObject> = sqlx::query_as::<_, ContentObject>(&format!(
                "SELECT {OBJECT_COLUMNS} FROM objects
                 WHERE pinned = 0 AND uploaded_at < ?
                 ORDER BY uploaded_at ASC, cid ASC
                 LIMIT ?"
            ))
            .bind(cutoff)
            .bind(GC_BATCH_SIZE)
            .fetch_all(&*self.db)
            .await?;

            let exhausted = (batch.len() as i64) < GC_BATCH_SIZE;
            for obj in batch {
                self.collect_object(obj, &mut report).await?;
            }
            if exhausted {
                break;
            }
        }

        report.stale_uploads = self.sweep_temp_files(cutoff).await;

        debug!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            stale_uploads = report.stale_uploads,
            "gc sweep finished"
        );
        Ok(report)
    }

    async fn collect_object(&self, obj: ContentObject, report: &mut GcReport) -> StorageResult<()> {
        let deleted = sqlx::query("DELETE FROM objects WHERE cid = ? AND pinned = 0")
            .bind(&obj.cid)
            .execute(&*self.db)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(());
        }

        let file_path = PathBuf::from(&obj.local_path);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => {
                warn!(cid = %obj.cid, error = %err, "failed to delete payload during gc");
                report.failed.push(obj.cid);
                return Ok(());
            }
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        report.removed.push(obj.cid);
        Ok(())
    }

    /// Delete `.tmp-*` files in the store root not modified since `cutoff`.
    ///
    /// Returns how many were removed. Errors are logged and skipped.
    async fn sweep_temp_files(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return 0,
            Err(err) => {
                warn!(error = %err, "failed to scan store root for stale uploads");
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to read store root entry");
                    break;
                }
            };
            if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(err) => {
                    debug!("cannot stat {}: {}", entry.path().display(), err);
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(_) => {
                    debug!("removed stale upload {}", entry.path().display());
                    removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "failed to remove stale upload");
                }
            }
        }
        removed
    }

    /// Public gateway URL for `cid`, using `gateway` or the configured one.
    pub fn public_url(&self, cid: &str, gateway: Option<&str>) -> StorageResult<String> {
        self.ensure_cid_safe(cid)?;
        Ok(proxy_url(cid, gateway.unwrap_or(&self.public_gateway)))
    }

    /// Build a CAR-like manifest of the given CIDs, in order.
    ///
    /// Unknown or malformed CIDs are skipped.
    pub async fn export_car(&self, cids: &[String]) -> StorageResult<CarExport> {
        let mut objects = Vec::with_capacity(cids.len());
        for cid in cids {
            match self.get(cid).await {
                Ok(obj) => objects.push(obj),
                Err(StorageError::NotFound(_) | StorageError::InvalidCid(_)) => {
                    debug!(cid = %cid, "skipping unknown cid in export");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(CarExport::new(objects))
    }

    /// Write [`export_car`](Self::export_car) output to `output` as pretty JSON.
    pub async fn export_car_to(
        &self,
        cids: &[String],
        output: impl AsRef<Path>,
    ) -> StorageResult<CarExport> {
        let export = self.export_car(cids).await?;
        let body = serde_json::to_vec_pretty(&export)?;
        fs::write(output, body).await?;
        Ok(export)
    }

    /// Recursively remove empty directories up to the store root.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Join a gateway base URL and a CID into `{gateway}/ipfs/{cid}`.
pub fn proxy_url(cid: &str, gateway: &str) -> String {
    format!("{}/ipfs/{}", gateway.trim_end_matches('/'), cid)
}

/// Convert a GC age in hours, `None` when it does not fit a `Duration`.
pub fn max_age_hours(hours: u64) -> Option<Duration> {
    i64::try_from(hours).ok().and_then(Duration::try_hours)
}

/// Temp file of an in-flight upload; deleted on drop unless disarmed.
///
/// Covers error returns and a caller dropping the `add_stream` future.
struct TempBlob {
    path: PathBuf,
    armed: bool,
}

impl TempBlob {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempBlob {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %err, "failed to remove upload temp file");
                }
            }
        }
    }
}

/// Drain `stream` into a new file at `path`, returning size and CID.
///
/// The file is flushed and fsynced before returning.
async fn write_temp<S>(path: &Path, stream: S) -> StorageResult<(i64, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: i64 = 0;
    let mut hasher = CidHasher::new();

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size_bytes += chunk.len() as i64;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;

    Ok((size_bytes, hasher.finalize()))
}
