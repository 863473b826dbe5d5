//! src/services/storage_service.rs
//!
//! StorageService — the expiring object store. Metadata lives in a SQLite
//! `files` table; content lives on local disk at `base_path/{name}`.
//!
//! Two operations carry the invariants:
//! - `put` inserts the catalog row inside a transaction, copies the blob,
//!   and only then commits, so no committed row is ever missing its blob.
//! - `sweep` removes blobs of expired rows first and deletes only the rows
//!   whose blob is confirmed gone.

use crate::{
    models::stored_object::StoredObject,
    services::{
        clock::{Clock, SystemClock},
        name_generator::NameGenerator,
    },
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::{Stream, StreamExt, pin_mut};
use sqlx::{
    QueryBuilder, SqlitePool, Transaction,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration as StdDuration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("name `{0}` is already taken")]
    DuplicateName(String),
    #[error("invalid object name")]
    InvalidName,
    #[error("invalid file extension `{0}`")]
    InvalidExtension(String),
    #[error("lifetime must be positive and representable")]
    InvalidLifetime,
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("failed to create upload directory {path}: {source}")]
    UploadDir { path: PathBuf, source: io::Error },
    #[error("failed to write blob `{name}`: {source}")]
    BlobWrite { name: String, source: io::Error },
    #[error("failed to read blob `{name}`: {source}")]
    BlobRead { name: String, source: io::Error },
    #[error("failed to delete blob `{name}`: {source}")]
    BlobDelete { name: String, source: io::Error },
    #[error("failed to commit catalog insert: {0}")]
    Commit(#[source] sqlx::Error),
    #[error(transparent)]
    Catalog(#[from] sqlx::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Attempts `put` makes at finding an unused name before giving up.
pub const DEFAULT_NAME_ATTEMPTS: usize = 3;

const MAX_EXTENSION_LEN: usize = 32;
// Stays well below SQLite's bound-parameter limit.
const SWEEP_DELETE_CHUNK: usize = 500;

const CREATE_FILES_TABLE: &str = "CREATE TABLE IF NOT EXISTS files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    created_at  DATETIME NOT NULL,
    expires_at  DATETIME NOT NULL
)";
const CREATE_EXPIRES_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS files_expires_at ON files (expires_at)";

/// Open the SQLite catalog at `database_url`, creating the file if missing.
pub async fn open_catalog(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(StdDuration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// StorageService provides the expiring object store:
/// - Put (insert catalog row, write blob, commit)
/// - Open (catalog lookup plus blob handle for the serving path)
/// - Sweep (delete expired blobs, then their rows)
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Directory on disk where blobs are stored, one file per object.
    pub base_path: PathBuf,

    names: Arc<NameGenerator>,
    clock: Arc<dyn Clock>,
    name_attempts: usize,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the upload directory. The name generator is
    /// seeded from OS entropy.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            names: Arc::new(NameGenerator::from_entropy()),
            clock: Arc::new(SystemClock),
            name_attempts: DEFAULT_NAME_ATTEMPTS,
        }
    }

    pub fn with_name_generator(mut self, names: NameGenerator) -> Self {
        self.names = Arc::new(names);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of fresh names `put` tries before failing with `DuplicateName`.
    pub fn with_name_attempts(mut self, attempts: usize) -> Self {
        self.name_attempts = attempts.max(1);
        self
    }

    /// Create the upload directory and the `files` table if absent.
    pub async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|source| StorageError::UploadDir {
                path: self.base_path.clone(),
                source,
            })?;
        sqlx::query(CREATE_FILES_TABLE).execute(&*self.db).await?;
        sqlx::query(CREATE_EXPIRES_INDEX).execute(&*self.db).await?;
        Ok(())
    }

    /// Release the catalog connections.
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Extensions are appended to generated names, which end up both on disk
    /// and as the last segment of the share URL. Only `[A-Za-z0-9._-]` is
    /// allowed, so no extension can escape the upload directory or need
    /// percent-encoding.
    fn ensure_extension_safe(&self, extension: &str) -> StorageResult<()> {
        let invalid = || StorageError::InvalidExtension(extension.to_string());
        if extension.is_empty() {
            return Ok(());
        }
        if extension.len() > MAX_EXTENSION_LEN || !extension.starts_with('.') {
            return Err(invalid());
        }
        if extension.contains("..") || !extension.bytes().all(is_extension_byte) {
            return Err(invalid());
        }
        Ok(())
    }

    /// Names arrive from request paths on the serving side.
    fn ensure_name_safe(&self, name: &str) -> StorageResult<()> {
        if name.is_empty() || name.starts_with('.') || name.contains("..") {
            return Err(StorageError::InvalidName);
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\')
        {
            return Err(StorageError::InvalidName);
        }
        Ok(())
    }

    /// Path of the blob for `name`.
    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    /// Store `content` under a fresh random name for `lifetime`.
    ///
    /// The catalog row is inserted first so the name is settled before the
    /// filesystem is touched, and committed only after the blob is fully
    /// written. Returns the committed record or an error, never a partial one.
    pub async fn put<S>(
        &self,
        content: S,
        lifetime: Duration,
        extension: &str,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_extension_safe(extension)?;
        if lifetime <= Duration::zero() {
            return Err(StorageError::InvalidLifetime);
        }

        let created_at = self.clock.now();
        let expires_at = created_at
            .checked_add_signed(lifetime)
            .ok_or(StorageError::InvalidLifetime)?;

        let mut tx = self.db.begin().await?;
        let (id, name) = self
            .insert_unique(&mut tx, created_at, expires_at, extension)
            .await?;

        // Dropping `tx` on any early return rolls the row back.
        let path = self.blob_path(&name);
        let file = match create_blob(&path).await {
            Ok(file) => file,
            // An existing file belongs to someone else; leave it alone.
            Err(source) => return Err(StorageError::BlobWrite { name, source }),
        };
        if let Err(source) = write_blob(file, content).await {
            if let Err(err) = fs::remove_file(&path).await {
                if err.kind() != ErrorKind::NotFound {
                    warn!(%name, error = %err, "failed to remove partial blob");
                }
            }
            return Err(StorageError::BlobWrite { name, source });
        }

        if let Err(err) = tx.commit().await {
            warn!(%name, error = %err, "catalog commit failed; blob left unreferenced");
            return Err(StorageError::Commit(err));
        }

        debug!(id, %name, %expires_at, "stored object");
        Ok(StoredObject {
            id,
            name,
            created_at,
            expires_at,
        })
    }

    /// Insert a catalog row, regenerating the name on unique violations.
    async fn insert_unique(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        extension: &str,
    ) -> StorageResult<(i64, String)> {
        let mut last = String::new();
        for attempt in 1..=self.name_attempts {
            let name = self.names.generate(extension);
            let inserted = sqlx::query_scalar::<_, i64>(
                "INSERT INTO files (name, created_at, expires_at) VALUES (?, ?, ?)
                 RETURNING id",
            )
            .bind(&name)
            .bind(created_at)
            .bind(expires_at)
            .fetch_one(&mut **tx)
            .await;

            match inserted {
                Ok(id) => return Ok((id, name)),
                Err(err) if is_unique_violation(&err) => {
                    debug!(%name, attempt, "name collision");
                    last = name;
                }
                Err(err) => return Err(StorageError::Catalog(err)),
            }
        }
        Err(StorageError::DuplicateName(last))
    }

    /// Fetch the catalog record for `name`.
    pub async fn find(&self, name: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, name, created_at, expires_at FROM files WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound(name.to_string()),
            other => StorageError::Catalog(other),
        })
    }

    /// Fetch an object for reading.
    ///
    /// Expired rows awaiting the next sweep are reported as not found, as is
    /// a row whose blob has disappeared.
    pub async fn open(&self, name: &str) -> StorageResult<(StoredObject, File)> {
        self.ensure_name_safe(name)?;
        let object = self.find(name).await?;
        if object.is_expired(self.clock.now()) {
            return Err(StorageError::ObjectNotFound(name.to_string()));
        }

        let file = File::open(self.blob_path(name))
            .await
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound => StorageError::ObjectNotFound(name.to_string()),
                _ => StorageError::BlobRead {
                    name: name.to_string(),
                    source,
                },
            })?;

        Ok((object, file))
    }

    /// All records whose `expires_at` is before `now`.
    async fn expired(&self, now: DateTime<Utc>) -> StorageResult<Vec<StoredObject>> {
        let rows = sqlx::query_as::<_, StoredObject>(
            "SELECT id, name, created_at, expires_at FROM files WHERE expires_at < ?",
        )
        .bind(now)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Delete expired objects and return how many were removed.
    ///
    /// A blob that is already missing counts as deleted. Any other deletion
    /// failure is logged and its row kept for the next pass. Only catalog
    /// failures abort the pass.
    pub async fn sweep(&self) -> StorageResult<usize> {
        let expired = self.expired(self.clock.now()).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut removed_ids = Vec::with_capacity(expired.len());
        for object in &expired {
            match self.remove_blob(&object.name).await {
                Ok(()) => removed_ids.push(object.id),
                Err(err) => warn!(id = object.id, error = %err, "keeping row for next sweep"),
            }
        }
        if removed_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.begin().await?;
        let mut removed = 0;
        for chunk in removed_ids.chunks(SWEEP_DELETE_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM files WHERE id IN (");
            let mut ids = builder.separated(", ");
            for id in chunk {
                ids.push_bind(*id);
            }
            builder.push(")");
            removed += builder.build().execute(&mut *tx).await?.rows_affected() as usize;
        }
        tx.commit().await?;

        info!(removed, "swept expired objects");
        Ok(removed)
    }

    /// Remove the blob for `name`, treating "not found" as success.
    async fn remove_blob(&self, name: &str) -> StorageResult<()> {
        let path = self.blob_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => debug!("removed blob {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
            }
            Err(source) => {
                return Err(StorageError::BlobDelete {
                    name: name.to_string(),
                    source,
                });
            }
        }
        Ok(())
    }
}

/// Create the blob file, failing if anything already exists at `path`.
async fn create_blob(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

/// Copy `content` into `file` and flush it to disk.
async fn write_blob<S>(mut file: File, content: S) -> io::Result<()>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    pin_mut!(content);
    while let Some(chunk) = content.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    file.sync_all().await
}

fn is_extension_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-')
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
