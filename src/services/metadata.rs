use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::model::{DsType, MetadataEntry};

pub const METADATA_DB_FILE: &str = "metadata.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `host -> service -> metric -> uom`, as served by the listing endpoint.
pub type MetadataTree = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSetup {
    pub dstype: DsType,
    pub uom: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("metadata database connection is poisoned")]
    Poisoned,
    #[error("failed to prepare metadata directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Process-wide (host, service, metric) -> (dstype, uom) cache.
///
/// Implementations must tolerate concurrent readers while a batch is being
/// written; readers may observe either the old or the new row.
pub trait MetadataStore: Send + Sync {
    /// Applies the whole batch atomically, last writer wins per key.
    fn upsert(&self, batch: &[MetadataEntry]) -> Result<(), MetadataError>;

    fn lookup(
        &self,
        host: &str,
        service: &str,
        metric: &str,
    ) -> Result<Option<MetricSetup>, MetadataError>;

    fn list(&self) -> Result<MetadataTree, MetadataError>;
}

/// SQLite-backed cache in WAL mode: one writer connection for transactions and
/// a separate reader connection so lookups never wait on a running batch.
pub struct SqliteMetadataStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteMetadataStore {
    pub fn open_in_dir(data_dir: &Path) -> Result<Self, MetadataError> {
        std::fs::create_dir_all(data_dir).map_err(|source| MetadataError::Directory {
            path: data_dir.to_path_buf(),
            source,
        })?;
        Self::open(&data_dir.join(METADATA_DB_FILE))
    }

    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        let writer = Connection::open(path)?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        writer.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS uoms (
                host VARCHAR(255) NOT NULL,
                service VARCHAR(255) NOT NULL,
                metric VARCHAR(255) NOT NULL,
                dstype VARCHAR(255) NOT NULL,
                uom VARCHAR(255) NOT NULL,
                PRIMARY KEY (host, service, metric)
            );
            "#,
        )?;
        let journal_mode: String =
            writer.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(journal_mode, "metadata database is not running in WAL mode");
        }

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(BUSY_TIMEOUT)?;

        tracing::info!(path = %path.display(), "metadata database ready");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn upsert(&self, batch: &[MetadataEntry]) -> Result<(), MetadataError> {
        let mut conn = self.writer.lock().map_err(|_| MetadataError::Poisoned)?;
        // Dropping the transaction without commit rolls the batch back.
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO uoms (host, service, metric, dstype, uom) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in batch {
                stmt.execute(params![
                    entry.host,
                    entry.service,
                    entry.metric,
                    entry.dstype.as_str(),
                    entry.uom,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn lookup(
        &self,
        host: &str,
        service: &str,
        metric: &str,
    ) -> Result<Option<MetricSetup>, MetadataError> {
        let conn = self.reader.lock().map_err(|_| MetadataError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT dstype, uom FROM uoms WHERE host = ?1 AND service = ?2 AND metric = ?3",
                params![host, service, metric],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(dstype, uom)| MetricSetup {
            dstype: DsType::parse(&dstype),
            uom,
        }))
    }

    fn list(&self) -> Result<MetadataTree, MetadataError> {
        let conn = self.reader.lock().map_err(|_| MetadataError::Poisoned)?;
        let mut stmt = conn.prepare_cached("SELECT host, service, metric, uom FROM uoms")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut tree = MetadataTree::new();
        for row in rows {
            let (host, service, metric, uom) = row?;
            tree.entry(host)
                .or_default()
                .entry(service)
                .or_default()
                .insert(metric, uom);
        }
        Ok(tree)
    }
}
