//! Optional persistence collaborator for sequence state.
//!
//! A small file per trading day holds the three stream pairs as one record
//! of six decimal integers. Writes are atomic: each save renders the whole
//! record, writes it to a temp file, then renames over the target path.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

/// One day's worth of sequence state: `(outgoing, incoming)` per stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceStoreRecord {
    pub regular_out: u64,
    pub regular_in: u64,
    pub security_list_out: u64,
    pub security_list_in: u64,
    pub market_data_out: u64,
    pub market_data_in: u64,
}

impl SequenceStoreRecord {
    fn to_line(self) -> String {
        format!(
            "{} {} {} {} {} {}\n",
            self.regular_out,
            self.regular_in,
            self.security_list_out,
            self.security_list_in,
            self.market_data_out,
            self.market_data_in
        )
    }

    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        Some(Self {
            regular_out: parts.next()?.parse().ok()?,
            regular_in: parts.next()?.parse().ok()?,
            security_list_out: parts.next()?.parse().ok()?,
            security_list_in: parts.next()?.parse().ok()?,
            market_data_out: parts.next()?.parse().ok()?,
            market_data_in: parts.next()?.parse().ok()?,
        })
    }
}

/// Loads and saves sequence state, keyed by trading date (`YYYYMMDD`). A
/// fresh trading day MUST NOT reuse a prior day's record — callers key by
/// date and treat a missing record as "start from initial values".
#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn load(&self, trading_date: &str) -> io::Result<Option<SequenceStoreRecord>>;
    async fn save(&self, trading_date: &str, record: SequenceStoreRecord) -> io::Result<()>;
}

/// No-op store: every session starts from initial values. The default when
/// `resetOnLogon` makes persistence unnecessary for correctness.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemorySequenceStore;

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn load(&self, _trading_date: &str) -> io::Result<Option<SequenceStoreRecord>> {
        Ok(None)
    }

    async fn save(&self, _trading_date: &str, _record: SequenceStoreRecord) -> io::Result<()> {
        Ok(())
    }
}

/// File-backed store: one file per trading day under `directory`, named
/// `<trading_date>.seq`.
#[derive(Debug, Clone)]
pub struct FileSequenceStore {
    directory: PathBuf,
}

impl FileSequenceStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, trading_date: &str) -> PathBuf {
        self.directory.join(format!("{trading_date}.seq"))
    }
}

#[async_trait]
impl SequenceStore for FileSequenceStore {
    async fn load(&self, trading_date: &str) -> io::Result<Option<SequenceStoreRecord>> {
        let path = self.path_for(trading_date);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(SequenceStoreRecord::parse(contents.trim())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn save(&self, trading_date: &str, record: SequenceStoreRecord) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.path_for(trading_date);
        let tmp_path = path.with_extension("seq.tmp");
        tokio::fs::write(&tmp_path, record.to_line()).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

/// Helper for tests/demos that want a store rooted at a temp directory.
pub fn file_store_at(path: impl AsRef<Path>) -> FileSequenceStore {
    FileSequenceStore::new(path.as_ref())
}
