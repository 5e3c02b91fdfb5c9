//! The blocks catalog: an ordered list of reusable functional blocks,
//! uploaded by the operator as CSV.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::REQUIRED_COLUMNS;
use crate::error::CatalogError;
use crate::storage::{self, FileStamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub block_name: String,
    pub functionality_description: String,
}

impl BlockEntry {
    pub fn new(block_name: impl Into<String>, functionality_description: impl Into<String>) -> Self {
        Self {
            block_name: block_name.into(),
            functionality_description: functionality_description.into(),
        }
    }
}

pub struct BlocksCatalog {
    path: PathBuf,
    // Last read contents, trusted only while the file's stamp is unchanged.
    entries: RwLock<Option<Cached>>,
}

struct Cached {
    stamp: Option<FileStamp>,
    entries: Vec<BlockEntry>,
}

impl BlocksCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ordered entries; empty when nothing has been uploaded yet. Imports
    /// done by another process show up on the next call.
    pub fn load(&self) -> Vec<BlockEntry> {
        let stamp = storage::file_stamp(&self.path);
        if let Some(cached) = self.entries.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            if cached.stamp == stamp {
                return cached.entries.clone();
            }
        }

        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let stamp = storage::file_stamp(&self.path);
        let entries = read_catalog_file(&self.path);
        *guard = Some(Cached {
            stamp,
            entries: entries.clone(),
        });
        entries
    }

    /// Validate and store an uploaded CSV. Nothing changes on failure.
    pub fn save_csv(&self, bytes: &[u8]) -> Result<Vec<BlockEntry>, CatalogError> {
        let entries = parse_catalog(bytes)?;
        self.save(entries.clone())?;
        Ok(entries)
    }

    pub fn save(&self, entries: Vec<BlockEntry>) -> Result<(), CatalogError> {
        let bytes = render_catalog(&entries)?;

        // Hold the write lock across the file swap so readers see old or new, never a mix.
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        storage::write_atomic(&self.path, &bytes)?;
        info!(path = %self.path.display(), rows = entries.len(), "Blocks catalog saved");
        *guard = Some(Cached {
            stamp: storage::file_stamp(&self.path),
            entries,
        });
        Ok(())
    }

    /// Example catalog for operators who have not seen the format before.
    pub fn template() -> Vec<u8> {
        let rows = [
            BlockEntry::new(
                "user_authentication",
                "Sign-up, login and session management for end users",
            ),
            BlockEntry::new(
                "payment_processing",
                "Charge cards and issue refunds through an external payment provider",
            ),
        ];
        // Static rows; the in-memory writer cannot fail on them.
        render_catalog(&rows).unwrap_or_else(|_| format!("{}\n", REQUIRED_COLUMNS.join(",")).into_bytes())
    }
}

fn read_catalog_file(path: &Path) -> Vec<BlockEntry> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No blocks catalog on disk");
            return Vec::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Blocks catalog unreadable, treating as empty");
            return Vec::new();
        }
    };
    parse_catalog(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Blocks catalog invalid, treating as empty");
        Vec::new()
    })
}

/// Parse CSV with a header row. Extra columns are ignored and missing cells read as "".
pub fn parse_catalog(bytes: &[u8]) -> Result<Vec<BlockEntry>, CatalogError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    let column_of = |name: &str| headers.iter().position(|h| h.trim_start_matches('\u{feff}') == name);

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| column_of(col).is_none())
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CatalogError::MissingColumns(missing));
    }
    let (name_idx, desc_idx) = match (column_of(REQUIRED_COLUMNS[0]), column_of(REQUIRED_COLUMNS[1])) {
        (Some(n), Some(d)) => (n, d),
        _ => return Err(CatalogError::MissingColumns(REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect())),
    };

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        entries.push(BlockEntry {
            block_name: record.get(name_idx).unwrap_or("").to_string(),
            functionality_description: record.get(desc_idx).unwrap_or("").to_string(),
        });
    }
    Ok(entries)
}

fn render_catalog(entries: &[BlockEntry]) -> Result<Vec<u8>, CatalogError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(REQUIRED_COLUMNS)?;
    for entry in entries {
        writer.write_record([entry.block_name.as_str(), entry.functionality_description.as_str()])?;
    }
    writer
        .into_inner()
        .map_err(|e| CatalogError::Parse(e.to_string()))
}
