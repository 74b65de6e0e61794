// =============================================================================
// Persistence — month archives and mode history
// =============================================================================
//
// The only state that survives a restart.  Everything else is rebuilt from
// fresh feed polls.  Records are append-only; loading returns them in the
// order they were written.
//
// `JsonlStore` writes one JSON object per line under the data directory.
// A line that fails to parse is skipped with a warning rather than
// aborting the load.
// =============================================================================

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::alpha::ModeTransition;
use crate::goal::MonthArchive;

const MONTH_ARCHIVE_FILE: &str = "month_archives.jsonl";
const MODE_HISTORY_FILE: &str = "mode_history.jsonl";

pub trait Store: Send + Sync {
    fn append_month_archive(&self, archive: &MonthArchive) -> Result<()>;
    fn load_month_archives(&self) -> Result<Vec<MonthArchive>>;
    fn append_mode_transition(&self, transition: &ModeTransition) -> Result<()>;
    fn load_mode_history(&self) -> Result<Vec<ModeTransition>>;
}

// =============================================================================
// JsonlStore
// =============================================================================

pub struct JsonlStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Open (creating if needed) the data directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create data dir {}", dir.display()))?;
        info!(dir = %dir.display(), "jsonl store opened");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let path = self.dir.join(file);
        let line = serde_json::to_string(record).context("failed to serialise record")?;

        let _guard = self.write_lock.lock();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        writeln!(f, "{line}").with_context(|| format!("failed to append to {}", path.display()))?;
        f.flush()?;
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let f = std::fs::File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut out = Vec::new();
        for (n, line) in BufReader::new(f).lines().enumerate() {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => out.push(record),
                Err(e) => warn!(file = %path.display(), line = n + 1, error = %e, "skipping corrupt record"),
            }
        }
        Ok(out)
    }
}

impl Store for JsonlStore {
    fn append_month_archive(&self, archive: &MonthArchive) -> Result<()> {
        self.append(MONTH_ARCHIVE_FILE, archive)
    }

    fn load_month_archives(&self) -> Result<Vec<MonthArchive>> {
        self.load(MONTH_ARCHIVE_FILE)
    }

    fn append_mode_transition(&self, transition: &ModeTransition) -> Result<()> {
        self.append(MODE_HISTORY_FILE, transition)
    }

    fn load_mode_history(&self) -> Result<Vec<ModeTransition>> {
        self.load(MODE_HISTORY_FILE)
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    archives: Mutex<Vec<MonthArchive>>,
    transitions: Mutex<Vec<ModeTransition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn append_month_archive(&self, archive: &MonthArchive) -> Result<()> {
        self.archives.lock().push(archive.clone());
        Ok(())
    }

    fn load_month_archives(&self) -> Result<Vec<MonthArchive>> {
        Ok(self.archives.lock().clone())
    }

    fn append_mode_transition(&self, transition: &ModeTransition) -> Result<()> {
        self.transitions.lock().push(transition.clone());
        Ok(())
    }

    fn load_mode_history(&self) -> Result<Vec<ModeTransition>> {
        Ok(self.transitions.lock().clone())
    }
}
