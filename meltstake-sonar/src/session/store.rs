//! On-disk layout of a deployment: scan files, run index, config snapshot
//!
//! A scan file is written to `<name>.partial`, flushed and synced, then
//! renamed into place. Only after the rename is the run index row appended,
//! so the index never names a file that is missing or half written.

use crate::config::SonarConfig;
use crate::error::{Error, Result};
use crate::types::Scan;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Header row of the run index
pub const RUN_INDEX_HEADER: &str = "Timestamp,Type,File";
/// Configuration snapshot written at session start
pub const CONFIG_SNAPSHOT: &str = "config.json";
const PARTIAL_SUFFIX: &str = "partial";

/// One run index row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: String,
    pub record_type: String,
    pub file: String,
}

/// Writer for a deployment directory
pub struct ScanStore {
    dir: PathBuf,
    index_path: PathBuf,
    index: BufWriter<File>,
    next_index: u32,
}

impl ScanStore {
    /// Open (or resume) the run index inside `dir`
    ///
    /// A new index gets its header row. An existing one is appended to and
    /// scan numbering continues after the highest index it references.
    pub fn open(dir: impl AsRef<Path>, index_name: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let index_path = dir.join(index_name);

        let existing = if index_path.exists() {
            read_index(&index_path)?
        } else {
            Vec::new()
        };
        let next_index = existing
            .iter()
            .filter_map(|entry| scan_index_of(&entry.file))
            .max()
            .map_or(1, |max| max + 1);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)?;
        let empty = file.metadata()?.len() == 0;
        let mut index = BufWriter::new(file);
        if empty {
            writeln!(index, "{}", RUN_INDEX_HEADER)?;
            index.flush()?;
        }

        log::info!(
            "ScanStore: {} ({} existing entries, next scan {})",
            index_path.display(),
            existing.len(),
            next_index
        );

        Ok(Self {
            dir,
            index_path,
            index,
            next_index,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Index the next persisted scan should use
    pub fn next_scan_index(&self) -> u32 {
        self.next_index
    }

    /// Write the scan file, then record it in the run index
    ///
    /// Returns `None` for an empty scan, which is not persisted.
    pub fn persist(&mut self, scan: &Scan) -> Result<Option<PathBuf>> {
        if scan.is_empty() {
            log::debug!("ScanStore: scan {} has no pings, not persisted", scan.index());
            return Ok(None);
        }

        let path = self.write_scan_file(scan)?;
        self.append_index(scan.started_at(), scan.record_type(), &scan.file_name())?;
        self.next_index = self.next_index.max(scan.index() + 1);

        log::info!(
            "ScanStore: wrote {} ({} of {} pings, {})",
            scan.file_name(),
            scan.len(),
            scan.expected(),
            scan.record_type()
        );
        Ok(Some(path))
    }

    /// Write the raw frames of `scan` to its final file name
    ///
    /// The file only appears under that name once fully on disk.
    pub fn write_scan_file(&self, scan: &Scan) -> Result<PathBuf> {
        let final_path = self.dir.join(scan.file_name());
        let partial_path = final_path.with_extension(format!("dat.{}", PARTIAL_SUFFIX));

        let file = File::create(&partial_path)?;
        let mut writer = BufWriter::new(file);
        for ping in scan.pings() {
            writer.write_all(ping.frame())?;
        }
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&partial_path, &final_path)?;
        Ok(final_path)
    }

    /// Append one row to the run index and flush it
    pub fn append_index(
        &mut self,
        timestamp: DateTime<Utc>,
        record_type: &str,
        file_name: &str,
    ) -> Result<()> {
        writeln!(
            self.index,
            "{},{},{}",
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            record_type,
            file_name
        )?;
        self.index.flush()?;
        self.index.get_ref().sync_data()?;
        Ok(())
    }

    /// Read back the rows written so far
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        read_index(&self.index_path)
    }
}

/// Write `config.json` into `dir` for downstream tools
pub fn write_config_snapshot(dir: &Path, config: &SonarConfig) -> Result<PathBuf> {
    let path = dir.join(CONFIG_SNAPSHOT);
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&path, json)?;
    Ok(path)
}

/// Parse a run index file
pub fn read_index(path: impl AsRef<Path>) -> Result<Vec<IndexEntry>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines();

    match lines.next() {
        Some(header) if header.trim() == RUN_INDEX_HEADER => {}
        Some(header) => {
            return Err(Error::Other(format!(
                "{}: unexpected run index header '{}'",
                path.display(),
                header
            )))
        }
        None => return Ok(Vec::new()),
    }

    let mut entries = Vec::new();
    for (n, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.splitn(3, ',');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(timestamp), Some(record_type), Some(file)) => entries.push(IndexEntry {
                timestamp: timestamp.trim().to_string(),
                record_type: record_type.trim().to_string(),
                file: file.trim().to_string(),
            }),
            _ => log::warn!("{}: skipping malformed row {}", path.display(), n + 2),
        }
    }
    Ok(entries)
}

/// Scan index encoded in a `scan_<index>_<time>.dat` name
fn scan_index_of(file: &str) -> Option<u32> {
    file.strip_prefix("scan_")?.split('_').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::imagenex881a::encode_ping;
    use crate::types::{PingRecord, StepDirection};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn scan(index: u32, pings: usize, expected: usize) -> Scan {
        let started = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 5).unwrap();
        let mut scan = Scan::new(index, started, expected);
        for i in 0..pings {
            let mut ping = PingRecord::new(i as f32 * 0.3, StepDirection::Clockwise, vec![7; 20], 10.0);
            ping.frame = encode_ping(&ping);
            scan.push(ping);
        }
        scan
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_new_index_has_header() {
        let temp = TempDir::new().unwrap();
        let store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();
        let contents = fs::read_to_string(store.index_path()).unwrap();
        assert_eq!(contents, "Timestamp,Type,File\n");
        assert_eq!(store.next_scan_index(), 1);
    }

    #[test]
    fn test_persist_writes_file_then_row() {
        let temp = TempDir::new().unwrap();
        let mut store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();

        let path = store.persist(&scan(1, 4, 4)).unwrap().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "scan_0001_2024-06-01_12.30.05.dat"
        );
        assert_eq!(fs::read(&path).unwrap().len(), 4 * 33);

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record_type, "scan");
        assert_eq!(entries[0].timestamp, "2024-06-01T12:30:05.000Z");
        assert_eq!(entries[0].file, "scan_0001_2024-06-01_12.30.05.dat");
        assert_eq!(store.next_scan_index(), 2);

        // No .partial left behind
        assert_eq!(
            file_names(temp.path()),
            vec!["RunIndex.csv", "scan_0001_2024-06-01_12.30.05.dat"]
        );
    }

    #[test]
    fn test_incomplete_scan_flagged() {
        let temp = TempDir::new().unwrap();
        let mut store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();
        store.persist(&scan(1, 2, 4)).unwrap();
        assert_eq!(store.entries().unwrap()[0].record_type, "partial_scan");
    }

    #[test]
    fn test_empty_scan_not_persisted() {
        let temp = TempDir::new().unwrap();
        let mut store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();
        assert!(store.persist(&scan(1, 0, 4)).unwrap().is_none());
        assert!(store.entries().unwrap().is_empty());
        assert_eq!(file_names(temp.path()), vec!["RunIndex.csv"]);
    }

    #[test]
    fn test_crash_between_file_and_index() {
        let temp = TempDir::new().unwrap();
        {
            let mut store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();
            store.persist(&scan(1, 3, 3)).unwrap();
            // Interrupted after the data file, before the index row
            store.write_scan_file(&scan(2, 3, 3)).unwrap();
        }

        let store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();
        for entry in store.entries().unwrap() {
            assert!(temp.path().join(&entry.file).exists(), "{} missing", entry.file);
        }
        assert_eq!(store.entries().unwrap().len(), 1);
        assert_eq!(store.next_scan_index(), 2);
    }

    #[test]
    fn test_resume_continues_numbering() {
        let temp = TempDir::new().unwrap();
        {
            let mut store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();
            store.persist(&scan(1, 1, 1)).unwrap();
            store.persist(&scan(2, 1, 1)).unwrap();
        }
        let store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();
        assert_eq!(store.next_scan_index(), 3);

        let contents = fs::read_to_string(store.index_path()).unwrap();
        assert_eq!(contents.matches(RUN_INDEX_HEADER).count(), 1);
    }

    #[test]
    fn test_config_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = write_config_snapshot(temp.path(), &SonarConfig::default()).unwrap();
        assert!(!temp.path().join("RunIndex.csv").exists());
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["num_bins"], 250);
        assert_eq!(value["range"], 10);
    }

    #[test]
    fn test_scan_index_of() {
        assert_eq!(scan_index_of("scan_0042_2024-01-01_00.00.00.dat"), Some(42));
        assert_eq!(scan_index_of("orientation_0001.dat"), None);
    }
}
