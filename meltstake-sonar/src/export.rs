//! Conversion of a deployment directory into `RunData.csv`
//!
//! Walks the run index in order, splits every scan file into response
//! frames and writes one CSV row per ping (amplitudes as trailing columns)
//! and one row per orientation record.

use crate::config::SonarConfig;
use crate::devices::imagenex881a::protocol::{decode_orientation, parse_header};
use crate::devices::imagenex881a::FrameIter;
use crate::error::Result;
use crate::session::{read_index, CONFIG_SNAPSHOT};
use crate::types::{RECORD_PARTIAL_SCAN, RECORD_SCAN};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Default output file name
pub const RUN_DATA: &str = "RunData.csv";
/// Run index record type for orientation files
pub const RECORD_ORIENTATION: &str = "orientation";
/// Legacy record type written by older deployments for downward-looking scans
pub const RECORD_DOWNWARD: &str = "downward";

/// Output columns; `pingdata` expands to one column per bin
pub const RUN_DATA_COLUMNS: [&str; 14] = [
    "File",
    "scan_index",
    "headposition",
    "stepdirection",
    "range",
    "profilerange",
    "tempExternal",
    "tempInternal",
    "depth",
    "pitch",
    "roll",
    "heading",
    "gyroheading",
    "pingdata",
];

/// Counts from one conversion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    /// Files converted without error
    pub files: usize,
    /// Rows written
    pub rows: usize,
    /// Index entries skipped (missing, unreadable or unknown type)
    pub skipped: usize,
    /// Files that ended in a truncated or invalid frame
    pub damaged: usize,
}

/// Convert `<dir>/<index_name>` into `output`
pub fn convert_run(dir: impl AsRef<Path>, index_name: &str, output: &Path) -> Result<ConvertSummary> {
    let dir = dir.as_ref();
    let entries = read_index(dir.join(index_name))?;
    let config = load_snapshot(dir);

    let mut writer = BufWriter::new(File::create(output)?);
    writeln!(writer, "{}", RUN_DATA_COLUMNS.join(","))?;

    let mut summary = ConvertSummary::default();
    for entry in &entries {
        let path = dir.join(&entry.file);
        let kind = entry.record_type.as_str();
        if !matches!(
            kind,
            RECORD_SCAN | RECORD_PARTIAL_SCAN | RECORD_DOWNWARD | RECORD_ORIENTATION
        ) {
            log::warn!("Unrecognized type in run index: {}", kind);
            summary.skipped += 1;
            continue;
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                summary.skipped += 1;
                continue;
            }
        };

        let written = if kind == RECORD_ORIENTATION {
            write_orientation_row(&mut writer, &entry.file, &bytes)
        } else {
            write_scan_rows(&mut writer, &entry.file, &bytes, config.as_ref())
        };
        let (rows, intact) = written?;
        summary.rows += rows;
        summary.files += 1;
        if !intact {
            summary.damaged += 1;
        }
    }

    writer.flush()?;
    log::info!(
        "Converted {} files into {} ({} rows, {} skipped)",
        summary.files,
        output.display(),
        summary.rows,
        summary.skipped
    );
    Ok(summary)
}

/// Output path used when none is given
pub fn default_output(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(RUN_DATA)
}

fn load_snapshot(dir: &Path) -> Option<SonarConfig> {
    let path = dir.join(CONFIG_SNAPSHOT);
    let contents = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Ignoring {}: {}", path.display(), e);
            None
        }
    }
}

/// Rows for each ping in a scan file. Returns `(rows, intact)`.
fn write_scan_rows<W: Write>(
    w: &mut W,
    file: &str,
    bytes: &[u8],
    config: Option<&SonarConfig>,
) -> Result<(usize, bool)> {
    let mut rows = 0;
    for (n, frame) in FrameIter::new(bytes).enumerate() {
        let (header, frame) = match frame.and_then(|f| parse_header(f).map(|h| (h, f))) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("{}: ping {}: {}", file, n + 1, e);
                return Ok((rows, false));
            }
        };

        if let Some(config) = config {
            if header.data_len != config.num_bins as usize {
                log::warn!(
                    "{}: ping {} has {} bins, snapshot says {}",
                    file,
                    n + 1,
                    header.data_len,
                    config.num_bins
                );
            }
        }

        // Orientation columns stay empty for pings
        write!(
            w,
            "{},{},{:.1},{},{},{},,,,,,,",
            file,
            n + 1,
            header.angle(),
            header.direction,
            header.range,
            header.profile_range
        )?;
        let data = &frame[frame.len() - 1 - header.data_len..frame.len() - 1];
        for amplitude in data {
            write!(w, ",{}", amplitude)?;
        }
        writeln!(w)?;
        rows += 1;
    }
    Ok((rows, true))
}

fn write_orientation_row<W: Write>(w: &mut W, file: &str, bytes: &[u8]) -> Result<(usize, bool)> {
    let frame = match FrameIter::new(bytes).next() {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            log::warn!("{}: {}", file, e);
            return Ok((0, false));
        }
        None => {
            log::warn!("{}: empty orientation file", file);
            return Ok((0, false));
        }
    };
    let record = match decode_orientation(frame) {
        Ok(record) => record,
        Err(e) => {
            log::warn!("{}: {}", file, e);
            return Ok((0, false));
        }
    };

    writeln!(
        w,
        "{},0,,,,,{},{},{},{},{},{},{},",
        file,
        record.temp_external,
        record.temp_internal,
        record.depth,
        record.pitch,
        record.roll,
        record.heading,
        record.gyro_heading
    )?;
    Ok((1, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::imagenex881a::encode_ping;
    use crate::devices::imagenex881a::protocol::split_7bit;
    use crate::session::{write_config_snapshot, ScanStore};
    use crate::types::{PingRecord, Scan, StepDirection};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn ping(angle: f32, direction: StepDirection, fill: u8) -> PingRecord {
        let mut ping = PingRecord::new(angle, direction, vec![fill; 10], 10.0);
        ping.frame = encode_ping(&ping);
        ping
    }

    fn orientation_frame() -> Vec<u8> {
        let mut frame = vec![b'I', b'O', b'X', 0x10, 0x40, 0, 0, 10, 0, 0];
        let (lo, hi) = split_7bit(14);
        frame.extend_from_slice(&[lo, hi]);
        for value in [1200u16, 1200, 50, 900, 900, 900, 900] {
            let (lo, hi) = split_7bit(value);
            frame.extend_from_slice(&[lo, hi]);
        }
        frame.push(0xFC);
        frame
    }

    fn deployment(temp: &TempDir) -> ScanStore {
        write_config_snapshot(
            temp.path(),
            &SonarConfig {
                num_bins: 10,
                ..SonarConfig::default()
            },
        )
        .unwrap();
        let mut store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();

        let started = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut scan = Scan::new(1, started, 2);
        scan.push(ping(-30.0, StepDirection::Clockwise, 5));
        scan.push(ping(-29.7, StepDirection::CounterClockwise, 9));
        store.persist(&scan).unwrap();

        fs::write(temp.path().join("orientation_0001.dat"), orientation_frame()).unwrap();
        store
            .append_index(started, RECORD_ORIENTATION, "orientation_0001.dat")
            .unwrap();
        store
    }

    #[test]
    fn test_convert_run() {
        let temp = TempDir::new().unwrap();
        deployment(&temp);
        let output = default_output(temp.path());

        let summary = convert_run(temp.path(), "RunIndex.csv", &output).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.skipped, 0);

        let csv = fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], RUN_DATA_COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "scan_0001_2024-06-01_00.00.00.dat,1,-30.0,cw,10,0,,,,,,,,5,5,5,5,5,5,5,5,5,5"
        );
        assert!(lines[2].starts_with("scan_0001_2024-06-01_00.00.00.dat,2,-29.7,ccw,10,0,"));
        assert_eq!(lines[2].split(',').count(), 13 + 10);
        assert_eq!(lines[3], "orientation_0001.dat,0,,,,,20,20,5,0,0,90,90,");
    }

    #[test]
    fn test_missing_and_unknown_entries_skipped() {
        let temp = TempDir::new().unwrap();
        let mut store = deployment(&temp);
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 1, 0, 0).unwrap();
        store.append_index(at, "scan", "scan_0009_gone.dat").unwrap();
        store.append_index(at, "calibration", "cal.dat").unwrap();

        let output = temp.path().join("out.csv");
        let summary = convert_run(temp.path(), "RunIndex.csv", &output).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn test_truncated_scan_keeps_leading_rows() {
        let temp = TempDir::new().unwrap();
        let mut store = ScanStore::open(temp.path(), "RunIndex.csv").unwrap();
        let mut bytes = ping(0.0, StepDirection::Clockwise, 1).frame;
        bytes.extend_from_slice(&ping(0.3, StepDirection::Clockwise, 2).frame[..15]);
        fs::write(temp.path().join("scan_0001_x.dat"), bytes).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        store.append_index(at, "partial_scan", "scan_0001_x.dat").unwrap();

        let output = temp.path().join("out.csv");
        let summary = convert_run(temp.path(), "RunIndex.csv", &output).unwrap();
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.damaged, 1);
    }
}
