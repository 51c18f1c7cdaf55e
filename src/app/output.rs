// MrcSleuth - app/output.rs
//
// Report sinks. The JSON report goes to stdout or is appended to a file so
// repeated runs against one node accumulate in a single log; the inventory
// CSV always replaces its target.

use crate::core::export;
use crate::core::model::Component;
use crate::core::verdict::TestReport;
use crate::util::error::ExportError;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::Path;

/// Output target name that selects standard output.
pub const STDOUT_TARGET: &str = "stdout";

/// Write `report` to `target`: `stdout`, or a file path to append to.
pub fn save_report(report: &TestReport, target: &str) -> Result<(), ExportError> {
    if target == STDOUT_TARGET {
        let stdout = io::stdout();
        return export::export_report_json(report, stdout.lock(), Path::new(STDOUT_TARGET));
    }

    let path = Path::new(target);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ExportError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    export::export_report_json(report, BufWriter::new(file), path)?;
    tracing::info!(path = %path.display(), "Report appended");
    Ok(())
}

/// Write the RAM inventory to a CSV file at `path`, replacing it.
pub fn save_inventory(components: &[Component], path: &Path) -> Result<usize, ExportError> {
    let file = File::create(path).map_err(|e| ExportError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let count = export::export_inventory_csv(components, BufWriter::new(file), path)?;
    tracing::info!(path = %path.display(), modules = count, "Inventory exported");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::markers::BootProgress;
    use crate::core::verdict::{Status, Verdict};
    use chrono::Utc;

    fn report(name: &str) -> TestReport {
        let now = Utc::now();
        TestReport {
            name: name.to_string(),
            status: Status::Failed,
            errors: vec!["incomplete data: expected 2 sockets, found 0".to_string()],
            started_at: now,
            finished_at: now,
            verdict: Verdict {
                status: Status::Failed,
                errors: Vec::new(),
            },
            components: Vec::new(),
            faults: Vec::new(),
            diagnostics: Vec::new(),
            boot: BootProgress::default(),
            goals: Vec::new(),
            lines_processed: 0,
            blocks_dispatched: 0,
        }
    }

    #[test]
    fn test_report_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let target = path.to_str().unwrap();

        save_report(&report("first"), target).unwrap();
        save_report(&report("second"), target).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"name\": \"first\""));
        assert!(content.contains("\"name\": \"second\""));
        assert!(content.find("first").unwrap() < content.find("second").unwrap());
    }

    #[test]
    fn test_report_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("results.json");
        let err = save_report(&report("x"), path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
    }

    #[test]
    fn test_empty_inventory_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.csv");
        assert_eq!(save_inventory(&[], &path).unwrap(), 0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
