// MrcSleuth - core/export.rs
//
// JSON report and CSV inventory export.
// Core layer: writes to any Write trait object.

use crate::core::model::Component;
use crate::core::verdict::TestReport;
use crate::util::error::ExportError;
use std::io::Write;
use std::path::Path;

/// Write the test report as pretty-printed JSON followed by a newline, so
/// successive reports appended to one file stay line-separated.
pub fn export_report_json<W: Write>(
    report: &TestReport,
    mut writer: W,
    export_path: &Path,
) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, report).map_err(|e| ExportError::Json {
        path: export_path.to_path_buf(),
        source: e,
    })?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| ExportError::Io {
            path: export_path.to_path_buf(),
            source: e,
        })
}

/// Export the RAM inventory to CSV.
///
/// Writes: type, socket, channel, slot, model, vendor, size, form_factor,
/// speed, timings
pub fn export_inventory_csv<W: Write>(
    components: &[Component],
    writer: W,
    export_path: &Path,
) -> Result<usize, ExportError> {
    let csv_err = |e: csv::Error| ExportError::Csv {
        path: export_path.to_path_buf(),
        source: e,
    };
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer
        .write_record([
            "type",
            "socket",
            "channel",
            "slot",
            "model",
            "vendor",
            "size",
            "form_factor",
            "speed",
            "timings",
        ])
        .map_err(csv_err)?;

    for c in components {
        csv_writer
            .write_record([
                c.kind.as_str(),
                c.socket.as_str(),
                c.channel.as_str(),
                c.slot.as_str(),
                c.model.as_deref().unwrap_or(""),
                c.vendor.as_deref().unwrap_or(""),
                c.size.as_deref().unwrap_or(""),
                c.form_factor.as_deref().unwrap_or(""),
                c.speed.as_deref().unwrap_or(""),
                c.timings.as_deref().unwrap_or(""),
            ])
            .map_err(csv_err)?;
    }

    csv_writer.flush().map_err(|e| ExportError::Io {
        path: export_path.to_path_buf(),
        source: e,
    })?;

    Ok(components.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::markers::BootProgress;
    use crate::core::verdict::{Status, Verdict};
    use chrono::Utc;

    fn component(slot: &str) -> Component {
        Component {
            kind: "RAM".to_string(),
            socket: "Socket 0".to_string(),
            channel: "Channel 0".to_string(),
            slot: slot.to_string(),
            model: Some("M393A2K43BB1-CTD".to_string()),
            vendor: Some("Samsung".to_string()),
            size: None,
            form_factor: Some("RDIMM".to_string()),
            speed: Some("2666".to_string()),
            timings: Some("MT/s".to_string()),
        }
    }

    #[test]
    fn test_inventory_csv_export() {
        let mut buf = Vec::new();
        let count = export_inventory_csv(
            &[component("Dimm 0"), component("Dimm 1")],
            &mut buf,
            Path::new("inventory.csv"),
        )
        .unwrap();
        assert_eq!(count, 2);

        let output = String::from_utf8(buf).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("type,socket,channel,slot,model,vendor,size,form_factor,speed,timings")
        );
        assert_eq!(
            lines.next(),
            Some("RAM,Socket 0,Channel 0,Dimm 0,M393A2K43BB1-CTD,Samsung,,RDIMM,2666,MT/s")
        );
    }

    #[test]
    fn test_report_json_export() {
        let now = Utc::now();
        let report = TestReport {
            name: "signal_integrity".to_string(),
            status: Status::Passed,
            errors: Vec::new(),
            started_at: now,
            finished_at: now,
            verdict: Verdict {
                status: Status::Passed,
                errors: Vec::new(),
            },
            components: vec![component("Dimm 0")],
            faults: Vec::new(),
            diagnostics: Vec::new(),
            boot: BootProgress::default(),
            goals: Vec::new(),
            lines_processed: 10,
            blocks_dispatched: 2,
        };
        let mut buf = Vec::new();
        export_report_json(&report, &mut buf, Path::new("stdout")).unwrap();

        let output = String::from_utf8(buf).unwrap();
        assert!(output.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["status"], "PASSED");
        assert_eq!(value["components"][0]["form factor"], "RDIMM");
        assert_eq!(value["components"][0]["type"], "RAM");
    }
}
