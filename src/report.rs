use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::logging::ensure_parent_dir;

pub const DEFAULT_REPORT_PATH: &str = "shelly-plugs.csv";

const HEADERS: [&str; 17] = [
    "version",
    "customer_name",
    "workspace_id",
    "device_name",
    "device_type",
    "mac_address",
    "provisioned_at",
    "wifi_name",
    "wifi_backup_name",
    "mqtt_server",
    "mqtt_enable",
    "mqtt_retain",
    "mqtt_user",
    "mqtt_update_period",
    "relay_auto_on",
    "wifi_remark",
    "remark",
];

/// One terminal provisioning attempt. Field order matches the report
/// column order; the numeric-looking readback values stay strings because
/// generation-2 devices leave several of them blank.
#[derive(Clone, Debug, Serialize)]
pub struct ReportRow {
    pub version: String,
    pub customer_name: String,
    pub workspace_id: i64,
    pub device_name: String,
    pub device_type: String,
    pub mac_address: String,
    pub provisioned_at: String,
    pub wifi_name: String,
    pub wifi_backup_name: String,
    pub mqtt_server: String,
    pub mqtt_enable: String,
    pub mqtt_retain: String,
    pub mqtt_user: String,
    pub mqtt_update_period: String,
    pub relay_auto_on: String,
    pub wifi_remark: String,
    pub remark: String,
}

/// In-memory report accumulator. Rows are only ever appended; `flush`
/// writes the whole report once, overwriting any previous file.
pub struct ReportSink {
    path: PathBuf,
    rows: Vec<ReportRow>,
}

impl ReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, row: ReportRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Serializes all accumulated rows in insertion order. The header line
    /// is written even for an empty report so a run without devices still
    /// leaves an auditable artifact.
    pub fn flush(&self) -> Result<()> {
        ensure_parent_dir(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&self.path)
            .with_context(|| format!("failed to create report file {}", self.path.display()))?;
        writer.write_record(HEADERS)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to write report file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ReportRow, ReportSink};

    fn row(device_name: &str, remark: &str) -> ReportRow {
        ReportRow {
            version: "v.0.1".to_string(),
            customer_name: "acme".to_string(),
            workspace_id: 22,
            device_name: device_name.to_string(),
            device_type: "SHPLG-S".to_string(),
            mac_address: "C45BBE4C3B04".to_string(),
            provisioned_at: "2024-01-01T00:00:00.000000Z".to_string(),
            wifi_name: "CustomerNet".to_string(),
            wifi_backup_name: "NNEHotspotTest".to_string(),
            mqtt_server: "35.206.187.30:1883".to_string(),
            mqtt_enable: "true".to_string(),
            mqtt_retain: "true".to_string(),
            mqtt_user: String::new(),
            mqtt_update_period: "300".to_string(),
            relay_auto_on: "120".to_string(),
            wifi_remark: String::new(),
            remark: remark.to_string(),
        }
    }

    #[test]
    fn flush_writes_rows_in_insertion_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.csv");
        let mut sink = ReportSink::new(&path);
        sink.append(row("shellyplug-s-one", "OK"));
        sink.append(row("shellyplug-s-two", "Failed: settings readback failed"));
        sink.flush().expect("flush");

        let contents = std::fs::read_to_string(&path).expect("report file");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("version,customer_name,workspace_id,device_name"));
        assert!(lines[1].contains("shellyplug-s-one"));
        assert!(lines[2].contains("shellyplug-s-two"));
    }

    #[test]
    fn empty_report_still_writes_the_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.csv");
        ReportSink::new(&path).flush().expect("flush");

        let contents = std::fs::read_to_string(&path).expect("report file");
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn flush_overwrites_a_previous_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.csv");

        let mut first = ReportSink::new(&path);
        first.append(row("shellyplug-s-old", "OK"));
        first.flush().expect("first flush");

        let mut second = ReportSink::new(&path);
        second.append(row("shellyplug-s-new", "OK"));
        second.flush().expect("second flush");

        let contents = std::fs::read_to_string(&path).expect("report file");
        assert!(!contents.contains("shellyplug-s-old"));
        assert!(contents.contains("shellyplug-s-new"));
    }

    #[test]
    fn remarks_with_commas_stay_one_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.csv");
        let mut sink = ReportSink::new(&path);
        sink.append(row("shellyplug-s-one", "Failed: POST failed, device gone"));
        sink.flush().expect("flush");

        let contents = std::fs::read_to_string(&path).expect("report file");
        assert!(contents.contains("\"Failed: POST failed, device gone\""));
    }
}
