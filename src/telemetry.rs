use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::blocking::Client;
use serde::Serialize;

use crate::{env_utils, logging::Logger};

const DEFAULT_RAWDATA_URL: &str = "https://rawdata-cifpsw2ysq-ew.a.run.app";

const TOPIC: &str = "SHELLY";
const PACKET_VERSION: u32 = 1;

/// Sensor type for the device identity / target-SSID report.
const SENSOR_SSID_REPORT: u32 = 38;
/// Sensor type for the restart / tool-version report.
const SENSOR_RESTART_REPORT: u32 = 0;

#[derive(Clone, Debug, Serialize)]
pub struct RawEntry {
    physical_id: String,
    hub_id: String,
    measured_ts: String,
    relayed_ts: String,
    sensor_type: u32,
    topic: &'static str,
    value: String,
    packet_version: u32,
}

pub fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub fn ssid_report(physical_id: &str, hub_id: &str, ssid: &str) -> RawEntry {
    entry(physical_id, hub_id, SENSOR_SSID_REPORT, ssid.to_string())
}

pub fn restart_report(physical_id: &str, hub_id: &str, version_label: &str) -> RawEntry {
    let value = format!(
        "Restart cause: 0; Version: {version_label}, Woke: {}",
        utc_timestamp()
    );
    entry(physical_id, hub_id, SENSOR_RESTART_REPORT, value)
}

fn entry(physical_id: &str, hub_id: &str, sensor_type: u32, value: String) -> RawEntry {
    let now = utc_timestamp();
    RawEntry {
        physical_id: physical_id.to_string(),
        hub_id: hub_id.to_string(),
        measured_ts: now.clone(),
        relayed_ts: now,
        sensor_type,
        topic: TOPIC,
        value,
        packet_version: PACKET_VERSION,
    }
}

/// Fire-and-forget delivery: the report is the artifact of record, so a
/// failed telemetry post only warns.
pub fn send(client: &Client, logger: &mut Logger, entry: &RawEntry) {
    if let Err(err) = post_entry(client, entry) {
        logger.warn(format!(
            "telemetry post (sensor {}) failed: {err:#}",
            entry.sensor_type
        ));
    }
}

fn post_entry(client: &Client, entry: &RawEntry) -> Result<()> {
    let base = env_utils::env_or("PLUGCTL_RAWDATA_URL", DEFAULT_RAWDATA_URL);
    let url = format!("{base}/rawentry");
    let response = client
        .post(&url)
        .form(entry)
        .send()
        .with_context(|| format!("POST {url} send failed"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("POST {url} failed: {status}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{restart_report, ssid_report, utc_timestamp};

    #[test]
    fn ssid_report_carries_the_target_network() {
        let entry = ssid_report("shellyplug-s-4C3B04", "acme", "CustomerNet");
        assert_eq!(entry.sensor_type, 38);
        assert_eq!(entry.value, "CustomerNet");
        assert_eq!(entry.physical_id, "shellyplug-s-4C3B04");
        assert_eq!(entry.hub_id, "acme");
        assert_eq!(entry.packet_version, 1);
        assert_eq!(entry.measured_ts, entry.relayed_ts);
    }

    #[test]
    fn restart_report_names_the_tool_version() {
        let entry = restart_report("shellyplug-s-4C3B04", "acme", "v.0.1");
        assert_eq!(entry.sensor_type, 0);
        assert!(entry.value.starts_with("Restart cause: 0; Version: v.0.1"));
        assert!(entry.value.contains("Woke: "));
    }

    #[test]
    fn timestamps_are_utc_iso8601_with_z_suffix() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000000Z".len());
    }
}
