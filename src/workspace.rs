use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use urlencoding::encode;

use crate::env_utils;

const DEFAULT_WORKSPACE_URL: &str = "https://workspaces-services-cifpsw2ysq-ew.a.run.app";

/// Value the directory stores when a workspace has no WiFi on file.
const PLACEHOLDER: &str = "not provided";

const FALLBACK_REMARK: &str = "Primary wifi not found";

#[derive(Clone, Debug, Deserialize)]
pub struct WorkspaceRecord {
    pub id: i64,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub ssid_pass: Option<String>,
}

/// WiFi credentials the devices are pointed at, resolved once per run.
/// `remark` is empty when the workspace lookup produced the primary pair
/// and human-readable when the run degraded to the backup network.
#[derive(Clone, Debug)]
pub struct ProvisioningTarget {
    pub ssid: String,
    pub key: String,
    pub backup_ssid: String,
    pub backup_key: String,
    pub remark: String,
}

pub fn fetch_records(client: &Client, customer: &str) -> Result<Vec<WorkspaceRecord>> {
    let base = env_utils::env_or("PLUGCTL_WORKSPACE_URL", DEFAULT_WORKSPACE_URL);
    let url = format!("{base}/api/workspaces?text={}", encode(customer));
    let response = client
        .get(&url)
        .send()
        .with_context(|| format!("GET {url} send failed"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("GET {url} failed: {status}"));
    }
    response
        .json::<Vec<WorkspaceRecord>>()
        .context("invalid workspace directory payload")
}

/// Picks the first record matching the workspace id that carries real
/// credentials; anything else degrades to the backup pair with a remark.
pub fn select_target(
    records: &[WorkspaceRecord],
    workspace_id: i64,
    backup_ssid: &str,
    backup_key: &str,
) -> ProvisioningTarget {
    for record in records {
        if record.id != workspace_id {
            continue;
        }
        let ssid = record.ssid.as_deref().unwrap_or(PLACEHOLDER);
        let key = record.ssid_pass.as_deref().unwrap_or(PLACEHOLDER);
        if ssid != PLACEHOLDER && key != PLACEHOLDER {
            return ProvisioningTarget {
                ssid: ssid.to_string(),
                key: key.to_string(),
                backup_ssid: backup_ssid.to_string(),
                backup_key: backup_key.to_string(),
                remark: String::new(),
            };
        }
    }
    backup_target(backup_ssid, backup_key)
}

pub fn backup_target(backup_ssid: &str, backup_key: &str) -> ProvisioningTarget {
    ProvisioningTarget {
        ssid: backup_ssid.to_string(),
        key: backup_key.to_string(),
        backup_ssid: backup_ssid.to_string(),
        backup_key: backup_key.to_string(),
        remark: FALLBACK_REMARK.to_string(),
    }
}
