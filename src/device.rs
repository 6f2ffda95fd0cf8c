use std::{thread, time::Duration};

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::{env_utils, wifi};

/// Gateway address every Shelly access point hands out to its single
/// station while in provisioning mode.
const DEFAULT_DEVICE_HOST: &str = "192.168.33.1";

pub fn device_host() -> String {
    env_utils::env_or("PLUGCTL_DEVICE_HOST", DEFAULT_DEVICE_HOST)
}

pub fn make_client() -> Result<Client> {
    let timeout_s = env_utils::parse_env_f64("PLUGCTL_HTTP_TIMEOUT_SEC", 8.0)?;
    let connect_timeout_s = env_utils::parse_env_f64("PLUGCTL_CONNECT_TIMEOUT_SEC", 4.0)?;
    Ok(Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs_f64(timeout_s.max(0.1)))
        .connect_timeout(Duration::from_secs_f64(connect_timeout_s.max(0.1)))
        .build()?)
}

/// Identity reported by `GET /shelly`. Generation-1 plugs report a `type`
/// string; generation-2 firmware omits it and reports `model` instead.
#[derive(Clone, Debug, Deserialize)]
pub struct DeviceIdentity {
    #[serde(rename = "type", default)]
    pub hardware_type: String,
    pub mac: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl DeviceIdentity {
    pub fn generation(&self) -> Generation {
        classify_generation(&self.hardware_type)
    }

    pub fn display_type(&self) -> String {
        if self.hardware_type.is_empty() {
            self.model.clone().unwrap_or_else(|| "UNKNOWN".to_string())
        } else {
            self.hardware_type.to_uppercase()
        }
    }
}

/// The two configuration-API families this tool knows how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Generation {
    /// Plug S hardware: discrete REST calls against `/settings`.
    PlugS,
    /// Everything else: `WiFi.SetConfig` / `MQTT.SetConfig` style RPCs.
    Gen2,
}

pub fn classify_generation(hardware_type: &str) -> Generation {
    if hardware_type.eq_ignore_ascii_case("SHPLG-S") {
        Generation::PlugS
    } else {
        Generation::Gen2
    }
}

/// Provisioning relay broker every plug is pointed at. The device keeps
/// whatever port its firmware already reported.
pub const MQTT_RELAY_HOST: &str = "35.206.187.30";

pub fn rewrite_mqtt_server(reported: &str) -> String {
    let port = reported
        .rsplit_once(':')
        .map(|(_, port)| port)
        .filter(|port| !port.is_empty() && port.chars().all(|ch| ch.is_ascii_digit()))
        .unwrap_or("1883");
    format!("{MQTT_RELAY_HOST}:{port}")
}

/// Configuration values read back from the device after a push. The report
/// records these verbatim; generation 2 firmware has no retain/update
/// period/auto-on knobs in its readback, so those stay empty there.
#[derive(Clone, Debug, Default)]
pub struct ConfigSnapshot {
    pub mqtt_server: String,
    pub mqtt_enable: String,
    pub mqtt_retain: String,
    pub mqtt_user: String,
    pub mqtt_update_period: String,
    pub relay_auto_on: String,
    /// MQTT client identifier, used as the telemetry physical id.
    pub physical_id: String,
}

/// An active association with one device access point. Creating the next
/// session supersedes this one; the host radio can only hold one.
pub struct DeviceSession {
    pub ssid: String,
    pub base_url: String,
    pub identity: DeviceIdentity,
}

impl DeviceSession {
    /// Associates the host radio with the device AP, waits for the
    /// association to settle, and fetches the device identity.
    pub fn connect(client: &Client, ssid: &str, settle: Duration) -> Result<DeviceSession> {
        // Bench runs against an already-reachable device (usually via
        // PLUGCTL_DEVICE_HOST) skip the radio entirely.
        let skip_associate = env_utils::parse_env_bool01("PLUGCTL_SKIP_ASSOCIATE", false)?;
        if !skip_associate {
            wifi::associate(ssid)?;
            thread::sleep(settle);
        }

        let base_url = format!("http://{}", device_host());
        let identity = fetch_identity(client, &base_url)
            .with_context(|| format!("identity fetch from {ssid} failed"))?;

        Ok(DeviceSession {
            ssid: ssid.to_string(),
            base_url,
            identity,
        })
    }
}

fn fetch_identity(client: &Client, base_url: &str) -> Result<DeviceIdentity> {
    get_json(client, &format!("{base_url}/shelly"))
}

pub fn get_json<T: serde::de::DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("GET {url} send failed"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("GET {url} failed: {status}"));
    }
    response
        .json::<T>()
        .with_context(|| format!("invalid payload from {url}"))
}

pub fn post_form<F: serde::Serialize + ?Sized>(client: &Client, url: &str, form: &F) -> Result<()> {
    let response = client
        .post(url)
        .form(form)
        .send()
        .with_context(|| format!("POST {url} send failed"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("POST {url} failed: {status}"));
    }
    Ok(())
}

pub fn post_json<B: serde::Serialize + ?Sized>(client: &Client, url: &str, body: &B) -> Result<()> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .with_context(|| format!("POST {url} send failed"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("POST {url} failed: {status}"));
    }
    Ok(())
}
