//! Configuration protocol for generation-1 Plug S hardware: discrete REST
//! calls against the `/settings` resource tree, form-encoded bodies, and a
//! full `/settings` readback to confirm what the device actually applied.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::{
    device::{self, ConfigSnapshot},
    workspace::ProvisioningTarget,
};

/// Relay auto-on timer pushed during provisioning: the plug re-energizes
/// its output two minutes after losing power.
const RELAY_AUTO_ON_SECS: u32 = 120;
const MQTT_UPDATE_PERIOD_SECS: u32 = 300;

#[derive(Debug, Deserialize)]
struct PlugSettings {
    mqtt: MqttSettings,
    #[serde(default)]
    relays: Vec<RelaySettings>,
}

#[derive(Debug, Deserialize)]
struct MqttSettings {
    #[serde(default)]
    id: String,
    #[serde(default)]
    server: String,
    #[serde(default)]
    enable: bool,
    #[serde(default)]
    retain: bool,
    #[serde(default)]
    user: String,
    #[serde(default)]
    update_period: u32,
}

#[derive(Debug, Deserialize)]
struct RelaySettings {
    #[serde(default)]
    auto_on: f64,
}

#[derive(Debug, Serialize)]
struct MqttForm<'a> {
    mqtt_enable: bool,
    mqtt_retain: bool,
    mqtt_user: &'a str,
    mqtt_update_period: u32,
    mqtt_server: &'a str,
}

#[derive(Debug, Serialize)]
struct StationForm<'a> {
    ssid: &'a str,
    key: &'a str,
}

/// Pushes the target configuration and returns the readback snapshot.
/// The primary station is written last: once the device starts switching
/// to it the AP link can drop at any moment.
pub fn apply(
    client: &Client,
    base_url: &str,
    target: &ProvisioningTarget,
) -> Result<ConfigSnapshot> {
    let settings_url = format!("{base_url}/settings");

    let current: PlugSettings = device::get_json(client, &settings_url)
        .context("reading current settings failed")?;
    let mqtt_server = device::rewrite_mqtt_server(&current.mqtt.server);

    device::post_form(
        client,
        &format!("{settings_url}/relay/0"),
        &[("auto_on", RELAY_AUTO_ON_SECS.to_string())],
    )?;
    device::post_form(
        client,
        &settings_url,
        &MqttForm {
            mqtt_enable: true,
            mqtt_retain: true,
            mqtt_user: "",
            mqtt_update_period: MQTT_UPDATE_PERIOD_SECS,
            mqtt_server: &mqtt_server,
        },
    )?;
    device::post_form(
        client,
        &format!("{settings_url}/sta1"),
        &StationForm {
            ssid: &target.backup_ssid,
            key: &target.backup_key,
        },
    )?;
    device::post_form(
        client,
        &format!("{settings_url}/sta"),
        &StationForm {
            ssid: &target.ssid,
            key: &target.key,
        },
    )?;

    let confirmed: PlugSettings = device::get_json(client, &settings_url)
        .context("settings readback failed")?;
    Ok(snapshot_from(&confirmed))
}

fn snapshot_from(settings: &PlugSettings) -> ConfigSnapshot {
    ConfigSnapshot {
        mqtt_server: settings.mqtt.server.clone(),
        mqtt_enable: settings.mqtt.enable.to_string(),
        mqtt_retain: settings.mqtt.retain.to_string(),
        mqtt_user: settings.mqtt.user.clone(),
        mqtt_update_period: settings.mqtt.update_period.to_string(),
        relay_auto_on: settings
            .relays
            .first()
            .map(|relay| relay.auto_on.to_string())
            .unwrap_or_default(),
        physical_id: settings.mqtt.id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::{snapshot_from, PlugSettings};

    const SETTINGS_FIXTURE: &str = r#"{
        "device": {"type": "SHPLG-S", "mac": "C45BBE4C3B04"},
        "mqtt": {
            "enable": true,
            "server": "35.206.187.30:1883",
            "id": "shellyplug-s-4C3B04",
            "user": "",
            "retain": true,
            "update_period": 300
        },
        "relays": [{"ison": false, "auto_on": 120.0, "auto_off": 0.0}]
    }"#;

    #[test]
    fn readback_snapshot_takes_values_verbatim() {
        let settings: PlugSettings =
            serde_json::from_str(SETTINGS_FIXTURE).expect("settings fixture");
        let snapshot = snapshot_from(&settings);
        assert_eq!(snapshot.mqtt_server, "35.206.187.30:1883");
        assert_eq!(snapshot.mqtt_enable, "true");
        assert_eq!(snapshot.mqtt_retain, "true");
        assert_eq!(snapshot.mqtt_update_period, "300");
        assert_eq!(snapshot.relay_auto_on, "120");
        assert_eq!(snapshot.physical_id, "shellyplug-s-4C3B04");
    }

    #[test]
    fn readback_without_relays_leaves_auto_on_blank() {
        let settings: PlugSettings =
            serde_json::from_str(r#"{"mqtt": {"server": "10.0.0.1:1883"}}"#)
                .expect("minimal settings");
        let snapshot = snapshot_from(&settings);
        assert!(snapshot.relay_auto_on.is_empty());
        assert_eq!(snapshot.mqtt_enable, "false");
    }
}
