//! Configuration protocol for generation-2 firmware: `WiFi.SetConfig` and
//! `MQTT.SetConfig` RPCs with JSON `{"config": ...}` bodies, `GetConfig`
//! readbacks, and a separate station-enable call that actually moves the
//! device onto the new network.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::{
    device::{self, ConfigSnapshot},
    workspace::ProvisioningTarget,
};

#[derive(Debug, Deserialize)]
struct MqttConfig {
    #[serde(default)]
    enable: bool,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WifiConfig {
    #[serde(default)]
    sta: Option<StationStatus>,
}

#[derive(Debug, Deserialize)]
struct StationStatus {
    #[serde(default)]
    ssid: Option<String>,
}

#[derive(Debug, Serialize)]
struct WifiSetRequest<'a> {
    config: WifiSetConfig<'a>,
}

#[derive(Debug, Serialize)]
struct WifiSetConfig<'a> {
    sta: StationSet<'a>,
    sta1: StationSet<'a>,
}

#[derive(Debug, Serialize)]
struct StationSet<'a> {
    ssid: &'a str,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    enable: Option<bool>,
}

#[derive(Debug, Serialize)]
struct MqttSetRequest<'a> {
    config: MqttSetConfig<'a>,
}

#[derive(Debug, Serialize)]
struct MqttSetConfig<'a> {
    enable: bool,
    user: &'a str,
    server: &'a str,
}

/// Pushes station and MQTT configuration and returns the readback
/// snapshot. The station stays disabled here; `enable_station` flips it on
/// after the result has been recorded.
pub fn apply(
    client: &Client,
    base_url: &str,
    target: &ProvisioningTarget,
) -> Result<ConfigSnapshot> {
    let current: MqttConfig =
        device::get_json(client, &format!("{base_url}/rpc/MQTT.GetConfig"))
            .context("reading current MQTT config failed")?;
    let mqtt_server = device::rewrite_mqtt_server(current.server.as_deref().unwrap_or_default());

    device::post_json(
        client,
        &format!("{base_url}/rpc/WiFi.SetConfig"),
        &WifiSetRequest {
            config: wifi_config(target, None),
        },
    )?;
    device::post_json(
        client,
        &format!("{base_url}/rpc/MQTT.SetConfig"),
        &MqttSetRequest {
            config: MqttSetConfig {
                enable: true,
                user: "",
                server: &mqtt_server,
            },
        },
    )?;

    let wifi_confirmed: WifiConfig =
        device::get_json(client, &format!("{base_url}/rpc/WiFi.GetConfig"))
            .context("WiFi config readback failed")?;
    if !station_confirmed(&wifi_confirmed, target) {
        return Err(anyhow!(
            "WiFi readback does not show target station {}",
            target.ssid
        ));
    }
    let mqtt_confirmed: MqttConfig =
        device::get_json(client, &format!("{base_url}/rpc/MQTT.GetConfig"))
            .context("MQTT config readback failed")?;

    Ok(snapshot_from(&mqtt_confirmed))
}

/// Activates the configured primary station. The device drops its access
/// point while switching, so callers treat transport errors here as the
/// expected end of the session.
pub fn enable_station(
    client: &Client,
    base_url: &str,
    target: &ProvisioningTarget,
) -> Result<()> {
    device::post_json(
        client,
        &format!("{base_url}/rpc/WiFi.SetConfig"),
        &WifiSetRequest {
            config: wifi_config(target, Some(true)),
        },
    )
}

fn wifi_config<'a>(target: &'a ProvisioningTarget, enable: Option<bool>) -> WifiSetConfig<'a> {
    WifiSetConfig {
        sta: StationSet {
            ssid: &target.ssid,
            key: &target.key,
            enable,
        },
        sta1: StationSet {
            ssid: &target.backup_ssid,
            key: &target.backup_key,
            enable: None,
        },
    }
}

/// True when the readback station names the target network. A mismatch
/// means the push did not stick and is treated as a configuration failure.
fn station_confirmed(wifi: &WifiConfig, target: &ProvisioningTarget) -> bool {
    wifi.sta
        .as_ref()
        .and_then(|sta| sta.ssid.as_deref())
        .is_some_and(|ssid| ssid == target.ssid)
}

fn snapshot_from(mqtt: &MqttConfig) -> ConfigSnapshot {
    ConfigSnapshot {
        mqtt_server: mqtt.server.clone().unwrap_or_default(),
        mqtt_enable: mqtt.enable.to_string(),
        mqtt_user: mqtt.user.clone().unwrap_or_default(),
        physical_id: mqtt.client_id.clone().unwrap_or_default(),
        ..ConfigSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::{snapshot_from, station_confirmed, wifi_config, MqttConfig, WifiConfig};
    use crate::workspace::ProvisioningTarget;

    fn target() -> ProvisioningTarget {
        ProvisioningTarget {
            ssid: "CustomerNet".to_string(),
            key: "secret".to_string(),
            backup_ssid: "NNEHotspotTest".to_string(),
            backup_key: "NNEHotspotTest".to_string(),
            remark: String::new(),
        }
    }

    #[test]
    fn set_config_body_carries_both_stations() {
        let body = serde_json::to_value(super::WifiSetRequest {
            config: wifi_config(&target(), None),
        })
        .expect("serializable body");
        assert_eq!(body["config"]["sta"]["ssid"], "CustomerNet");
        assert_eq!(body["config"]["sta1"]["ssid"], "NNEHotspotTest");
        assert!(body["config"]["sta"].get("enable").is_none());
    }

    #[test]
    fn enable_request_sets_only_the_primary_station() {
        let body = serde_json::to_value(super::WifiSetRequest {
            config: wifi_config(&target(), Some(true)),
        })
        .expect("serializable body");
        assert_eq!(body["config"]["sta"]["enable"], true);
        assert!(body["config"]["sta1"].get("enable").is_none());
    }

    #[test]
    fn snapshot_leaves_gen1_only_fields_blank() {
        let mqtt: MqttConfig = serde_json::from_str(
            r#"{"enable": true, "server": "35.206.187.30:1883", "client_id": "shellyplusplugs-a8032ab12345", "user": null}"#,
        )
        .expect("mqtt readback");

        let snapshot = snapshot_from(&mqtt);
        assert_eq!(snapshot.mqtt_server, "35.206.187.30:1883");
        assert_eq!(snapshot.mqtt_enable, "true");
        assert_eq!(snapshot.physical_id, "shellyplusplugs-a8032ab12345");
        assert!(snapshot.mqtt_retain.is_empty());
        assert!(snapshot.mqtt_update_period.is_empty());
        assert!(snapshot.relay_auto_on.is_empty());
    }

    #[test]
    fn station_readback_must_name_the_target_network() {
        let confirmed: WifiConfig =
            serde_json::from_str(r#"{"sta": {"ssid": "CustomerNet"}}"#).expect("wifi readback");
        let stale: WifiConfig =
            serde_json::from_str(r#"{"sta": {"ssid": "OldNet"}}"#).expect("wifi readback");
        let empty: WifiConfig = serde_json::from_str("{}").expect("wifi readback");

        assert!(station_confirmed(&confirmed, &target()));
        assert!(!station_confirmed(&stale, &target()));
        assert!(!station_confirmed(&empty, &target()));
    }
}
