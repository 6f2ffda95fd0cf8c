use std::{
    collections::VecDeque,
    fs,
    path::PathBuf,
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    device::{self, ConfigSnapshot, DeviceSession, Generation},
    gen1, gen2,
    logging::Logger,
    report::{ReportRow, ReportSink, DEFAULT_REPORT_PATH},
    scenario::{load_scenario, run_scenario, ScenarioRuntime},
    telemetry, wifi,
    workspace::{self, ProvisioningTarget},
};

#[derive(Clone, Debug)]
pub struct ProvisionOptions {
    pub filter: String,
    pub customer_name: String,
    pub workspace_id: i64,
    pub backup_ssid: String,
    pub backup_key: String,
    pub version_label: String,
    pub output_path: Option<PathBuf>,
}

/// Run pacing knobs. Defaults match the field procedure; a TOML file named
/// by PLUGCTL_PROFILE_PATH overrides individual fields.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct ProvisionProfile {
    pub device_attempts: u32,
    pub empty_scan_limit: u32,
    pub associate_settle_ms: u64,
    pub rescan_delay_ms: u64,
}

impl Default for ProvisionProfile {
    fn default() -> Self {
        Self {
            device_attempts: 2,
            empty_scan_limit: 2,
            // Association plus the device AP's DHCP handshake settle.
            associate_settle_ms: 2_000,
            rescan_delay_ms: 1_500,
        }
    }
}

pub fn load_profile() -> Result<ProvisionProfile> {
    match std::env::var("PLUGCTL_PROFILE_PATH") {
        Ok(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading PLUGCTL_PROFILE_PATH: {path}"))?;
            toml::from_str::<ProvisionProfile>(&raw).context("invalid TOML provisioning profile")
        }
        Err(_) => Ok(ProvisionProfile::default()),
    }
}

pub fn run_provision(logger: &mut Logger, opts: ProvisionOptions) -> Result<()> {
    let profile = load_profile()?;
    if profile.device_attempts == 0 {
        return Err(anyhow!("provisioning profile must set device_attempts >= 1"));
    }

    let scenario = load_scenario(
        &PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios/provision.sw.yaml"),
    )?;
    let client = device::make_client()?;
    let report_path = opts
        .output_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH));

    let mut runtime = ProvisionRuntime {
        logger,
        client,
        profile,
        opts,
        target: None,
        queue: VecDeque::new(),
        empty_scans: 0,
        sink: ReportSink::new(report_path),
        provisioned: 0,
        failed: 0,
        dropped: 0,
        abandoned: 0,
    };
    run_scenario(&scenario, &mut runtime, &json!({}))?;
    Ok(())
}

/// Lists the device access points matching the filter, without touching
/// them. Useful for checking a crate of plugs before a provisioning run.
pub fn run_scan(logger: &mut Logger, filter: &str) -> Result<()> {
    let networks = wifi::scan_networks(filter)?;
    if networks.is_empty() {
        logger.info(format!("no visible networks contain '{filter}'"));
        return Ok(());
    }
    logger.info(format!("{} matching device access points:", networks.len()));
    for network in networks {
        logger.info(format!("  {network}"));
    }
    Ok(())
}

struct ProvisionRuntime<'a> {
    logger: &'a mut Logger,
    client: Client,
    profile: ProvisionProfile,
    opts: ProvisionOptions,
    target: Option<ProvisioningTarget>,
    queue: VecDeque<String>,
    empty_scans: u32,
    sink: ReportSink,
    provisioned: u32,
    failed: u32,
    dropped: u32,
    abandoned: u32,
}

impl ScenarioRuntime for ProvisionRuntime<'_> {
    fn invoke(&mut self, action: &str, _args: &Value, context: &mut Value) -> Result<()> {
        match action {
            "start_run" => {
                ctx_set_number(context, "device_count", 0)?;
                ctx_set_number(context, "devices_remaining", 0)?;
                ctx_set_number(context, "empty_scans", 0)?;
                ctx_set_number(context, "empty_scan_limit", self.profile.empty_scan_limit as u64)?;
                self.logger.info(format!(
                    "provisioning run for customer '{}' (workspace {}), device filter '{}'",
                    self.opts.customer_name, self.opts.workspace_id, self.opts.filter
                ));
                Ok(())
            }
            "resolve_workspace" => {
                let target = match workspace::fetch_records(&self.client, &self.opts.customer_name)
                {
                    Ok(records) => workspace::select_target(
                        &records,
                        self.opts.workspace_id,
                        &self.opts.backup_ssid,
                        &self.opts.backup_key,
                    ),
                    Err(err) => {
                        self.logger.warn(format!(
                            "workspace lookup failed ({err:#}); continuing with backup WiFi"
                        ));
                        workspace::backup_target(&self.opts.backup_ssid, &self.opts.backup_key)
                    }
                };
                if target.remark.is_empty() {
                    self.logger
                        .info(format!("target WiFi: {} (from workspace)", target.ssid));
                } else {
                    self.logger
                        .warn(format!("target WiFi: {} ({})", target.ssid, target.remark));
                }
                self.target = Some(target);
                Ok(())
            }
            "scan_devices" => {
                if self.empty_scans > 0 {
                    thread::sleep(Duration::from_millis(self.profile.rescan_delay_ms));
                }
                let found = wifi::scan_networks(&self.opts.filter)
                    .context("WiFi discovery failed")?;
                if found.is_empty() {
                    self.empty_scans += 1;
                    self.logger.info(format!(
                        "no visible networks contain '{}' (empty scan {}/{})",
                        self.opts.filter, self.empty_scans, self.profile.empty_scan_limit
                    ));
                } else {
                    self.logger
                        .info(format!("discovered devices: {}", found.join(", ")));
                    self.queue = found.into();
                }
                ctx_set_number(context, "device_count", self.queue.len() as u64)?;
                ctx_set_number(context, "empty_scans", self.empty_scans as u64)?;
                Ok(())
            }
            "provision_next" => {
                if let Some(device_name) = self.queue.pop_front() {
                    self.provision_device(&device_name)?;
                }
                ctx_set_number(context, "devices_remaining", self.queue.len() as u64)?;
                Ok(())
            }
            "flush_report" => {
                self.sink.flush()?;
                self.logger.info(format!(
                    "report written to {} ({} rows)",
                    self.sink.path().display(),
                    self.sink.len()
                ));
                Ok(())
            }
            "print_summary" => {
                self.logger.info(format!(
                    "summary provisioned={} failed={} handed_over={} abandoned={}",
                    self.provisioned, self.failed, self.dropped, self.abandoned
                ));
                Ok(())
            }
            _ => Err(anyhow!("unknown scenario action: {action}")),
        }
    }
}

impl ProvisionRuntime<'_> {
    fn target(&self) -> Result<ProvisioningTarget> {
        self.target
            .clone()
            .ok_or_else(|| anyhow!("workspace must be resolved before provisioning"))
    }

    /// Full per-device cycle. Connect/identify errors consume attempts and
    /// retry; everything after identification is single-shot with the
    /// record-vs-drop policy applied to the outcome.
    fn provision_device(&mut self, device_name: &str) -> Result<()> {
        let settle = Duration::from_millis(self.profile.associate_settle_ms);
        let attempts = self.profile.device_attempts;

        for attempt in 1..=attempts {
            let session = match DeviceSession::connect(&self.client, device_name, settle) {
                Ok(session) => session,
                Err(err) => {
                    self.logger.warn(format!(
                        "{device_name}: connect attempt {attempt}/{attempts} failed: {err:#}"
                    ));
                    if attempt == attempts {
                        self.logger
                            .warn(format!("{device_name}: abandoned after {attempts} attempts"));
                        self.abandoned += 1;
                    }
                    continue;
                }
            };

            self.logger.info(format!(
                "{device_name}: identified as {} (mac {})",
                session.identity.display_type(),
                session.identity.mac
            ));
            self.configure_and_record(&session)?;
            return Ok(());
        }
        Ok(())
    }

    fn configure_and_record(&mut self, session: &DeviceSession) -> Result<()> {
        let target = self.target()?;
        let generation = session.identity.generation();
        let outcome = match generation {
            Generation::PlugS => gen1::apply(&self.client, &session.base_url, &target),
            Generation::Gen2 => gen2::apply(&self.client, &session.base_url, &target),
        };

        match outcome {
            Ok(snapshot) => {
                let row = self.build_row(session, &target, &snapshot, "OK".to_string());
                self.sink.append(row);
                self.provisioned += 1;
                self.logger
                    .info(format!("{}: configuration confirmed", session.ssid));

                self.send_telemetry(session, &target, &snapshot);

                if generation == Generation::Gen2 {
                    match gen2::enable_station(&self.client, &session.base_url, &target) {
                        Ok(()) => self
                            .logger
                            .info(format!("{}: station enabled", session.ssid)),
                        Err(err) => self.logger.info(format!(
                            "{}: station enable dropped the link (expected): {err:#}",
                            session.ssid
                        )),
                    }
                }
            }
            Err(err) if is_connection_dropped(&err) => {
                self.dropped += 1;
                self.logger.info(format!(
                    "{}: device left its access point during configuration (expected handover)",
                    session.ssid
                ));
            }
            Err(err) => {
                self.failed += 1;
                let row = self.build_row(
                    session,
                    &target,
                    &ConfigSnapshot::default(),
                    failure_remark(&err),
                );
                self.sink.append(row);
                self.logger
                    .error(format!("{}: configuration failed: {err:#}", session.ssid));
            }
        }
        Ok(())
    }

    fn build_row(
        &self,
        session: &DeviceSession,
        target: &ProvisioningTarget,
        snapshot: &ConfigSnapshot,
        remark: String,
    ) -> ReportRow {
        ReportRow {
            version: self.opts.version_label.clone(),
            customer_name: self.opts.customer_name.clone(),
            workspace_id: self.opts.workspace_id,
            device_name: session.ssid.clone(),
            device_type: session.identity.display_type(),
            mac_address: session.identity.mac.clone(),
            provisioned_at: telemetry::utc_timestamp(),
            wifi_name: target.ssid.clone(),
            wifi_backup_name: target.backup_ssid.clone(),
            mqtt_server: snapshot.mqtt_server.clone(),
            mqtt_enable: snapshot.mqtt_enable.clone(),
            mqtt_retain: snapshot.mqtt_retain.clone(),
            mqtt_user: snapshot.mqtt_user.clone(),
            mqtt_update_period: snapshot.mqtt_update_period.clone(),
            relay_auto_on: snapshot.relay_auto_on.clone(),
            wifi_remark: target.remark.clone(),
            remark,
        }
    }

    fn send_telemetry(
        &mut self,
        session: &DeviceSession,
        target: &ProvisioningTarget,
        snapshot: &ConfigSnapshot,
    ) {
        // Devices without an MQTT client id yet are reported by MAC.
        let physical_id = if snapshot.physical_id.is_empty() {
            session.identity.mac.as_str()
        } else {
            snapshot.physical_id.as_str()
        };
        let ssid_event =
            telemetry::ssid_report(physical_id, &self.opts.customer_name, &target.ssid);
        telemetry::send(&self.client, self.logger, &ssid_event);
        let restart_event = telemetry::restart_report(
            physical_id,
            &self.opts.customer_name,
            &self.opts.version_label,
        );
        telemetry::send(&self.client, self.logger, &restart_event);
    }
}

pub fn failure_remark(err: &anyhow::Error) -> String {
    format!("Failed: {err:#}")
}

/// Distinguishes the expected mid-configuration handover (the device drops
/// its AP once the new station config lands) from real configuration
/// failures. Transport-level connect/timeout errors anywhere in the chain
/// mean handover; HTTP status or payload errors mean failure.
pub fn is_connection_dropped(err: &anyhow::Error) -> bool {
    if err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|err| err.is_connect() || err.is_timeout())
    }) {
        return true;
    }

    let message = format!("{err:#}").to_lowercase();
    message.contains("connection reset")
        || message.contains("connection refused")
        || message.contains("connection closed")
        || message.contains("timed out")
}

fn ctx_set_number(context: &mut Value, key: &str, value: u64) -> Result<()> {
    let map = context
        .as_object_mut()
        .ok_or_else(|| anyhow!("scenario context is not an object"))?;
    map.insert(key.to_string(), Value::from(value));
    Ok(())
}
