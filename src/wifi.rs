use std::process::Command;

use anyhow::{anyhow, Context, Result};
use regex::Regex;

/// Lists the SSIDs of currently visible networks whose name contains
/// `filter`. Querying the radio itself failing is fatal to the caller:
/// there is no provisioning to do on a host without a working WiFi radio.
pub fn scan_networks(filter: &str) -> Result<Vec<String>> {
    let raw = run_show_networks()?;
    Ok(filter_networks(parse_show_networks(&raw), filter))
}

/// Associates the host radio with the named network. The device access
/// points are open, so no key is involved; exit status 0 means the utility
/// accepted the association.
pub fn associate(ssid: &str) -> Result<()> {
    let output = connect_command(ssid)
        .output()
        .with_context(|| format!("failed to spawn WiFi connect for {ssid}"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "WiFi connect to {ssid} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}

#[cfg(windows)]
fn run_show_networks() -> Result<String> {
    let output = Command::new("netsh")
        .args(["wlan", "show", "network"])
        .output()
        .context("failed to spawn netsh wlan show network")?;
    if !output.status.success() {
        return Err(anyhow!(
            "netsh wlan show network failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(not(windows))]
fn run_show_networks() -> Result<String> {
    let output = Command::new("nmcli")
        .args(["-t", "-f", "SSID", "device", "wifi", "list", "--rescan", "yes"])
        .output()
        .context("failed to spawn nmcli device wifi list")?;
    if !output.status.success() {
        return Err(anyhow!(
            "nmcli device wifi list failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(windows)]
fn connect_command(ssid: &str) -> Command {
    let mut command = Command::new("netsh");
    command.args([
        "wlan",
        "connect",
        &format!("name={ssid}"),
        &format!("ssid={ssid}"),
        "interface=Wi-Fi",
    ]);
    command
}

#[cfg(not(windows))]
fn connect_command(ssid: &str) -> Command {
    let mut command = Command::new("nmcli");
    command.args(["device", "wifi", "connect", ssid]);
    command
}

#[cfg(windows)]
fn parse_show_networks(raw: &str) -> Vec<String> {
    parse_netsh_networks(raw)
}

#[cfg(not(windows))]
fn parse_show_networks(raw: &str) -> Vec<String> {
    parse_nmcli_networks(raw)
}

/// Extracts SSID values from `netsh wlan show network` output. Only the
/// `SSID <n> : <name>` header lines carry network names; the indented
/// authentication/encryption lines below them are ignored.
pub fn parse_netsh_networks(raw: &str) -> Vec<String> {
    let ssid_line = Regex::new(r"^SSID\s+\d+\s*:(.*)$").expect("static regex");
    raw.lines()
        .filter_map(|line| ssid_line.captures(line.trim_end()))
        .map(|caps| caps[1].trim().to_string())
        .filter(|ssid| !ssid.is_empty())
        .collect()
}

/// Extracts SSID values from `nmcli -t -f SSID device wifi list` output:
/// one (possibly escaped) SSID per line, blank lines for hidden networks,
/// duplicates for networks visible on several bands.
pub fn parse_nmcli_networks(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let ssid = unescape_nmcli(line.trim());
        if ssid.is_empty() || out.contains(&ssid) {
            continue;
        }
        out.push(ssid);
    }
    out
}

pub fn filter_networks(networks: Vec<String>, filter: &str) -> Vec<String> {
    networks
        .into_iter()
        .filter(|network| network.contains(filter))
        .collect()
}

fn unescape_nmcli(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{filter_networks, parse_netsh_networks, parse_nmcli_networks};

    const NETSH_FIXTURE: &str = "Interface name : Wi-Fi\n\
There are 3 networks currently visible.\n\
\n\
SSID 1 : MyWifi1 \n\
    Network type            : Infrastructure\n\
    Authentication          : WPA2-Personal\n\
SSID 2 : MyWifi2 \n\
    Network type            : Infrastructure\n\
SSID 3 : MyNetwork \n\
    Network type            : Infrastructure\n";

    #[test]
    fn netsh_parser_extracts_trimmed_ssids() {
        assert_eq!(
            parse_netsh_networks(NETSH_FIXTURE),
            vec!["MyWifi1", "MyWifi2", "MyNetwork"]
        );
    }

    #[test]
    fn netsh_parser_ignores_detail_lines() {
        let parsed = parse_netsh_networks(NETSH_FIXTURE);
        assert!(!parsed.iter().any(|ssid| ssid.contains("Infrastructure")));
    }

    #[test]
    fn nmcli_parser_skips_hidden_and_duplicate_entries() {
        let raw = "shellyplug-s-7C87CEB4\n\nshellyplug-s-7C87CEB4\nHomeNet\nCafe\\:Guest\n";
        assert_eq!(
            parse_nmcli_networks(raw),
            vec!["shellyplug-s-7C87CEB4", "HomeNet", "Cafe:Guest"]
        );
    }

    #[test]
    fn filter_selects_substring_matches_in_order() {
        let networks = vec![
            "MyWifi1".to_string(),
            "MyWifi2".to_string(),
            "MyNetwork".to_string(),
        ];
        assert_eq!(
            filter_networks(networks.clone(), "Wifi"),
            vec!["MyWifi1", "MyWifi2"]
        );
        assert_eq!(filter_networks(networks.clone(), "Network"), vec!["MyNetwork"]);
        assert!(filter_networks(networks, "Default").is_empty());
    }
}
