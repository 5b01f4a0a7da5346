use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One documented issue: what it is, why it happens and what to try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDoc {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub causes: Vec<String>,
    #[serde(default)]
    pub resolutions: Vec<String>,
    #[serde(default)]
    pub links: Vec<DocLink>,
    pub category: String,
}

/// Pointer to a tool or reference page; `target` is a command or URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocLink {
    pub label: String,
    pub target: String,
}

/// Issue documentation keyed by the stable issue identifiers. Ships with a
/// built-in set; an on-disk YAML file with the same shape replaces it
/// wholesale when present and parseable.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entries: BTreeMap<String, IssueDoc>,
}

impl KnowledgeBase {
    /// Load from `path`, falling back to the built-in set when the file is
    /// missing or malformed. A malformed file is reported, not fatal.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_yaml::from_str::<BTreeMap<String, IssueDoc>>(&raw) {
                Ok(entries) if !entries.is_empty() => Self { entries },
                Ok(_) => {
                    warn!(path = %path.display(), "knowledge base file is empty, using built-in entries");
                    Self::builtin()
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to parse knowledge base, using built-in entries");
                    Self::builtin()
                }
            },
            Err(_) => Self::builtin(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&IssueDoc> {
        self.entries.get(key)
    }

    /// Documentation for `key`, or a generic placeholder so callers always
    /// have something to show for an unrecognized identifier.
    pub fn describe(&self, key: &str) -> IssueDoc {
        self.entries.get(key).cloned().unwrap_or_else(|| IssueDoc {
            title: key.to_string(),
            description: "No documentation is available for this issue.".to_string(),
            causes: Vec::new(),
            resolutions: Vec::new(),
            links: Vec::new(),
            category: "Uncategorized".to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IssueDoc)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        let mut add = |key: &str, doc: IssueDoc| {
            entries.insert(key.to_string(), doc);
        };

        add(
            "wlan_service_not_running",
            doc(
                "Network Management Service Not Running",
                "The service responsible for wireless configuration is not running. Without it the Wi-Fi adapter cannot associate with any network.",
                &[
                    "The service was manually stopped or disabled.",
                    "A recent system update changed the service configuration.",
                ],
                &[
                    "Check the service state with `systemctl status NetworkManager`.",
                    "Start it with `systemctl start NetworkManager` and enable it at boot.",
                    "Reboot if the service repeatedly fails to start.",
                ],
                &[("systemctl", "systemctl status NetworkManager")],
                CAT_SERVICE,
            ),
        );
        add(
            "adapter_disconnected",
            doc(
                "Adapter Disconnected",
                "The Wi-Fi adapter is not connected to any network. Monitoring cannot gather link statistics until an association is established.",
                &[
                    "Wi-Fi radio is off or airplane mode is enabled.",
                    "No saved networks in range, or wrong credentials.",
                    "Driver or hardware fault preventing association.",
                ],
                &[
                    "Enable the radio with `nmcli radio wifi on`.",
                    "Connect to a known network with `nmcli dev wifi connect <ssid>`.",
                    "Reload the wireless driver module if the interface is missing.",
                ],
                &[("nmcli", "nmcli dev status")],
                CAT_SERVICE,
            ),
        );
        add(
            "weak_signal",
            doc(
                "Weak Signal Strength",
                "The received signal strength is below the failure threshold. Low signal causes slow speeds, dropouts and high retry rates.",
                &[
                    "The device is too far from the access point.",
                    "Physical obstructions such as walls or metal surfaces.",
                    "Interference from other devices or neighbouring networks.",
                ],
                &[
                    "Move closer to the access point.",
                    "Reposition the router away from walls and elevate it.",
                    "Switch channel or band (e.g. move to 5 GHz) to avoid interference.",
                    "Consider adding an extender or an additional access point.",
                ],
                &[],
                CAT_SIGNAL,
            ),
        );
        add(
            "moderate_signal",
            doc(
                "Moderate Signal Strength",
                "The signal strength is acceptable but below the recommended level.",
                &[
                    "Distance from the access point.",
                    "Partial obstructions or moderate interference.",
                ],
                &[
                    "Reposition the device or router for a clearer line of sight.",
                    "Pick a less crowded channel or use the 5 GHz band if available.",
                ],
                &[],
                CAT_SIGNAL,
            ),
        );
        add(
            "low_average_signal_log",
            doc(
                "Low Average Signal (Historical)",
                "Log analysis shows the average signal strength over time is low.",
                &[
                    "Persistent weak-signal conditions or temporary outages.",
                    "Roaming between access points with uneven coverage.",
                ],
                &[
                    "Follow the weak-signal recommendations.",
                    "Review the roaming pattern and adjust access point placement.",
                ],
                &[],
                CAT_SIGNAL,
            ),
        );
        add(
            "moderate_average_signal_log",
            doc(
                "Moderate Average Signal (Historical)",
                "Historical logs indicate the signal strength is moderate on average.",
                &["The device is sometimes far from the access point or sees occasional interference."],
                &["Optimise access point placement and evaluate the 5 GHz band."],
                &[],
                CAT_SIGNAL,
            ),
        );
        add(
            "gateway_packet_loss",
            doc(
                "High Packet Loss to Gateway",
                "High packet loss to the local gateway indicates a problem inside the local network.",
                &[
                    "Severe RF interference on the current channel.",
                    "The access point is overloaded or misconfigured.",
                    "Physical obstructions or weak signal.",
                ],
                &[
                    "Change to a less congested channel or band.",
                    "Reduce network load or update router firmware.",
                    "Reposition the access point and client devices.",
                ],
                &[],
                CAT_PERFORMANCE,
            ),
        );
        add(
            "internet_packet_loss",
            doc(
                "High Packet Loss to Internet",
                "High packet loss when pinging an external host points to upstream or ISP problems.",
                &[
                    "Congested or faulty WAN link.",
                    "ISP routing issues or maintenance.",
                ],
                &[
                    "Power cycle the modem and router.",
                    "Check with your ISP for outages.",
                    "Test against alternative remote hosts to confirm.",
                ],
                &[],
                CAT_PERFORMANCE,
            ),
        );
        add(
            "gateway_high_latency",
            doc(
                "High Gateway Latency",
                "Ping responses from the local gateway are slower than expected, suggesting local congestion or wireless retransmissions.",
                &[
                    "Too many clients on the access point.",
                    "RF interference forcing retransmissions.",
                    "Overloaded router CPU.",
                ],
                &[
                    "Reduce the number of active Wi-Fi devices.",
                    "Switch to a less congested channel.",
                    "Update router firmware and review QoS settings.",
                ],
                &[],
                CAT_PERFORMANCE,
            ),
        );
        add(
            "internet_high_latency",
            doc(
                "High Internet Latency",
                "High latency to external hosts may indicate upstream congestion or ISP routing problems.",
                &[
                    "ISP congestion or routing changes.",
                    "Heavy WAN load from downloads or streaming.",
                ],
                &[
                    "Pause large downloads or streaming sessions.",
                    "Contact your ISP if the issue persists.",
                    "Run a speed test and a traceroute to locate the bottleneck.",
                ],
                &[],
                CAT_PERFORMANCE,
            ),
        );
        add(
            "excessive_roaming",
            doc(
                "Excessive Roaming",
                "The device is switching between access points very frequently, indicating overlapping coverage or aggressive roaming settings.",
                &[
                    "Access points placed too close together.",
                    "High transmit power causing cells to overlap.",
                    "Client roaming algorithm tuned too aggressively.",
                ],
                &[
                    "Reduce access point transmit power or adjust placement.",
                    "Enable 802.11k/v/r fast-roaming on access points and clients.",
                    "Review the client's roaming aggressiveness setting.",
                ],
                &[],
                CAT_ROAMING,
            ),
        );
        add(
            "moderate_roaming",
            doc(
                "Moderate Roaming",
                "The device roams a moderate number of times per hour.",
                &[
                    "Access point cells slightly overlapping.",
                    "Normal behaviour in multi-AP environments.",
                ],
                &["Watch whether roaming becomes excessive; adjust placement if needed."],
                &[],
                CAT_ROAMING,
            ),
        );
        add(
            "bad_channel_plan",
            doc(
                "Suboptimal Channel Plan",
                "One or more access points on 2.4 GHz are using channels other than 1, 6 or 11.",
                &[
                    "Automatic channel selection picked a non-standard channel.",
                    "Manual misconfiguration or hardware unable to change channels.",
                ],
                &[
                    "Set 2.4 GHz access points to channels 1, 6 or 11 only.",
                    "Use 20 MHz channel width to reduce overlap.",
                ],
                &[],
                CAT_ROAMING,
            ),
        );
        add(
            "crowded_channel",
            doc(
                "Crowded 2.4 GHz Channel",
                "Many access points operate on or adjacent to the same 2.4 GHz channel, causing congestion.",
                &[
                    "Dense environment with overlapping channels.",
                    "Neighbours using the same or adjacent channels.",
                ],
                &[
                    "Switch to a less crowded 2.4 GHz channel (1, 6 or 11).",
                    "Prefer the 5 GHz band where possible.",
                ],
                &[],
                CAT_ROAMING,
            ),
        );
        add(
            "frequent_disconnections",
            doc(
                "Frequent Disconnections",
                "Historical logs show the device dropping off Wi-Fi often.",
                &[
                    "Faulty or outdated drivers.",
                    "Power management putting the adapter to sleep.",
                    "Weak signal or interference causing dropped associations.",
                ],
                &[
                    "Update the wireless driver from your distribution or vendor.",
                    "Disable power saving on the adapter (`iw dev <if> set power_save off`).",
                    "Improve signal quality per the weak-signal recommendations.",
                ],
                &[],
                CAT_SERVICE,
            ),
        );
        add(
            "many_roam_events",
            doc(
                "Many Roam Events (Historical)",
                "The roam log shows the device switching between access points frequently over time.",
                &["Overlapping access points and aggressive roaming settings."],
                &["See the resolutions for excessive roaming."],
                &[],
                CAT_ROAMING,
            ),
        );
        add(
            "power_management_sleep",
            doc(
                "Power Management Causing Adapter Sleep",
                "The Wi-Fi adapter enters sleep mode due to power management, causing disconnections or degraded performance.",
                &[
                    "Power saving enabled on the adapter or system-wide.",
                    "Aggressive power profile on a laptop.",
                ],
                &[
                    "Disable adapter power saving with `iw dev <if> set power_save off`.",
                    "Set `wifi.powersave = 2` in the NetworkManager configuration.",
                ],
                &[("iw", "iw dev")],
                CAT_SERVICE,
            ),
        );
        add(
            "driver_outdated",
            doc(
                "Outdated or Faulty Driver",
                "The installed Wi-Fi driver is outdated or has known stability issues, causing performance problems or disconnects.",
                &[
                    "The distribution ships an old driver or firmware blob.",
                    "Corrupted or incomplete driver installation.",
                ],
                &[
                    "Update the kernel and linux-firmware packages.",
                    "Reload the driver module, or install the vendor's out-of-tree driver.",
                ],
                &[],
                CAT_SERVICE,
            ),
        );
        add(
            "security_mismatch",
            doc(
                "Security Mismatch (WPA2 vs WPA3)",
                "Authentication failures or intermittent connectivity can occur when the access point and client use incompatible security settings.",
                &[
                    "The AP is WPA3-only while the client supports only WPA2, or vice versa.",
                    "Mixed-mode settings causing negotiation failures.",
                ],
                &[
                    "Ensure both sides support a common security mode.",
                    "Configure the AP for mixed WPA2/WPA3 operation.",
                    "Update firmware and drivers to add WPA3 support if available.",
                ],
                &[],
                CAT_SIGNAL,
            ),
        );
        add(
            "channel_width_problem",
            doc(
                "Channel Width Mismatch",
                "The access point uses a channel width that is too wide for the environment, causing interference and performance issues.",
                &[
                    "Automatic width selection picked 40 MHz on 2.4 GHz or 80 MHz on 5 GHz in a crowded environment.",
                    "Manual configuration set an unsupported width.",
                ],
                &[
                    "Use 20 MHz on 2.4 GHz; use 40/80 MHz on 5 GHz depending on congestion.",
                    "Match the client's channel width settings to the AP.",
                ],
                &[],
                CAT_ROAMING,
            ),
        );
        add(
            "dfs_radar_events",
            doc(
                "DFS Radar Events",
                "On 5 GHz, Dynamic Frequency Selection channels are vacated when radar is detected, making the AP change channels unexpectedly.",
                &[
                    "Operating on DFS channels (52-64 or 100-144).",
                    "Nearby weather or military radar forcing a channel change.",
                ],
                &[
                    "Avoid DFS channels if disconnects coincide with channel changes.",
                    "Check AP logs for DFS events and pick a non-DFS channel.",
                ],
                &[],
                CAT_ROAMING,
            ),
        );

        Self { entries }
    }
}

const CAT_SERVICE: &str = "Service & driver problems";
const CAT_SIGNAL: &str = "Signal & interference";
const CAT_PERFORMANCE: &str = "Network performance";
const CAT_ROAMING: &str = "Roaming & channel plan";

fn doc(
    title: &str,
    description: &str,
    causes: &[&str],
    resolutions: &[&str],
    links: &[(&str, &str)],
    category: &str,
) -> IssueDoc {
    IssueDoc {
        title: title.to_string(),
        description: description.to_string(),
        causes: causes.iter().map(|s| s.to_string()).collect(),
        resolutions: resolutions.iter().map(|s| s.to_string()).collect(),
        links: links
            .iter()
            .map(|(label, target)| DocLink {
                label: label.to_string(),
                target: target.to_string(),
            })
            .collect(),
        category: category.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::IssueKind;

    #[test]
    fn builtin_covers_every_engine_issue() {
        let kb = KnowledgeBase::builtin();
        let kinds = [
            IssueKind::WlanServiceNotRunning,
            IssueKind::AdapterDisconnected,
            IssueKind::WeakSignal,
            IssueKind::ModerateSignal,
            IssueKind::GatewayPacketLoss,
            IssueKind::InternetPacketLoss,
            IssueKind::GatewayHighLatency,
            IssueKind::InternetHighLatency,
            IssueKind::ExcessiveRoaming,
            IssueKind::ModerateRoaming,
            IssueKind::BadChannelPlan,
            IssueKind::CrowdedChannel,
            IssueKind::FrequentDisconnections,
            IssueKind::LowAverageSignalLog,
            IssueKind::ModerateAverageSignalLog,
            IssueKind::ManyRoamEvents,
        ];
        for kind in kinds {
            assert!(kb.get(kind.key()).is_some(), "missing doc for {kind}");
        }
        assert_eq!(kb.len(), 21);
    }

    #[test]
    fn unknown_key_gets_a_placeholder() {
        let kb = KnowledgeBase::builtin();
        let doc = kb.describe("flux_capacitor_drained");
        assert_eq!(doc.title, "flux_capacitor_drained");
        assert_eq!(doc.category, "Uncategorized");
        assert!(doc.resolutions.is_empty());
    }

    #[test]
    fn override_file_replaces_builtin_and_bad_file_falls_back() {
        let dir = std::env::temp_dir().join(format!("wifiwatch-kb-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("kb.yaml");
        std::fs::write(
            &good,
            "weak_signal:\n  title: Custom\n  description: Overridden entry.\n  category: Custom\n",
        )
        .unwrap();
        let kb = KnowledgeBase::load(&good);
        assert_eq!(kb.len(), 1);
        assert_eq!(kb.describe("weak_signal").title, "Custom");

        let bad = dir.join("broken.yaml");
        std::fs::write(&bad, ": not yaml [").unwrap();
        let kb = KnowledgeBase::load(&bad);
        assert_eq!(kb.len(), 21);

        let kb = KnowledgeBase::load(&dir.join("missing.yaml"));
        assert_eq!(kb.len(), 21);

        std::fs::remove_dir_all(&dir).ok();
    }
}
