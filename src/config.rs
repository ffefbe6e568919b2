//! Runtime constants and the options file.
//!
//! Tunable intervals and sizes live here as constants. `FirewallOptions`
//! overrides the ones an operator is likely to change and carries the
//! default module settings. Options are read once at startup and never
//! written back.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::frame::Direction;
use crate::error::FirewallError;
use crate::packet::ProtocolTag;

/// Capacity of one frame buffer: a full Ethernet frame without FCS.
pub const FRAME_CAPACITY: usize = 1514;

/// Upper bound on one readiness wait, and so on how long a stop request can
/// go unnoticed by a capture thread (milliseconds).
pub const SIGNAL_WAIT_TIMEOUT_MS: u64 = 250;

/// Interval at which the adapter list is rescanned (seconds).
pub const ADAPTER_REFRESH_INTERVAL_SECS: u64 = 5;

/// Interval at which per-adapter rates are logged (seconds).
pub const BANDWIDTH_REPORT_INTERVAL_SECS: u64 = 10;

/// Directory block logs are written to when no options file says otherwise.
pub const DEFAULT_BLOCK_LOG_DIR: &str = "logs";

/// Snap length recorded in pcap global headers.
pub const PCAP_SNAPLEN: u32 = FRAME_CAPACITY as u32;

/// Default SYN budget per source address for the flood guard.
pub const FLOOD_SYN_PER_SECOND: u32 = 50;

/// Default SYN burst per source address for the flood guard.
pub const FLOOD_SYN_BURST: u32 = 100;

/// Top-level options, loadable from JSON. Every field has a default so a
/// partial file is valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FirewallOptions {
    pub block_log_dir: PathBuf,
    pub signal_wait_timeout_ms: u64,
    pub refresh_interval_secs: u64,
    pub modules: ModuleOptions,
}

impl Default for FirewallOptions {
    fn default() -> Self {
        Self {
            block_log_dir: PathBuf::from(DEFAULT_BLOCK_LOG_DIR),
            signal_wait_timeout_ms: SIGNAL_WAIT_TIMEOUT_MS,
            refresh_interval_secs: ADAPTER_REFRESH_INTERVAL_SECS,
            modules: ModuleOptions::default(),
        }
    }
}

impl FirewallOptions {
    pub fn from_json_str(text: &str) -> Result<Self, FirewallError> {
        let options: Self = serde_json::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, FirewallError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), FirewallError> {
        if self.signal_wait_timeout_ms == 0 {
            return Err(FirewallError::Config(
                "signal_wait_timeout_ms must be positive".into(),
            ));
        }
        if self.refresh_interval_secs == 0 {
            return Err(FirewallError::Config(
                "refresh_interval_secs must be positive".into(),
            ));
        }
        let flood = &self.modules.flood_guard;
        if flood.syn_per_second == 0 || flood.burst == 0 {
            return Err(FirewallError::Config(
                "flood_guard rates must be positive".into(),
            ));
        }
        for binding in &self.modules.arp_guard.bindings {
            if crate::packet::ethernet::parse_mac(&binding.mac).is_none() {
                return Err(FirewallError::Config(format!(
                    "arp_guard binding for {} has malformed MAC {:?}",
                    binding.ip, binding.mac
                )));
            }
        }
        Ok(())
    }

    pub fn signal_wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.signal_wait_timeout_ms)
    }
}

/// Settings for the default module set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ModuleOptions {
    pub arp_guard: ArpGuardOptions,
    pub base_policy: BasePolicyOptions,
    pub icmp_filter: IcmpFilterOptions,
    pub flood_guard: FloodGuardOptions,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArpGuardOptions {
    pub enabled: bool,
    /// Learn bindings from the first reply seen for an address.
    pub learn: bool,
    /// Bindings that are never overwritten.
    pub bindings: Vec<ArpBinding>,
}

impl Default for ArpGuardOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            learn: true,
            bindings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArpBinding {
    pub ip: Ipv4Addr,
    pub mac: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Allow,
    Drop,
}

/// One base policy rule. Unset fields match anything; `address` and `port`
/// match either endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PolicyRule {
    pub action: RuleAction,
    #[serde(default)]
    pub protocol: Option<ProtocolTag>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub log: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BasePolicyOptions {
    pub enabled: bool,
    /// Applied when no rule matches.
    pub default_action: RuleAction,
    pub rules: Vec<PolicyRule>,
}

impl Default for BasePolicyOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            default_action: RuleAction::Allow,
            rules: Vec::new(),
        }
    }
}

/// ICMP type with an optional code; no code matches every code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct IcmpRule {
    pub msg_type: u8,
    #[serde(default)]
    pub code: Option<u8>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IcmpFilterOptions {
    pub enabled: bool,
    pub log: bool,
    /// ICMPv4 rules.
    pub deny: Vec<IcmpRule>,
    /// ICMPv6 rules; the two families number their types differently.
    pub deny_v6: Vec<IcmpRule>,
}

impl Default for IcmpFilterOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            log: true,
            // Redirects rewrite routes from the outside.
            deny: vec![IcmpRule {
                msg_type: crate::packet::icmp::TYPE_REDIRECT,
                code: None,
            }],
            deny_v6: vec![IcmpRule {
                msg_type: crate::packet::icmp::TYPE_V6_REDIRECT,
                code: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FloodGuardOptions {
    pub enabled: bool,
    pub syn_per_second: u32,
    pub burst: u32,
}

impl Default for FloodGuardOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            syn_per_second: FLOOD_SYN_PER_SECOND,
            burst: FLOOD_SYN_BURST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time sanity: all constants are positive.
    #[test]
    fn test_constants_positive() {
        const _: () = assert!(FRAME_CAPACITY >= 1514);
        const _: () = assert!(SIGNAL_WAIT_TIMEOUT_MS > 0);
        const _: () = assert!(ADAPTER_REFRESH_INTERVAL_SECS > 0);
        const _: () = assert!(BANDWIDTH_REPORT_INTERVAL_SECS > 0);
        const _: () = assert!(PCAP_SNAPLEN as usize == FRAME_CAPACITY);
        const _: () = assert!(FLOOD_SYN_PER_SECOND > 0);
        const _: () = assert!(FLOOD_SYN_BURST > 0);
    }

    #[test]
    fn test_empty_object_yields_defaults() {
        let options = FirewallOptions::from_json_str("{}").unwrap();
        assert_eq!(options.block_log_dir, PathBuf::from(DEFAULT_BLOCK_LOG_DIR));
        assert_eq!(options.signal_wait_timeout_ms, SIGNAL_WAIT_TIMEOUT_MS);
        assert!(options.modules.arp_guard.enabled);
        assert_eq!(options.modules.icmp_filter.deny.len(), 1);
        assert_eq!(options.modules.icmp_filter.deny_v6[0].msg_type, 137);
        assert_eq!(options.modules.flood_guard.burst, FLOOD_SYN_BURST);
    }

    #[test]
    fn test_partial_file_overrides_only_named_fields() {
        let text = r#"{
            "block_log_dir": "/var/log/firewall",
            "modules": {
                "base_policy": {
                    "default_action": "drop",
                    "rules": [
                        { "action": "allow", "protocol": "tcp", "port": 22, "direction": "inbound" }
                    ]
                },
                "arp_guard": {
                    "bindings": [ { "ip": "10.0.0.1", "mac": "02:00:00:00:00:01" } ]
                }
            }
        }"#;
        let options = FirewallOptions::from_json_str(text).unwrap();
        assert_eq!(options.block_log_dir, PathBuf::from("/var/log/firewall"));
        assert_eq!(options.refresh_interval_secs, ADAPTER_REFRESH_INTERVAL_SECS);

        let policy = &options.modules.base_policy;
        assert_eq!(policy.default_action, RuleAction::Drop);
        assert_eq!(
            policy.rules[0],
            PolicyRule {
                action: RuleAction::Allow,
                protocol: Some(ProtocolTag::Tcp),
                direction: Some(Direction::Inbound),
                address: None,
                port: Some(22),
                log: false,
            }
        );
        assert_eq!(options.modules.arp_guard.bindings.len(), 1);
    }

    #[test]
    fn test_zero_rates_are_rejected() {
        let err = FirewallOptions::from_json_str(r#"{"modules":{"flood_guard":{"burst":0}}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "Config");
        let err = FirewallOptions::from_json_str(r#"{"signal_wait_timeout_ms":0}"#).unwrap_err();
        assert_eq!(err.kind(), "Config");
    }

    #[test]
    fn test_malformed_binding_mac_is_rejected() {
        let text = r#"{"modules":{"arp_guard":{"bindings":[{"ip":"10.0.0.1","mac":"nope"}]}}}"#;
        assert!(FirewallOptions::from_json_str(text).is_err());
    }

    #[test]
    fn test_syntax_error_maps_to_config_kind() {
        let err = FirewallOptions::from_json_str("{").unwrap_err();
        assert_eq!(err.kind(), "Config");
    }
}
