//! Drops ICMP messages by type and optional code, in both directions.
//! ICMPv4 and ICMPv6 are matched against separate rule lists.

use crate::config::IcmpFilterOptions;
use crate::core::module::FirewallModule;
use crate::core::verdict::Verdict;
use crate::packet::{ProtocolTag, ProtocolView};

pub const NAME: &str = "icmp-filter";

pub struct IcmpFilter {
    options: IcmpFilterOptions,
}

impl IcmpFilter {
    pub fn new(options: IcmpFilterOptions) -> Self {
        Self { options }
    }

    fn denies(&self, v6: bool, msg_type: u8, code: u8) -> bool {
        let rules = if v6 { &self.options.deny_v6 } else { &self.options.deny };
        rules
            .iter()
            .any(|rule| rule.msg_type == msg_type && rule.code.map_or(true, |c| c == code))
    }
}

impl FirewallModule for IcmpFilter {
    fn name(&self) -> &str {
        NAME
    }

    fn classify(&mut self, view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
        let Ok(icmp) = view.icmp() else {
            return Ok(Verdict::allow(NAME));
        };
        let (msg_type, code) = (icmp.msg_type(), icmp.code());
        let v6 = view.contains(ProtocolTag::Ipv6);
        if !self.denies(v6, msg_type, code) {
            return Ok(Verdict::allow(NAME));
        }

        let verdict = Verdict::drop(NAME);
        if !self.options.log {
            return Ok(verdict);
        }
        let from = view
            .ip_addresses()
            .map(|(src, _)| src.to_string())
            .unwrap_or_else(|| "unknown source".to_string());
        let family = if v6 { "ICMPv6" } else { "ICMP" };
        Ok(verdict.with_log(format!(
            "{family} type {msg_type} code {code} from {from} dropped"
        )))
    }

    fn config(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&self.options).ok()
    }
}
