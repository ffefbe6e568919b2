//! Anti ARP poisoning.
//!
//! Keeps an IPv4 -> MAC binding table. Static bindings come from the
//! options; others are learned from the first inbound reply for an address.
//! An inbound reply (or gratuitous announcement) that contradicts a binding
//! is dropped and logged.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use anyhow::Context;

use crate::config::ArpGuardOptions;
use crate::core::frame::Direction;
use crate::core::module::FirewallModule;
use crate::core::verdict::Verdict;
use crate::packet::ethernet::{format_mac, parse_mac, MacAddr};
use crate::packet::ProtocolView;

pub const NAME: &str = "arp-guard";

/// Upper bound on learned bindings; the learned set is cleared past it.
const MAX_LEARNED: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Static,
    Learned,
}

pub struct ArpGuard {
    options: ArpGuardOptions,
    bindings: HashMap<Ipv4Addr, (MacAddr, Origin)>,
}

impl ArpGuard {
    pub fn new(options: ArpGuardOptions) -> Self {
        Self {
            options,
            bindings: HashMap::new(),
        }
    }

    /// Current binding for `ip`.
    pub fn binding(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.bindings.get(&ip).map(|(mac, _)| *mac)
    }

    fn learned(&self) -> usize {
        self.bindings
            .values()
            .filter(|(_, origin)| *origin == Origin::Learned)
            .count()
    }
}

impl FirewallModule for ArpGuard {
    fn name(&self) -> &str {
        NAME
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.bindings.clear();
        for binding in &self.options.bindings {
            let mac = parse_mac(&binding.mac)
                .with_context(|| format!("malformed MAC {:?} for {}", binding.mac, binding.ip))?;
            self.bindings.insert(binding.ip, (mac, Origin::Static));
        }
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.bindings.clear();
        Ok(())
    }

    fn classify(&mut self, view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
        if view.direction() != Direction::Inbound {
            return Ok(Verdict::allow(NAME));
        }
        let Ok(arp) = view.arp() else {
            return Ok(Verdict::allow(NAME));
        };

        let sender_ip = arp.sender_ip();
        let sender_mac = arp.sender_mac();
        let gratuitous = arp.is_request() && sender_ip == arp.target_ip();
        if !arp.is_reply() && !gratuitous {
            return Ok(Verdict::allow(NAME));
        }
        if sender_ip.is_unspecified() {
            return Ok(Verdict::allow(NAME));
        }

        match self.bindings.get(&sender_ip) {
            Some((bound, _)) if *bound != sender_mac => Ok(Verdict::drop(NAME).with_log(format!(
                "ARP reply claims {sender_ip} is at {}, bound to {}",
                format_mac(&sender_mac),
                format_mac(bound)
            ))),
            Some(_) => Ok(Verdict::allow(NAME)),
            None => {
                if self.options.learn {
                    if self.learned() >= MAX_LEARNED {
                        self.bindings
                            .retain(|_, (_, origin)| *origin == Origin::Static);
                    }
                    self.bindings
                        .insert(sender_ip, (sender_mac, Origin::Learned));
                }
                Ok(Verdict::allow(NAME))
            }
        }
    }

    fn config(&self) -> Option<serde_json::Value> {
        let mut bindings: Vec<_> = self
            .bindings
            .iter()
            .map(|(ip, (mac, origin))| {
                serde_json::json!({
                    "ip": ip.to_string(),
                    "mac": format_mac(mac),
                    "static": *origin == Origin::Static,
                })
            })
            .collect();
        bindings.sort_by(|a, b| a["ip"].as_str().cmp(&b["ip"].as_str()));
        Some(serde_json::json!({
            "learn": self.options.learn,
            "bindings": bindings,
        }))
    }
}
