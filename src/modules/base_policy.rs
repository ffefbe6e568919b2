//! Ordered allow/drop rules. The first matching rule decides; frames no
//! rule matches get the default action.

use crate::config::{BasePolicyOptions, PolicyRule, RuleAction};
use crate::core::module::FirewallModule;
use crate::core::verdict::Verdict;
use crate::packet::ProtocolView;

pub const NAME: &str = "base-policy";

pub struct BasePolicy {
    options: BasePolicyOptions,
}

impl BasePolicy {
    pub fn new(options: BasePolicyOptions) -> Self {
        Self { options }
    }
}

fn matches(rule: &PolicyRule, view: &ProtocolView<'_>) -> bool {
    if let Some(protocol) = rule.protocol {
        if !view.contains(protocol) {
            return false;
        }
    }
    if let Some(direction) = rule.direction {
        if view.direction() != direction {
            return false;
        }
    }
    if let Some(address) = rule.address {
        match view.ip_addresses() {
            Some((src, dst)) if src == address || dst == address => {}
            _ => return false,
        }
    }
    if let Some(port) = rule.port {
        match view.ports() {
            Some((src, dst)) if src == port || dst == port => {}
            _ => return false,
        }
    }
    true
}

fn verdict_for(action: RuleAction) -> Verdict {
    match action {
        RuleAction::Allow => Verdict::allow(NAME),
        RuleAction::Drop => Verdict::drop(NAME),
    }
}

impl FirewallModule for BasePolicy {
    fn name(&self) -> &str {
        NAME
    }

    fn classify(&mut self, view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
        let Some((index, rule)) = self
            .options
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| matches(rule, &*view))
        else {
            return Ok(verdict_for(self.options.default_action));
        };

        let verdict = verdict_for(rule.action);
        if !rule.log {
            return Ok(verdict);
        }
        let endpoints = match (view.ip_addresses(), view.ports()) {
            (Some((src, dst)), Some((sport, dport))) => format!("{src}:{sport} -> {dst}:{dport}"),
            (Some((src, dst)), None) => format!("{src} -> {dst}"),
            _ => format!("{:?} frame", view.highest()),
        };
        Ok(verdict.with_log(format!(
            "rule {index} ({:?}) matched {endpoints}",
            rule.action
        )))
    }

    fn config(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&self.options).ok()
    }
}
