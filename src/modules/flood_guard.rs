//! SYN flood protection.
//!
//! Inbound connection attempts are rate limited per source address with a
//! `governor` keyed token bucket. Connections that completed the handshake
//! are tracked and never throttled; RST or FIN forgets them.

use std::collections::HashSet;
use std::net::IpAddr;
use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::config::FloodGuardOptions;
use crate::core::frame::Direction;
use crate::core::module::FirewallModule;
use crate::core::quad::Quad;
use crate::core::verdict::Verdict;
use crate::packet::ProtocolView;

pub const NAME: &str = "flood-guard";

/// Per-set cap on tracked connections.
const MAX_TRACKED: usize = 65_536;

/// Stale limiter keys are pruned every this many frames.
const PRUNE_EVERY: u64 = 4096;

pub struct FloodGuard {
    options: FloodGuardOptions,
    limiter: DefaultKeyedRateLimiter<IpAddr>,
    half_open: HashSet<Quad>,
    established: HashSet<Quad>,
    /// Sources currently being throttled; only the first drop is logged.
    throttled: HashSet<IpAddr>,
    seen: u64,
}

fn limiter_for(options: &FloodGuardOptions) -> DefaultKeyedRateLimiter<IpAddr> {
    let rate = NonZeroU32::new(options.syn_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(options.burst).unwrap_or(rate);
    RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst))
}

impl FloodGuard {
    pub fn new(options: FloodGuardOptions) -> Self {
        Self {
            limiter: limiter_for(&options),
            options,
            half_open: HashSet::new(),
            established: HashSet::new(),
            throttled: HashSet::new(),
            seen: 0,
        }
    }

    pub fn established(&self) -> usize {
        self.established.len()
    }

    pub fn half_open(&self) -> usize {
        self.half_open.len()
    }

    fn track(set: &mut HashSet<Quad>, quad: Quad) {
        if set.len() >= MAX_TRACKED {
            tracing::debug!("Connection table full ({MAX_TRACKED}), clearing");
            set.clear();
        }
        set.insert(quad);
    }

    fn prune(&mut self) {
        self.seen += 1;
        if self.seen % PRUNE_EVERY == 0 {
            self.limiter.retain_recent();
        }
    }
}

impl FirewallModule for FloodGuard {
    fn name(&self) -> &str {
        NAME
    }

    fn start(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.options.syn_per_second > 0 && self.options.burst > 0,
            "SYN rate and burst must be positive"
        );
        self.limiter = limiter_for(&self.options);
        self.half_open.clear();
        self.established.clear();
        self.throttled.clear();
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.half_open.clear();
        self.established.clear();
        self.throttled.clear();
        Ok(())
    }

    fn classify(&mut self, view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
        let Ok(tcp) = view.tcp() else {
            return Ok(Verdict::allow(NAME));
        };
        let (syn, ack, closing) = (tcp.syn(), tcp.ack(), tcp.rst() || tcp.fin());
        let Some(quad) = Quad::from_view(view) else {
            return Ok(Verdict::allow(NAME));
        };
        self.prune();

        if closing {
            self.half_open.remove(&quad);
            self.established.remove(&quad);
            return Ok(Verdict::allow(NAME));
        }
        if view.direction() == Direction::Outbound {
            return Ok(Verdict::allow(NAME));
        }

        if syn && !ack {
            if self.established.contains(&quad) {
                return Ok(Verdict::allow(NAME));
            }
            let source = quad.src_ip;
            if self.limiter.check_key(&source).is_err() {
                let verdict = Verdict::drop(NAME);
                if self.throttled.insert(source) {
                    return Ok(verdict.with_log(format!(
                        "SYN rate from {source} exceeds {}/s, throttling",
                        self.options.syn_per_second
                    )));
                }
                return Ok(verdict);
            }
            self.throttled.remove(&source);
            Self::track(&mut self.half_open, quad);
        } else if ack && self.half_open.remove(&quad) {
            Self::track(&mut self.established, quad);
        }
        Ok(Verdict::allow(NAME))
    }

    fn config(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "syn_per_second": self.options.syn_per_second,
            "burst": self.options.burst,
            "half_open": self.half_open.len(),
            "established": self.established.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::verdict::Action;
    use crate::packet::tcp::{FLAG_ACK, FLAG_FIN, FLAG_RST, FLAG_SYN};
    use crate::packet::test_frames::*;
    use std::net::Ipv4Addr;

    const ATTACKER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 66);
    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn guard(rate: u32, burst: u32) -> FloodGuard {
        let mut g = FloodGuard::new(FloodGuardOptions {
            enabled: true,
            syn_per_second: rate,
            burst,
        });
        g.start().unwrap();
        g
    }

    fn inbound(g: &mut FloodGuard, sport: u16, flags: u8) -> Verdict {
        let mut frame = frame_in(tcp_frame(ATTACKER, sport, SERVER, 80, flags));
        let mut view = ProtocolView::decode(&mut frame);
        g.classify(&mut view).unwrap()
    }

    #[test]
    fn test_burst_then_throttle_logs_once() {
        let mut g = guard(1, 3);
        for port in 0..3 {
            assert!(!inbound(&mut g, 1000 + port, FLAG_SYN).is_drop());
        }
        let first = inbound(&mut g, 2000, FLAG_SYN);
        assert_eq!(first.action, Action::DROP | Action::LOG);
        assert!(first.log_message.unwrap().contains("192.0.2.66"));
        let second = inbound(&mut g, 2001, FLAG_SYN);
        assert_eq!(second.action, Action::DROP);
    }

    #[test]
    fn test_sources_are_limited_independently() {
        let mut g = guard(1, 1);
        assert!(!inbound(&mut g, 1000, FLAG_SYN).is_drop());
        assert!(inbound(&mut g, 1001, FLAG_SYN).is_drop());

        let other = tcp_frame(Ipv4Addr::new(192, 0, 2, 7), 1000, SERVER, 80, FLAG_SYN);
        let mut frame = frame_in(other);
        let mut view = ProtocolView::decode(&mut frame);
        assert!(!g.classify(&mut view).unwrap().is_drop());
    }

    #[test]
    fn test_handshake_moves_to_established_and_exempts() {
        let mut g = guard(1, 1);
        assert!(!inbound(&mut g, 1000, FLAG_SYN).is_drop());
        assert_eq!(g.half_open(), 1);
        inbound(&mut g, 1000, FLAG_ACK);
        assert_eq!(g.half_open(), 0);
        assert_eq!(g.established(), 1);

        // Retransmitted SYN on the established connection is not throttled.
        assert!(!inbound(&mut g, 1000, FLAG_SYN).is_drop());
    }

    #[test]
    fn test_rst_and_fin_forget_connection() {
        let mut g = guard(10, 10);
        inbound(&mut g, 1000, FLAG_SYN);
        inbound(&mut g, 1000, FLAG_ACK);
        inbound(&mut g, 1000, FLAG_FIN | FLAG_ACK);
        assert_eq!(g.established(), 0);

        inbound(&mut g, 1001, FLAG_SYN);
        let mut frame = frame_out(tcp_frame(SERVER, 80, ATTACKER, 1001, FLAG_RST));
        let mut view = ProtocolView::decode(&mut frame);
        g.classify(&mut view).unwrap();
        assert_eq!(g.half_open(), 0);
    }

    #[test]
    fn test_outbound_syns_and_non_tcp_pass() {
        let mut g = guard(1, 1);
        for port in 0..5 {
            let mut frame = frame_out(tcp_frame(SERVER, 40000 + port, ATTACKER, 443, FLAG_SYN));
            let mut view = ProtocolView::decode(&mut frame);
            assert!(!g.classify(&mut view).unwrap().is_drop());
        }
        let mut frame = frame_in(icmp_frame(8, 0));
        let mut view = ProtocolView::decode(&mut frame);
        assert!(!g.classify(&mut view).unwrap().is_drop());
    }

    #[test]
    fn test_zero_rate_fails_start() {
        let mut g = FloodGuard::new(FloodGuardOptions {
            enabled: true,
            syn_per_second: 0,
            burst: 1,
        });
        assert!(g.start().is_err());
    }
}
