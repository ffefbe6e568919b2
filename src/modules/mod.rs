//! Built-in policy modules, started on every filtered adapter.

pub mod arp_guard;
pub mod base_policy;
pub mod flood_guard;
pub mod icmp_filter;

use crate::config::ModuleOptions;
use crate::core::module::{safe_module, SafeModule};

pub use arp_guard::ArpGuard;
pub use base_policy::BasePolicy;
pub use flood_guard::FloodGuard;
pub use icmp_filter::IcmpFilter;

/// Fresh instances of the enabled modules, in pipeline order: ARP guard,
/// base policy, ICMP filter, flood guard.
pub fn default_modules(options: &ModuleOptions) -> Vec<SafeModule> {
    let mut modules = Vec::with_capacity(4);
    if options.arp_guard.enabled {
        modules.push(safe_module(ArpGuard::new(options.arp_guard.clone())));
    }
    if options.base_policy.enabled {
        modules.push(safe_module(BasePolicy::new(options.base_policy.clone())));
    }
    if options.icmp_filter.enabled {
        modules.push(safe_module(IcmpFilter::new(options.icmp_filter.clone())));
    }
    if options.flood_guard.enabled {
        modules.push(safe_module(FloodGuard::new(options.flood_guard.clone())));
    }
    modules
}
