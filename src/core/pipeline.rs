//! Folds the verdicts of an ordered module list into one decision per frame.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::core::module::{lock_module, EventLog, SafeModule};
use crate::core::verdict::{Action, Verdict};
use crate::packet::ProtocolView;

/// Outcome of running the pipeline over one frame.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Some module condemned the frame.
    pub drop: bool,
    /// At least one module rewrote the frame in place.
    pub edited: bool,
    /// Union of every evaluated verdict's action bits.
    pub actions: Action,
    /// Module that dropped the frame.
    pub dropped_by: Option<String>,
    /// Extra frames modules asked to transmit to the network.
    pub send_out: Vec<Vec<u8>>,
}

/// Modules in registration order.
#[derive(Default, Clone)]
pub struct ModulePipeline {
    modules: Vec<SafeModule>,
}

impl ModulePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modules(modules: Vec<SafeModule>) -> Self {
        Self { modules }
    }

    pub fn push(&mut self, module: SafeModule) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn modules(&self) -> &[SafeModule] {
        &self.modules
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules
            .iter()
            .map(|m| lock_module(m).name().to_string())
            .collect()
    }

    /// Run every module in order.
    ///
    /// Log messages are pushed as each verdict arrives. The first `DROP`
    /// stops evaluation; later modules never see the frame. `EDITED`
    /// accumulates and evaluation continues with the rewritten bytes.
    pub fn run(&self, view: &mut ProtocolView<'_>, log: &dyn EventLog) -> Decision {
        let mut decision = Decision::default();
        for module in &self.modules {
            let verdict = classify_guarded(module, view);
            decision.actions |= verdict.action;

            if verdict.action.contains(Action::LOG) {
                if let Some(message) = &verdict.log_message {
                    log.push(&verdict.module_name, message);
                }
            }
            if verdict.action.contains(Action::SEND_OUT_PACKET) {
                if let Some(bytes) = verdict.replacement_bytes {
                    decision.send_out.push(bytes);
                }
            }
            if verdict.action.contains(Action::DROP) {
                decision.drop = true;
                decision.dropped_by = Some(verdict.module_name);
                break;
            }
            if verdict.action.contains(Action::EDITED) {
                decision.edited = true;
            }
        }
        decision
    }

    /// Module names paired with their configuration surface.
    pub fn configs(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.modules
            .iter()
            .map(|m| {
                let guard = lock_module(m);
                (guard.name().to_string(), guard.config())
            })
            .collect()
    }
}

/// Call `classify`, turning an error or a panic into a failure verdict.
fn classify_guarded(module: &SafeModule, view: &mut ProtocolView<'_>) -> Verdict {
    let mut guard = lock_module(module);
    let name = guard.name().to_string();
    match catch_unwind(AssertUnwindSafe(|| guard.classify(view))) {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => Verdict::failure(&name, format!("{e:#}")),
        Err(panic) => {
            let cause = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Verdict::failure(&name, cause)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::module::{safe_module, FirewallModule, MemoryEventLog};
    use crate::packet::test_frames::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns a fixed verdict and counts how often it was asked.
    struct Fixed {
        name: &'static str,
        action: Action,
        message: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn new(name: &'static str, action: Action) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    action,
                    message: None,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl FirewallModule for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn classify(&mut self, _view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut v = Verdict::new(self.name, self.action);
            v.log_message = self.message.map(str::to_string);
            Ok(v)
        }
    }

    /// Writes `value` at `offset` and reports an edit.
    struct Writer {
        name: &'static str,
        offset: usize,
        value: u8,
    }

    impl FirewallModule for Writer {
        fn name(&self) -> &str {
            self.name
        }

        fn classify(&mut self, view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
            view.bytes_mut()[self.offset] = self.value;
            Ok(Verdict::edited(self.name))
        }
    }

    struct Failing;

    impl FirewallModule for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn classify(&mut self, _view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
            anyhow::bail!("lookup table missing")
        }
    }

    struct Panicking;

    impl FirewallModule for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn classify(&mut self, _view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
            panic!("boom")
        }
    }

    #[test]
    fn test_drop_short_circuits_later_modules() {
        let (m1, c1) = Fixed::new("m1", Action::ALLOW);
        let (m2, c2) = Fixed::new("m2", Action::DROP);
        let (m3, c3) = Fixed::new("m3", Action::ALLOW);
        let pipeline =
            ModulePipeline::with_modules(vec![safe_module(m1), safe_module(m2), safe_module(m3)]);

        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        let decision = pipeline.run(&mut view, &MemoryEventLog::new());

        assert!(decision.drop);
        assert_eq!(decision.dropped_by.as_deref(), Some("m2"));
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
        assert_eq!(c3.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_edits_accumulate_across_modules() {
        let pipeline = ModulePipeline::with_modules(vec![
            safe_module(Writer { name: "w1", offset: 0, value: 0xAA }),
            safe_module(Writer { name: "w2", offset: 1, value: 0xBB }),
            safe_module(Fixed::new("m", Action::ALLOW).0),
        ]);

        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        let decision = pipeline.run(&mut view, &MemoryEventLog::new());
        drop(view);

        assert!(!decision.drop);
        assert!(decision.edited);
        assert!(decision.actions.contains(Action::EDITED));
        assert_eq!(&frame.as_slice()[..2], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_logs_are_emitted_in_order_including_before_drop() {
        let (mut m1, _) = Fixed::new("m1", Action::ALLOW | Action::LOG);
        m1.message = Some("first");
        let (mut m2, _) = Fixed::new("m2", Action::DROP | Action::LOG);
        m2.message = Some("second");
        let (mut m3, _) = Fixed::new("m3", Action::ALLOW | Action::LOG);
        m3.message = Some("never");
        let pipeline =
            ModulePipeline::with_modules(vec![safe_module(m1), safe_module(m2), safe_module(m3)]);

        let log = MemoryEventLog::new();
        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        pipeline.run(&mut view, &log);

        assert_eq!(
            log.entries(),
            vec![
                ("m1".to_string(), "first".to_string()),
                ("m2".to_string(), "second".to_string())
            ]
        );
    }

    #[test]
    fn test_log_bit_without_message_is_silent() {
        let (m, _) = Fixed::new("m", Action::LOG);
        let pipeline = ModulePipeline::with_modules(vec![safe_module(m)]);
        let log = MemoryEventLog::new();
        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        pipeline.run(&mut view, &log);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_module_error_becomes_error_log_verdict() {
        let (after, after_calls) = Fixed::new("after", Action::ALLOW);
        let pipeline = ModulePipeline::with_modules(vec![safe_module(Failing), safe_module(after)]);
        let log = MemoryEventLog::new();
        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        let decision = pipeline.run(&mut view, &log);

        assert!(!decision.drop);
        assert!(decision.actions.contains(Action::ERROR | Action::LOG));
        assert_eq!(after_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            log.entries(),
            vec![("failing".to_string(), "failing failed: lookup table missing".to_string())]
        );
    }

    #[test]
    fn test_module_panic_is_contained() {
        let pipeline = ModulePipeline::with_modules(vec![safe_module(Panicking)]);
        let log = MemoryEventLog::new();
        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        let decision = pipeline.run(&mut view, &log);
        assert!(decision.actions.contains(Action::ERROR));
        assert_eq!(log.entries()[0].1, "panicking failed: boom");

        // The poisoned lock does not take the module out of service.
        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        let decision = pipeline.run(&mut view, &log);
        assert!(decision.actions.contains(Action::ERROR));
    }

    #[test]
    fn test_send_out_bytes_are_collected() {
        struct Sender;
        impl FirewallModule for Sender {
            fn name(&self) -> &str {
                "sender"
            }
            fn classify(&mut self, _view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict> {
                Ok(Verdict::allow("sender").with_send_out(vec![1, 2, 3]))
            }
        }
        let pipeline = ModulePipeline::with_modules(vec![safe_module(Sender)]);
        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        let decision = pipeline.run(&mut view, &MemoryEventLog::new());
        assert_eq!(decision.send_out, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_empty_pipeline_allows() {
        let pipeline = ModulePipeline::new();
        let mut frame = frame_in(syn_frame());
        let mut view = ProtocolView::decode(&mut frame);
        let decision = pipeline.run(&mut view, &MemoryEventLog::new());
        assert_eq!(decision, Decision::default());
    }

    #[test]
    fn test_module_names_in_registration_order() {
        let pipeline = ModulePipeline::with_modules(vec![
            safe_module(Fixed::new("b", Action::ALLOW).0),
            safe_module(Fixed::new("a", Action::ALLOW).0),
        ]);
        assert_eq!(pipeline.module_names(), vec!["b", "a"]);
        assert_eq!(pipeline.configs().len(), 2);
    }
}
