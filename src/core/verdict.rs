//! The value every firewall module returns for a frame.

use bitflags::bitflags;

bitflags! {
    /// What a module wants done with a frame. Several bits may be set at once,
    /// e.g. `LOG | DROP`.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Action: u8 {
        const DROP = 1 << 0;
        const ALLOW = 1 << 1;
        /// `Verdict::replacement_bytes` must be transmitted to the network.
        const SEND_OUT_PACKET = 1 << 2;
        /// The module rewrote the frame in place.
        const EDITED = 1 << 3;
        const LOG = 1 << 4;
        const ERROR = 1 << 5;
    }
}

/// One module's judgement on one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub module_name: String,
    pub action: Action,
    pub log_message: Option<String>,
    pub replacement_bytes: Option<Vec<u8>>,
}

impl Verdict {
    pub fn new(module_name: impl Into<String>, action: Action) -> Self {
        Self {
            module_name: module_name.into(),
            action,
            log_message: None,
            replacement_bytes: None,
        }
    }

    pub fn allow(module_name: impl Into<String>) -> Self {
        Self::new(module_name, Action::ALLOW)
    }

    pub fn drop(module_name: impl Into<String>) -> Self {
        Self::new(module_name, Action::DROP)
    }

    pub fn edited(module_name: impl Into<String>) -> Self {
        Self::new(module_name, Action::ALLOW | Action::EDITED)
    }

    /// Attach a log message and set the `LOG` bit.
    pub fn with_log(mut self, message: impl Into<String>) -> Self {
        self.action |= Action::LOG;
        self.log_message = Some(message.into());
        self
    }

    /// Ask the capture loop to transmit `bytes` to the network.
    pub fn with_send_out(mut self, bytes: Vec<u8>) -> Self {
        self.action |= Action::SEND_OUT_PACKET;
        self.replacement_bytes = Some(bytes);
        self
    }

    /// Verdict the pipeline synthesizes when a module's `classify` fails.
    pub fn failure(module_name: &str, cause: impl std::fmt::Display) -> Self {
        Self {
            module_name: module_name.to_string(),
            action: Action::ERROR | Action::LOG,
            log_message: Some(format!("{module_name} failed: {cause}")),
            replacement_bytes: None,
        }
    }

    pub fn is_drop(&self) -> bool {
        self.action.contains(Action::DROP)
    }

    pub fn is_edited(&self) -> bool {
        self.action.contains(Action::EDITED)
    }
}
