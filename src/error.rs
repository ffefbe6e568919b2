//! Error types for the decoder, the capture driver boundary, and the session owner.
//!
//! `FirewallError` is what callers of the registry and session API see. It
//! serializes as `{ "kind": "...", "message": "..." }` so a display layer can
//! distinguish failure categories without parsing text.

use serde::ser::SerializeStruct;

use crate::packet::ProtocolTag;

/// Decode-time failure. Expected for malformed or adversarial traffic; the
/// layer walk turns it into "stop at the current layer".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The discriminating check for the requested layer failed, or the layer is
    /// not present in the decoded stack.
    #[error("expected {expected:?} layer, found {found:?}")]
    ProtocolMismatch {
        expected: ProtocolTag,
        found: ProtocolTag,
    },

    /// The frame ends before the header of `protocol` is complete.
    #[error("{protocol:?} header needs {needed} bytes, {available} available")]
    Truncated {
        protocol: ProtocolTag,
        needed: usize,
        available: usize,
    },
}

/// Failure reported by a capture driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The driver or adapter could not be opened.
    #[error("failed to open capture driver: {0}")]
    OpenFailure(String),

    /// No frame is ready yet. Not an error for the capture loop; it ends one drain cycle.
    #[error("no frame ready")]
    NotReady,

    /// The channel was already closed.
    #[error("capture channel closed")]
    Closed,

    /// The driver does not support the requested operation.
    #[error("unsupported driver operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Returns true for read failures that only mean "nothing pending".
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::NotReady)
    }
}

/// Error surfaced to the owner of adapter sessions.
#[derive(Debug, thiserror::Error)]
pub enum FirewallError {
    /// The capture driver could not be opened for an adapter. Fatal to that session only.
    #[error("adapter {adapter}: {source}")]
    DriverOpen {
        adapter: String,
        #[source]
        source: DriverError,
    },

    /// A driver call other than open failed during session setup.
    #[error("adapter {adapter}: {source}")]
    Driver {
        adapter: String,
        #[source]
        source: DriverError,
    },

    /// One or more resources failed to release while stopping a session.
    #[error("adapter {adapter}: failed to release {resource}: {message}")]
    ResourceRelease {
        adapter: String,
        resource: String,
        message: String,
    },

    /// No adapter (or no running session) with that name.
    #[error("unknown adapter: {0}")]
    UnknownAdapter(String),

    /// Invalid or conflicting caller input.
    #[error("{0}")]
    InvalidInput(String),

    /// Invalid configuration file.
    #[error("{0}")]
    Config(String),

    /// I/O while opening or writing the block log.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FirewallError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            FirewallError::DriverOpen { .. } => "DriverOpen",
            FirewallError::Driver { .. } => "Driver",
            FirewallError::ResourceRelease { .. } => "ResourceRelease",
            FirewallError::UnknownAdapter(_) => "UnknownAdapter",
            FirewallError::InvalidInput(_) => "InvalidInput",
            FirewallError::Config(_) => "Config",
            FirewallError::Io(_) => "Io",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for FirewallError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("FirewallError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

impl From<serde_json::Error> for FirewallError {
    fn from(err: serde_json::Error) -> Self {
        FirewallError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(
            FirewallError::DriverOpen {
                adapter: "eth0".into(),
                source: DriverError::OpenFailure("denied".into()),
            }
            .kind(),
            "DriverOpen"
        );
        assert_eq!(FirewallError::UnknownAdapter("x".into()).kind(), "UnknownAdapter");
        assert_eq!(FirewallError::InvalidInput("bad".into()).kind(), "InvalidInput");
        assert_eq!(FirewallError::Config("bad".into()).kind(), "Config");
    }

    #[test]
    fn test_driver_open_message_names_adapter() {
        let err = FirewallError::DriverOpen {
            adapter: "eth0".into(),
            source: DriverError::OpenFailure("driver not installed".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("eth0"));
        assert!(msg.contains("driver not installed"));
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = FirewallError::ResourceRelease {
            adapter: "eth0".into(),
            resource: "module arp-guard".into(),
            message: "busy".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "ResourceRelease");
        assert!(json["message"].as_str().unwrap().contains("arp-guard"));
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_only_not_ready_is_transient() {
        assert!(DriverError::NotReady.is_transient());
        assert!(!DriverError::Closed.is_transient());
        assert!(!DriverError::OpenFailure("x".into()).is_transient());
    }

    #[test]
    fn test_from_io_error_produces_io_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: FirewallError = io_err.into();
        assert_eq!(err.kind(), "Io");
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_from_json_error_produces_config_variant() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: FirewallError = json_err.into();
        assert_eq!(err.kind(), "Config");
    }
}
