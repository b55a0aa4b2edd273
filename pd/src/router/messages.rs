//! Commands accepted by the router and the signals it answers with

use pinstore::{ResourceId, SLOT_COUNT, Slot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::LiveResource;

/// An intended registry operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Add {
        resource_id: ResourceId,
        title: String,
        locator: String,
        #[serde(default)]
        icon_ref: Option<String>,
    },
    Remove {
        resource_id: ResourceId,
    },
    SwitchTo {
        slot: Slot,
    },
    Query,
    Flush,
}

impl Command {
    pub fn add(resource: LiveResource) -> Self {
        Command::Add {
            resource_id: resource.resource_id,
            title: resource.title,
            locator: resource.locator,
            icon_ref: resource.icon_ref,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Add { .. } => "add",
            Command::Remove { .. } => "remove",
            Command::SwitchTo { .. } => "switch_to",
            Command::Query => "query",
            Command::Flush => "flush",
        }
    }
}

/// Recoverable command failures, reported to the caller as typed values
///
/// The `Display` text is the human-readable notice shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum CommandError {
    #[error("{resource_id} is already pinned")]
    AlreadyTracked { resource_id: ResourceId },

    #[error("All {} slots are taken; unpin something first", SLOT_COUNT)]
    CapacityReached,

    #[error("Slot {slot} is empty")]
    SlotEmpty { slot: Slot },

    #[error("The registry changed underneath us {attempts} times in a row; try again")]
    ConcurrentModification { attempts: u32 },

    #[error("Registry storage is unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Could not activate {resource_id}: {reason}")]
    ActivationFailed { resource_id: ResourceId, reason: String },
}

impl CommandError {
    /// Stable signal name, matching the serialized tag
    pub fn signal(&self) -> &'static str {
        match self {
            CommandError::AlreadyTracked { .. } => "already_tracked",
            CommandError::CapacityReached => "capacity_reached",
            CommandError::SlotEmpty { .. } => "slot_empty",
            CommandError::ConcurrentModification { .. } => "concurrent_modification",
            CommandError::StoreUnavailable { .. } => "store_unavailable",
            CommandError::ActivationFailed { .. } => "activation_failed",
        }
    }

    pub(crate) fn store_unavailable(reason: impl ToString) -> Self {
        CommandError::StoreUnavailable {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = r#"{"command":"switch_to","slot":0}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, Command::SwitchTo { slot: Slot::new(0).unwrap() });

        let json = r#"{"command":"add","resource_id":"12","title":"T","locator":"https://t"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd, Command::Add { icon_ref: None, .. }));
    }

    #[test]
    fn test_command_rejects_bad_slot() {
        let json = r#"{"command":"switch_to","slot":12}"#;
        assert!(serde_json::from_str::<Command>(json).is_err());
    }

    #[test]
    fn test_signal_matches_serialized_tag() {
        let errors = vec![
            CommandError::AlreadyTracked { resource_id: "1".into() },
            CommandError::CapacityReached,
            CommandError::SlotEmpty { slot: Slot::new(4).unwrap() },
            CommandError::ConcurrentModification { attempts: 3 },
            CommandError::store_unavailable("disk gone"),
            CommandError::ActivationFailed {
                resource_id: "1".into(),
                reason: "closed".to_string(),
            },
        ];
        for err in errors {
            let json = serde_json::to_value(&err).unwrap();
            assert_eq!(json["signal"], err.signal());
        }
    }

    #[test]
    fn test_notices_are_readable() {
        assert_eq!(
            CommandError::CapacityReached.to_string(),
            "All 10 slots are taken; unpin something first"
        );
        assert_eq!(
            CommandError::SlotEmpty { slot: Slot::new(0).unwrap() }.to_string(),
            "Slot 0 is empty"
        );
    }
}
