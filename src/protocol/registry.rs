//! Command id registry.
//!
//! Maps 2-hex command ids to symbolic names. The registry is a plain value built at
//! startup and handed to whoever needs id-to-name lookups (the link transport uses it to
//! label outbound traffic).

use std::collections::HashMap;

/// Known command ids.
///
/// These are placeholders until the controller firmware document is available.
pub mod ids {
    /// Debug telemetry frame (`$B0` + four 8-hex fields).
    pub const DEBUG_TELEMETRY: &str = "B0";
    /// Set all eight PID parameters.
    pub const SET_PID: &str = "B5";
    /// Read all eight PID parameters.
    pub const GET_PID: &str = "B6";
    /// Liveness check.
    pub const PING: &str = "6A";
    /// Set the control setpoint.
    pub const SET_SP: &str = "11";
    /// Start the control loop.
    pub const START: &str = "12";
    /// Stop the control loop.
    pub const STOP: &str = "13";
    /// Enter run mode.
    pub const RUN: &str = "20";
    /// Enter standby mode.
    pub const STANDBY: &str = "21";
    /// Open (`"1"`) or close (`"0"`) the shutter.
    pub const SHUTTER_CONTROL: &str = "30";
    /// Trigger a trial.
    pub const TRIGGER: &str = "31";
    /// Read the flow sensor.
    pub const GET_FLOW: &str = "40";
}

/// Name returned for ids that are not registered.
pub const UNKNOWN_COMMAND: &str = "UNKNOWN";

const KNOWN_COMMANDS: &[(&str, &str)] = &[
    (ids::DEBUG_TELEMETRY, "DEBUG_TELEMETRY"),
    (ids::SET_PID, "SET_PID"),
    (ids::GET_PID, "GET_PID"),
    (ids::PING, "PING"),
    (ids::SET_SP, "SET_SP"),
    (ids::START, "START"),
    (ids::STOP, "STOP"),
    (ids::RUN, "RUN"),
    (ids::STANDBY, "STANDBY"),
    (ids::SHUTTER_CONTROL, "SHUTTER_CONTROL"),
    (ids::TRIGGER, "TRIGGER"),
    (ids::GET_FLOW, "GET_FLOW"),
];

/// Id-to-name lookup table.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    names: HashMap<String, String>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every command in [`ids`].
    pub fn with_known_commands() -> Self {
        let mut registry = Self::new();
        for (id, name) in KNOWN_COMMANDS {
            registry.register(id, name);
        }
        registry
    }

    /// Register a name for an id. A later registration for the same id wins.
    pub fn register(&mut self, command_id: &str, name: &str) {
        self.names.insert(Self::key(command_id), name.to_string());
    }

    /// Look up the symbolic name for an id, or [`UNKNOWN_COMMAND`].
    pub fn name(&self, command_id: &str) -> &str {
        self.names
            .get(&Self::key(command_id))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_COMMAND)
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn key(command_id: &str) -> String {
        command_id.trim().to_ascii_uppercase()
    }
}
