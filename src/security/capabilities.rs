//! Capabilities: named permission classes granted to agents
//!
//! ```text
//! ┌─────────────────┬──────────────────────────────────────────────┐
//! │ system_commands │ package managers, service control, sudo, ... │
//! │ file_write      │ cp, mv, rm, mkdir, output redirection, ...    │
//! │ network         │ curl, wget, ssh, ping, ...                    │
//! │ process_control │ kill, pkill, renice, ...                      │
//! └─────────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! A `CapabilitySet` is a small bitmask plus the `elevated` override that lets
//! exactly one agent perform actions matching a dangerous-action rule.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SystemCommands,
    FileWrite,
    Network,
    ProcessControl,
}

impl Capability {
    /// Canonical order. The first capability an agent holds in this order is
    /// its primary capability.
    pub const ALL: [Capability; 4] = [
        Capability::SystemCommands,
        Capability::FileWrite,
        Capability::Network,
        Capability::ProcessControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SystemCommands => "system_commands",
            Capability::FileWrite => "file_write",
            Capability::Network => "network",
            Capability::ProcessControl => "process_control",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::SystemCommands => 0b0001,
            Capability::FileWrite => 0b0010,
            Capability::Network => 0b0100,
            Capability::ProcessControl => 0b1000,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown capability name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "system_commands" => Ok(Capability::SystemCommands),
            "file_write" => Ok(Capability::FileWrite),
            "network" | "network_access" => Ok(Capability::Network),
            "process_control" => Ok(Capability::ProcessControl),
            other => Err(UnknownCapability(other.to_string())),
        }
    }
}

/// Set of capabilities plus the elevated override
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    bits: u8,
    elevated: bool,
}

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self::of(&Capability::ALL)
    }

    pub fn of(capabilities: &[Capability]) -> Self {
        let bits = capabilities.iter().fold(0, |acc, c| acc | c.bit());
        Self {
            bits,
            elevated: false,
        }
    }

    /// Grant the dangerous-action override
    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    pub fn insert(&mut self, capability: Capability) {
        self.bits |= capability.bit();
    }

    /// Union of the capabilities, keeping this set's elevation
    pub fn union(mut self, other: CapabilitySet) -> Self {
        self.bits |= other.bits;
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.bits & capability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Held capabilities in canonical order
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }

    /// Capability assumed when neither the caller nor the request text says
    pub fn primary(&self) -> Option<Capability> {
        self.iter().next()
    }

    /// First capability of this set, in canonical order, that `granted` lacks
    pub fn first_missing(&self, granted: &CapabilitySet) -> Option<Capability> {
        self.iter().find(|c| !granted.contains(*c))
    }

    pub fn to_vec(&self) -> Vec<Capability> {
        self.iter().collect()
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CapabilitySet", 2)?;
        state.serialize_field("capabilities", &self.to_vec())?;
        state.serialize_field("elevated", &self.elevated)?;
        state.end()
    }
}
