use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque name of a broadcast channel, e.g. `room:machines`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Room(String);

impl Room {
    /// Prefix the backend uses for every room.
    pub const PREFIX: &'static str = "room:";

    /// Wraps a full room name as-is.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The room of a department (shift-master pages), e.g. `room:masterceh`.
    pub fn department(department: &str) -> Self {
        Self(format!("{}{}", Self::PREFIX, department.trim().to_lowercase()))
    }

    /// Shared room for machine, pallet and uptime updates.
    pub fn machines() -> Self {
        Self(format!("{}machines", Self::PREFIX))
    }

    /// Room of the packaging view.
    pub fn packaging() -> Self {
        Self(format!("{}packaging", Self::PREFIX))
    }

    /// The full name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Room {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_names() {
        assert_eq!(Room::department(" MasterCeh ").as_str(), "room:masterceh");
        assert_eq!(Room::machines().to_string(), "room:machines");
        assert_eq!(Room::from("room:x"), Room::new("room:x"));
    }
}
