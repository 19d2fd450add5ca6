//! Team identity shared by the scheduler, the budget manager and the
//! signal registry.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque name of a team.
///
/// The scheduler calls it a team, the budget manager an engine and the
/// signal register a chip. `TeamId` is the one key all three are
/// registered under by the kernel facade.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(String);

impl TeamId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TeamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TeamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for TeamId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TeamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_id_serializes_as_plain_string() {
        let id = TeamId::new("research");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"research\"");
        let parsed: TeamId = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(parsed.as_str(), "review");
    }

    #[test]
    fn test_team_id_borrows_as_str_for_map_lookups() {
        let mut map = std::collections::HashMap::new();
        map.insert(TeamId::new("alpha"), 1);
        assert_eq!(map.get("alpha"), Some(&1));
    }
}
