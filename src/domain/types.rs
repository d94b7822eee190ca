//! Shared domain enumerations aligned with persisted values.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Kind of entity a ranking is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    Assets,
    Comments,
    Users,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Assets => "ASSETS",
            ItemType::Comments => "COMMENTS",
            ItemType::Users => "USERS",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ASSETS" => Ok(ItemType::Assets),
            "COMMENTS" => Ok(ItemType::Comments),
            "USERS" => Ok(ItemType::Users),
            other => Err(DomainError::validation(format!(
                "unknown item type `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_item_type_case_insensitively() {
        assert_eq!("assets".parse::<ItemType>().unwrap(), ItemType::Assets);
        assert_eq!(" Comments ".parse::<ItemType>().unwrap(), ItemType::Comments);
        assert_eq!("USERS".parse::<ItemType>().unwrap(), ItemType::Users);
    }

    #[test]
    fn rejects_unknown_item_type() {
        let err = "videos".parse::<ItemType>().unwrap_err();
        assert!(err.to_string().contains("videos"));
    }
}
