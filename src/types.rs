/// Shared types used across the codebase

use serde::{Deserialize, Serialize};

/// Repository operations, used for logging and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Select,
    Update,
    SoftDelete, // Sets the deletion timestamp only
    Delete,     // Hard removal, ignores the deletion timestamp
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Select => "select",
            Operation::Update => "update",
            Operation::SoftDelete => "soft_delete",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
