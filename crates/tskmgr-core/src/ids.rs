//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an id from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a Run.
    RunId
);

string_id!(
    /// Unique identifier for a Task.
    TaskId
);

string_id!(
    /// Identifier a runner process chooses for itself.
    ///
    /// Unlike run and task ids these are never generated by the control plane.
    RunnerId
);

impl RunId {
    /// Generate a new random RunId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl TaskId {
    /// Generate a new random TaskId.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl RunnerId {
    /// Returns true if the id is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
        assert_ne!(TaskId::generate(), TaskId::generate());
    }

    #[test]
    fn test_id_display() {
        let id = RunnerId::new("runner-1");
        assert_eq!(format!("{}", id), "runner-1");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&TaskId::new("t-1")).unwrap();
        assert_eq!(json, "\"t-1\"");
    }

    #[test]
    fn test_blank_runner() {
        assert!(RunnerId::new("  ").is_blank());
        assert!(!RunnerId::new("r").is_blank());
    }
}
