//! Scope key and the closed vocabularies stored as text columns

use crate::error::{Result, WriteflowError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One learner's copy of one writing activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub project_id: i32,
    pub user_id: i32,
}

impl Scope {
    pub fn new(project_id: i32, user_id: i32) -> Self {
        Self { project_id, user_id }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project {} / user {}", self.project_id, self.user_id)
    }
}

/// Declares a text-backed enum with `as_str`, `Display` and a validating `FromStr`.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = WriteflowError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(WriteflowError::Validation(format!(
                        "invalid {} '{}' (expected one of: {})",
                        $what,
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }
    };
}

text_enum!(
    /// Long-form text fields tracked with version history
    Phase, "phase" {
        Write => "write",
        Edit => "edit",
    }
);

text_enum!(
    /// Where an idea lives in the plan
    IdeaLocation, "idea location" {
        Brainstorm => "brainstorm",
        Outline => "outline",
    }
);

text_enum!(
    ChatRole, "chat role" {
        User => "user",
        Assistant => "assistant",
        System => "system",
    }
);

text_enum!(
    ProjectStatus, "project status" {
        Draft => "draft",
        Submitted => "submitted",
    }
);

text_enum!(
    /// Workflow tab the learner last had open
    CurrentTab, "tab" {
        Plan => "plan",
        Write => "write",
        Edit => "edit",
    }
);

impl CurrentTab {
    /// Lenient parse for stored values; unknown tabs fall back to `plan`
    pub fn from_stored(raw: &str) -> Self {
        raw.parse().unwrap_or(CurrentTab::Plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse() {
        assert_eq!("write".parse::<Phase>().unwrap(), Phase::Write);
        assert_eq!(" Edit ".parse::<Phase>().unwrap(), Phase::Edit);
        let err = "plan".parse::<Phase>().unwrap_err();
        assert!(matches!(err, WriteflowError::Validation(_)));
        assert!(err.to_string().contains("write, edit"));
    }

    #[test]
    fn test_chat_role_rejects_unknown() {
        assert_eq!("assistant".parse::<ChatRole>().unwrap(), ChatRole::Assistant);
        assert!("tool".parse::<ChatRole>().is_err());
        assert!("".parse::<ChatRole>().is_err());
    }

    #[test]
    fn test_round_trip_all_variants() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), *phase);
        }
        for role in ChatRole::ALL {
            assert_eq!(role.to_string().parse::<ChatRole>().unwrap(), *role);
        }
    }

    #[test]
    fn test_tab_defaults() {
        assert_eq!(CurrentTab::from_stored("bogus"), CurrentTab::Plan);
        assert_eq!(CurrentTab::from_stored("edit"), CurrentTab::Edit);
        assert_eq!("SUBMITTED".parse::<ProjectStatus>().unwrap(), ProjectStatus::Submitted);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&IdeaLocation::Outline).unwrap();
        assert_eq!(json, "\"outline\"");
    }
}
