//! Client-facing project document
//!
//! The nested JSON shape the editor holds in memory. Decoding is lenient
//! (nulls become defaults, ids and counts may arrive as strings) because the
//! document is assembled by browser code across several releases.

use crate::error::{Result, WriteflowError};
use crate::normalize::parse_timestamp;
use crate::types::IdeaLocation;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Client-local idea id -> persisted idea id
pub type IdeaIdMap = BTreeMap<String, i32>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectDocument {
    pub metadata: DocumentMetadata,
    pub plan: PlanDocument,
    pub write: PhaseDocument,
    pub edit: PhaseDocument,
    pub chat_history: Vec<ChatEntry>,
    /// Session whose log is in `chat_history`
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "de_opt_string")]
    pub chat_session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMetadata {
    #[serde(deserialize_with = "de_string")]
    pub title: String,
    #[serde(deserialize_with = "de_string")]
    pub description: String,
    #[serde(deserialize_with = "de_string")]
    pub current_tab: String,
    #[serde(deserialize_with = "de_string")]
    pub instructor_instructions: String,
    #[serde(deserialize_with = "de_string")]
    pub goal: String,
    /// Output only; saves never change status
    #[serde(deserialize_with = "de_string")]
    pub status: String,
    #[serde(deserialize_with = "de_timestamp")]
    pub created: i64,
    #[serde(deserialize_with = "de_timestamp")]
    pub modified: i64,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            current_tab: "plan".to_string(),
            instructor_instructions: String::new(),
            goal: String::new(),
            status: "draft".to_string(),
            created: 0,
            modified: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanDocument {
    pub ideas: Vec<IdeaDocument>,
    pub outline: Value,
    pub custom_sections: Value,
    pub custom_section_titles: Value,
    pub removed_sections: Value,
    pub section_order: Value,
}

impl Default for PlanDocument {
    fn default() -> Self {
        let blob = OutlineBlob::default();
        Self {
            ideas: Vec::new(),
            outline: blob.outline,
            custom_sections: blob.custom_sections,
            custom_section_titles: blob.custom_section_titles,
            removed_sections: blob.removed_sections,
            section_order: blob.section_order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaDocument {
    /// Persisted id (numeric) or a client-local temporary id
    #[serde(default, deserialize_with = "de_opt_string", serialize_with = "ser_idea_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "de_string")]
    pub content: String,
    #[serde(default = "default_location")]
    pub location: IdeaLocation,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub section_id: Option<String>,
    #[serde(default, deserialize_with = "de_bool")]
    pub ai_generated: bool,
}

fn default_location() -> IdeaLocation {
    IdeaLocation::Brainstorm
}

impl IdeaDocument {
    pub fn new(id: &str, content: &str, location: IdeaLocation, section_id: Option<&str>) -> Self {
        Self {
            id: Some(id.to_string()),
            content: content.to_string(),
            location,
            section_id: section_id.map(str::to_string),
            ai_generated: false,
        }
    }

    /// Section only means something in the outline; empty strings are NULL
    pub fn effective_section(&self) -> Option<&str> {
        match self.location {
            IdeaLocation::Brainstorm => None,
            IdeaLocation::Outline => self.section_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PhaseDocument {
    #[serde(deserialize_with = "de_string")]
    pub content: String,
    #[serde(deserialize_with = "de_int")]
    pub word_count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    #[serde(default, deserialize_with = "de_string")]
    pub role: String,
    #[serde(default, deserialize_with = "de_string")]
    pub content: String,
    /// Epoch seconds/millis or ISO-8601 on input; epoch seconds on output
    #[serde(default)]
    pub timestamp: Value,
}

impl ChatEntry {
    pub fn new(role: &str, content: &str, timestamp: i64) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: json!(timestamp),
        }
    }
}

/// Outline structures persisted as one opaque JSON column on the metadata row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutlineBlob {
    pub outline: Value,
    pub custom_sections: Value,
    pub custom_section_titles: Value,
    pub removed_sections: Value,
    pub section_order: Value,
}

impl Default for OutlineBlob {
    fn default() -> Self {
        Self {
            outline: json!([]),
            custom_sections: json!([]),
            custom_section_titles: json!({}),
            removed_sections: json!([]),
            section_order: json!([]),
        }
    }
}

impl OutlineBlob {
    pub fn from_plan(plan: &PlanDocument) -> Self {
        let defaults = Self::default();
        let or_default = |v: &Value, d: Value| if v.is_null() { d } else { v.clone() };
        Self {
            outline: or_default(&plan.outline, defaults.outline),
            custom_sections: or_default(&plan.custom_sections, defaults.custom_sections),
            custom_section_titles: or_default(&plan.custom_section_titles, defaults.custom_section_titles),
            removed_sections: or_default(&plan.removed_sections, defaults.removed_sections),
            section_order: or_default(&plan.section_order, defaults.section_order),
        }
    }

    /// Decode the stored column; anything unreadable yields empty structures.
    /// A bare array is an outline stored without the surrounding object.
    pub fn decode(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => Self {
                outline: Value::Array(items),
                ..Self::default()
            },
            Ok(value @ Value::Object(_)) => match serde_json::from_value::<OutlineBlob>(value) {
                Ok(blob) => blob.with_null_defaults(),
                Err(e) => {
                    tracing::warn!("outline blob has unexpected shape: {}", e);
                    Self::default()
                }
            },
            Ok(_) | Err(_) => {
                tracing::warn!("outline blob is not valid JSON, using empty outline");
                Self::default()
            }
        }
    }

    fn with_null_defaults(self) -> Self {
        let plan = PlanDocument {
            ideas: Vec::new(),
            outline: self.outline,
            custom_sections: self.custom_sections,
            custom_section_titles: self.custom_section_titles,
            removed_sections: self.removed_sections,
            section_order: self.section_order,
        };
        Self::from_plan(&plan)
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn apply_to(self, plan: &mut PlanDocument) {
        plan.outline = self.outline;
        plan.custom_sections = self.custom_sections;
        plan.custom_section_titles = self.custom_section_titles;
        plan.removed_sections = self.removed_sections;
        plan.section_order = self.section_order;
    }
}

impl ProjectDocument {
    /// Parse a client document; malformed input is a validation error
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| WriteflowError::Validation(format!("invalid project document: {}", e)))
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn phase(&self, phase: crate::types::Phase) -> &PhaseDocument {
        match phase {
            crate::types::Phase::Write => &self.write,
            crate::types::Phase::Edit => &self.edit,
        }
    }

    pub fn phase_mut(&mut self, phase: crate::types::Phase) -> &mut PhaseDocument {
        match phase {
            crate::types::Phase::Write => &mut self.write,
            crate::types::Phase::Edit => &mut self.edit,
        }
    }
}

// ============================================================================
// Lenient field codecs
// ============================================================================

fn de_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn de_int<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i32, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    }
    .clamp(0, i32::MAX as i64) as i32)
}

fn de_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    })
}

fn de_timestamp<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(parse_timestamp(&value).unwrap_or(0))
}

/// Persisted ids go out as numbers, temporary ids as strings
fn ser_idea_id<S: Serializer>(id: &Option<String>, s: S) -> std::result::Result<S::Ok, S::Error> {
    match id {
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) => s.serialize_i64(n),
            Err(_) => s.serialize_str(raw),
        },
        None => s.serialize_none(),
    }
}
