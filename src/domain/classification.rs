//! Classification outcomes attached to items.
//!
//! Every ingested item gets a Classification: a category, a priority, and
//! whatever entities the model (or the keyword fallback) could extract.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// High-level bucket a message falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Scheduling: meetings, calls, appointments
    Meeting,

    /// Actionable work with an implied deadline
    Task,

    /// Reference material, no action implied
    Information,

    /// Ideas and open-ended musings
    Thought,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meeting => "meeting",
            Self::Task => "task",
            Self::Information => "information",
            Self::Thought => "thought",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "meeting" => Some(Self::Meeting),
            "task" => Some(Self::Task),
            "information" => Some(Self::Information),
            "thought" => Some(Self::Thought),
            _ => None,
        }
    }

    /// Parse a category name, coercing anything unrecognized to the default.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Placeholder title used when no better title could be derived.
    pub fn placeholder_title(&self) -> &'static str {
        match self {
            Self::Meeting => "Meeting Item",
            Self::Task => "Task Item",
            Self::Information => "Information Item",
            Self::Thought => "Thought Item",
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::Information
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency assigned to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse a priority name, coercing anything unrecognized to the default.
    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::default(),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entities pulled out of a message during classification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    /// Date expressions found in the text
    #[serde(default)]
    pub dates: Vec<String>,

    /// Time expressions found in the text
    #[serde(default)]
    pub times: Vec<String>,

    /// Person most relevant to the message, if any
    #[serde(default)]
    pub contact: Option<String>,

    /// Project names found in the text
    #[serde(default)]
    pub projects: Vec<String>,

    /// Salient keywords
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Validated classifier output, not yet attached to an item.
///
/// Unlike [`Classification`] this carries a suggested title, which is
/// consumed during item creation rather than persisted with the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub title: String,
    pub category: Category,
    pub priority: Priority,
    pub confidence: f64,
    pub action_required: bool,
    pub summary: String,
    pub entities: Entities,
}

/// Persisted classification record for an item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Item this classification belongs to
    pub item_id: Uuid,

    /// High-level bucket
    pub category: Category,

    /// Urgency
    pub priority: Priority,

    /// Model confidence, clamped to [0.0, 1.0]
    pub confidence: f64,

    /// Whether the message asks the user to do something
    pub action_required: bool,

    /// Short summary, possibly empty
    pub summary: String,

    /// Date expressions found in the text
    pub dates: Vec<String>,

    /// Time expressions found in the text
    pub times: Vec<String>,

    /// Person most relevant to the message, if any
    pub contact: Option<String>,

    /// Project names found in the text
    pub projects: Vec<String>,

    /// Salient keywords
    pub keywords: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_coerces_to_information() {
        assert_eq!(Category::parse_or_default("spam"), Category::Information);
        assert_eq!(Category::parse_or_default("meeting"), Category::Meeting);
    }

    #[test]
    fn test_unknown_priority_coerces_to_medium() {
        assert_eq!(Priority::parse_or_default("urgent"), Priority::Medium);
        assert_eq!(Priority::parse_or_default("low"), Priority::Low);
    }

    #[test]
    fn test_placeholder_titles() {
        assert_eq!(Category::Meeting.placeholder_title(), "Meeting Item");
        assert_eq!(Category::Thought.placeholder_title(), "Thought Item");
    }
}
