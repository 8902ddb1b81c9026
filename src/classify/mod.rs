//! Message classification via OpenAI chat completions.
//!
//! Every message gets a classification: from the model when possible, from a
//! deterministic keyword fallback when the model is unavailable or returns
//! something unusable. [`Classifier::classify`] therefore never fails.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::domain::{Category, ClassificationResult, Entities, Priority, Source};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f64 = 0.1;
const MAX_TOKENS: u32 = 600;

const SYSTEM_PROMPT: &str =
    "You are an assistant for message classification. Always respond with valid JSON only.";

/// OpenAI-backed message classifier with a keyword fallback
pub struct Classifier {
    api_key: Option<String>,
    http: reqwest::Client,
}

impl Classifier {
    /// Create a classifier. Without an API key every call takes the
    /// fallback path.
    pub fn new(api_key: Option<String>) -> Self {
        if api_key.is_none() {
            warn!("OpenAI API key not configured, classification will use keyword fallback");
        }
        Self {
            api_key,
            http: reqwest::Client::new(),
        }
    }

    /// Classify a message. Never fails: model errors, unparseable output
    /// and a missing API key all degrade to the keyword fallback.
    #[instrument(skip(self, text), fields(source = %source))]
    pub async fn classify(&self, text: &str, source: Source) -> ClassificationResult {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("classifier has no API key, using fallback");
            return fallback(text);
        };

        match self.request_classification(api_key, text, source).await {
            Ok(raw) => validate(raw),
            Err(e) => {
                error!("classification request failed: {e:#}");
                fallback(text)
            }
        }
    }

    async fn request_classification(
        &self,
        api_key: &str,
        text: &str,
        source: Source,
    ) -> Result<RawClassification> {
        let prompt = build_prompt(text, source);
        let request = ChatRequest {
            model: MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .http
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion returned {status}: {body}");
        }

        let completion: ChatResponse = response.json().await?;
        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .context("completion had no content")?;

        serde_json::from_str(content).context("completion content is not valid JSON")
    }
}

fn build_prompt(text: &str, source: Source) -> String {
    format!(
        r#"Analyze the following message and classify it.

Source: {source}
Text: {text}

Return the result in JSON format:
{{
    "title": "A concise, descriptive title for this message (max 50 characters)",
    "category": "meeting|task|information|thought",
    "confidence": 0.0-1.0,
    "entities": {{
        "dates": ["list of dates found in text"],
        "times": ["list of times found in text"],
        "contact": "main person/contact name (only one, the most relevant)",
        "projects": ["list of project names"],
        "keywords": ["important keywords from the message"]
    }},
    "priority": "low|medium|high",
    "action_required": true/false,
    "summary": "brief summary of the message content"
}}

Classification criteria:
- meeting: mentions time, people, meeting place, appointments, calls
- task: something needs to be done, deadlines, assignments, todos
- information: reports, notifications, reference information, updates
- thought: ideas, suggestions, reflections, brainstorming

Priority criteria:
- high: urgent tasks, important meetings, critical information, deadlines
- medium: regular tasks, scheduled meetings, useful information
- low: general thoughts, non-urgent information, casual notes

For contact extraction: Extract only the most relevant person's name from the message.
If multiple people are mentioned, choose the primary contact (sender, main person being discussed, or meeting organizer).
Return null if no specific person is mentioned.

Always respond with valid JSON only."#
    )
}

/// Normalize raw model output into a valid classification.
///
/// Out-of-range and missing fields are coerced rather than rejected: the
/// model response is untrusted input.
fn validate(raw: RawClassification) -> ClassificationResult {
    let category_raw = raw
        .category
        .unwrap_or_else(|| Category::default().as_str().to_string());

    let title = {
        let truncated = truncate_chars(raw.title.as_deref().unwrap_or(""), 50);
        if truncated.is_empty() {
            placeholder_title(&category_raw).to_string()
        } else {
            truncated
        }
    };

    ClassificationResult {
        title,
        category: Category::parse_or_default(&category_raw),
        priority: raw
            .priority
            .as_deref()
            .map(Priority::parse_or_default)
            .unwrap_or_default(),
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        action_required: raw.action_required.unwrap_or(false),
        summary: truncate_chars(raw.summary.as_deref().unwrap_or(""), 500),
        entities: raw.entities,
    }
}

/// Title used when neither the model nor the text yields one.
///
/// Unrecognized category names get a generic title even though the category
/// itself is later coerced to the default.
fn placeholder_title(category_raw: &str) -> &'static str {
    match Category::parse(category_raw) {
        Some(c) => c.placeholder_title(),
        None => "New Item",
    }
}

const MEETING_KEYWORDS: &[&str] = &[
    "meeting",
    "call",
    "appointment",
    "schedule",
    "meet",
    "conference",
];
const TASK_KEYWORDS: &[&str] = &[
    "task", "todo", "deadline", "complete", "finish", "do", "need to", "must", "should",
];
const THOUGHT_KEYWORDS: &[&str] = &[
    "idea", "think", "suggest", "propose", "maybe", "consider", "what if",
];

/// Deterministic keyword classification used when the model is unavailable.
fn fallback(text: &str) -> ClassificationResult {
    let text_lower = text.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|w| text_lower.contains(w));

    let (category, priority, action_required) = if matches(MEETING_KEYWORDS) {
        (Category::Meeting, Priority::High, true)
    } else if matches(TASK_KEYWORDS) {
        (Category::Task, Priority::High, true)
    } else if matches(THOUGHT_KEYWORDS) {
        (Category::Thought, Priority::Low, false)
    } else {
        (Category::Information, Priority::Medium, false)
    };

    let derived = derived_title(text);
    let title = if derived.is_empty() {
        category.placeholder_title().to_string()
    } else {
        derived
    };

    let summary = if text.chars().count() > 100 {
        format!("{}...", text.chars().take(100).collect::<String>())
    } else {
        text.to_string()
    };

    ClassificationResult {
        title,
        category,
        priority,
        confidence: 0.6,
        action_required,
        summary,
        entities: Entities {
            keywords: text_lower
                .split_whitespace()
                .take(5)
                .map(str::to_string)
                .collect(),
            ..Default::default()
        },
    }
}

/// First six words of the text, shortened with an ellipsis past 50 chars.
fn derived_title(text: &str) -> String {
    let joined = text.split_whitespace().take(6).collect::<Vec<_>>().join(" ");
    if joined.chars().count() > 50 {
        format!("{}...", joined.chars().take(47).collect::<String>())
    } else {
        joined
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Model output before validation
#[derive(Debug, Default, Deserialize)]
struct RawClassification {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    entities: Entities,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    action_required: Option<bool>,
    #[serde(default)]
    summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_clamps_confidence() {
        let raw = RawClassification {
            confidence: Some(1.7),
            ..Default::default()
        };
        assert_eq!(validate(raw).confidence, 1.0);

        let raw = RawClassification {
            confidence: Some(-0.3),
            ..Default::default()
        };
        assert_eq!(validate(raw).confidence, 0.0);
    }

    #[test]
    fn test_validate_defaults_for_empty_output() {
        let result = validate(RawClassification::default());
        assert_eq!(result.category, Category::Information);
        assert_eq!(result.priority, Priority::Medium);
        assert_eq!(result.confidence, 0.5);
        assert!(!result.action_required);
        assert_eq!(result.summary, "");
        assert_eq!(result.title, "Information Item");
        assert!(result.entities.dates.is_empty());
        assert!(result.entities.contact.is_none());
    }

    #[test]
    fn test_validate_coerces_unknown_category() {
        let raw = RawClassification {
            category: Some("spam".to_string()),
            ..Default::default()
        };
        let result = validate(raw);
        assert_eq!(result.category, Category::Information);
        // the raw category name still drives the placeholder title
        assert_eq!(result.title, "New Item");
    }

    #[test]
    fn test_validate_coerces_unknown_priority() {
        let raw = RawClassification {
            priority: Some("urgent".to_string()),
            ..Default::default()
        };
        assert_eq!(validate(raw).priority, Priority::Medium);
    }

    #[test]
    fn test_validate_truncates_title_and_summary() {
        let raw = RawClassification {
            title: Some("x".repeat(80)),
            summary: Some("y".repeat(600)),
            ..Default::default()
        };
        let result = validate(raw);
        assert_eq!(result.title.chars().count(), 50);
        assert_eq!(result.summary.chars().count(), 500);
    }

    #[test]
    fn test_validate_parses_model_shaped_json() {
        let raw: RawClassification = serde_json::from_str(
            r#"{
                "title": "Budget review",
                "category": "meeting",
                "confidence": 0.92,
                "entities": {
                    "dates": ["tomorrow"],
                    "times": ["3pm"],
                    "contact": "Alice",
                    "projects": [],
                    "keywords": ["budget"]
                },
                "priority": "high",
                "action_required": true,
                "summary": "Discuss the budget tomorrow at 3pm."
            }"#,
        )
        .unwrap();

        let result = validate(raw);
        assert_eq!(result.title, "Budget review");
        assert_eq!(result.category, Category::Meeting);
        assert_eq!(result.priority, Priority::High);
        assert_eq!(result.entities.contact.as_deref(), Some("Alice"));
        assert!(result.action_required);
    }

    #[test]
    fn test_fallback_detects_meeting() {
        let result = fallback("Let's meet tomorrow at 3pm to discuss the budget");
        assert_eq!(result.category, Category::Meeting);
        assert_eq!(result.priority, Priority::High);
        assert!(result.action_required);
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.title, "Let's meet tomorrow at 3pm to");
    }

    #[test]
    fn test_fallback_detects_task() {
        let result = fallback("need to finish the report by Friday");
        assert_eq!(result.category, Category::Task);
        assert_eq!(result.priority, Priority::High);
        assert!(result.action_required);
    }

    #[test]
    fn test_fallback_detects_thought() {
        let result = fallback("what if we tried a new approach");
        assert_eq!(result.category, Category::Thought);
        assert_eq!(result.priority, Priority::Low);
        assert!(!result.action_required);
    }

    #[test]
    fn test_fallback_defaults_to_information() {
        let result = fallback("the server was rebooted last night");
        assert_eq!(result.category, Category::Information);
        assert_eq!(result.priority, Priority::Medium);
        assert!(!result.action_required);
    }

    #[test]
    fn test_fallback_meeting_checked_before_task() {
        // contains both "schedule" and "finish"
        let result = fallback("schedule time to finish the slides");
        assert_eq!(result.category, Category::Meeting);
    }

    #[test]
    fn test_fallback_keywords_are_first_five_lowercased() {
        let result = fallback("The Server Was Rebooted Last Night Again");
        assert_eq!(
            result.entities.keywords,
            vec!["the", "server", "was", "rebooted", "last"]
        );
        assert!(result.entities.dates.is_empty());
        assert!(result.entities.contact.is_none());
    }

    #[test]
    fn test_fallback_summary_truncated_past_100_chars() {
        let text = "a".repeat(150);
        let result = fallback(&text);
        assert_eq!(result.summary.chars().count(), 103);
        assert!(result.summary.ends_with("..."));

        let short = fallback("short note");
        assert_eq!(short.summary, "short note");
    }

    #[test]
    fn test_fallback_empty_text_gets_placeholder_title() {
        let result = fallback("");
        assert_eq!(result.title, "Information Item");
        assert_eq!(result.summary, "");
        assert!(result.entities.keywords.is_empty());
    }

    #[test]
    fn test_derived_title_shortened_past_50_chars() {
        let text = "wordwordwordwordword wordwordwordwordword wordwordwordwordword";
        let title = derived_title(text);
        assert_eq!(title.chars().count(), 50);
        assert!(title.ends_with("..."));
    }

    #[tokio::test]
    async fn test_classifier_without_key_falls_back() {
        let classifier = Classifier::new(None);
        let result = classifier
            .classify("Let's meet tomorrow at 3pm to discuss the budget", Source::Web)
            .await;
        assert_eq!(result.category, Category::Meeting);
        assert_eq!(result.confidence, 0.6);
    }

    #[test]
    fn test_prompt_carries_source_and_text() {
        let prompt = build_prompt("hello there", Source::Telegram);
        assert!(prompt.contains("Source: telegram"));
        assert!(prompt.contains("Text: hello there"));
        assert!(prompt.contains("meeting|task|information|thought"));
    }
}
