//! Keyword intent planner that picks an answer style and preferred sections.

use super::types::{AnswerStyle, IntentPlan};
use regex::Regex;
use std::sync::LazyLock;

static OBJECTIVE_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(objectiv\w*|objetiv\w*|aims?|goals?|purposes?|contributions?)\b")
        .expect("objective pattern")
});

static CONCLUSION_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(conclu\w*|findings?|takeaways?)\b").expect("conclusion pattern")
});

const OBJECTIVES_SECTIONS: &[&str] = &["abstract", "introduction", "conclusion", "discussion"];
const DEFAULT_SECTIONS: &[&str] = &["abstract", "introduction", "results", "discussion", "conclusion"];

/// Maps a question to a response-shaping plan.
pub trait IntentClassifier: Send + Sync {
    /// Plan for `question`. Never fails; unknown questions get the default plan.
    fn classify(&self, question: &str) -> IntentPlan;
}

/// Regex keyword classifier covering English and Spanish phrasing.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicIntentClassifier;

impl IntentClassifier for HeuristicIntentClassifier {
    fn classify(&self, question: &str) -> IntentPlan {
        let focused = OBJECTIVE_TERMS.is_match(question) || CONCLUSION_TERMS.is_match(question);
        let (name, sections, style) = if focused {
            (
                "objectives_conclusions",
                OBJECTIVES_SECTIONS,
                AnswerStyle::ObjectivesConclusions,
            )
        } else {
            ("default", DEFAULT_SECTIONS, AnswerStyle::Default)
        };
        tracing::debug!(plan = name, "Classified question");
        IntentPlan {
            name: name.to_string(),
            preferred_sections: sections.iter().map(|section| section.to_string()).collect(),
            style,
        }
    }
}
