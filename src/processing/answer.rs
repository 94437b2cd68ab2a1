//! Answer composition: synthesis when a backend is configured, extractive otherwise.

use super::{
    context::ContextBlock,
    types::{AnswerMode, AnswerStyle, Citation, RetrievalResult},
};
use crate::answer::{AnswerClient, AnswerRequest};

/// Answer returned when retrieval found nothing.
pub const NO_RESULTS_ANSWER: &str = "No relevant passages were found in the index.";
/// First line of an extractive answer.
pub const EXTRACTIVE_HEADER: &str = "Relevant passages found:";

const EXTRACTIVE_PASSAGES: usize = 3;
const SNIPPET_CHARS: usize = 350;

/// List the top results verbatim under a fixed header.
pub fn build_extractive_answer(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS_ANSWER.to_string();
    }
    let mut lines = vec![EXTRACTIVE_HEADER.to_string()];
    lines.extend(results.iter().take(EXTRACTIVE_PASSAGES).map(|result| {
        format!(
            "- [{} | {}] {}",
            result.record.source_filename, result.record.anchor, result.record.text
        )
    }));
    lines.join("\n")
}

/// First 350 characters of `text`, with an ellipsis when truncated.
pub fn snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Citation describing one retrieval result.
pub fn citation(result: &RetrievalResult) -> Citation {
    Citation {
        doc_id: result.record.doc_id.clone(),
        source_filename: result.record.source_filename.clone(),
        page: result.record.page,
        anchor: result.record.anchor.clone(),
        section: result.record.section.clone(),
        score: result.score,
        score_dense: result.score_dense,
        snippet: snippet(&result.record.text),
    }
}

/// Answer text and how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnswerDraft {
    pub text: String,
    pub mode: AnswerMode,
    /// A backend was asked and its answer was unusable.
    pub fell_back: bool,
}

/// Synthesize an answer when possible, falling back to the extractive answer on any failure.
///
/// Synthesis is skipped when there is no backend, no results, or no context.
pub(crate) async fn compose_answer(
    question: &str,
    results: &[RetrievalResult],
    blocks: &[ContextBlock],
    style: AnswerStyle,
    client: Option<&dyn AnswerClient>,
) -> AnswerDraft {
    let mut fell_back = false;
    if let Some(client) = client.filter(|_| !results.is_empty() && !blocks.is_empty()) {
        fell_back = true;
        let request = AnswerRequest {
            question: question.to_string(),
            context_blocks: blocks.iter().map(ContextBlock::render).collect(),
            style,
        };
        match client.generate_answer(&request).await {
            Ok(text) if !text.trim().is_empty() => {
                tracing::debug!(
                    provider = client.provider(),
                    blocks = blocks.len(),
                    "Answer synthesized"
                );
                return AnswerDraft {
                    text,
                    mode: AnswerMode::Generative,
                    fell_back: false,
                };
            }
            Ok(_) => {
                tracing::warn!(
                    provider = client.provider(),
                    "Answer backend returned empty text; falling back to extractive"
                );
            }
            Err(error) => {
                tracing::warn!(
                    provider = client.provider(),
                    error = %error,
                    "Answer synthesis failed; falling back to extractive"
                );
            }
        }
    }

    AnswerDraft {
        text: build_extractive_answer(results),
        mode: AnswerMode::Extractive,
        fell_back,
    }
}
