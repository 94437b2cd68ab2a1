//! Context assembly for answer synthesis.

use super::{
    retriever::Retriever,
    types::{AnswerStyle, IntentPlan, RetrievalError, RetrievalResult},
};
use crate::store::ChunkRecord;
use std::collections::HashSet;

/// Knobs controlling how much text surrounds each hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Preceding chunks pulled in before each hit.
    pub neighbor_window: usize,
    /// Keep neighbors on the hit's page.
    pub same_page: bool,
    /// Maximum blocks handed to the answer backend.
    pub max_blocks: usize,
}

/// One cited passage of answer context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    /// Stored filename of the source.
    pub source_filename: String,
    /// Anchor of the passage.
    pub anchor: String,
    /// Passage text.
    pub text: String,
}

impl ContextBlock {
    fn from_record(record: &ChunkRecord) -> Self {
        Self {
            source_filename: record.source_filename.clone(),
            anchor: record.anchor.clone(),
            text: record.text.clone(),
        }
    }

    /// `[source | anchor]` header followed by the passage.
    pub fn render(&self) -> String {
        format!("[{} | {}]\n{}", self.source_filename, self.anchor, self.text)
    }
}

/// Build the context for `results`: each hit preceded by its neighbors, deduplicated and capped.
pub async fn assemble_context(
    retriever: &Retriever,
    results: &[RetrievalResult],
    plan: &IntentPlan,
    options: &ContextOptions,
) -> Result<Vec<ContextBlock>, RetrievalError> {
    let mut groups = Vec::with_capacity(results.len());
    for result in results {
        let mut group = if options.neighbor_window > 0 {
            retriever
                .neighbors(result.record.id, options.neighbor_window, options.same_page)
                .await?
        } else {
            Vec::new()
        };
        group.push(result.record.clone());
        groups.push(group);
    }
    Ok(finish_groups(groups, results.len(), plan, options))
}

/// Context made of the hits alone, for when neighbors cannot be read.
pub fn hit_context(
    results: &[RetrievalResult],
    plan: &IntentPlan,
    options: &ContextOptions,
) -> Vec<ContextBlock> {
    let groups = results
        .iter()
        .map(|result| vec![result.record.clone()])
        .collect();
    finish_groups(groups, results.len(), plan, options)
}

fn finish_groups(
    mut groups: Vec<Vec<ChunkRecord>>,
    hits: usize,
    plan: &IntentPlan,
    options: &ContextOptions,
) -> Vec<ContextBlock> {
    order_groups(&mut groups, plan);
    let blocks = flatten_groups(groups, options.max_blocks);
    tracing::debug!(
        hits,
        blocks = blocks.len(),
        plan = %plan.name,
        "Assembled answer context"
    );
    blocks
}

/// Stable reorder by the section of each group's hit, for plans that ask for it.
fn order_groups(groups: &mut [Vec<ChunkRecord>], plan: &IntentPlan) {
    if plan.style != AnswerStyle::ObjectivesConclusions {
        return;
    }
    let rank = |group: &Vec<ChunkRecord>| {
        group
            .last()
            .and_then(|hit| hit.section.as_deref())
            .and_then(|section| plan.preferred_sections.iter().position(|p| p == section))
            .unwrap_or(plan.preferred_sections.len())
    };
    groups.sort_by_key(rank);
}

fn flatten_groups(groups: Vec<Vec<ChunkRecord>>, max_blocks: usize) -> Vec<ContextBlock> {
    let mut seen = HashSet::new();
    groups
        .iter()
        .flatten()
        .filter(|record| seen.insert((record.source_filename.as_str(), record.anchor.as_str())))
        .take(max_blocks)
        .map(ContextBlock::from_record)
        .collect()
}
