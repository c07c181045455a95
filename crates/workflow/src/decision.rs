//! Answer-or-clarify decision.
//!
//! Pure and deterministic: the same chunks, threshold and K always give the
//! same decision.

use ragflow_core::{DocumentRef, Outcome, ScoredChunk, TieBreak};

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub outcome: Outcome,

    /// Smallest distance among the considered chunks
    pub best_distance: Option<f32>,

    /// The top-K chunks the decision looked at, ascending by distance
    pub considered: Vec<ScoredChunk>,

    /// Chunks handed to generation; empty unless `outcome` is `Answer`
    pub context: Vec<ScoredChunk>,
}

impl Decision {
    pub fn is_clarify(&self) -> bool {
        self.outcome == Outcome::Clarify
    }

    /// Documents reported to callers for this decision.
    pub fn documents(&self) -> Vec<DocumentRef> {
        let chunks = if self.is_clarify() { &self.considered } else { &self.context };
        chunks.iter().map(ScoredChunk::document_ref).collect()
    }
}

/// Decide between answering and asking for clarification.
///
/// Takes the `top_k` chunks by ascending distance (ties in received order,
/// NaN distances dropped). Empty input or a best distance above `threshold`
/// gives `Clarify`; otherwise `Answer` with context exactly the considered
/// chunks at or under `threshold`.
pub fn decide(chunks: &[ScoredChunk], threshold: f32, top_k: usize, tie_break: TieBreak) -> Decision {
    let mut ranked: Vec<&ScoredChunk> = chunks.iter().filter(|c| !c.distance.is_nan()).collect();
    // sort_by is stable
    ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let best_distance = ranked.first().map(|c| c.distance);

    let mut cut = top_k.min(ranked.len());
    if let (TieBreak::IncludeTies, Some(best)) = (tie_break, best_distance) {
        while cut < ranked.len() && ranked[cut].distance == best {
            cut += 1;
        }
    }
    let considered: Vec<ScoredChunk> = ranked[..cut].iter().map(|c| (*c).clone()).collect();

    let answerable = matches!(considered.first(), Some(best) if best.distance <= threshold);
    if !answerable {
        return Decision { outcome: Outcome::Clarify, best_distance, considered, context: Vec::new() };
    }

    let context = considered.iter().filter(|c| c.distance <= threshold).cloned().collect();
    Decision { outcome: Outcome::Answer, best_distance, considered, context }
}
