use crate::{error::AppResult, scope::KnowledgeScope};

use super::{
    exact::ExactMatcher, semantic::SemanticMatcher, MatchCandidate, MatchMode, MatchOrigin,
    TraceQuery,
};

/// Merge policy knobs, sourced from configuration. `boost` lifts
/// exact-origin candidates during hybrid merging; whether it applies before
/// or after the threshold filter is a deployment choice.
#[derive(Debug, Clone, Copy)]
pub struct RankPolicy {
    pub boost: f32,
    pub boost_before_threshold: bool,
}

impl RankPolicy {
    /// Single-matcher path: threshold, deterministic sort, truncate.
    pub fn rank_single(
        &self,
        mut candidates: Vec<MatchCandidate>,
        top_k: u32,
        threshold: f32,
    ) -> Vec<MatchCandidate> {
        candidates.retain(|candidate| candidate.score >= threshold);
        sort_candidates(&mut candidates);
        candidates.truncate(top_k as usize);
        candidates
    }

    /// Hybrid fill-in path. Exact candidates receive the boost, overlapping
    /// spans collapse with exact winning, the semantic side contributes at
    /// most `semantic_limit` survivors, and the combined set is sorted
    /// deterministically before truncation.
    pub fn merge_hybrid(
        &self,
        mut exact: Vec<MatchCandidate>,
        mut semantic: Vec<MatchCandidate>,
        semantic_limit: u32,
        top_k: u32,
        threshold: f32,
    ) -> Vec<MatchCandidate> {
        if self.boost_before_threshold {
            boost_exact(&mut exact, self.boost);
            exact.retain(|candidate| candidate.score >= threshold);
            semantic.retain(|candidate| candidate.score >= threshold);
        } else {
            exact.retain(|candidate| candidate.score >= threshold);
            semantic.retain(|candidate| candidate.score >= threshold);
            boost_exact(&mut exact, self.boost);
        }

        let fill = fill_in(&exact, semantic, semantic_limit as usize);
        let mut merged = exact;
        merged.extend(fill);
        sort_candidates(&mut merged);
        merged.truncate(top_k as usize);
        merged
    }
}

fn boost_exact(candidates: &mut [MatchCandidate], boost: f32) {
    for candidate in candidates {
        if candidate.origin == MatchOrigin::Exact {
            candidate.score += boost;
        }
    }
}

/// Picks the semantic candidates that fill the gap the exact side left open.
/// Best scores first; a candidate is dropped when it refers to the same
/// document with an overlapping span as anything already kept, exact or
/// semantic.
fn fill_in(
    exact: &[MatchCandidate],
    mut semantic: Vec<MatchCandidate>,
    limit: usize,
) -> Vec<MatchCandidate> {
    sort_candidates(&mut semantic);
    let mut fill: Vec<MatchCandidate> = Vec::new();
    for candidate in semantic {
        if fill.len() == limit {
            break;
        }
        let conflict = exact.iter().chain(fill.iter()).any(|existing| {
            existing.document_id == candidate.document_id
                && existing.location.overlaps(&candidate.location)
        });
        if !conflict {
            fill.push(candidate);
        }
    }
    fill
}

/// Score descending, then document id, then location. Total order, so
/// repeated calls produce identical output.
fn sort_candidates(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.location.order_key().cmp(&b.location.order_key()))
    });
}

/// Orchestrates the two matchers per request mode. Exact-first in hybrid:
/// the semantic side is only consulted when the lexical index cannot fill
/// `top_k` on its own.
pub struct HybridRanker {
    exact: ExactMatcher,
    semantic: SemanticMatcher,
    policy: RankPolicy,
}

impl HybridRanker {
    pub fn new(exact: ExactMatcher, semantic: SemanticMatcher, policy: RankPolicy) -> Self {
        Self {
            exact,
            semantic,
            policy,
        }
    }

    pub async fn match_text(
        &self,
        text: &str,
        scope: &KnowledgeScope,
        query: &TraceQuery,
    ) -> AppResult<Vec<MatchCandidate>> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        match query.mode {
            MatchMode::Exact => {
                let candidates = self.exact.find_exact(text, scope, query.top_k).await?;
                Ok(self
                    .policy
                    .rank_single(candidates, query.top_k, query.threshold))
            }
            MatchMode::Semantic => {
                let candidates = self.semantic.find_semantic(text, scope, query.top_k).await?;
                Ok(self
                    .policy
                    .rank_single(candidates, query.top_k, query.threshold))
            }
            MatchMode::Hybrid => {
                let exact = self.exact.find_exact(text, scope, query.top_k).await?;
                let exact_count = exact.len() as u32;
                if exact_count >= query.top_k {
                    return Ok(self.policy.rank_single(exact, query.top_k, query.threshold));
                }

                // Over-fetch so span-level dedup losses can still be
                // refilled; the fill-in cap keeps the contribution at the
                // shortfall.
                let semantic = self
                    .semantic
                    .find_semantic(text, scope, query.top_k)
                    .await?;
                Ok(self.policy.merge_hybrid(
                    exact,
                    semantic,
                    query.top_k - exact_count,
                    query.top_k,
                    query.threshold,
                ))
            }
        }
    }
}
