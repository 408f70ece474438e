use std::{cmp::Ordering, collections::HashMap};

use crate::Passage;

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Score assigned to results the backend returned without a relevance score,
/// decreasing with rank so the backend's own ordering is preserved.
pub fn rank_fallback_score(rank: usize) -> f32 {
    let rank = u16::try_from(rank).unwrap_or(u16::MAX);
    clamp_unit(1.0 / (1.0 + f32::from(rank)))
}

fn comparable(score: f32) -> f32 {
    if score.is_finite() {
        score
    } else {
        f32::MIN
    }
}

/// Descending score, ties broken by ascending passage id.
pub fn sort_by_score_desc(passages: &mut [Passage]) {
    passages.sort_by(|a, b| {
        comparable(b.score)
            .partial_cmp(&comparable(a.score))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.passage_id.cmp(&b.passage_id))
    });
}

/// Keep the best-scoring copy of each passage id.
pub fn dedupe_by_id(passages: Vec<Passage>) -> Vec<Passage> {
    let mut best: HashMap<String, Passage> = HashMap::with_capacity(passages.len());
    for passage in passages {
        match best.get(&passage.passage_id) {
            Some(existing) if comparable(existing.score) >= comparable(passage.score) => {}
            _ => {
                best.insert(passage.passage_id.clone(), passage);
            }
        }
    }
    best.into_values().collect()
}

/// Deduplicate, order and cut to `top_k`.
pub fn rank_passages(passages: Vec<Passage>, top_k: usize) -> Vec<Passage> {
    let mut ranked = dedupe_by_id(passages);
    sort_by_score_desc(&mut ranked);
    ranked.truncate(top_k);
    ranked
}
