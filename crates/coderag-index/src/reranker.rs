//! Result reranking: maximal marginal relevance, per-file diversity and
//! reciprocal rank fusion.

use std::collections::{HashMap, HashSet};

use coderag_store::cosine_similarity;

use crate::chunker::Chunk;

/// Default constant of the reciprocal rank fusion formula.
pub const RRF_K: f32 = 60.0;

/// A retrieved chunk awaiting reranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk: Chunk,
    /// Relevance to the query, higher is better.
    pub score: f32,
    /// Stored embedding, when the store returned it.
    pub vector: Option<Vec<f32>>,
    /// Found by keyword match only, not by the vector query.
    pub keyword_only: bool,
}

/// Relevance order: score descending, then id ascending.
fn by_relevance(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

fn char_set(text: &str) -> HashSet<char> {
    text.chars().flat_map(char::to_lowercase).collect()
}

#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &HashSet<char>, b: &HashSet<char>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Maximal marginal relevance selection of up to `k` candidates.
///
/// Each pick maximises `λ·rel(c) − (1−λ)·max sim(c, s)` over the already
/// selected `s`. Similarity is the cosine of stored vectors when both sides
/// carry one, otherwise the Jaccard similarity of their character sets.
/// Ties go to the better relevance rank. `lambda` is clamped to `[0, 1]`.
#[must_use]
pub fn mmr(mut candidates: Vec<Candidate>, k: usize, lambda: f32) -> Vec<Candidate> {
    let lambda = if lambda.is_nan() {
        1.0
    } else {
        lambda.clamp(0.0, 1.0)
    };
    by_relevance(&mut candidates);
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }

    let needs_chars = candidates.iter().any(|c| c.vector.is_none());
    let chars: Vec<HashSet<char>> = if needs_chars {
        candidates.iter().map(|c| char_set(&c.chunk.text)).collect()
    } else {
        Vec::new()
    };
    let similarity = |i: usize, j: usize| -> f32 {
        match (&candidates[i].vector, &candidates[j].vector) {
            (Some(a), Some(b)) => cosine_similarity(a, b),
            _ => jaccard(&chars[i], &chars[j]),
        }
    };

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut max_sim = vec![0.0f32; candidates.len()];
    let mut order = Vec::with_capacity(k);

    while order.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;
        // `remaining` stays in rank order, so the first maximum wins ties.
        for (pos, &i) in remaining.iter().enumerate() {
            let score = lambda * candidates[i].score - (1.0 - lambda) * max_sim[i];
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        let picked = remaining.remove(best_pos);
        for &i in &remaining {
            max_sim[i] = max_sim[i].max(similarity(i, picked));
        }
        order.push(picked);
    }

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

/// At most one chunk per file first, then the rest by relevance.
#[must_use]
pub fn diversity_rerank(mut candidates: Vec<Candidate>, k: usize) -> Vec<Candidate> {
    by_relevance(&mut candidates);
    let mut seen_files = HashSet::new();
    let (mut selected, rest): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| seen_files.insert(c.chunk.file_path.clone()));
    selected.truncate(k);
    let missing = k - selected.len();
    selected.extend(rest.into_iter().take(missing));
    tracing::debug!(
        files = seen_files.len(),
        selected = selected.len(),
        "diversity rerank"
    );
    selected
}

/// Fuse several ranked lists: each chunk scores `Σ 1 / (k_const + rank + 1)`
/// over the lists it appears in. The returned candidates carry the fused
/// score and keep the first occurrence of each chunk id.
#[must_use]
pub fn reciprocal_rank_fusion(lists: &[Vec<Candidate>], k_const: f32) -> Vec<Candidate> {
    let mut fused: HashMap<&str, (f32, &Candidate)> = HashMap::new();
    for list in lists {
        for (rank, candidate) in list.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let contribution = 1.0 / (k_const + rank as f32 + 1.0);
            fused
                .entry(candidate.chunk.id.as_str())
                .and_modify(|(score, _)| *score += contribution)
                .or_insert((contribution, candidate));
        }
    }
    let mut out: Vec<Candidate> = fused
        .into_values()
        .map(|(score, candidate)| Candidate {
            score,
            ..candidate.clone()
        })
        .collect();
    by_relevance(&mut out);
    out
}
