//! Weighted Reciprocal Rank Fusion.
//!
//! Each result at rank `r` (1-indexed) in a signal's list contributes
//! `w / (k + r)` to its fusion ID's score. Duplicate IDs across signals
//! merge; the final order is deterministic for fixed inputs and weights.

#![allow(clippy::cast_precision_loss)]

use crate::types::{SearchResult, Signal, SignalHit};

/// One ranked list entering fusion.
pub struct RankedList {
    /// Signal that produced the list.
    pub signal: Signal,
    /// RRF weight for this signal.
    pub weight: f64,
    /// Hits in rank order.
    pub hits: Vec<SignalHit>,
}

/// Fuse ranked lists with weighted RRF.
///
/// Ties break by the best signal-native score, then by the number of
/// contributing sources, then by ID, so output is byte-identical across
/// runs.
pub fn fuse(lists: &[RankedList], k: u32) -> Vec<SearchResult> {
    struct Accum {
        fused: f64,
        best_original: f64,
        sources: Vec<Signal>,
        representative: SignalHit,
    }

    let k = f64::from(k);
    let mut by_id: std::collections::HashMap<String, Accum> = std::collections::HashMap::new();

    for list in lists {
        for (idx, hit) in list.hits.iter().enumerate() {
            let rank = idx as f64 + 1.0;
            let contribution = list.weight / (k + rank);
            match by_id.get_mut(&hit.id) {
                Some(accum) => {
                    accum.fused += contribution;
                    accum.best_original = accum.best_original.max(hit.score);
                    if !accum.sources.contains(&list.signal) {
                        accum.sources.push(list.signal);
                    }
                }
                None => {
                    by_id.insert(
                        hit.id.clone(),
                        Accum {
                            fused: contribution,
                            best_original: hit.score,
                            sources: vec![list.signal],
                            representative: hit.clone(),
                        },
                    );
                }
            }
        }
    }

    let mut entries: Vec<(String, Accum)> = by_id.into_iter().collect();
    entries.sort_by(|(id_a, a), (id_b, b)| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.best_original
                    .partial_cmp(&a.best_original)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.sources.len().cmp(&a.sources.len()))
            .then_with(|| id_a.cmp(id_b))
    });

    entries
        .into_iter()
        .map(|(id, accum)| SearchResult {
            id,
            path: accum.representative.path,
            start_line: accum.representative.start_line,
            end_line: accum.representative.end_line,
            score: accum.fused,
            sources: accum.sources,
            preview: accum.representative.preview,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f64) -> SignalHit {
        SignalHit {
            id: id.to_string(),
            path: id.split(':').next().unwrap_or("").to_string(),
            start_line: 1,
            end_line: 1,
            score,
            preview: format!("preview of {id}"),
        }
    }

    fn list(signal: Signal, weight: f64, ids: &[&str]) -> RankedList {
        RankedList {
            signal,
            weight,
            hits: ids
                .iter()
                .enumerate()
                .map(|(i, id)| hit(id, 1.0 / (i as f64 + 1.0)))
                .collect(),
        }
    }

    #[test]
    fn test_duplicate_ids_merge_across_signals() {
        let lists = vec![
            list(Signal::Literal, 1.0, &["a.rs:1", "b.rs:2"]),
            list(Signal::Semantic, 1.0, &["a.rs:1", "c.rs:3"]),
        ];
        let fused = fuse(&lists, 60);
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].id, "a.rs:1");
        assert_eq!(fused[0].sources.len(), 2);
        let expected = 1.0 / 61.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_weights_scale_contributions() {
        let lists = vec![
            list(Signal::Literal, 2.0, &["lit"]),
            list(Signal::Semantic, 1.0, &["sem"]),
        ];
        let fused = fuse(&lists, 60);
        assert_eq!(fused[0].id, "lit");
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-12);
        assert!((fused[1].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_lower_rank_contributes_less() {
        let lists = vec![list(Signal::Symbol, 1.0, &["first", "second", "third"])];
        let fused = fuse(&lists, 60);
        assert_eq!(
            fused.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let lists = vec![
            list(Signal::Literal, 1.0, &["x:1", "y:2", "z:3"]),
            list(Signal::Semantic, 1.5, &["z:3", "x:1"]),
            list(Signal::Symbol, 0.5, &["y:2"]),
        ];
        let a = fuse(&lists, 60);
        let b = fuse(&lists, 60);
        let ids_a: Vec<_> = a.iter().map(|r| (&r.id, r.score.to_bits())).collect();
        let ids_b: Vec<_> = b.iter().map(|r| (&r.id, r.score.to_bits())).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_equal_scores_tie_break_on_sources_then_id() {
        // Two IDs at the same rank in different equally-weighted lists.
        let lists = vec![
            list(Signal::Literal, 1.0, &["bbb"]),
            list(Signal::Semantic, 1.0, &["aaa"]),
        ];
        let fused = fuse(&lists, 60);
        assert_eq!(fused[0].id, "aaa");
        assert_eq!(fused[1].id, "bbb");
    }

    #[test]
    fn test_empty_lists_fuse_to_empty() {
        let fused = fuse(&[], 60);
        assert!(fused.is_empty());
        let fused = fuse(&[list(Signal::Literal, 1.0, &[])], 60);
        assert!(fused.is_empty());
    }
}
