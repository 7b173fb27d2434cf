//! Similarity matcher — ranks registry cases against a probe embedding.

use crate::types::{Embedding, MatchResult, MatchThresholds, RegistryCase};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MatchError {
    /// The registry holds no cases with embeddings. Distinct from a
    /// successful comparison that kept no candidates.
    #[error("no cases with embeddings to compare against")]
    EmptyRegistry,
}

/// Rank every snapshot case by cosine distance to the probe.
///
/// Candidates at distance >= the include threshold are pruned; the rest
/// are flagged `matched` when within the match threshold and sorted
/// ascending by distance, ties broken by ascending case id. The ordering
/// depends only on the probe, the snapshot contents, and the thresholds,
/// never on snapshot iteration order.
///
/// Zero-norm vectors (probe or candidate) contribute no result; the
/// candidate is skipped rather than failing the whole scan.
pub fn rank_candidates(
    probe: &Embedding,
    snapshot: &[RegistryCase],
    thresholds: &MatchThresholds,
) -> Result<Vec<MatchResult>, MatchError> {
    if snapshot.is_empty() {
        return Err(MatchError::EmptyRegistry);
    }

    let mut results: Vec<MatchResult> = Vec::with_capacity(snapshot.len());
    for case in snapshot {
        let Some(distance) = probe.cosine_distance(&case.embedding) else {
            tracing::debug!(case_id = case.id, "skipping candidate with zero-norm vector");
            continue;
        };
        if distance < thresholds.include() {
            results.push(MatchResult {
                case_id: case.id,
                name: case.name.clone(),
                distance,
                matched: distance <= thresholds.matched(),
                complainant_phone: case.complainant_phone.clone(),
            });
        }
    }

    results.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.case_id.cmp(&b.case_id))
    });

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: i64, values: Vec<f32>) -> RegistryCase {
        RegistryCase {
            id,
            name: format!("case-{id}"),
            complainant_phone: Some(format!("90000000{id:02}")),
            embedding: Embedding::new(values),
        }
    }

    fn thresholds(include: f32, matched: f32) -> MatchThresholds {
        MatchThresholds::new(include, matched).unwrap()
    }

    /// Vector at a chosen cosine distance from the unit-x probe.
    fn at_distance(d: f32) -> Vec<f32> {
        let cos = 1.0 - d;
        let sin = (1.0 - cos * cos).max(0.0).sqrt();
        vec![cos, sin]
    }

    #[test]
    fn test_empty_registry_is_an_error() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let err = rank_candidates(&probe, &[], &thresholds(0.7, 0.6)).unwrap_err();
        assert_eq!(err, MatchError::EmptyRegistry);
    }

    #[test]
    fn test_all_pruned_is_empty_success() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let snapshot = vec![case(1, at_distance(0.9)), case(2, at_distance(0.95))];
        let results = rank_candidates(&probe, &snapshot, &thresholds(0.7, 0.6)).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_prune_classify_and_rank() {
        // distances 0.3, 0.8, 0.5 against include=0.7, match=0.6:
        // id 2 pruned, ids 1 and 3 kept and both matched.
        let probe = Embedding::new(vec![1.0, 0.0]);
        let snapshot = vec![
            case(1, at_distance(0.3)),
            case(2, at_distance(0.8)),
            case(3, at_distance(0.5)),
        ];
        let results = rank_candidates(&probe, &snapshot, &thresholds(0.7, 0.6)).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].case_id, 1);
        assert!((results[0].distance - 0.3).abs() < 1e-5);
        assert!(results[0].matched);
        assert_eq!(results[1].case_id, 3);
        assert!((results[1].distance - 0.5).abs() < 1e-5);
        assert!(results[1].matched);
    }

    #[test]
    fn test_included_but_not_matched() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let snapshot = vec![case(1, at_distance(0.65))];
        let results = rank_candidates(&probe, &snapshot, &thresholds(0.7, 0.6)).unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].matched);
    }

    #[test]
    fn test_order_invariant_under_snapshot_permutation() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let a = case(1, at_distance(0.3));
        let b = case(2, at_distance(0.1));
        let c = case(3, at_distance(0.5));

        let forward = rank_candidates(&probe, &[a.clone(), b.clone(), c.clone()], &thresholds(0.7, 0.6)).unwrap();
        let backward = rank_candidates(&probe, &[c, b, a], &thresholds(0.7, 0.6)).unwrap();

        let ids: Vec<i64> = forward.iter().map(|r| r.case_id).collect();
        let ids_rev: Vec<i64> = backward.iter().map(|r| r.case_id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(ids, ids_rev);
    }

    #[test]
    fn test_exact_ties_break_by_case_id() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let v = at_distance(0.2);
        let snapshot = vec![case(7, v.clone()), case(3, v.clone()), case(5, v)];
        let results = rank_candidates(&probe, &snapshot, &thresholds(0.7, 0.6)).unwrap();
        let ids: Vec<i64> = results.iter().map(|r| r.case_id).collect();
        assert_eq!(ids, vec![3, 5, 7]);
    }

    #[test]
    fn test_zero_norm_candidate_skipped_silently() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let snapshot = vec![case(1, vec![0.0, 0.0]), case(2, at_distance(0.2))];
        let results = rank_candidates(&probe, &snapshot, &thresholds(0.7, 0.6)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].case_id, 2);
    }

    #[test]
    fn test_zero_norm_probe_yields_empty_not_error() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let snapshot = vec![case(1, at_distance(0.2))];
        let results = rank_candidates(&probe, &snapshot, &thresholds(0.7, 0.6)).unwrap();
        assert!(results.is_empty());
    }
}
