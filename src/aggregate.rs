//! Composite ranking computation
//!
//! Folds raw per-reviewer rankings into one composite result per
//! application. Output is recomputed from the raw rows on every call, so
//! it can never go stale; callers that want caching own that concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::store::AppRanking;

pub type AggregateFn = fn(&[f64]) -> f64;

/// How a multiset of reviewer scores collapses into one composite score.
///
/// The scoring policy is the one deliberately pluggable seam in the
/// engine: `Custom` lets a caller swap the formula without touching the
/// ranking internals.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CompositePolicy {
    #[default]
    Mean,
    Sum,
    Median,
    Custom(AggregateFn),
}

impl CompositePolicy {
    /// Parse a config-file policy name. `Custom` is code-only.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "mean" => Some(CompositePolicy::Mean),
            "sum" => Some(CompositePolicy::Sum),
            "median" => Some(CompositePolicy::Median),
            _ => None,
        }
    }

    pub fn aggregate(&self, scores: &[f64]) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        match self {
            CompositePolicy::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
            CompositePolicy::Sum => scores.iter().sum(),
            CompositePolicy::Median => median(scores),
            CompositePolicy::Custom(f) => f(scores),
        }
    }
}

fn median(scores: &[f64]) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(core::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// One application's aggregated standing for a period. Derived, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRanking {
    pub app_id: i64,
    pub period_id: i64,
    /// Contributing raw scores in submission order, kept for audit.
    pub standard_scores: Vec<f64>,
    pub composite_score: f64,
    /// 1-based position after tie-breaking. Equal composite scores get
    /// consecutive ranks, lower app id first.
    pub rank: u32,
}

/// Fold raw rankings into an ordered composite list.
///
/// Sorted by composite score descending; ties broken by app id ascending
/// so repeated calls on identical input produce identical output.
pub fn composite_rankings(
    period_id: i64,
    rankings: &[AppRanking],
    policy: CompositePolicy,
) -> Vec<CompositeRanking> {
    let mut by_app: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for ranking in rankings {
        by_app
            .entry(ranking.app_id)
            .or_default()
            .push(ranking.standard_score);
    }

    let mut composites: Vec<CompositeRanking> = by_app
        .into_iter()
        .map(|(app_id, scores)| {
            let composite_score = policy.aggregate(&scores);
            CompositeRanking {
                app_id,
                period_id,
                standard_scores: scores,
                composite_score,
                rank: 0,
            }
        })
        .collect();

    composites.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(core::cmp::Ordering::Equal)
            .then(a.app_id.cmp(&b.app_id))
    });

    for (i, composite) in composites.iter_mut().enumerate() {
        composite.rank = (i + 1) as u32;
    }

    composites
}
