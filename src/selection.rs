//! Disjoint random selection of work sets from an item pool.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{Span, debug, error, info};

use crate::error::{EnrichError, Result};
use crate::record::PoolItem;

/// Splits an item pool into non-overlapping random subsets.
///
/// With a seed, every call re-seeds its generator, so identical pools and
/// requests always produce identical subsets in identical order.
pub struct SampleSelector {
    seed: Option<u64>,
    span: Span,
}

/// Result of checking two subsets for shared ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapCheck {
    pub disjoint: bool,
    pub overlapping_ids: Vec<String>,
    pub description: String,
}

/// Aggregate counts describing a selection, for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionStats {
    pub total: usize,
    pub first_count: usize,
    pub second_count: usize,
    pub unused: usize,
    pub has_overlap: bool,
    pub pool_distribution: BTreeMap<String, usize>,
    pub first_distribution: BTreeMap<String, usize>,
    pub second_distribution: BTreeMap<String, usize>,
}

impl SampleSelector {
    pub fn new(seed: Option<u64>, span: Span) -> Self {
        Self { seed, span }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Draw one subset per entry of `sizes`, uniformly at random without
    /// replacement. No item lands in more than one subset.
    pub fn select_disjoint<T>(&self, pool: &[T], sizes: &[usize]) -> Result<Vec<Vec<T>>>
    where
        T: PoolItem + Clone,
    {
        let mut seen = HashSet::with_capacity(pool.len());
        for item in pool {
            if !seen.insert(item.item_id()) {
                return Err(EnrichError::DuplicateItem(item.item_id().to_string()));
            }
        }

        let requested: usize = sizes.iter().sum();
        if requested > pool.len() {
            return Err(EnrichError::InsufficientItems {
                requested,
                available: pool.len(),
            });
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut remaining: Vec<usize> = (0..pool.len()).collect();
        let mut subsets = Vec::with_capacity(sizes.len());

        for &size in sizes {
            if size > remaining.len() {
                return Err(EnrichError::InsufficientItems {
                    requested: size,
                    available: remaining.len(),
                });
            }
            let (chosen, rest) = remaining.partial_shuffle(&mut rng, size);
            let subset: Vec<T> = chosen.iter().map(|&idx| pool[idx].clone()).collect();
            remaining = rest.to_vec();
            subsets.push(subset);
        }

        info!(
            parent: &self.span,
            pool = pool.len(),
            subsets = sizes.len(),
            selected = requested,
            seeded = self.seed.is_some(),
            "Selected disjoint subsets"
        );

        Ok(subsets)
    }

    /// Post-hoc assertion that two subsets share no ids.
    pub fn validate_no_overlap<T: PoolItem>(&self, first: &[T], second: &[T]) -> OverlapCheck {
        let first_ids: BTreeSet<&str> = first.iter().map(|item| item.item_id()).collect();
        let overlapping_ids: Vec<String> = second
            .iter()
            .map(|item| item.item_id())
            .filter(|id| first_ids.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        if overlapping_ids.is_empty() {
            debug!(parent: &self.span, "No overlap between selected subsets");
            OverlapCheck {
                disjoint: true,
                overlapping_ids,
                description: "no overlap".to_string(),
            }
        } else {
            let description = format!(
                "{} shared id(s): {}",
                overlapping_ids.len(),
                overlapping_ids.join(", ")
            );
            error!(parent: &self.span, %description, "Selected subsets overlap");
            OverlapCheck {
                disjoint: false,
                overlapping_ids,
                description,
            }
        }
    }

    pub fn selection_stats<T: PoolItem>(
        &self,
        pool: &[T],
        first: &[T],
        second: &[T],
    ) -> SelectionStats {
        SelectionStats {
            total: pool.len(),
            first_count: first.len(),
            second_count: second.len(),
            unused: pool.len().saturating_sub(first.len() + second.len()),
            has_overlap: !self.validate_no_overlap(first, second).disjoint,
            pool_distribution: distribution(pool),
            first_distribution: distribution(first),
            second_distribution: distribution(second),
        }
    }
}

fn distribution<T: PoolItem>(items: &[T]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(item.group_key().to_string()).or_insert(0) += 1;
    }
    counts
}
