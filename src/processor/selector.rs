use std::collections::HashMap;

use rand::seq::SliceRandom;

/// Produces the ordered queue-name list polled on each dispatch tick.
///
/// With a single configured queue the selector returns that name. In
/// strict-priority mode it returns a list pre-sorted by descending weight. In
/// weighted-random mode it replicates each name `weight` times, shuffles the
/// multiset uniformly, and dedupes preserving first occurrence, so
/// higher-weight queues tend to be polled first while every queue still
/// appears exactly once per tick.
#[derive(Debug, Clone)]
pub(crate) struct QueueSelector {
    weights: HashMap<String, u32>,
    ordered: Option<Vec<String>>,
}

impl QueueSelector {
    pub(crate) fn new(weights: HashMap<String, u32>, strict_priority: bool) -> Self {
        let ordered = strict_priority.then(|| sort_by_weight(&weights));
        Self { weights, ordered }
    }

    pub(crate) fn queue_count(&self) -> usize {
        self.weights.len()
    }

    pub(crate) fn next(&self) -> Vec<String> {
        // Skip the multiset construction when only one queue is configured.
        if self.weights.len() == 1 {
            return self.weights.keys().cloned().collect();
        }

        if let Some(ordered) = &self.ordered {
            return ordered.clone();
        }

        let mut names: Vec<&str> = Vec::new();
        for (name, weight) in &self.weights {
            for _ in 0..*weight {
                names.push(name);
            }
        }
        names.shuffle(&mut rand::rng());
        uniq(&names, self.weights.len())
    }
}

/// Dedupes `names` preserving first occurrence, stopping at `limit` entries.
fn uniq(names: &[&str], limit: usize) -> Vec<String> {
    let mut result = Vec::with_capacity(limit);
    for name in names {
        if !result.iter().any(|seen: &String| seen == name) {
            result.push((*name).to_owned());
        }
        if result.len() == limit {
            break;
        }
    }
    result
}

/// Queue names sorted by weight in descending order. Ties keep an arbitrary
/// but stable order.
fn sort_by_weight(weights: &HashMap<String, u32>) -> Vec<String> {
    let mut entries: Vec<(&String, u32)> =
        weights.iter().map(|(name, weight)| (name, *weight)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(name, _)| name.clone()).collect()
}
