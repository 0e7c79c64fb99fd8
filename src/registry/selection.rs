use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::ProviderType;

/// Regions preferred by the geographic strategy, in bucket order; all other
/// regions sort after these
pub const PREFERRED_REGIONS: [&str; 4] = ["us-east-1", "us-west-2", "eu-west-1", "eu-central-1"];

/// Load-balancing strategies applied as a total order over candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Sticky counter keyed by the candidate set; rotates one step per call
    #[default]
    RoundRobin,
    /// Ascending average response time
    LeastLatency,
    /// Descending health score
    HealthWeighted,
    /// Ascending cost per request
    CostOptimized,
    /// Preferred-region buckets first, health-weighted within each bucket
    Geographic,
    /// Ascending utilization (active / max concurrent)
    CapacityBased,
}

impl SelectionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastLatency => "least_latency",
            Self::HealthWeighted => "health_weighted",
            Self::CostOptimized => "cost_optimized",
            Self::Geographic => "geographic",
            Self::CapacityBased => "capacity_based",
        }
    }
}

/// Filters and strategy for a selection request
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    pub provider_type: Option<ProviderType>,
    pub region: Option<String>,
    pub strategy: SelectionStrategy,
    pub exclude: HashSet<String>,
    pub max_cost: Option<f64>,
}

impl SelectionCriteria {
    #[must_use]
    pub fn for_type(provider_type: ProviderType) -> Self {
        Self {
            provider_type: Some(provider_type),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    #[must_use]
    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Eligible provider with the fields strategies order by
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub id: String,
    pub region: String,
    pub cost_per_request: f64,
    pub health_score: f64,
    pub avg_response_time: Duration,
    pub active_requests: u32,
    pub max_concurrent_requests: u32,
}

impl Candidate {
    fn utilization(&self) -> f64 {
        if self.max_concurrent_requests == 0 {
            1.0
        } else {
            f64::from(self.active_requests) / f64::from(self.max_concurrent_requests)
        }
    }

    fn region_bucket(&self) -> usize {
        PREFERRED_REGIONS
            .iter()
            .position(|r| *r == self.region)
            .unwrap_or(PREFERRED_REGIONS.len())
    }
}

/// Apply the strategy as a total order; ties break on provider id so the
/// ordering is deterministic.
///
/// The round-robin counter map is keyed by the sorted candidate-id set and
/// advanced one step per call.
pub(crate) fn order_candidates(
    strategy: SelectionStrategy,
    mut candidates: Vec<Candidate>,
    round_robin: &mut HashMap<String, usize>,
) -> Vec<String> {
    if candidates.is_empty() {
        return Vec::new();
    }
    match strategy {
        SelectionStrategy::RoundRobin => {
            let mut ids: Vec<String> = candidates.into_iter().map(|c| c.id).collect();
            ids.sort_unstable();
            let key = ids.join(",");
            let counter = round_robin.entry(key).or_insert(0);
            let start = *counter % ids.len();
            *counter = counter.wrapping_add(1);
            ids.rotate_left(start);
            ids
        }
        SelectionStrategy::LeastLatency => {
            candidates.sort_by(|a, b| {
                a.avg_response_time
                    .cmp(&b.avg_response_time)
                    .then_with(|| a.id.cmp(&b.id))
            });
            candidates.into_iter().map(|c| c.id).collect()
        }
        SelectionStrategy::HealthWeighted => {
            candidates.sort_by(|a, b| {
                b.health_score
                    .partial_cmp(&a.health_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            candidates.into_iter().map(|c| c.id).collect()
        }
        SelectionStrategy::CostOptimized => {
            candidates.sort_by(|a, b| {
                a.cost_per_request
                    .partial_cmp(&b.cost_per_request)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            candidates.into_iter().map(|c| c.id).collect()
        }
        SelectionStrategy::Geographic => {
            candidates.sort_by(|a, b| {
                a.region_bucket()
                    .cmp(&b.region_bucket())
                    .then_with(|| {
                        b.health_score
                            .partial_cmp(&a.health_score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .then_with(|| a.id.cmp(&b.id))
            });
            candidates.into_iter().map(|c| c.id).collect()
        }
        SelectionStrategy::CapacityBased => {
            candidates.sort_by(|a, b| {
                a.utilization()
                    .partial_cmp(&b.utilization())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            candidates.into_iter().map(|c| c.id).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str) -> Candidate {
        Candidate {
            id: id.to_string(),
            region: "us-east-1".to_string(),
            cost_per_request: 0.001,
            health_score: 100.0,
            avg_response_time: Duration::from_millis(100),
            active_requests: 0,
            max_concurrent_requests: 100,
        }
    }

    fn ids(candidates: &[&str]) -> Vec<Candidate> {
        candidates.iter().map(|id| candidate(id)).collect()
    }

    #[test]
    fn test_round_robin_rotates() {
        let mut rr = HashMap::new();
        let picks: Vec<String> = (0..4)
            .map(|_| {
                order_candidates(SelectionStrategy::RoundRobin, ids(&["b", "a", "c"]), &mut rr)
                    .remove(0)
            })
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_round_robin_counter_keyed_by_candidate_set() {
        let mut rr = HashMap::new();
        let first =
            order_candidates(SelectionStrategy::RoundRobin, ids(&["a", "b"]), &mut rr).remove(0);
        assert_eq!(first, "a");
        // A different candidate set gets its own counter
        let other =
            order_candidates(SelectionStrategy::RoundRobin, ids(&["a", "c"]), &mut rr).remove(0);
        assert_eq!(other, "a");
        let second =
            order_candidates(SelectionStrategy::RoundRobin, ids(&["a", "b"]), &mut rr).remove(0);
        assert_eq!(second, "b");
    }

    #[test]
    fn test_least_latency_orders_ascending() {
        let mut candidates = ids(&["a", "b", "c"]);
        candidates[0].avg_response_time = Duration::from_millis(300);
        candidates[1].avg_response_time = Duration::from_millis(100);
        candidates[2].avg_response_time = Duration::from_millis(200);

        let ordered = order_candidates(
            SelectionStrategy::LeastLatency,
            candidates,
            &mut HashMap::new(),
        );
        assert_eq!(ordered, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_health_weighted_orders_descending() {
        let mut candidates = ids(&["a", "b", "c"]);
        candidates[0].health_score = 50.0;
        candidates[1].health_score = 90.0;
        candidates[2].health_score = 70.0;

        let ordered = order_candidates(
            SelectionStrategy::HealthWeighted,
            candidates,
            &mut HashMap::new(),
        );
        assert_eq!(ordered, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_cost_optimized_orders_ascending() {
        let mut candidates = ids(&["a", "b"]);
        candidates[0].cost_per_request = 0.01;
        candidates[1].cost_per_request = 0.001;

        let ordered = order_candidates(
            SelectionStrategy::CostOptimized,
            candidates,
            &mut HashMap::new(),
        );
        assert_eq!(ordered, vec!["b", "a"]);
    }

    #[test]
    fn test_geographic_prefers_listed_regions() {
        let mut candidates = ids(&["a", "b", "c"]);
        candidates[0].region = "ap-south-1".to_string();
        candidates[1].region = "eu-west-1".to_string();
        candidates[2].region = "us-east-1".to_string();

        let ordered = order_candidates(
            SelectionStrategy::Geographic,
            candidates,
            &mut HashMap::new(),
        );
        assert_eq!(ordered, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_geographic_health_weighted_within_bucket() {
        let mut candidates = ids(&["a", "b"]);
        candidates[0].health_score = 60.0;
        candidates[1].health_score = 95.0;

        let ordered = order_candidates(
            SelectionStrategy::Geographic,
            candidates,
            &mut HashMap::new(),
        );
        assert_eq!(ordered, vec!["b", "a"]);
    }

    #[test]
    fn test_capacity_based_orders_by_utilization() {
        let mut candidates = ids(&["a", "b"]);
        candidates[0].active_requests = 80;
        candidates[1].active_requests = 10;

        let ordered = order_candidates(
            SelectionStrategy::CapacityBased,
            candidates,
            &mut HashMap::new(),
        );
        assert_eq!(ordered, vec!["b", "a"]);
    }
}
