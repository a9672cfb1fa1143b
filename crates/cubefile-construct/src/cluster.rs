//! Grouping of small sibling subtrees into shared buckets.

use crate::context::PackingLimits;
use cubefile_common::{ClusteringAlgorithm, CubeError, Result};

/// A group of sibling subtrees stored in one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    /// Indices into the sibling list, ascending.
    pub members: Vec<usize>,
    /// Total cost of the members.
    pub cost: usize,
}

/// Partitions sibling subtrees into regions that each fit one bucket.
pub trait ClusteringStrategy {
    /// Strategy name for logging.
    fn name(&self) -> &'static str;

    /// Groups subtrees of the given costs, listed in row-major order of
    /// their parent cells. Every index appears in exactly one region; no
    /// region exceeds `limits.cluster_limit` bytes or `limits.max_subtrees`
    /// members.
    fn cluster(&self, costs: &[usize], limits: &PackingLimits) -> Result<Vec<Region>>;
}

/// Returns the strategy for `algorithm`.
pub fn clustering_strategy(algorithm: ClusteringAlgorithm) -> Box<dyn ClusteringStrategy> {
    match algorithm {
        ClusteringAlgorithm::Simple => Box::new(SimpleClustering),
        ClusteringAlgorithm::CurrentPointInTime => Box::new(CurrentPointInTimeClustering),
    }
}

/// Greedy clustering: siblings are taken in order and a new region starts
/// whenever the next one would overflow the current region.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleClustering;

impl ClusteringStrategy for SimpleClustering {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn cluster(&self, costs: &[usize], limits: &PackingLimits) -> Result<Vec<Region>> {
        let mut regions = Vec::new();
        let mut current = Region::default();
        for (index, &cost) in costs.iter().enumerate() {
            if cost > limits.cluster_limit {
                return Err(CubeError::Internal(format!(
                    "subtree of {} bytes exceeds cluster limit {}",
                    cost, limits.cluster_limit
                )));
            }
            let full = current.members.len() >= limits.max_subtrees
                || current.cost + cost > limits.cluster_limit;
            if full && !current.members.is_empty() {
                regions.push(std::mem::take(&mut current));
            }
            current.members.push(index);
            current.cost += cost;
        }
        if !current.members.is_empty() {
            regions.push(current);
        }
        Ok(regions)
    }
}

/// Locality-driven clustering around the current point in time. Declared
/// so it can be configured; it does not cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentPointInTimeClustering;

impl ClusteringStrategy for CurrentPointInTimeClustering {
    fn name(&self) -> &'static str {
        "current_point_in_time"
    }

    fn cluster(&self, _costs: &[usize], _limits: &PackingLimits) -> Result<Vec<Region>> {
        Err(CubeError::Unsupported(
            "current point in time clustering is not implemented".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_simple_clustering_by_size() {
        let limits = PackingLimits::new(1000, 500, 32);
        let regions = SimpleClustering.cluster(&[300, 300, 300, 450, 100], &limits).unwrap();
        let members: Vec<_> = regions.iter().map(|r| r.members.clone()).collect();
        assert_eq!(members, vec![vec![0, 1, 2], vec![3, 4]]);
        assert_eq!(regions[0].cost, 900);
    }

    #[test]
    fn test_simple_clustering_by_count() {
        let limits = PackingLimits::new(1000, 500, 2);
        let regions = SimpleClustering.cluster(&[10, 10, 10, 10, 10], &limits).unwrap();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[2].members, vec![4]);
    }

    #[test]
    fn test_clustering_capacity_property() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let limits = PackingLimits::new(rng.gen_range(500..5000), 100, rng.gen_range(1..40));
            let costs: Vec<usize> = (0..rng.gen_range(0..80))
                .map(|_| rng.gen_range(1..=limits.threshold))
                .collect();
            let regions = SimpleClustering.cluster(&costs, &limits).unwrap();

            let mut seen: Vec<usize> = regions.iter().flat_map(|r| r.members.clone()).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..costs.len()).collect::<Vec<_>>());
            for region in &regions {
                assert!(region.cost <= limits.cluster_limit);
                assert!(region.members.len() <= limits.max_subtrees);
                assert_eq!(region.cost, region.members.iter().map(|&i| costs[i]).sum::<usize>());
            }
        }
    }

    #[test]
    fn test_oversized_member_is_internal_error() {
        let limits = PackingLimits::new(100, 50, 4);
        assert!(matches!(
            SimpleClustering.cluster(&[101], &limits),
            Err(CubeError::Internal(_))
        ));
    }

    #[test]
    fn test_current_point_in_time_unsupported() {
        let limits = PackingLimits::new(100, 50, 4);
        let strategy = clustering_strategy(ClusteringAlgorithm::CurrentPointInTime);
        assert_eq!(strategy.name(), "current_point_in_time");
        assert!(matches!(
            strategy.cluster(&[10], &limits),
            Err(CubeError::Unsupported(_))
        ));
    }
}
