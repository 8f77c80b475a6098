use crate::health::HealthMonitor;
use crate::planner::error::{PlacementError, PlacementResult};
use std::sync::Arc;

/// Round-robin placement over the currently live nodes
pub struct DistributionPlanner {
    health: Arc<HealthMonitor>,
}

impl DistributionPlanner {
    pub fn new(health: Arc<HealthMonitor>) -> Self {
        Self { health }
    }

    /// Placement for `total_chunks` chunks, `replication` distinct nodes each
    pub async fn plan(
        &self,
        total_chunks: u32,
        replication: u32,
    ) -> PlacementResult<Vec<Vec<String>>> {
        let live = self.health.live_nodes().await;
        let plan = assign(&live, total_chunks, replication)?;
        tracing::debug!(
            "planned {} chunks x{} over {} live nodes",
            total_chunks,
            replication,
            live.len()
        );
        Ok(plan)
    }
}

/// Chunk `i` goes to `live[(i + j) % k]` for `j` in `0..replication`.
/// Placement is deterministic for a given ordered live set.
pub fn assign(
    live: &[String],
    total_chunks: u32,
    replication: u32,
) -> PlacementResult<Vec<Vec<String>>> {
    if replication == 0 {
        return Err(PlacementError::ZeroReplication);
    }
    if live.is_empty() {
        return Err(PlacementError::NoLiveNodes);
    }
    if replication as usize > live.len() {
        return Err(PlacementError::InsufficientReplicas {
            requested: replication,
            available: live.len(),
        });
    }

    let k = live.len();
    Ok((0..total_chunks as usize)
        .map(|i| {
            (0..replication as usize)
                .map(|j| live[(i + j) % k].clone())
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("Node_{:02}", i)).collect()
    }

    #[test]
    fn test_round_robin_single_copy() {
        let plan = assign(&nodes(5), 4, 1).unwrap();
        assert_eq!(
            plan,
            vec![
                vec!["Node_01"],
                vec!["Node_02"],
                vec!["Node_03"],
                vec!["Node_04"]
            ]
        );
    }

    #[test]
    fn test_replicas_are_distinct_and_wrap() {
        let plan = assign(&nodes(3), 4, 2).unwrap();
        assert_eq!(plan[2], vec!["Node_03", "Node_01"]);
        assert_eq!(plan[3], vec!["Node_01", "Node_02"]);

        for placement in &plan {
            assert_eq!(placement.len(), 2);
            assert_ne!(placement[0], placement[1]);
        }
    }

    #[test]
    fn test_load_is_even() {
        let plan = assign(&nodes(4), 40, 3).unwrap();
        for node in nodes(4) {
            let load = plan.iter().filter(|p| p.contains(&node)).count();
            assert_eq!(load, 30);
        }
    }

    #[test]
    fn test_placement_errors() {
        assert_eq!(assign(&[], 3, 1), Err(PlacementError::NoLiveNodes));
        assert_eq!(
            assign(&nodes(2), 3, 3),
            Err(PlacementError::InsufficientReplicas {
                requested: 3,
                available: 2
            })
        );
        assert_eq!(assign(&nodes(2), 3, 0), Err(PlacementError::ZeroReplication));
    }

    #[test]
    fn test_empty_file_plan() {
        assert!(assign(&nodes(2), 0, 1).unwrap().is_empty());
    }
}
