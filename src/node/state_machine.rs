use crate::node::error::{NodeError, NodeResult};
use crate::node::types::{NodeEvent, NodeState};

/// Lifecycle of a single node. Owned by the node's worker task, so
/// transitions are never observed half-applied.
#[derive(Debug)]
pub struct NodeStateMachine {
    state: NodeState,
}

impl Default for NodeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStateMachine {
    pub fn new() -> Self {
        Self {
            state: NodeState::Ready,
        }
    }

    /// Get current state
    pub fn current_state(&self) -> NodeState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == NodeState::Stopped
    }

    /// Transition state based on event
    pub fn transition(&mut self, event: NodeEvent) -> NodeResult<NodeState> {
        let new_state = match (self.state, &event) {
            // Request accepted
            (NodeState::Ready, NodeEvent::RequestReceived) => NodeState::Waiting,

            // Disk work done
            (NodeState::Waiting, NodeEvent::IoCompleted) => NodeState::Running,

            // Answer sent, back to idle
            (NodeState::Running, NodeEvent::OperationCompleted) => NodeState::Ready,

            // Only a stopped node can be restarted
            (NodeState::Stopped, NodeEvent::Restart) => NodeState::Ready,

            // Shutdown or unrecoverable error from anywhere
            (_, NodeEvent::Shutdown) | (_, NodeEvent::Fault { .. }) => NodeState::Stopped,

            // Invalid transition
            _ => {
                return Err(NodeError::InvalidStateTransition(format!(
                    "Cannot handle {:?} in state {}",
                    event, self.state
                )));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lifecycle() {
        let mut machine = NodeStateMachine::new();
        assert_eq!(machine.current_state(), NodeState::Ready);

        assert_eq!(
            machine.transition(NodeEvent::RequestReceived).unwrap(),
            NodeState::Waiting
        );
        assert_eq!(
            machine.transition(NodeEvent::IoCompleted).unwrap(),
            NodeState::Running
        );
        assert_eq!(
            machine.transition(NodeEvent::OperationCompleted).unwrap(),
            NodeState::Ready
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = NodeStateMachine::new();
        assert!(machine.transition(NodeEvent::IoCompleted).is_err());
        assert!(machine.transition(NodeEvent::Restart).is_err());

        machine.transition(NodeEvent::RequestReceived).unwrap();
        assert!(matches!(
            machine.transition(NodeEvent::RequestReceived),
            Err(NodeError::InvalidStateTransition(_))
        ));
        // State is unchanged by a rejected event
        assert_eq!(machine.current_state(), NodeState::Waiting);
    }

    #[test]
    fn test_stop_and_restart() {
        let mut machine = NodeStateMachine::new();
        machine.transition(NodeEvent::RequestReceived).unwrap();
        machine
            .transition(NodeEvent::Fault {
                reason: "disk gone".into(),
            })
            .unwrap();
        assert!(machine.is_stopped());

        assert!(machine.transition(NodeEvent::RequestReceived).is_err());
        assert_eq!(machine.transition(NodeEvent::Shutdown).unwrap(), NodeState::Stopped);
        assert_eq!(machine.transition(NodeEvent::Restart).unwrap(), NodeState::Ready);
    }
}
