use serde::{Deserialize, Serialize};

/// Lifecycle of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    /// Configurable, no backend resources yet
    Created,
    /// Backend resources allocated, callbacks not running
    Opened,
    Started,
    Paused,
    /// `open` failed; only `destroy` is meaningful
    Failed,
    Destroyed,
}

impl StreamState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(self, target: StreamState) -> bool {
        use StreamState::*;

        matches!(
            (self, target),
            (Created, Opened)
                | (Created, Failed)
                | (Opened, Started)
                | (Started, Paused)
                | (Paused, Started)
                | (Created | Opened | Started | Paused | Failed, Destroyed)
        )
    }

    /// Backend resources are held
    pub fn is_open(self) -> bool {
        matches!(self, StreamState::Opened | StreamState::Started | StreamState::Paused)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(StreamState::Created.can_transition_to(StreamState::Opened));
        assert!(StreamState::Opened.can_transition_to(StreamState::Started));
        assert!(StreamState::Started.can_transition_to(StreamState::Paused));
        assert!(StreamState::Paused.can_transition_to(StreamState::Started));
        assert!(StreamState::Failed.can_transition_to(StreamState::Destroyed));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!StreamState::Created.can_transition_to(StreamState::Started));
        assert!(!StreamState::Opened.can_transition_to(StreamState::Paused));
        assert!(!StreamState::Failed.can_transition_to(StreamState::Opened));
        assert!(!StreamState::Destroyed.can_transition_to(StreamState::Destroyed));
    }
}
