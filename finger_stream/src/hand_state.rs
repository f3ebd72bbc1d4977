use finger_proto::Hand;
use parking_lot::RwLock;

/// Latest hands detected in the stream. Written by the prediction poller,
/// read by the frame annotator and the predict route.
#[derive(Debug, Default)]
pub struct HandState {
    hands: RwLock<Vec<Hand>>,
}

impl HandState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, hands: Vec<Hand>) {
        *self.hands.write() = hands;
    }

    pub fn snapshot(&self) -> Vec<Hand> {
        self.hands.read().clone()
    }

    pub fn hand_count(&self) -> usize {
        self.hands.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_replaces_previous_hands() {
        let state = HandState::new();
        state.update(vec![Hand::default(), Hand::default()]);
        assert_eq!(state.hand_count(), 2);

        state.update(vec![]);

        assert_eq!(state.hand_count(), 0);
        assert!(state.snapshot().is_empty());
    }
}
