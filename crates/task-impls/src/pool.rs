// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

use std::collections::BTreeMap;

use hotpokt_types::{
    message::HotstuffMessage,
    validator::NodeId,
    view::{Height, Round, Step},
};

/// What happened to a message offered to the pool
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoolInsert {
    /// stored
    Added,
    /// the sender already has a message for this step
    Duplicate,
    /// storing it would exceed the byte bound
    Overflow,
}

/// HotStuff messages received in the current round, bucketed by step.
///
/// Holds at most one message per sender per step, and at most `max_bytes` of encoded messages.
#[derive(Clone, Debug)]
pub struct MessagePool {
    /// messages per step, per sender
    messages: BTreeMap<Step, BTreeMap<NodeId, HotstuffMessage>>,
    /// encoded size of everything stored
    total_bytes: u64,
    /// bound on `total_bytes`
    max_bytes: u64,
}

impl MessagePool {
    /// Create an empty pool bounded to `max_bytes`
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        Self {
            messages: BTreeMap::new(),
            total_bytes: 0,
            max_bytes,
        }
    }

    /// Offer a message to the pool
    pub fn insert(&mut self, message: HotstuffMessage) -> PoolInsert {
        let size = bincode::serialized_size(&message).unwrap_or(u64::MAX);
        let step = self.messages.entry(message.step).or_default();
        if step.contains_key(&message.sender) {
            return PoolInsert::Duplicate;
        }
        if self.total_bytes.saturating_add(size) > self.max_bytes {
            return PoolInsert::Overflow;
        }
        self.total_bytes += size;
        step.insert(message.sender, message);
        PoolInsert::Added
    }

    /// Messages stored for `step` at `(height, round)`, in sender order
    pub fn messages_for(
        &self,
        step: Step,
        height: Height,
        round: Round,
    ) -> impl Iterator<Item = &HotstuffMessage> {
        self.messages
            .get(&step)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(move |message| message.height == height && message.round == round)
    }

    /// Number of messages stored for `step` at `(height, round)`
    #[must_use]
    pub fn count_for(&self, step: Step, height: Height, round: Round) -> usize {
        self.messages_for(step, height, round).count()
    }

    /// Encoded size of everything stored
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.values().all(BTreeMap::is_empty)
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.messages.clear();
        self.total_bytes = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn new_round(sender: u64, height: Height, round: Round) -> HotstuffMessage {
        HotstuffMessage::new_round(NodeId(sender), height, round, None)
    }

    #[test]
    fn one_message_per_sender_and_step() {
        let mut pool = MessagePool::new(u64::MAX);
        assert_eq!(pool.insert(new_round(1, 1, 0)), PoolInsert::Added);
        assert_eq!(pool.insert(new_round(2, 1, 0)), PoolInsert::Added);
        assert_eq!(pool.insert(new_round(1, 1, 0)), PoolInsert::Duplicate);
        assert_eq!(pool.count_for(Step::NewRound, 1, 0), 2);
        assert_eq!(pool.count_for(Step::NewRound, 1, 1), 0);
        assert_eq!(pool.count_for(Step::Prepare, 1, 0), 0);

        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.total_bytes(), 0);
    }

    #[test]
    fn byte_bound_rejects_overflowing_messages() {
        let size = bincode::serialized_size(&new_round(1, 1, 0)).unwrap();
        let mut pool = MessagePool::new(size * 2);
        assert_eq!(pool.insert(new_round(1, 1, 0)), PoolInsert::Added);
        assert_eq!(pool.insert(new_round(2, 1, 0)), PoolInsert::Added);
        assert_eq!(pool.insert(new_round(3, 1, 0)), PoolInsert::Overflow);
        assert_eq!(pool.total_bytes(), size * 2);
        assert_eq!(pool.count_for(Step::NewRound, 1, 0), 2);
    }
}
