use std::collections::{BTreeMap, VecDeque};

use super::data::Data;
use super::name::TaskName;

/// Messages queued for one task, grouped by peer task and by tag. Each
/// `(peer, tag)` queue is first-in first-out.
///
#[derive(Debug, Default)]
pub struct DependencyMap {
    queues: BTreeMap<TaskName, BTreeMap<i32, VecDeque<Data>>>,
    size: usize,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of queued messages over every `(peer, tag)` pair.
    ///
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether at least one message from `name` with the given tag is
    /// queued. Nothing is consumed.
    ///
    pub fn is_satisfied(&self, name: &TaskName, tag: i32) -> bool {
        self.queue_len(name, tag) > 0
    }

    pub fn queue_len(&self, name: &TaskName, tag: i32) -> usize {
        self.queues
            .get(name)
            .and_then(|tags| tags.get(&tag))
            .map_or(0, VecDeque::len)
    }

    pub fn push_back(&mut self, name: TaskName, data: Data, tag: i32) {
        self.queues
            .entry(name)
            .or_default()
            .entry(tag)
            .or_default()
            .push_back(data);
        self.size += 1;
    }

    /// Remove and return the oldest message from `name` with the given tag,
    /// or `None` if there is none.
    ///
    pub fn pop_front(&mut self, name: &TaskName, tag: i32) -> Option<Data> {
        let tags = self.queues.get_mut(name)?;
        let queue = tags.get_mut(&tag)?;
        let data = queue.pop_front()?;

        if queue.is_empty() {
            tags.remove(&tag);
        }
        if tags.is_empty() {
            self.queues.remove(name);
        }
        self.size -= 1;
        Some(data)
    }

    pub fn front(&self, name: &TaskName, tag: i32) -> Option<&Data> {
        self.queues.get(name)?.get(&tag)?.front()
    }

    /// The messages queued from `name` with the given tag, oldest first.
    ///
    pub fn dependencies(&self, name: &TaskName, tag: i32) -> impl Iterator<Item = &Data> + '_ {
        self.queues
            .get(name)
            .and_then(|tags| tags.get(&tag))
            .into_iter()
            .flatten()
    }

    /// Every non-empty `(peer, tag)` pair, in order.
    ///
    pub fn keys(&self) -> Vec<(TaskName, i32)> {
        self.queues
            .iter()
            .flat_map(|(name, tags)| tags.keys().map(move |&tag| (*name, tag)))
            .collect()
    }
}
