//! Incremental reconciliation between ordered, identity-bearing sequences.
//!
//! Given a previous and a new entry sequence, [`diff`] computes the minimal
//! set of insertions, removals, and in-place updates transforming one into
//! the other while preserving stable identity. Controllers never run the
//! comparison on their own loop; jobs go through a [`PreparationQueue`]
//! worker and results come back as bus messages, so overlapping requests
//! for the same controller serialize instead of racing.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::mpsc;
use std::thread;

use log::warn;

/// Comparison contract for diffable entries.
pub trait DiffEntry {
    /// Identity key, stable across rebuilds of the same logical object.
    type Id: Hash + Eq + Clone;

    fn stable_id(&self) -> Self::Id;

    /// Structural payload equality within the same identity.
    ///
    /// Entries comparing equal keep their previously constructed item;
    /// unequal entries are re-emitted as updates.
    fn content_eq(&self, other: &Self) -> bool;
}

/// Ordered mutation script produced by [`diff`].
///
/// Applying `removed` (descending), then `inserted` (ascending), then
/// `updated` to the previous sequence yields the new sequence exactly,
/// entry-for-entry by stable id.
#[derive(Debug, Clone)]
pub struct Transition<T> {
    /// Items to insert, keyed by target index, ascending.
    pub inserted: Vec<(usize, T)>,
    /// Source indices to remove, descending.
    pub removed: Vec<usize>,
    /// Items to replace in place, keyed by target index.
    pub updated: Vec<(usize, T)>,
}

impl<T> Transition<T> {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Applies the mutation script to a live collection.
    pub fn apply(&self, items: &mut Vec<T>)
    where
        T: Clone,
    {
        for &index in &self.removed {
            items.remove(index);
        }
        for (index, item) in &self.inserted {
            items.insert(*index, item.clone());
        }
        for (index, item) in &self.updated {
            items[*index] = item.clone();
        }
    }
}

/// Computes the transition from `previous` to `next`.
///
/// `previous` is `None` on the first run, in which case every entry is an
/// insertion. `build` constructs the item for inserted and updated entries;
/// entries unchanged under [`DiffEntry::content_eq`] are not rebuilt, so
/// their live item instances (and any in-flight mutable state) survive.
pub fn diff<E, T, F>(previous: Option<&[E]>, next: &[E], mut build: F) -> Transition<T>
where
    E: DiffEntry,
    F: FnMut(&E) -> T,
{
    let mut next_remaining: HashMap<E::Id, usize> = HashMap::new();
    for entry in next {
        *next_remaining.entry(entry.stable_id()).or_insert(0) += 1;
    }

    // Previous entries with no identity left in the new sequence are removed.
    // Surviving identities are queued up in order for the matching pass below.
    let mut kept: HashMap<E::Id, VecDeque<&E>> = HashMap::new();
    let mut removed = Vec::new();
    if let Some(previous) = previous {
        for (index, entry) in previous.iter().enumerate() {
            let id = entry.stable_id();
            match next_remaining.get_mut(&id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    kept.entry(id).or_default().push_back(entry);
                }
                _ => removed.push(index),
            }
        }
    }
    removed.reverse();

    let mut inserted = Vec::new();
    let mut updated = Vec::new();
    for (index, entry) in next.iter().enumerate() {
        let id = entry.stable_id();
        match kept.get_mut(&id).and_then(|queue| queue.pop_front()) {
            Some(previous_entry) => {
                if !previous_entry.content_eq(entry) {
                    updated.push((index, build(entry)));
                }
            }
            None => inserted.push((index, build(entry))),
        }
    }

    Transition {
        inserted,
        removed,
        updated,
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Dedicated worker executing comparison jobs off the controller loops.
///
/// Jobs run strictly FIFO on a single thread, which is what makes the merge
/// operator monotonic: transitions submitted in order come back in order.
#[derive(Clone)]
pub struct PreparationQueue {
    jobs: mpsc::Sender<Job>,
}

impl PreparationQueue {
    pub fn new() -> Self {
        let (jobs, receiver) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("preparation-queue".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })
            .expect("failed to spawn preparation queue worker");
        Self { jobs }
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if self.jobs.send(Box::new(job)).is_err() {
            warn!("PreparationQueue: worker terminated, dropping job");
        }
    }
}

impl Default for PreparationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct TestEntry {
        id: u32,
        revision: u32,
    }

    impl TestEntry {
        fn new(id: u32) -> Self {
            Self { id, revision: 0 }
        }

        fn revised(id: u32, revision: u32) -> Self {
            Self { id, revision }
        }
    }

    impl DiffEntry for TestEntry {
        type Id = u32;

        fn stable_id(&self) -> u32 {
            self.id
        }

        fn content_eq(&self, other: &Self) -> bool {
            self.revision == other.revision
        }
    }

    fn ids(entries: &[TestEntry]) -> Vec<u32> {
        entries.iter().map(|entry| entry.id).collect()
    }

    fn apply_and_collect(previous: &[TestEntry], next: &[TestEntry]) -> Vec<u32> {
        let transition = diff(Some(previous), next, TestEntry::clone);
        let mut live = previous.to_vec();
        transition.apply(&mut live);
        ids(&live)
    }

    #[test]
    fn test_first_run_inserts_everything() {
        let next = vec![TestEntry::new(1), TestEntry::new(2), TestEntry::new(3)];
        let transition = diff(None, &next, TestEntry::clone);

        assert_eq!(transition.removed, Vec::<usize>::new());
        assert!(transition.updated.is_empty());
        assert_eq!(
            transition
                .inserted
                .iter()
                .map(|(index, entry)| (*index, entry.id))
                .collect::<Vec<_>>(),
            vec![(0, 1), (1, 2), (2, 3)]
        );
    }

    #[test]
    fn test_identical_sequences_yield_empty_transition() {
        let entries = vec![TestEntry::new(1), TestEntry::new(2)];
        let transition = diff(Some(&entries), &entries, TestEntry::clone);
        assert!(transition.is_empty());
    }

    #[test]
    fn test_unchanged_entries_are_not_rebuilt() {
        let previous = vec![TestEntry::new(1), TestEntry::new(2)];
        let next = vec![TestEntry::new(1), TestEntry::revised(2, 1)];

        let mut built = Vec::new();
        let transition = diff(Some(&previous), &next, |entry| {
            built.push(entry.id);
            entry.clone()
        });

        assert_eq!(built, vec![2]);
        assert_eq!(transition.updated.len(), 1);
        assert_eq!(transition.updated[0].0, 1);
    }

    #[test]
    fn test_removed_indices_are_descending() {
        let previous = vec![
            TestEntry::new(1),
            TestEntry::new(2),
            TestEntry::new(3),
            TestEntry::new(4),
        ];
        let next = vec![TestEntry::new(2), TestEntry::new(4)];
        let transition = diff(Some(&previous), &next, TestEntry::clone);

        assert_eq!(transition.removed, vec![2, 0]);
    }

    #[test]
    fn test_remove_head_insert_head_keeps_survivors() {
        // [A, B, C] -> [D, B, C]
        let previous = vec![TestEntry::new(10), TestEntry::new(20), TestEntry::new(30)];
        let next = vec![TestEntry::new(40), TestEntry::new(20), TestEntry::new(30)];
        let transition = diff(Some(&previous), &next, TestEntry::clone);

        assert_eq!(transition.removed, vec![0]);
        assert_eq!(transition.inserted.len(), 1);
        assert_eq!(transition.inserted[0].0, 0);
        assert_eq!(transition.inserted[0].1.id, 40);
        assert!(transition.updated.is_empty());

        assert_eq!(apply_and_collect(&previous, &next), vec![40, 20, 30]);
    }

    #[test]
    fn test_apply_reproduces_target_for_interleaved_changes() {
        let previous = vec![
            TestEntry::new(1),
            TestEntry::new(2),
            TestEntry::new(3),
            TestEntry::new(4),
            TestEntry::new(5),
        ];
        let next = vec![
            TestEntry::new(6),
            TestEntry::new(2),
            TestEntry::revised(4, 7),
            TestEntry::new(7),
            TestEntry::new(5),
        ];

        assert_eq!(apply_and_collect(&previous, &next), vec![6, 2, 4, 7, 5]);
    }

    #[test]
    fn test_apply_reproduces_target_with_duplicate_ids() {
        let previous = vec![TestEntry::new(1), TestEntry::new(1), TestEntry::new(2)];
        let next = vec![TestEntry::new(1), TestEntry::new(2), TestEntry::new(2)];

        assert_eq!(apply_and_collect(&previous, &next), vec![1, 2, 2]);
    }

    #[test]
    fn test_no_entry_lands_in_more_than_one_output_set() {
        let previous = vec![TestEntry::new(1), TestEntry::new(2), TestEntry::new(3)];
        let next = vec![TestEntry::revised(2, 5), TestEntry::new(4)];
        let transition = diff(Some(&previous), &next, TestEntry::clone);

        let inserted_ids: Vec<u32> = transition
            .inserted
            .iter()
            .map(|(_, entry)| entry.id)
            .collect();
        let updated_ids: Vec<u32> = transition
            .updated
            .iter()
            .map(|(_, entry)| entry.id)
            .collect();
        assert_eq!(inserted_ids, vec![4]);
        assert_eq!(updated_ids, vec![2]);
        assert_eq!(transition.removed, vec![2, 0]);
    }

    #[test]
    fn test_preparation_queue_runs_jobs_in_submission_order() {
        let queue = PreparationQueue::new();
        let (sender, receiver) = mpsc::channel();

        for value in 0..8 {
            let sender = sender.clone();
            queue.submit(move || {
                sender.send(value).expect("result channel closed");
            });
        }

        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(
                receiver
                    .recv_timeout(Duration::from_secs(1))
                    .expect("timed out waiting for job"),
            );
        }
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }
}
