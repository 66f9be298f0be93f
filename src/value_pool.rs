//! Lock-free, bounded pool of `u32` values.
//!
//! Values live in the leaves of an implicit binary tree. Every inner node
//! counts the free values in its subtree. Allocation first reserves a value
//! by decrementing counters on the way down, so it never descends into a
//! subtree that has nothing left. Freeing stores the value back in its leaf
//! and increments the counters on the way up.

use crate::sync::*;

/// Leaf marker of a value that is currently allocated.
const UNDEFINED: u32 = u32::MAX;

#[derive(Debug)]
pub(crate) struct ValuePool {
    /// Leaves, one per stored value.
    pool: Box<[AtomicU32]>,
    /// Inner nodes. Each holds the number of free values below it.
    tree: Box<[AtomicIsize]>,
    /// Number of leaves of the complete tree (power of two).
    size: usize,
}

impl ValuePool {
    /// Pool holding `values` (which must not contain `u32::MAX`).
    pub(crate) fn new(values: impl IntoIterator<Item = u32>) -> Self {
        let pool: Box<[AtomicU32]> = values
            .into_iter()
            .map(|value| {
                assert_ne!(value, UNDEFINED, "ValuePool::new: reserved value");
                AtomicU32::new(value)
            })
            .collect();
        let size = pool.len().max(1).next_power_of_two();
        let tree = (0..size - 1).map(|_| AtomicIsize::new(0)).collect();
        let result = Self { pool, tree, size };
        result.fill(0, result.pool.len(), size);
        result
    }

    /// Number of values the pool was created with.
    pub(crate) fn capacity(&self) -> usize {
        self.pool.len()
    }

    fn is_leaf(&self, node: usize) -> bool {
        node >= self.size - 1
    }

    fn fill(&self, node: usize, elements: usize, power_of_two: usize) {
        if self.is_leaf(node) {
            return;
        }
        self.tree[node].store(elements as isize, Ordering::Relaxed);
        let half = power_of_two >> 1;
        if elements <= half {
            self.fill(2 * node + 1, elements, half);
        } else {
            self.fill(2 * node + 1, half, half);
            self.fill(2 * node + 2, elements - half, half);
        }
    }

    /// Take a value out of the pool, with the index required to free it.
    ///
    /// Returns `None` if the pool is exhausted.
    pub(crate) fn allocate(&self) -> Option<(usize, u32)> {
        self.allocate_rec(0)
    }

    fn allocate_rec(&self, node: usize) -> Option<(usize, u32)> {
        if self.is_leaf(node) {
            let index = node - (self.size - 1);
            let cell = self.pool.get(index)?;
            let expected = cell.load(Ordering::Acquire);
            if expected == UNDEFINED {
                return None;
            }
            return cell
                .compare_exchange(expected, UNDEFINED, Ordering::AcqRel, Ordering::Relaxed)
                .ok()
                .map(|value| (index, value));
        }

        // Reserve one value of this subtree. This is the only place where the
        // algorithm is not wait-free: decrementing only while the result stays
        // non-negative needs a CAS loop.
        self.tree[node]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |free| {
                (free > 0).then(|| free - 1)
            })
            .ok()?;

        if let Some(found) = self.allocate_rec(2 * node + 1) {
            return Some(found);
        }
        // The reservation above guarantees a value in one of the two
        // subtrees.
        let found = self.allocate_rec(2 * node + 2);
        debug_assert!(found.is_some(), "ValuePool::allocate: reserved value vanished");
        found
    }

    /// Return `value`, previously allocated at `index`, to the pool.
    pub(crate) fn free(&self, index: usize, value: u32) {
        debug_assert_ne!(value, UNDEFINED, "ValuePool::free: reserved value");
        self.pool[index].store(value, Ordering::Release);
        let mut node = index + (self.size - 1);
        while node != 0 {
            node = (node - 1) / 2;
            self.tree[node].fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn allocates_every_value_once_then_exhausts() {
        let pool = ValuePool::new(10..15);
        assert_eq!(pool.capacity(), 5);
        let taken: BTreeSet<_> = (0..5)
            .map(|_| pool.allocate().expect("pool has values left").1)
            .collect();
        assert_eq!(taken, (10..15).collect());
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn freed_value_can_be_allocated_again() {
        let pool = ValuePool::new([7, 8, 9]);
        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();
        let third = pool.allocate().unwrap();
        assert_eq!(pool.allocate(), None);
        pool.free(second.0, second.1);
        assert_eq!(pool.allocate(), Some(second));
        pool.free(first.0, first.1);
        pool.free(third.0, third.1);
        let again: BTreeSet<_> = [pool.allocate().unwrap(), pool.allocate().unwrap()]
            .into_iter()
            .map(|(_, value)| value)
            .collect();
        assert_eq!(again, [first.1, third.1].into_iter().collect());
    }

    #[test]
    fn single_value_and_empty_pools() {
        let single = ValuePool::new([3]);
        assert_eq!(single.allocate(), Some((0, 3)));
        assert_eq!(single.allocate(), None);

        let empty = ValuePool::new([]);
        assert_eq!(empty.allocate(), None);
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let pool = ValuePool::new(0..64);
        let taken: Vec<Vec<u32>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        (0..16)
                            .map(|_| pool.allocate().expect("pool sized for every worker").1)
                            .collect()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        let unique: BTreeSet<_> = taken.iter().flatten().copied().collect();
        assert_eq!(unique.len(), 64);
        assert_eq!(pool.allocate(), None);
    }
}

#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;

    #[test]
    fn racing_allocations_take_distinct_values() {
        loom::model(|| {
            let pool = Arc::new(ValuePool::new([1, 2]));
            let other = {
                let pool = pool.clone();
                loom::thread::spawn(move || pool.allocate())
            };
            let mine = pool.allocate();
            let theirs = other.join().unwrap();
            let (Some(mine), Some(theirs)) = (mine, theirs) else {
                panic!("two values for two allocations");
            };
            assert_ne!(mine, theirs);
            assert_eq!(pool.allocate(), None);
        });
    }

    #[test]
    fn free_races_with_allocate() {
        loom::model(|| {
            let pool = Arc::new(ValuePool::new([5]));
            let (index, value) = pool.allocate().unwrap();
            let other = {
                let pool = pool.clone();
                loom::thread::spawn(move || pool.free(index, value))
            };
            let raced = pool.allocate();
            other.join().unwrap();
            match raced {
                Some(taken) => assert_eq!(taken, (index, value)),
                None => assert_eq!(pool.allocate(), Some((index, value))),
            }
        });
    }
}
