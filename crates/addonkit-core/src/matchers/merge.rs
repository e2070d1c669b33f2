//! Merging of overlapping candidate sets into a partition.

use std::collections::{BTreeMap, BTreeSet};

/// Union-find over integer indices with path compression.
struct DisjointSets {
    parents: Vec<usize>,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parents: (0..len).collect(),
        }
    }

    fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.parents[root] != root {
            root = self.parents[root];
        }
        let mut current = index;
        while self.parents[current] != root {
            let next = self.parents[current];
            self.parents[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parents[b] = a;
        }
    }
}

/// Merge sets that share an element until no two sets intersect.
///
/// The union of the output equals the union of the input. Empty input sets
/// are dropped. Output sets are sorted by their smallest element.
pub fn merge_intersecting_sets<T, I>(sets: I) -> Vec<BTreeSet<T>>
where
    T: Ord + Clone,
    I: IntoIterator<Item = BTreeSet<T>>,
{
    let mut index_of: BTreeMap<T, usize> = BTreeMap::new();
    let mut members: Vec<Vec<usize>> = Vec::new();
    for set in sets {
        let indices = set
            .into_iter()
            .map(|item| {
                let next = index_of.len();
                *index_of.entry(item).or_insert(next)
            })
            .collect();
        members.push(indices);
    }

    let mut forest = DisjointSets::new(index_of.len());
    for indices in &members {
        if let Some((&first, rest)) = indices.split_first() {
            for &other in rest {
                forest.union(first, other);
            }
        }
    }

    let mut components: BTreeMap<usize, BTreeSet<T>> = BTreeMap::new();
    for (item, index) in index_of {
        let root = forest.find(index);
        components.entry(root).or_default().insert(item);
    }

    let mut merged: Vec<BTreeSet<T>> = components.into_values().collect();
    merged.sort();
    merged
}
