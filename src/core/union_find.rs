/*!
# Disjoint Sets

A union–find (disjoint-set) structure with path compression, used twice in
the engine:

- over voxel indices during the watershed, where the union direction is
  irrelevant and union by rank keeps trees shallow;
- over region labels during agglomeration, where the merge rule dictates
  which region absorbs which, so the caller picks the surviving root
  explicitly via [`DisjointSets::union_into`].
*/

use std::cmp::Ordering;

/// A union–find structure over `0..n`.
#[derive(Debug, Clone)]
pub struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    /// Creates `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Number of elements (not sets).
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Returns true if the structure holds no elements.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Finds the representative of the set containing `i`, compressing paths.
    pub fn find(&mut self, i: usize) -> usize {
        debug_assert!(i < self.parent.len());
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Unions the sets containing `i` and `j` by rank. Returns true if the
    /// two were previously distinct.
    pub fn union(&mut self, i: usize, j: usize) -> bool {
        let i = self.find(i);
        let j = self.find(j);
        if i == j {
            return false;
        }
        match self.rank[i].cmp(&self.rank[j]) {
            Ordering::Less => self.parent[i] = j,
            Ordering::Greater => self.parent[j] = i,
            Ordering::Equal => {
                self.parent[j] = i;
                self.rank[i] += 1;
            }
        }
        true
    }

    /// Merges the set containing `loser` into the set rooted at `winner`.
    ///
    /// Both arguments must already be roots; `winner` stays the
    /// representative afterwards. Used by the agglomeration merge rule,
    /// which chooses the surviving region itself.
    pub fn union_into(&mut self, winner: usize, loser: usize) {
        debug_assert_eq!(self.parent[winner], winner, "winner must be a root");
        debug_assert_eq!(self.parent[loser], loser, "loser must be a root");
        debug_assert_ne!(winner, loser);
        self.parent[loser] = winner;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_find_basic() {
        let mut ds = DisjointSets::new(5);
        assert!(ds.union(0, 1));
        assert!(ds.union(3, 4));
        assert!(!ds.union(1, 0));
        assert_eq!(ds.find(0), ds.find(1));
        assert_ne!(ds.find(1), ds.find(3));
    }

    #[test]
    fn test_union_into_keeps_winner() {
        let mut ds = DisjointSets::new(4);
        ds.union_into(2, 1);
        ds.union_into(2, 3);
        assert_eq!(ds.find(1), 2);
        assert_eq!(ds.find(3), 2);
        assert_eq!(ds.find(2), 2);
    }
}
