//! Sequence diffing.
//!
//! Items are matched between the old and new sequence by key, using a hash index from key to
//! the old positions holding it, so a diff is linear in the combined length. Equal keys are
//! paired left to right: the first unmatched old occurrence goes with the first unmatched new
//! occurrence.
//!
//! Unmatched old items are *removed* (at their old index) and unmatched new items are
//! *inserted* (at their new index). Of the matched items, a new index is *modified* when the
//! row that will sit there after applying removals and insertions holds a different value than
//! it should, which covers both reorders and payload changes under a stable key. A row that
//! only shifted because of removals or insertions before it is not modified.

use hashbrown::HashMap;
use smallvec::SmallVec;
use std::hash::Hash;

/// One entry in an [`EditScript`].
#[derive(Debug, PartialEq, Eq)]
pub struct Change<'a, T> {
    /// Index into the old sequence for removals, and into the new sequence otherwise.
    pub index: usize,
    pub item: &'a T,
}

impl<T> Clone for Change<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Change<'_, T> {}

/// The classified differences between two sequences. Each list is sorted by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditScript<'a, T> {
    pub removed: Vec<Change<'a, T>>,
    pub inserted: Vec<Change<'a, T>>,
    pub modified: Vec<Change<'a, T>>,
}

impl<'a, T> EditScript<'a, T> {
    /// Returns true if the two sequences render identically.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.inserted.is_empty() && self.modified.is_empty()
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.removed.len() + self.inserted.len() + self.modified.len()
    }

    /// Strips the items, leaving only the index sets.
    pub fn indices(&self) -> Changes {
        fn collect<T>(changes: &[Change<T>]) -> Vec<usize> {
            changes.iter().map(|c| c.index).collect()
        }
        Changes {
            deletions: collect(&self.removed),
            insertions: collect(&self.inserted),
            modifications: collect(&self.modified),
        }
    }
}

/// Index sets derived from an [`EditScript`], each sorted ascending.
///
/// `deletions` index into the old sequence; `insertions` and `modifications` index into the new
/// one. Applying deletions (descending), then insertions (ascending), then re-rendering the
/// modified rows turns the old rendering into the new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Changes {
    pub deletions: Vec<usize>,
    pub insertions: Vec<usize>,
    pub modifications: Vec<usize>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }
}

/// Old positions holding one key, consumed front to back.
#[derive(Default)]
struct Positions {
    slots: SmallVec<[usize; 2]>,
    next: usize,
}

impl Positions {
    fn take(&mut self) -> Option<usize> {
        let slot = self.slots.get(self.next).copied();
        if slot.is_some() {
            self.next += 1;
        }
        slot
    }
}

/// Diffs two sequences, matching items by equality.
pub fn diff<'a, T: Hash + Eq>(old: &'a [T], new: &'a [T]) -> EditScript<'a, T> {
    diff_by(old, new, |item| item)
}

/// Diffs two sequences, matching items by `key` and comparing matched items with `PartialEq`.
pub fn diff_by<'a, T, K, F>(old: &'a [T], new: &'a [T], key: F) -> EditScript<'a, T>
where
    T: PartialEq,
    K: Hash + Eq,
    F: Fn(&'a T) -> K,
{
    let mut index: HashMap<K, Positions> = HashMap::with_capacity(old.len());
    for (i, item) in old.iter().enumerate() {
        index.entry(key(item)).or_default().slots.push(i);
    }

    let mut old_matched = vec![false; old.len()];
    let mut new_matched = vec![false; new.len()];
    let mut inserted = Vec::new();

    for (j, item) in new.iter().enumerate() {
        match index.get_mut(&key(item)).and_then(Positions::take) {
            Some(i) => {
                old_matched[i] = true;
                new_matched[j] = true;
            }
            None => inserted.push(Change { index: j, item }),
        }
    }

    let removed = old
        .iter()
        .enumerate()
        .filter(|(i, _)| !old_matched[*i])
        .map(|(index, item)| Change { index, item })
        .collect();

    // After removing and inserting, the r-th surviving row still shows the r-th surviving old
    // item; it needs re-rendering wherever that differs from the r-th surviving new item.
    let surviving_old = old.iter().enumerate().filter(|(i, _)| old_matched[*i]);
    let surviving_new = new.iter().enumerate().filter(|(j, _)| new_matched[*j]);
    let modified = surviving_old
        .zip(surviving_new)
        .filter(|((_, shown), (_, wanted))| shown != wanted)
        .map(|(_, (index, item))| Change { index, item })
        .collect();

    EditScript {
        removed,
        inserted,
        modified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices<T: Hash + Eq>(old: &[T], new: &[T]) -> Changes {
        diff(old, new).indices()
    }

    fn changes(deletions: &[usize], insertions: &[usize], modifications: &[usize]) -> Changes {
        Changes {
            deletions: deletions.to_vec(),
            insertions: insertions.to_vec(),
            modifications: modifications.to_vec(),
        }
    }

    #[test]
    fn empty_sequences() {
        let empty: [&str; 0] = [];
        assert!(diff(&empty, &empty).is_empty());
        assert_eq!(indices(&empty, &["x", "y"]), changes(&[], &[0, 1], &[]));
        assert_eq!(indices(&["x", "y"], &empty), changes(&[0, 1], &[], &[]));
    }

    #[test]
    fn identical_sequences() {
        let a = vec!["a".to_string(), "b".to_string()];
        let b = a.clone();
        assert!(diff(&a, &b).is_empty());
    }

    #[test]
    fn append() {
        assert_eq!(
            indices(&["a", "b", "c"], &["a", "b", "c", "d"]),
            changes(&[], &[3], &[])
        );
    }

    #[test]
    fn remove_from_middle_does_not_modify_shifted_rows() {
        assert_eq!(indices(&["a", "b", "c"], &["a", "c"]), changes(&[1], &[], &[]));
    }

    #[test]
    fn insert_at_front() {
        assert_eq!(indices(&[1, 2], &[0, 1, 2]), changes(&[], &[0], &[]));
    }

    #[test]
    fn replace_one_item() {
        assert_eq!(indices(&["a", "b", "c"], &["a", "x", "c"]), changes(&[1], &[1], &[]));
    }

    #[test]
    fn swap_marks_both_rows_modified() {
        assert_eq!(indices(&["a", "b"], &["b", "a"]), changes(&[], &[], &[0, 1]));
    }

    #[test]
    fn move_to_end() {
        // survivors [a, b, c] vs [b, c, a]: every row shows the wrong item
        assert_eq!(
            indices(&["a", "b", "c"], &["b", "c", "a"]),
            changes(&[], &[], &[0, 1, 2])
        );
    }

    #[test]
    fn duplicates_pair_left_to_right() {
        let script = diff(&["a", "b", "a"], &["a", "a"]);
        assert_eq!(script.indices(), changes(&[1], &[], &[]));
        assert_eq!(*script.removed[0].item, "b");

        let script = diff(&["a", "a", "a"], &["a"]);
        assert_eq!(script.indices(), changes(&[1, 2], &[], &[]));
    }

    #[test]
    fn swapping_equal_duplicates_is_not_a_modification() {
        assert_eq!(indices(&["a", "a"], &["a", "a"]), changes(&[], &[], &[]));
    }

    #[test]
    fn changes_carry_items() {
        let old = ["a", "b"];
        let new = ["b", "c"];
        let script = diff(&old, &new);
        assert_eq!(script.removed, vec![Change { index: 0, item: &"a" }]);
        assert_eq!(script.inserted, vec![Change { index: 1, item: &"c" }]);
        assert!(script.modified.is_empty());
        assert_eq!(script.len(), 2);
    }

    #[derive(Debug, PartialEq)]
    struct Row {
        id: u32,
        title: &'static str,
    }

    #[test]
    fn keyed_payload_change_is_a_modification() {
        let old = [Row { id: 1, title: "one" }, Row { id: 2, title: "two" }];
        let new = [Row { id: 1, title: "one" }, Row { id: 2, title: "TWO" }];
        let script = diff_by(&old, &new, |row| row.id);
        assert_eq!(script.indices(), changes(&[], &[], &[1]));
        assert_eq!(script.modified[0].item.title, "TWO");
    }

    #[test]
    fn keyed_reorder_with_removal() {
        let old = [
            Row { id: 1, title: "a" },
            Row { id: 2, title: "b" },
            Row { id: 3, title: "c" },
        ];
        let new = [Row { id: 3, title: "c" }, Row { id: 1, title: "a" }];
        let script = diff_by(&old, &new, |row| row.id);
        assert_eq!(script.indices(), changes(&[1], &[], &[0, 1]));
    }
}
