use crate::diff::Changes;
use crate::for_each::{ForEach, WeakForEach};
use crate::state::Subscription;
use core::fmt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Patches for a rendered list.
///
/// A batch produced from one change notification is always
/// `Begin, Remove*, Insert*, Update*, End`. Removals are in descending old index order;
/// insertions and updates are in ascending new index order.
#[derive(Clone, PartialEq)]
pub enum Patch<O> {
    /// Starts a batch.
    Begin,
    /// Removes the row at this (old) index.
    Remove(usize),
    /// Inserts a row with these outputs at this (new) index.
    Insert(usize, Vec<O>),
    /// Replaces the outputs of the row at this (new) index.
    Update(usize, Vec<O>),
    /// Ends a batch.
    End,
}

impl<O> Patch<O> {
    /// The row this patch applies to, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            Patch::Remove(index) | Patch::Insert(index, _) | Patch::Update(index, _) => {
                Some(*index)
            }
            Patch::Begin | Patch::End => None,
        }
    }
}

impl<O> fmt::Debug for Patch<O> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Patch::Begin => write!(f, "Begin"),
            Patch::Remove(index) => write!(f, "Remove({})", index),
            Patch::Insert(index, outputs) => {
                write!(f, "Insert({}, {} outputs)", index, outputs.len())
            }
            Patch::Update(index, outputs) => {
                write!(f, "Update({}, {} outputs)", index, outputs.len())
            }
            Patch::End => write!(f, "End"),
        }
    }
}

/// Records the changes of a [`ForEach`] as patches, rendering affected rows as they arrive.
///
/// Dropping the queue unsubscribes it.
pub struct PatchQueue<O> {
    patches: Arc<Mutex<VecDeque<Patch<O>>>>,
    _subscription: Subscription,
}

impl<O: Send + 'static> PatchQueue<O> {
    pub fn attach<Item>(list: &ForEach<Item, O>) -> PatchQueue<O>
    where
        Item: PartialEq + Send + Sync + 'static,
    {
        let patches: Arc<Mutex<VecDeque<Patch<O>>>> = Arc::new(Mutex::new(VecDeque::new()));

        let begin = {
            let patches = Arc::clone(&patches);
            move || patches.lock().push_back(Patch::Begin)
        };
        let on_indices = {
            let patches = Arc::clone(&patches);
            let list = list.downgrade();
            move |changes: &Changes| {
                // renderers run before the queue is locked
                let batch = render_patches(&list, changes);
                let mut patches = patches.lock();
                patches.extend(batch);
                trace!(queued = patches.len(), "queued list patches");
            }
        };
        let end = {
            let patches = Arc::clone(&patches);
            move || patches.lock().push_back(Patch::End)
        };

        PatchQueue {
            patches,
            _subscription: list.on_change(begin, on_indices, end),
        }
    }

    /// Removes and returns the oldest patch.
    pub fn pop(&self) -> Option<Patch<O>> {
        self.patches.lock().pop_front()
    }

    /// Removes and returns all queued patches.
    pub fn drain(&self) -> Vec<Patch<O>> {
        self.patches.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.patches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.lock().is_empty()
    }
}

fn render_patches<Item, O>(list: &WeakForEach<Item, O>, changes: &Changes) -> Vec<Patch<O>>
where
    Item: PartialEq + Send + Sync + 'static,
    O: 'static,
{
    let list = match list.upgrade() {
        Some(list) => list,
        None => return Vec::new(),
    };

    let removals = changes.deletions.iter().rev().map(|&index| Patch::Remove(index));
    let insertions = changes
        .insertions
        .iter()
        .map(|&index| Patch::Insert(index, list.render(index)));
    let updates = changes
        .modifications
        .iter()
        .map(|&index| Patch::Update(index, list.render(index)));
    let batch: Vec<_> = removals.chain(insertions).chain(updates).collect();
    trace!(binding = ?list.id(), patches = batch.len(), "rendered list patches");
    batch
}
