use crate::backend::Backend;
use crate::error::HostError;
use crate::for_each::ForEach;
use crate::patch::Patch;
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// Applies list patches to a backend.
///
/// Each row may have rendered to any number of views; the host keeps them per row so that row
/// indices can be turned into positions among the container's subviews.
///
/// Within a `Begin`/`End` batch, updates are held back until `End` and only the last update
/// for each index is applied.
pub struct ListHost<B: Backend> {
    backend: B,
    rows: Vec<Vec<B::ViewRef>>,
    batch: Option<BTreeMap<usize, Vec<B::Output>>>,
}

impl<B: Backend> ListHost<B> {
    pub fn new(backend: B) -> ListHost<B> {
        ListHost {
            backend,
            rows: Vec::new(),
            batch: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Views of the row at `index`.
    pub fn row(&self, index: usize) -> Option<&[B::ViewRef]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Returns true between `Begin` and `End`.
    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Replaces all rows with a fresh rendering of `list`.
    pub fn mount<Item>(
        &mut self,
        list: &ForEach<Item, B::Output>,
    ) -> Result<(), HostError<B::Error>>
    where
        Item: PartialEq + Send + Sync + 'static,
        B::Output: 'static,
    {
        while let Some(views) = self.rows.pop() {
            self.remove_views(views)?;
        }
        for index in 0..list.count() {
            self.insert_row(index, list.render(index))?;
        }
        Ok(())
    }

    /// Applies all patches in order, stopping at the first error.
    pub fn patch_all(
        &mut self,
        patches: impl IntoIterator<Item = Patch<B::Output>>,
    ) -> Result<(), HostError<B::Error>> {
        for patch in patches {
            self.patch(patch)?;
        }
        Ok(())
    }

    /// Applies a patch.
    pub fn patch(&mut self, patch: Patch<B::Output>) -> Result<(), HostError<B::Error>> {
        match patch {
            Patch::Begin => {
                if self.batch.is_some() {
                    return Err(HostError::UnbalancedBatch);
                }
                self.backend.begin_updates();
                self.batch = Some(BTreeMap::new());
                Ok(())
            }
            Patch::Remove(index) => self.remove_row(index),
            Patch::Insert(index, outputs) => self.insert_row(index, outputs),
            Patch::Update(index, outputs) => match &mut self.batch {
                Some(updates) => {
                    updates.insert(index, outputs);
                    Ok(())
                }
                None => self.replace_row(index, outputs),
            },
            Patch::End => {
                let updates = self.batch.take().ok_or(HostError::UnbalancedBatch)?;
                trace!(updates = updates.len(), "flushing batched row updates");
                for (index, outputs) in updates {
                    self.replace_row(index, outputs)?;
                }
                self.backend.end_updates();
                Ok(())
            }
        }
    }

    /// Position of the first view of row `index` among the container's subviews.
    fn position(&self, index: usize) -> usize {
        self.rows[..index].iter().map(Vec::len).sum()
    }

    fn remove_row(&mut self, index: usize) -> Result<(), HostError<B::Error>> {
        if index >= self.rows.len() {
            return Err(HostError::NoSuchRow(index));
        }
        let views = self.rows.remove(index);
        self.remove_views(views)
    }

    fn insert_row(
        &mut self,
        index: usize,
        outputs: Vec<B::Output>,
    ) -> Result<(), HostError<B::Error>> {
        if index > self.rows.len() {
            return Err(HostError::NoSuchRow(index));
        }
        let views = self.create_views(outputs)?;
        let position = self.position(index);
        let views = self.insert_views(position, views)?;
        self.rows.insert(index, views);
        Ok(())
    }

    /// Puts the new views in front of the old ones before removing those, so that a failure
    /// leaves the row as it was.
    fn replace_row(
        &mut self,
        index: usize,
        outputs: Vec<B::Output>,
    ) -> Result<(), HostError<B::Error>> {
        if index >= self.rows.len() {
            return Err(HostError::NoSuchRow(index));
        }
        let views = self.create_views(outputs)?;
        let position = self.position(index);
        let views = self.insert_views(position, views)?;
        let old = std::mem::replace(&mut self.rows[index], views);
        self.remove_views(old)
    }

    fn create_views(
        &mut self,
        outputs: Vec<B::Output>,
    ) -> Result<Vec<B::ViewRef>, HostError<B::Error>> {
        let mut views = Vec::with_capacity(outputs.len());
        for output in outputs {
            match self.backend.new_view(output) {
                Ok(view) => views.push(view),
                Err(err) => {
                    self.discard(views);
                    return Err(HostError::Backend(err));
                }
            }
        }
        Ok(views)
    }

    fn insert_views(
        &mut self,
        position: usize,
        views: Vec<B::ViewRef>,
    ) -> Result<Vec<B::ViewRef>, HostError<B::Error>> {
        match self.backend.insert_subviews(position, views.iter().collect()) {
            Ok(()) => Ok(views),
            Err(err) => {
                self.discard(views);
                Err(HostError::Backend(err))
            }
        }
    }

    /// Destroys views on an error path. The original error is the one reported.
    fn discard(&mut self, views: Vec<B::ViewRef>) {
        for view in views {
            if self.backend.remove_view(view).is_err() {
                warn!("failed to destroy a view after a backend error");
            }
        }
    }

    fn remove_views(&mut self, views: Vec<B::ViewRef>) -> Result<(), HostError<B::Error>> {
        for view in views {
            self.backend.remove_view(view).map_err(HostError::Backend)?;
        }
        Ok(())
    }
}
