//! Traits for backends.

/// A native toolkit that list rows are rendered into.
///
/// The backend owns one container view; a [`ListHost`](crate::ListHost) tells it where in that
/// container's subviews each row's views go.
pub trait Backend {
    /// The render output views are created from.
    type Output;

    /// A reference to a view in the backend.
    type ViewRef;

    /// Error type.
    type Error;

    /// Creates a new view.
    fn new_view(&mut self, output: Self::Output) -> Result<Self::ViewRef, Self::Error>;

    /// Inserts views into the container's subviews, the first one at `position`.
    fn insert_subviews(
        &mut self,
        position: usize,
        views: Vec<&Self::ViewRef>,
    ) -> Result<(), Self::Error>;

    /// Removes a view from the container and destroys it.
    fn remove_view(&mut self, view: Self::ViewRef) -> Result<(), Self::Error>;

    /// Called before a batch of patches.
    fn begin_updates(&mut self) {}

    /// Called after a batch of patches.
    fn end_updates(&mut self) {}
}
