use thiserror::Error;

/// Errors returned when mutating a [`State`](crate::State).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// The state was written to from within one of its own listeners (or a renderer invoked by
    /// one). Use [`State::schedule`](crate::State::schedule) to defer the write instead.
    #[error("state was written to while dispatching its own change notification")]
    ReentrantWrite,

    /// The state was written to from a listener while another thread was dispatching it.
    /// Use [`State::schedule`](crate::State::schedule) to hand the write to that thread.
    #[error("state is being written on another thread")]
    Contended,
}

/// Errors that may occur when a [`ListHost`](crate::ListHost) applies a patch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError<E> {
    /// A patch referred to a row the host does not have.
    #[error("no row at index {0}")]
    NoSuchRow(usize),

    /// `Begin` arrived inside a batch, or `End` arrived outside of one.
    #[error("unbalanced update batch")]
    UnbalancedBatch,

    /// The backend failed.
    #[error("backend error: {0}")]
    Backend(E),
}
