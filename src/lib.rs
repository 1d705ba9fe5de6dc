//! Observable list bindings.
//!
//! # Conceptual overview
//! Wren is the state and list layer of a declarative UI: it keeps values that views observe, and
//! keeps rendered lists in sync with the sequences they were rendered from, without re-rendering
//! rows that did not change.
//!
//! ## State
//! A [`State`] is a shared, observable value cell. Writing a value the cell's [`MutationPolicy`]
//! considers equivalent to the current one does nothing; any other write replaces the value and
//! notifies listeners with the old and new value, bracketed by begin and end hooks. Listeners run
//! synchronously on the writing thread, in registration order, and see the new value when they
//! read the cell.
//!
//! A listener must not write to the cell it is observing; such writes are rejected. To react to a
//! change with another change, [`schedule`](State::schedule) the write instead: it is applied
//! right after the current notification finishes. The same goes for writing, from a listener, to
//! another state that a different thread is writing: `schedule` hands the value over, while `set`
//! fails rather than wait.
//!
//! Registrations return a [`Subscription`]. Dropping it deregisters the listener.
//!
//! ## Lists
//! A [`ForEach`] binds a `State<Vec<Item>>` to a [`Renderer`]. Every accepted write is diffed once
//! (see [`diff`]) and the resulting index sets are handed to every subscriber, either as
//! `begin`, `on_indices`, `end` for table-like consumers or together with the old and new items.
//!
//! ## Patches and Hosts
//! To get a list on screen, a [`PatchQueue`] turns change notifications into [`Patch`]es with the
//! affected rows already rendered, and a [`ListHost`] applies them to a [`Backend`]. Backends are
//! platform-specific container views abstracted to a common interface.
//!
//! Applying a batch's removals in descending order, then its insertions in ascending order, then
//! re-rendering its updated rows turns the old rendering into the new one.

pub mod backend;
pub mod diff;
mod error;
mod for_each;
mod host;
mod patch;
mod render;
mod state;

pub use backend::Backend;
pub use diff::{diff, diff_by, Change, Changes, EditScript};
pub use error::{HostError, StateError};
pub use for_each::{BindingId, ForEach, WeakForEach};
pub use host::ListHost;
pub use patch::{Patch, PatchQueue};
pub use render::{Render, Renderer};
pub use state::{MutationPolicy, NeverEqual, State, Structural, Subscription, SubscriptionId};
