//! List bindings.
//!
//! A [`ForEach`] binds a `State<Vec<Item>>` to a [`Renderer`]. Every accepted mutation of the
//! state is diffed exactly once, and the resulting [`Changes`] are fanned out to all
//! subscribers in registration order, whichever of the two contracts they use:
//!
//! - [`ForEach::on_change`]: `begin()`, `on_indices(&changes)`, `end()`, for consumers that
//!   batch row updates (table-like views).
//! - [`ForEach::on_change_values`]: `f(old, new, &changes)`, for consumers that also need the
//!   full before and after values.
//!
//! Nothing is delivered when a mutation produces an empty edit script.

use crate::diff::{self, Changes};
use crate::error::StateError;
use crate::render::Renderer;
use crate::state::{State, Subscription, SubscriptionId};
use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};
use uuid::Uuid;

/// A unique identifier for a list binding.
///
/// (this is just a UUID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingId(Uuid);

impl BindingId {
    fn new() -> BindingId {
        BindingId(Uuid::new_v4())
    }
}

type Differ<Item> = Box<dyn Fn(&[Item], &[Item]) -> Changes + Send + Sync>;

enum Subscriber<Item> {
    Indices {
        begin: Box<dyn Fn() + Send + Sync>,
        on_indices: Box<dyn Fn(&Changes) + Send + Sync>,
        end: Box<dyn Fn() + Send + Sync>,
    },
    Values(Box<dyn Fn(&[Item], &[Item], &Changes) + Send + Sync>),
}

impl<Item> Subscriber<Item> {
    fn notify(&self, old: &[Item], new: &[Item], changes: &Changes) {
        match self {
            Subscriber::Indices {
                begin,
                on_indices,
                end,
            } => {
                begin();
                on_indices(changes);
                end();
            }
            Subscriber::Values(f) => f(old, new, changes),
        }
    }
}

struct ForEachInner<Item, O> {
    id: BindingId,
    items: State<Vec<Item>>,
    renderer: Renderer<Item, O>,
    differ: Differ<Item>,
    generation: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<Subscriber<Item>>)>>,
    /// Our own listener on `items`; dropped together with the binding.
    listener: Mutex<Option<Subscription>>,
}

impl<Item, O> ForEachInner<Item, O> {
    fn changed(&self, old: &[Item], new: &[Item]) {
        let changes = (self.differ)(old, new);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if changes.is_empty() {
            trace!(binding = ?self.id, generation, "edit script empty; nothing to deliver");
            return;
        }
        debug!(
            binding = ?self.id,
            generation,
            deletions = changes.deletions.len(),
            insertions = changes.insertions.len(),
            modifications = changes.modifications.len(),
            "delivering list changes"
        );

        let subscribers: Vec<_> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber.notify(old, new, &changes);
        }
    }
}

/// A list of items bound to a renderer.
///
/// Cloning a `ForEach` creates another handle to the same binding. The binding stops observing
/// its state once every strong handle is dropped.
pub struct ForEach<Item, O> {
    inner: Arc<ForEachInner<Item, O>>,
}

impl<Item, O> Clone for ForEach<Item, O> {
    fn clone(&self) -> Self {
        ForEach {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Item: fmt::Debug, O> fmt::Debug for ForEach<Item, O> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ForEach")
            .field("id", &self.inner.id)
            .field("items", &self.inner.items)
            .finish()
    }
}

impl<Item, O> ForEach<Item, O>
where
    Item: Hash + Eq + Send + Sync + 'static,
    O: 'static,
{
    /// Creates a binding over a fresh state holding `items`.
    pub fn new(items: impl IntoIterator<Item = Item>, renderer: Renderer<Item, O>) -> Self {
        ForEach::from_state(State::new(items.into_iter().collect()), renderer)
    }

    /// Binds an existing state; items are matched by equality.
    pub fn from_state(items: State<Vec<Item>>, renderer: Renderer<Item, O>) -> Self {
        ForEach::with_differ(
            items,
            renderer,
            Box::new(|old: &[Item], new: &[Item]| diff::diff(old, new).indices()),
        )
    }
}

impl<Item, O> ForEach<Item, O>
where
    Item: PartialEq + Send + Sync + 'static,
    O: 'static,
{
    /// Binds an existing state; items are matched by `key`, and a matched item whose value
    /// changed is reported as modified.
    pub fn keyed<K: Hash + Eq>(
        items: State<Vec<Item>>,
        key: impl Fn(&Item) -> K + Send + Sync + 'static,
        renderer: Renderer<Item, O>,
    ) -> Self {
        ForEach::with_differ(
            items,
            renderer,
            Box::new(move |old: &[Item], new: &[Item]| {
                diff::diff_by(old, new, |item| key(item)).indices()
            }),
        )
    }

    fn with_differ(
        items: State<Vec<Item>>,
        renderer: Renderer<Item, O>,
        differ: Differ<Item>,
    ) -> Self {
        let inner = Arc::new(ForEachInner {
            id: BindingId::new(),
            items,
            renderer,
            differ,
            generation: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let listener = inner.items.listen(move |old: &Vec<Item>, new: &Vec<Item>| {
            if let Some(inner) = weak.upgrade() {
                inner.changed(old, new);
            }
        });
        *inner.listener.lock() = Some(listener);

        ForEach { inner }
    }

    pub fn id(&self) -> BindingId {
        self.inner.id
    }

    /// The state this binding observes.
    pub fn state(&self) -> &State<Vec<Item>> {
        &self.inner.items
    }

    /// Replaces the items. See [`State::set`].
    pub fn set(&self, items: Vec<Item>) -> Result<bool, StateError> {
        self.inner.items.set(items)
    }

    /// Number of items.
    pub fn count(&self) -> usize {
        self.inner.items.with(Vec::len)
    }

    /// Renders the item at `index`, or nothing if there is no such item.
    pub fn render(&self, index: usize) -> Vec<O> {
        self.inner.items.with(|items| match items.get(index) {
            Some(item) => self.inner.renderer.render(index, item),
            None => Vec::new(),
        })
    }

    /// Renders every item, in order, into one flat list.
    pub fn render_all(&self) -> Vec<O> {
        self.inner.items.with(|items| {
            items
                .iter()
                .enumerate()
                .flat_map(|(index, item)| self.inner.renderer.render(index, item))
                .collect()
        })
    }

    /// Number of diffs computed so far (one per accepted mutation of the state).
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Subscribes with the index-only contract.
    pub fn on_change(
        &self,
        begin: impl Fn() + Send + Sync + 'static,
        on_indices: impl Fn(&Changes) + Send + Sync + 'static,
        end: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Subscriber::Indices {
            begin: Box::new(begin),
            on_indices: Box::new(on_indices),
            end: Box::new(end),
        })
    }

    /// Subscribes with the value-and-index contract.
    pub fn on_change_values(
        &self,
        f: impl Fn(&[Item], &[Item], &Changes) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Subscriber::Values(Box::new(f)))
    }

    fn subscribe(&self, subscriber: Subscriber<Item>) -> Subscription {
        let id = SubscriptionId::new();
        self.inner
            .subscribers
            .lock()
            .push((id, Arc::new(subscriber)));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().retain(|(i, _)| *i != id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn downgrade(&self) -> WeakForEach<Item, O> {
        WeakForEach {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// A non-owning handle to a [`ForEach`], for rendering layers that must not keep the binding
/// alive.
pub struct WeakForEach<Item, O> {
    inner: Weak<ForEachInner<Item, O>>,
}

impl<Item, O> Clone for WeakForEach<Item, O> {
    fn clone(&self) -> Self {
        WeakForEach {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<Item, O> WeakForEach<Item, O> {
    pub fn upgrade(&self) -> Option<ForEach<Item, O>> {
        self.inner.upgrade().map(|inner| ForEach { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Render;

    fn labels(items: &[&'static str]) -> ForEach<&'static str, String> {
        ForEach::new(
            items.iter().copied(),
            Renderer::new(|index, item: &&str| Render::One(format!("{}{}", item, index))),
        )
    }

    fn record(list: &ForEach<&'static str, String>) -> (Arc<Mutex<Vec<String>>>, Subscription) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (b, c, e) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        let sub = list.on_change(
            move || b.lock().push("begin".to_string()),
            move |changes| c.lock().push(format!("{:?}", changes)),
            move || e.lock().push("end".to_string()),
        );
        (log, sub)
    }

    #[test]
    fn render_and_count() {
        let list = labels(&["a", "b"]);
        assert_eq!(list.count(), 2);
        assert_eq!(list.render(1), vec!["b1"]);
        assert_eq!(list.render(2), Vec::<String>::new());
        assert_eq!(list.render_all(), vec!["a0", "b1"]);
    }

    #[test]
    fn new_accepts_ranges() {
        let list: ForEach<u32, u32> =
            ForEach::new(1..=3, Renderer::from_item(|n: &u32| Some(n * 10)));
        assert_eq!(list.render_all(), vec![10, 20, 30]);
    }

    #[test]
    fn index_contract_is_bracketed() {
        let list = labels(&[]);
        let (log, _sub) = record(&list);
        list.set(vec!["x", "y"]).unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                "begin".to_string(),
                format!("{:?}", Changes { insertions: vec![0, 1], ..Changes::default() }),
                "end".to_string(),
            ]
        );
    }

    #[test]
    fn empty_script_delivers_nothing() {
        let state = State::with_policy(vec!["a", "b"], crate::state::NeverEqual);
        let list: ForEach<&str, String> =
            ForEach::from_state(state, Renderer::constant(|| Render::<String>::Empty));
        let (log, _sub) = record(&list);
        let values = Arc::new(Mutex::new(0));
        let v = Arc::clone(&values);
        let _values = list.on_change_values(move |_, _, _| *v.lock() += 1);

        list.set(vec!["a", "b"]).unwrap();
        assert_eq!(list.generation(), 1);
        assert!(log.lock().is_empty());
        assert_eq!(*values.lock(), 0);
    }

    #[test]
    fn both_contracts_share_one_diff() {
        let list = labels(&["a", "b", "c"]);
        let (log, _sub) = record(&list);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _values = list.on_change_values(move |old, new, changes| {
            s.lock().push((old.to_vec(), new.to_vec(), changes.clone()));
        });

        list.set(vec!["a", "c"]).unwrap();
        assert_eq!(list.generation(), 1);

        let expected = Changes {
            deletions: vec![1],
            ..Changes::default()
        };
        assert_eq!(log.lock()[1], format!("{:?}", expected));
        assert_eq!(
            *seen.lock(),
            vec![(vec!["a", "b", "c"], vec!["a", "c"], expected)]
        );
    }

    #[test]
    fn render_inside_notification_sees_new_items() {
        let list = labels(&["a"]);
        let weak = list.downgrade();
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&rendered);
        let _sub = list.on_change(
            || (),
            move |changes| {
                let list = weak.upgrade().unwrap();
                for &index in &changes.insertions {
                    r.lock().extend(list.render(index));
                }
            },
            || (),
        );
        list.set(vec!["a", "b", "c"]).unwrap();
        assert_eq!(*rendered.lock(), vec!["b1", "c2"]);
    }

    #[test]
    fn dropping_subscription_stops_delivery() {
        let list = labels(&["a"]);
        let (log, sub) = record(&list);
        assert_eq!(list.subscriber_count(), 1);
        drop(sub);
        assert_eq!(list.subscriber_count(), 0);
        list.set(vec!["b"]).unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn dropping_binding_releases_state_listener() {
        let state = State::new(vec![1, 2]);
        let list: ForEach<i32, i32> =
            ForEach::from_state(state.clone(), Renderer::from_item(|n: &i32| Some(*n)));
        assert_eq!(state.listener_count(), 1);
        let weak = list.downgrade();
        drop(list);
        assert!(weak.upgrade().is_none());
        assert_eq!(state.listener_count(), 0);
        assert_eq!(state.set(vec![3]), Ok(true));
    }

    #[test]
    fn keyed_binding_reports_payload_changes() {
        #[derive(Debug, Clone, PartialEq)]
        struct Row {
            id: u32,
            title: String,
        }
        let row = |id, title: &str| Row {
            id,
            title: title.to_string(),
        };

        let state = State::new(vec![row(1, "one"), row(2, "two")]);
        let list: ForEach<Row, String> = ForEach::keyed(
            state,
            |row: &Row| row.id,
            Renderer::from_item(|row: &Row| Some(row.title.clone())),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = list.on_change_values(move |_, _, changes| s.lock().push(changes.clone()));

        list.set(vec![row(1, "one"), row(2, "deux")]).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![Changes {
                modifications: vec![1],
                ..Changes::default()
            }]
        );
        assert_eq!(list.render(1), vec!["deux".to_string()]);
    }

    #[test]
    fn renderer_writing_to_state_is_rejected() {
        let state = State::new(vec![0u8]);
        let target = state.clone();
        let result = Arc::new(Mutex::new(None));
        let r = Arc::clone(&result);
        let list: ForEach<u8, ()> = ForEach::from_state(
            state,
            Renderer::new(move |_, _: &u8| {
                if target.is_dispatching() {
                    *r.lock() = Some(target.set(vec![]));
                }
                Render::<()>::Empty
            }),
        );
        let weak = list.downgrade();
        let _sub = list.on_change(
            || (),
            move |changes| {
                if let Some(list) = weak.upgrade() {
                    for &index in &changes.insertions {
                        list.render(index);
                    }
                }
            },
            || (),
        );
        list.set(vec![0, 1]).unwrap();
        assert_eq!(*result.lock(), Some(Err(StateError::ReentrantWrite)));
        assert_eq!(list.count(), 2);
    }
}
