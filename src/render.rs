use std::fmt;
use std::sync::Arc;

/// What a view builder produced for one item.
///
/// Builders may return nothing, a single output, a list, or other builders' results; `flatten`
/// turns any of these into a flat list in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Render<O> {
    Empty,
    One(O),
    Many(Vec<O>),
    Nested(Vec<Render<O>>),
}

impl<O> Render<O> {
    pub fn flatten(self) -> Vec<O> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    pub fn flatten_into(self, out: &mut Vec<O>) {
        match self {
            Render::Empty => (),
            Render::One(output) => out.push(output),
            Render::Many(mut outputs) => out.append(&mut outputs),
            Render::Nested(renders) => {
                for render in renders {
                    render.flatten_into(out);
                }
            }
        }
    }
}

impl<O> Default for Render<O> {
    fn default() -> Self {
        Render::Empty
    }
}

impl<O> From<Vec<O>> for Render<O> {
    fn from(outputs: Vec<O>) -> Self {
        Render::Many(outputs)
    }
}

impl<O> From<Option<O>> for Render<O> {
    fn from(output: Option<O>) -> Self {
        output.map_or(Render::Empty, Render::One)
    }
}

/// Builds the render outputs for one item of a list.
///
/// Renderers must not write to the state they are rendering; doing so while the state is
/// dispatching fails with [`StateError::ReentrantWrite`](crate::StateError::ReentrantWrite).
pub struct Renderer<Item, O> {
    build: Arc<dyn Fn(usize, &Item) -> Render<O> + Send + Sync>,
}

impl<Item, O> Clone for Renderer<Item, O> {
    fn clone(&self) -> Self {
        Renderer {
            build: Arc::clone(&self.build),
        }
    }
}

impl<Item, O> fmt::Debug for Renderer<Item, O> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Renderer")
    }
}

impl<Item, O> Renderer<Item, O> {
    /// Creates a renderer from a closure taking the item index and the item.
    pub fn new<R>(build: impl Fn(usize, &Item) -> R + Send + Sync + 'static) -> Self
    where
        R: Into<Render<O>>,
    {
        Renderer {
            build: Arc::new(move |index, item| build(index, item).into()),
        }
    }

    /// Creates a renderer from a closure taking only the item.
    pub fn from_item<R>(build: impl Fn(&Item) -> R + Send + Sync + 'static) -> Self
    where
        R: Into<Render<O>>,
    {
        Renderer::new(move |_, item: &Item| build(item))
    }

    /// Creates a renderer that ignores the item.
    pub fn constant<R>(build: impl Fn() -> R + Send + Sync + 'static) -> Self
    where
        R: Into<Render<O>>,
    {
        Renderer::new(move |_, _: &Item| build())
    }

    pub fn render(&self, index: usize, item: &Item) -> Vec<O> {
        (self.build)(index, item).flatten()
    }
}
