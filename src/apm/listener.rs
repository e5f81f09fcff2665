use std::fmt;

/// An observer callback for events of type `E`.
pub type Hook<E> = Box<dyn FnMut(&E)>;

/// Owns the hooks registered for one event source.
pub struct Listener<E> {
    hooks: Vec<Hook<E>>,
}

impl<E> Listener<E> {
    pub fn new() -> Listener<E> {
        Listener { hooks: Vec::new() }
    }

    pub fn add_hook<F>(&mut self, hook: F)
    where
        F: FnMut(&E) + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    /// Whether any observer is registered.
    pub fn has_hooks(&self) -> bool {
        !self.hooks.is_empty()
    }

    pub fn emit(&mut self, event: &E) {
        for hook in self.hooks.iter_mut() {
            hook(event);
        }
    }
}

impl<E> Default for Listener<E> {
    fn default() -> Listener<E> {
        Listener::new()
    }
}

impl<E> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Listener")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
