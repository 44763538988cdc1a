//! Typed observer registry
//!
//! Every stateful object (device session, call, orchestrator) owns one
//! [`EventChannel`] and exposes its change notifications through it. The
//! channel is a live bus: listeners run synchronously inside `emit`, in
//! registration order, and late subscribers see nothing that was emitted
//! before they registered.
//!
//! A panicking listener is caught and logged; the emitter and the remaining
//! listeners are unaffected.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::error;

/// An event that can travel through an [`EventChannel`]
///
/// Listeners subscribe per [`Event::Kind`], the payload-free discriminant
/// of the event.
pub trait Event: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Identifies one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E: Event> {
    next_id: u64,
    listeners: HashMap<E::Kind, Vec<(ListenerId, Listener<E>)>>,
}

impl<E: Event> Registry<E> {
    fn remove(&mut self, kind: E::Kind, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(&kind);
        }
        removed
    }
}

fn lock<E: Event>(registry: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publish/subscribe registry owned by one stateful object
///
/// Cloning yields another handle onto the same registry.
pub struct EventChannel<E: Event> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: Event> Clone for EventChannel<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: Event> Default for EventChannel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventChannel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventChannel")
            .field("kinds", &registry.listeners.len())
            .finish()
    }
}

impl<E: Event> EventChannel<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                listeners: HashMap::new(),
            })),
        }
    }

    /// Register a listener for one kind of event
    ///
    /// The returned [`Subscription`] unsubscribes when asked to; dropping it
    /// leaves the listener registered.
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        let listener: Listener<E> = Arc::new(listener);
        registry.listeners.entry(kind).or_default().push((id, listener));

        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove one listener, or every listener of `kind` when `id` is `None`
    pub fn off(&self, kind: E::Kind, id: Option<ListenerId>) {
        let mut registry = lock(&self.registry);
        match id {
            Some(id) => {
                registry.remove(kind, id);
            }
            None => {
                registry.listeners.remove(&kind);
            }
        }
    }

    /// Remove every listener of `kind`; returns whether any was registered
    pub fn remove_all_listeners(&self, kind: E::Kind) -> bool {
        lock(&self.registry)
            .listeners
            .remove(&kind)
            .is_some_and(|list| !list.is_empty())
    }

    /// Number of listeners registered for `kind`
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        lock(&self.registry)
            .listeners
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every listener registered for the event's kind
    ///
    /// Returns how many listeners were invoked. Listeners are snapshotted
    /// before the first call, so a listener may subscribe or unsubscribe
    /// without deadlocking; such changes apply from the next emit.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let listeners: Vec<Listener<E>> = lock(&self.registry)
            .listeners
            .get(&kind)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                error!(
                    "Listener for {:?} panicked: {}",
                    kind,
                    panic_message(panic.as_ref())
                );
            }
        }
        listeners.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle returned by [`EventChannel::on`]
pub struct Subscription<E: Event> {
    id: ListenerId,
    kind: E::Kind,
    registry: Weak<Mutex<Registry<E>>>,
}

impl<E: Event> Subscription<E> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn kind(&self) -> E::Kind {
        self.kind
    }

    /// Remove the listener; returns whether it was still registered
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => lock(&registry).remove(self.kind, self.id),
            None => false,
        }
    }
}

impl<E: Event> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
