//! Test support: an [`EventBus`] driven by closures, which records what was posted.

use core::fmt;

use crate::cause::Cause;
use crate::event::{Cancellable as _, EventBus, EventKind, EventMut};

type Listener = Box<dyn FnMut(&mut EventMut<'_>)>;

/// An [`EventBus`] which passes every event to a list of closures, in order, and logs
/// the outcome.
#[derive(Default)]
pub struct ScriptedBus {
    listeners: Vec<Listener>,
    log: Vec<PostedEvent>,
}

/// Record of one event posted to a [`ScriptedBus`].
#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::exhaustive_structs)]
pub struct PostedEvent {
    #[allow(missing_docs)]
    pub kind: EventKind,
    /// The event's cause when it was posted.
    pub cause: Cause,
    /// Whether the event was cancelled after all listeners ran.
    pub cancelled: bool,
}

impl ScriptedBus {
    /// Constructs a bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener, which will be called after all previously added listeners.
    #[must_use]
    pub fn listen(mut self, listener: impl FnMut(&mut EventMut<'_>) + 'static) -> Self {
        self.add_listener(listener);
        self
    }

    #[allow(missing_docs)]
    pub fn add_listener(&mut self, listener: impl FnMut(&mut EventMut<'_>) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Adds a listener which cancels every event of the given kind.
    #[must_use]
    pub fn cancelling(self, kind: EventKind) -> Self {
        self.listen(move |event| {
            if event.kind() == kind {
                event.set_cancelled(true);
            }
        })
    }

    /// Returns the events posted so far.
    pub fn log(&self) -> &[PostedEvent] {
        &self.log
    }

    /// Returns the kinds of the events posted so far.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.log.iter().map(|posted| posted.kind).collect()
    }

    #[allow(missing_docs)]
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl EventBus for ScriptedBus {
    fn post(&mut self, mut event: EventMut<'_>) -> bool {
        for listener in &mut self.listeners {
            listener(&mut event);
        }
        let cancelled = event.is_cancelled();
        self.log.push(PostedEvent {
            kind: event.kind(),
            cause: event.cause().clone(),
            cancelled,
        });
        cancelled
    }
}

impl fmt::Debug for ScriptedBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedBus")
            .field("listeners", &self.listeners.len())
            .field("log", &self.log)
            .finish()
    }
}
