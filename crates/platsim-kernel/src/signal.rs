//! Multi-subscriber state-change notifications.

/// Identifier of a signal subscription, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// An ordered multi-subscriber event dispatcher.
///
/// Callbacks are invoked in subscription order. There is no global registry,
/// each emitting type owns its signals.
pub struct Signal<T> {
    subscribers: Vec<(SubscriptionId, Box<dyn FnMut(&T)>)>,
    next_id: u64,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    /// Creates an empty signal.
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    /// Registers a callback, returns the handle for unsubscribing.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&T) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Removes a previously registered callback.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Invokes all callbacks in subscription order.
    pub fn emit(&mut self, payload: &T) {
        for (_, callback) in self.subscribers.iter_mut() {
            callback(payload);
        }
    }

    /// Returns the number of subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns whether the signal has no subscribers.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
