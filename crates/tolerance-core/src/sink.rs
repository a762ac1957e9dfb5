//! One-shot result delivery to a UI context that may disappear.
//!
//! The producer keeps running to completion; if the consumer has detached by
//! then, the result is dropped instead of being applied to a stale screen.

use parking_lot::Mutex;
use std::sync::Arc;

type Deliver<T> = Box<dyn FnOnce(T) + Send>;

pub struct ResultSink<T> {
    slot: Arc<Mutex<Option<Deliver<T>>>>,
}

impl<T> Clone for ResultSink<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> ResultSink<T> {
    pub fn new(deliver: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(deliver)))),
        }
    }

    /// Consumer side: stop accepting the result.
    pub fn detach(&self) {
        self.slot.lock().take();
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Hand `value` to the consumer. Returns false if it already detached or
    /// a value was delivered before.
    pub fn deliver(&self, value: T) -> bool {
        // Take the callback out first so it never runs under the lock.
        let deliver = self.slot.lock().take();
        match deliver {
            Some(deliver) => {
                deliver(value);
                true
            }
            None => false,
        }
    }
}
