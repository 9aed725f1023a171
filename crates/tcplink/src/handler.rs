//! Replaceable receive-handler storage.

use std::sync::{Arc, RwLock};

/// Holds the current receive handler.
///
/// Read loops take a snapshot per delivery and call it without holding the lock,
/// so a handler can be swapped at any time, even from inside a handler.
pub(crate) struct HandlerSlot<H: ?Sized> {
    inner: Arc<RwLock<Option<Arc<H>>>>,
}

impl<H: ?Sized> HandlerSlot<H> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    pub(crate) fn set(&self, handler: Arc<H>) {
        *self.inner.write().expect("handler lock poisoned") = Some(handler);
    }

    pub(crate) fn get(&self) -> Option<Arc<H>> {
        self.inner.read().expect("handler lock poisoned").clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.inner.read().expect("handler lock poisoned").is_some()
    }
}

impl<H: ?Sized> Clone for HandlerSlot<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tcplink_traits::ClientHandler;

    #[test]
    fn test_replacing_handler_is_seen_by_clones() {
        let slot: HandlerSlot<dyn ClientHandler> = HandlerSlot::new();
        let loop_view = slot.clone();
        assert!(loop_view.get().is_none());

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        slot.set(Arc::new(move |_: Bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        loop_view.get().unwrap().on_receive(Bytes::new());

        let counter = second.clone();
        slot.set(Arc::new(move |_: Bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        loop_view.get().unwrap().on_receive(Bytes::new());

        assert!(slot.is_set());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
