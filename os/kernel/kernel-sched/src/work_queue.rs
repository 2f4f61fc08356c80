use alloc::collections::VecDeque;
use kernel_sync::SpinMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkQueueError {
    #[error("work queue full ({0} items pending)")]
    Full(usize),
}

/// Bounded FIFO of deferred work with a single consumer.
///
/// Producers only ever append under a short spin lock and never wait for
/// the consumer. The consumer takes one item at a time and runs it with the
/// lock released.
pub struct WorkQueue<T> {
    items: SpinMutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: SpinMutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends `item`.
    ///
    /// # Errors
    /// [`WorkQueueError::Full`] if `capacity` items are already pending; the
    /// item is dropped.
    pub fn queue(&self, item: T) -> Result<(), WorkQueueError> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(WorkQueueError::Full(items.len()));
        }
        items.push_back(item);
        Ok(())
    }

    #[must_use]
    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.items.lock().len()
    }

    /// Runs `handler` on every pending item in submission order.
    ///
    /// Items queued while the handler runs are processed in the same call.
    /// Returns the number of items handled.
    pub fn process(&self, mut handler: impl FnMut(T)) -> usize {
        let mut handled = 0;
        while let Some(item) = self.pop() {
            handler(item);
            handled += 1;
        }
        handled
    }
}
