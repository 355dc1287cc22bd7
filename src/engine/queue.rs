//! Thread-safe priority queue of request contexts.

use crate::engine::context::RequestContext;
use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

/// User-supplied total order over the QoS type. Lower means more urgent.
pub(crate) type QosOrder<Q> = Arc<dyn Fn(&Q, &Q) -> Ordering + Send + Sync>;

/// Min-queue over `(qos, serial)`: most urgent QoS first, then oldest serial.
///
/// Multiple producers (admission, I/O completions, boundary callbacks) and
/// multiple consumers (workers). Dequeue blocks until an entry arrives; the
/// engine drains workers with poison entries rather than a timed poll.
pub(crate) struct PriorityQueue<Q> {
    heap: Mutex<BinaryHeap<Entry<Q>>>,
    ready: Condvar,
    order: QosOrder<Q>,
}

impl<Q: Send> PriorityQueue<Q> {
    pub(crate) fn new(order: QosOrder<Q>) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            ready: Condvar::new(),
            order,
        }
    }

    pub(crate) fn push(&self, ctx: Box<RequestContext<Q>>) {
        let mut heap = self.lock();
        heap.push(Entry {
            ctx,
            order: Arc::clone(&self.order),
        });
        drop(heap);
        self.ready.notify_one();
    }

    /// Removes and returns the most urgent entry, blocking until one exists.
    pub(crate) fn take(&self) -> Box<RequestContext<Q>> {
        let mut heap = self.lock();
        loop {
            if let Some(entry) = heap.pop() {
                return entry.ctx;
            }
            heap = self
                .ready
                .wait(heap)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Entry<Q>>> {
        self.heap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Entry<Q> {
    ctx: Box<RequestContext<Q>>,
    order: QosOrder<Q>,
}

impl<Q> Ord for Entry<Q> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops its maximum; reverse so the smallest (qos, serial)
        // pair surfaces first. Serials are unique, so the order is total.
        (self.order)(&self.ctx.qos, &other.ctx.qos)
            .then_with(|| self.ctx.serial.cmp(&other.ctx.serial))
            .reverse()
    }
}

impl<Q> PartialOrd for Entry<Q> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Q> PartialEq for Entry<Q> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<Q> Eq for Entry<Q> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    fn queue() -> PriorityQueue<u8> {
        PriorityQueue::new(Arc::new(u8::cmp))
    }

    fn entry(qos: u8, serial: u64) -> Box<RequestContext<u8>> {
        Box::new(RequestContext::poison(serial, qos))
    }

    #[test]
    fn orders_by_qos_then_serial() {
        let q = queue();
        q.push(entry(5, 1));
        q.push(entry(1, 4));
        q.push(entry(1, 2));
        q.push(entry(3, 3));

        let drained: Vec<(u8, u64)> = (0..4)
            .map(|_| {
                let ctx = q.take();
                (*ctx.qos(), ctx.serial())
            })
            .collect();

        assert_eq!(drained, [(1, 2), (1, 4), (3, 3), (5, 1)]);
    }

    #[test]
    fn same_qos_is_fifo_by_serial() {
        let q = queue();
        for serial in [9, 7, 8] {
            q.push(entry(2, serial));
        }

        let serials: Vec<u64> = (0..3).map(|_| q.take().serial()).collect();
        assert_eq!(serials, [7, 8, 9]);
    }

    #[test]
    fn respects_a_custom_order() {
        // Reversed comparison: numerically larger QoS is more urgent.
        let q: PriorityQueue<u8> = PriorityQueue::new(Arc::new(|a: &u8, b: &u8| b.cmp(a)));
        q.push(entry(1, 1));
        q.push(entry(9, 2));

        assert_eq!(*q.take().qos(), 9);
    }

    #[test]
    fn take_blocks_until_push() {
        let q = Arc::new(queue());
        let producer = Arc::clone(&q);

        let consumer = thread::spawn(move || q.take().serial());
        thread::sleep(Duration::from_millis(50));
        producer.push(entry(0, 77));

        assert_eq!(consumer.join().unwrap(), 77);
    }

    #[test]
    fn len_tracks_contents() {
        let q = queue();
        assert_eq!(q.len(), 0);
        q.push(entry(1, 1));
        q.push(entry(1, 2));
        assert_eq!(q.len(), 2);
        q.take();
        assert_eq!(q.len(), 1);
    }
}
