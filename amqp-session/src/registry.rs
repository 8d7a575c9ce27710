use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::consumer::Consumer;
use crate::producer::Producer;

/// Live consumers keyed by consumer tag, plus a destination → live-count
/// map so `Session::is_destination_in_use` (spec C5) doesn't have to walk
/// every consumer. Creation order is tracked separately so fail-over can
/// resubscribe in the order consumers were originally created.
#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: Mutex<HashMap<String, Arc<Consumer>>>,
    order: Mutex<Vec<String>>,
    counts: Mutex<HashMap<String, usize>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: String, consumer: Arc<Consumer>) {
        {
            let mut counts = self.counts.lock();
            *counts.entry(consumer.destination().name.clone()).or_insert(0) += 1;
        }
        self.order.lock().push(tag.clone());
        self.consumers.lock().insert(tag, consumer);
    }

    pub fn deregister(&self, tag: &str) -> Option<Arc<Consumer>> {
        let removed = self.consumers.lock().remove(tag);
        if let Some(ref consumer) = removed {
            let mut counts = self.counts.lock();
            if let Some(count) = counts.get_mut(&consumer.destination().name) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(&consumer.destination().name);
                }
            }
        }
        self.order.lock().retain(|t| t != tag);
        removed
    }

    pub fn get(&self, tag: &str) -> Option<Arc<Consumer>> {
        self.consumers.lock().get(tag).cloned()
    }

    pub fn has_consumer_for(&self, destination_name: &str) -> bool {
        self.counts.lock().get(destination_name).copied().unwrap_or(0) > 0
    }

    pub fn len(&self) -> usize {
        self.consumers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live consumer, oldest-created first.
    pub fn snapshot_in_order(&self) -> Vec<Arc<Consumer>> {
        let consumers = self.consumers.lock();
        self.order
            .lock()
            .iter()
            .filter_map(|tag| consumers.get(tag).cloned())
            .collect()
    }

    pub fn clear(&self) {
        self.consumers.lock().clear();
        self.order.lock().clear();
        self.counts.lock().clear();
    }
}

/// Live producers keyed by id, in creation order (spec C4).
#[derive(Default)]
pub struct ProducerRegistry {
    producers: Mutex<HashMap<u64, Arc<Producer>>>,
    order: Mutex<Vec<u64>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, producer: Arc<Producer>) {
        self.order.lock().push(producer.id());
        self.producers.lock().insert(producer.id(), producer);
    }

    pub fn deregister(&self, id: u64) -> Option<Arc<Producer>> {
        self.order.lock().retain(|existing| *existing != id);
        self.producers.lock().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Producer>> {
        self.producers.lock().get(&id).cloned()
    }

    pub fn snapshot_in_order(&self) -> Vec<Arc<Producer>> {
        let producers = self.producers.lock();
        self.order.lock().iter().filter_map(|id| producers.get(id).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.producers.lock().len()
    }
}
