use std::collections::HashMap;

use parking_lot::Mutex;

/// Durable-subscriber name → (consumer tag, topic), kept as a single
/// bidirectional map so a rename or topic change can never leave the two
/// halves inconsistent under concurrent unsubscribe (spec C11).
#[derive(Default)]
pub struct SubscriptionCatalog {
    by_name: Mutex<HashMap<String, Subscription>>,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub consumer_tag: String,
    pub topic: String,
}

pub enum RegisterOutcome {
    /// No prior local subscription under this name.
    Fresh,
    /// Same name, same topic: the existing consumer can be reused as-is.
    SameTopic,
    /// Same name, different topic: the caller must tear down the old
    /// consumer before the new one takes its place.
    DifferentTopic { previous_consumer_tag: String },
}

impl SubscriptionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Subscription> {
        self.by_name.lock().get(name).cloned()
    }

    pub fn register(&self, name: &str, consumer_tag: String, topic: String) -> RegisterOutcome {
        let mut map = self.by_name.lock();
        match map.get(name) {
            Some(existing) if existing.topic == topic => RegisterOutcome::SameTopic,
            Some(existing) => {
                let previous_consumer_tag = existing.consumer_tag.clone();
                map.insert(name.to_owned(), Subscription { consumer_tag, topic });
                RegisterOutcome::DifferentTopic { previous_consumer_tag }
            }
            None => {
                map.insert(name.to_owned(), Subscription { consumer_tag, topic });
                RegisterOutcome::Fresh
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<Subscription> {
        self.by_name.lock().remove(name)
    }
}
