use std::sync::Arc;
use std::time::Duration;

use amqp_wire::Message as WireMessage;

use crate::consumer::Consumer;

/// A read-only view over a queue's contents (spec §6's `createBrowser`,
/// never detailed in §4 — see `SPEC_FULL.md` §5). Backed by an ordinary
/// `Consumer` created with `no_consume` set, so browsing never removes
/// messages from the queue or accumulates an unacknowledged-delivery log;
/// `acknowledge` is deliberately not exposed here.
pub struct Browser {
    consumer: Arc<Consumer>,
}

impl Browser {
    pub(crate) fn new(consumer: Arc<Consumer>) -> Self {
        Browser { consumer }
    }

    pub fn tag(&self) -> &str {
        self.consumer.tag()
    }

    pub fn receive(&self, timeout: Option<Duration>) -> Option<WireMessage> {
        self.consumer.receive(timeout)
    }

    pub fn is_closed(&self) -> bool {
        self.consumer.is_closed()
    }

    pub fn close(&self) {
        self.consumer.close()
    }
}
