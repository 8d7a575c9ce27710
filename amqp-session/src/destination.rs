/// Point-to-point vs publish-subscribe addressing. The session core never
/// talks to an exchange or queue by name directly outside of
/// provisioning — every public operation takes a `Destination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Queue,
    Topic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub kind: DestinationKind,
    pub name: String,
    pub is_temporary: bool,
    /// Set when `name` is a placeholder and the broker must generate the
    /// real name (temporary queues, anonymous topic subscriptions).
    pub is_name_required: bool,
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Destination {
            kind: DestinationKind::Queue,
            name: name.into(),
            is_temporary: false,
            is_name_required: false,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Destination {
            kind: DestinationKind::Topic,
            name: name.into(),
            is_temporary: false,
            is_name_required: false,
        }
    }

    pub fn temporary_queue() -> Self {
        Destination {
            kind: DestinationKind::Queue,
            name: String::new(),
            is_temporary: true,
            is_name_required: true,
        }
    }

    pub fn temporary_topic() -> Self {
        Destination {
            kind: DestinationKind::Topic,
            name: String::new(),
            is_temporary: true,
            is_name_required: true,
        }
    }
}
