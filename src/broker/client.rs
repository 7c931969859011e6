use uuid::Uuid;

use crate::transport::EventSender;

/// A session connected to the loopback broker.
///
/// Each client is identified by a generated `id` and receives everything the
/// broker has for it on its event channel.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub events: EventSender,
}

impl Client {
    pub fn new(events: EventSender) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events,
        }
    }
}
