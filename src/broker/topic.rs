use std::collections::HashSet;

pub type SubscriberId = String;

/// A topic subscription and the clients holding it.
///
/// `name` may contain wildcards: `*` matches exactly one level and `>` as the
/// last level matches one or more remaining levels.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<SubscriberId>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Adding an existing subscriber has no effect.
    pub fn subscribe(&mut self, id: SubscriberId) {
        self.subscribers.insert(id);
    }

    pub fn unsubscribe(&mut self, id: &SubscriberId) {
        self.subscribers.remove(id);
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.name, topic)
    }
}

/// Matches a published topic against a subscription pattern level by level.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some(">"), Some(_)) => return pattern_levels.next().is_none(),
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
