use std::collections::BTreeMap;

/// Count of published dominant emotions for one broker session.
///
/// Owned by the subscriber and cleared whenever its session goes down, so
/// nothing accumulates across reconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmotionTally {
    counts: BTreeMap<String, u64>,
}

impl EmotionTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one more dominant emotion of type `kind`, case-insensitively.
    pub fn record(&mut self, kind: &str) {
        *self.counts.entry(kind.to_lowercase()).or_insert(0) += 1;
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.counts
            .get(&kind.to_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn reset(&mut self) {
        self.counts.clear();
    }
}
