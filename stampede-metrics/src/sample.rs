use std::sync::Arc;
use std::time::SystemTime;

use crate::tags::TagSet;

/// A single observation submitted to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Arc<str>,
    pub value: f64,
    pub tags: TagSet,
    pub timestamp: SystemTime,
}

impl Sample {
    pub fn new(metric: impl Into<Arc<str>>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            tags: TagSet::default(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags = self.tags.with(key, value);
        self
    }
}
