//! Topic provisioning.

use std::time::Duration;

use crate::{Result, TopicAdmin, dead_letter_topic};

/// Partition count for live and dead-letter topics.
pub const DEFAULT_PARTITIONS: i32 = 12;

/// Retention of live topics.
pub const LIVE_RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Retention of dead-letter topics, long enough for forensic replay.
pub const DEAD_LETTER_RETENTION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Definition of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub retention: Duration,
}

impl TopicSpec {
    /// A live topic with the default partition count and retention.
    pub fn live(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: DEFAULT_PARTITIONS,
            retention: LIVE_RETENTION,
        }
    }

    pub fn with_partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    /// The dead-letter twin: same partitions, longer retention.
    pub fn dead_letter(&self) -> Self {
        Self {
            name: dead_letter_topic(&self.name),
            partitions: self.partitions,
            retention: DEAD_LETTER_RETENTION,
        }
    }
}

/// Creates every topic in `specs` together with its dead-letter twin.
pub async fn provision_with_dead_letters(admin: &dyn TopicAdmin, specs: &[TopicSpec]) -> Result<()> {
    for spec in specs {
        admin.create_topic(spec).await?;
        admin.create_topic(&spec.dead_letter()).await?;
        tracing::info!(
            topic = %spec.name,
            partitions = spec.partitions,
            "Provisioned topic and dead-letter twin"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_twin_keeps_partitions() {
        let spec = TopicSpec::live("order.validated").with_partitions(4);
        let dlt = spec.dead_letter();
        assert_eq!(dlt.name, "order.validated.DLT");
        assert_eq!(dlt.partitions, 4);
        assert_eq!(dlt.retention, DEAD_LETTER_RETENTION);
        assert!(dlt.retention > spec.retention);
    }
}
