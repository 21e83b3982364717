use chrono::{DateTime, Duration, Utc};

use crate::tier::NodeRecord;

/// Decides which of a node's traces to drop.
pub trait EvictionPolicy {
    /// Ids of the traces in `record` to evict.
    fn victims(&self, record: &NodeRecord, now: DateTime<Utc>) -> Vec<String>;
}

/// Keep at most `max` traces per node; the oldest `last_updated` go first.
///
/// The most recent trace always survives, even with `max == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxCount(pub usize);

impl EvictionPolicy for MaxCount {
    fn victims(&self, record: &NodeRecord, _now: DateTime<Utc>) -> Vec<String> {
        let keep = self.0.max(1);
        record
            .newest_first()
            .into_iter()
            .skip(keep)
            .map(|r| r.trace_group.id.clone())
            .collect()
    }
}

/// Drop traces whose last update is older than the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAge(pub Duration);

impl EvictionPolicy for MaxAge {
    fn victims(&self, record: &NodeRecord, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - self.0;
        record
            .traces
            .values()
            .filter(|r| r.last_updated < cutoff)
            .map(|r| r.trace_group.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::NodeMap;
    use chrono::TimeZone;
    use traceflow_types::{AgentId, TraceGroup};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn record(updates: &[(&str, i64)]) -> NodeRecord {
        let mut map = NodeMap::default();
        for (id, secs) in updates {
            let mut group = TraceGroup::new(*id, AgentId::Troubleshoot, "Troubleshoot", at(0));
            group.last_update_time = at(*secs);
            map.upsert("ts-agent", &group, None, true);
        }
        map.node("ts-agent").unwrap().clone()
    }

    #[test]
    fn test_max_count_drops_oldest() {
        let record = record(&[("a", 30), ("b", 10), ("c", 20)]);
        assert_eq!(MaxCount(2).victims(&record, at(40)), vec!["b"]);
        assert_eq!(MaxCount(0).victims(&record, at(40)).len(), 2);
        assert!(MaxCount(5).victims(&record, at(40)).is_empty());
    }

    #[test]
    fn test_max_age() {
        let record = record(&[("a", 0), ("b", 100)]);
        let policy = MaxAge(Duration::seconds(60));
        assert_eq!(policy.victims(&record, at(120)), vec!["a"]);
        assert!(policy.victims(&record, at(50)).is_empty());
    }
}
