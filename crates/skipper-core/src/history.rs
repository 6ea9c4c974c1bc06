use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::browser::TabInfo;
use crate::plan::PlanState;

/// Outcome of one issued action invocation, positionally aligned with the
/// plan's action sequence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub name: String,
    pub args: Map<String, Value>,
    pub success: bool,
    /// The handler's return value on success, or the error rendered as a
    /// JSON string on failure. `None` when the handler returned nothing.
    pub result: Option<Value>,
}

/// One transcript entry: the browser context after a step, the model's state
/// block, and the outcome of every issued invocation. Immutable once built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub tabs: Vec<TabInfo>,
    pub active_tab: Option<usize>,
    pub state: PlanState,
    pub actions: Vec<ExecutedAction>,
}

/// Eviction/summarization policy for the history log.
///
/// Invoked when a context-size or rate-limit condition is detected. An
/// implementation must evict or summarize the oldest records while
/// preserving the order of survivors.
pub trait CompactionPolicy: Send + Sync {
    fn compact(&self, records: &mut Vec<HistoryRecord>);
}

/// The default policy: keep everything. Disabling compaction must reproduce
/// unbounded-growth behavior exactly, so this does nothing at all.
pub struct NoCompaction;

impl CompactionPolicy for NoCompaction {
    fn compact(&self, _records: &mut Vec<HistoryRecord>) {}
}

/// Keep only the most recent `max` records, evicting the oldest first.
pub struct KeepRecent {
    pub max: usize,
}

impl CompactionPolicy for KeepRecent {
    fn compact(&self, records: &mut Vec<HistoryRecord>) {
        if records.len() > self.max {
            let excess = records.len() - self.max;
            records.drain(..excess);
        }
    }
}

/// Append-only sequence of step outcomes, replayed in full into every
/// subsequent prompt.
pub struct HistoryLog {
    records: Vec<HistoryRecord>,
    policy: Box<dyn CompactionPolicy>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::with_policy(Box::new(NoCompaction))
    }

    pub fn with_policy(policy: Box<dyn CompactionPolicy>) -> Self {
        Self {
            records: Vec::new(),
            policy,
        }
    }

    pub fn push(&mut self, record: HistoryRecord) {
        self.records.push(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&HistoryRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Apply the installed compaction policy.
    pub fn purge(&mut self) {
        self.policy.compact(&mut self.records);
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::GoalEvaluation;

    fn record(memory: &str) -> HistoryRecord {
        HistoryRecord {
            timestamp: Utc::now(),
            tabs: vec![TabInfo {
                url: "https://example.com".into(),
                title: "Example".into(),
            }],
            active_tab: Some(0),
            state: PlanState {
                previous_goal_evaluation: GoalEvaluation::Unknown,
                evaluation_reason: String::new(),
                memory: memory.into(),
                next_goal: String::new(),
            },
            actions: vec![],
        }
    }

    #[test]
    fn push_appends_in_order() {
        let mut log = HistoryLog::new();
        log.push(record("one"));
        log.push(record("two"));
        assert_eq!(log.len(), 2);
        let memories: Vec<_> = log.iter().map(|r| r.state.memory.as_str()).collect();
        assert_eq!(memories, ["one", "two"]);
        assert_eq!(log.last().unwrap().state.memory, "two");
    }

    #[test]
    fn purge_with_default_policy_keeps_everything() {
        let mut log = HistoryLog::new();
        for i in 0..10 {
            log.push(record(&i.to_string()));
        }
        log.purge();
        assert_eq!(log.len(), 10);
    }

    #[test]
    fn keep_recent_evicts_oldest_and_preserves_order() {
        let mut log = HistoryLog::with_policy(Box::new(KeepRecent { max: 3 }));
        for i in 0..6 {
            log.push(record(&i.to_string()));
        }
        log.purge();
        assert_eq!(log.len(), 3);
        let memories: Vec<_> = log.iter().map(|r| r.state.memory.as_str()).collect();
        assert_eq!(memories, ["3", "4", "5"]);
    }

    #[test]
    fn keep_recent_under_limit_is_untouched() {
        let mut log = HistoryLog::with_policy(Box::new(KeepRecent { max: 5 }));
        log.push(record("a"));
        log.purge();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn record_serde_roundtrip() {
        let mut rec = record("memo");
        rec.actions.push(ExecutedAction {
            name: "click".into(),
            args: serde_json::from_str(r##"{"selector": "#go"}"##).unwrap(),
            success: true,
            result: None,
        });
        let json = serde_json::to_string(&rec).unwrap();
        let parsed: HistoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.actions.len(), 1);
        assert_eq!(parsed.actions[0].name, "click");
        assert_eq!(parsed.active_tab, Some(0));
    }
}
