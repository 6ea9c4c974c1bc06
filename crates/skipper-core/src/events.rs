use serde::{Deserialize, Serialize};

/// Lifecycle and progress events emitted by the step engine over a broadcast
/// channel. Callers subscribe before `start()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "step_start")]
    StepStart { step: u32 },

    #[serde(rename = "action_start")]
    ActionStart { step: u32, index: usize, name: String },

    #[serde(rename = "action_end")]
    ActionEnd {
        step: u32,
        index: usize,
        name: String,
        success: bool,
    },

    /// Fires exactly once per run, whenever the loop exits, for any reason.
    #[serde(rename = "stopped")]
    Stopped,

    /// Fires exactly once per run, strictly after `Stopped`, only via the
    /// natural `start()`-loop exit path.
    #[serde(rename = "completed")]
    Completed,
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StepStart { .. } => "step_start",
            Self::ActionStart { .. } => "action_start",
            Self::ActionEnd { .. } => "action_end",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings() {
        assert_eq!(AgentEvent::Stopped.event_type(), "stopped");
        assert_eq!(AgentEvent::Completed.event_type(), "completed");
        assert_eq!(AgentEvent::StepStart { step: 1 }.event_type(), "step_start");
    }

    #[test]
    fn serde_roundtrip() {
        let events = vec![
            AgentEvent::StepStart { step: 3 },
            AgentEvent::ActionStart {
                step: 3,
                index: 0,
                name: "navigate".into(),
            },
            AgentEvent::ActionEnd {
                step: 3,
                index: 0,
                name: "navigate".into(),
                success: true,
            },
            AgentEvent::Stopped,
            AgentEvent::Completed,
        ];
        for evt in &events {
            let json = serde_json::to_string(evt).unwrap();
            let parsed: AgentEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed.event_type(), evt.event_type());
        }
    }

    #[test]
    fn tagged_representation() {
        let json = serde_json::to_value(AgentEvent::Stopped).unwrap();
        assert_eq!(json["type"], "stopped");
    }
}
