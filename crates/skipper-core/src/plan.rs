use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The model's verdict on whether its previous goal was achieved.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum GoalEvaluation {
    Success,
    Fail,
    Unknown,
}

/// The model's self-assessment block, carried verbatim into the transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanState {
    #[serde(rename = "previousGoalEvaluation")]
    pub previous_goal_evaluation: GoalEvaluation,
    #[serde(rename = "evaluationReason")]
    pub evaluation_reason: String,
    pub memory: String,
    #[serde(rename = "nextGoal")]
    pub next_goal: String,
}

/// One action the model asked for: a registry name plus named arguments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannedAction {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// The structured plan document produced by one completion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub state: PlanState,
    pub actions: Vec<PlannedAction>,
}

#[derive(Debug, thiserror::Error)]
#[error("plan did not parse as a single JSON object: {0}")]
pub struct PlanParseError(#[from] serde_json::Error);

impl Plan {
    /// Parse a completion into a plan.
    ///
    /// The response must be exactly one JSON object — markdown fencing or any
    /// trailing content is a parse failure, not something to repair.
    pub fn parse(text: &str) -> Result<Self, PlanParseError> {
        Ok(serde_json::from_str(text.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "state": {
            "previousGoalEvaluation": "Unknown",
            "evaluationReason": "first step",
            "memory": "",
            "nextGoal": "open the search page"
        },
        "actions": [
            {"name": "navigate", "args": {"url": "https://example.com"}},
            {"name": "done"}
        ]
    }"#;

    #[test]
    fn parses_valid_plan() {
        let plan = Plan::parse(VALID).unwrap();
        assert_eq!(plan.state.previous_goal_evaluation, GoalEvaluation::Unknown);
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].name, "navigate");
        assert_eq!(
            plan.actions[0].args.get("url").and_then(Value::as_str),
            Some("https://example.com")
        );
    }

    #[test]
    fn missing_args_defaults_to_empty_map() {
        let plan = Plan::parse(VALID).unwrap();
        assert!(plan.actions[1].args.is_empty());
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let wrapped = format!("\n  {VALID}\n\n");
        assert!(Plan::parse(&wrapped).is_ok());
    }

    #[test]
    fn markdown_fencing_is_a_parse_failure() {
        let fenced = format!("```json\n{VALID}\n```");
        assert!(Plan::parse(&fenced).is_err());
    }

    #[test]
    fn trailing_content_is_a_parse_failure() {
        let trailing = format!("{VALID} and here is why I chose that");
        assert!(Plan::parse(&trailing).is_err());
    }

    #[test]
    fn missing_state_is_a_parse_failure() {
        assert!(Plan::parse(r#"{"actions": []}"#).is_err());
    }

    #[test]
    fn unknown_evaluation_variant_is_a_parse_failure() {
        let bad = VALID.replace("Unknown", "Maybe");
        assert!(Plan::parse(&bad).is_err());
    }

    #[test]
    fn goal_evaluation_serializes_as_bare_variant() {
        assert_eq!(
            serde_json::to_string(&GoalEvaluation::Success).unwrap(),
            r#""Success""#
        );
        assert_eq!(
            serde_json::to_string(&GoalEvaluation::Fail).unwrap(),
            r#""Fail""#
        );
    }

    #[test]
    fn plan_roundtrip() {
        let plan = Plan::parse(VALID).unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        let again = Plan::parse(&json).unwrap();
        assert_eq!(again.actions.len(), plan.actions.len());
        assert_eq!(again.state.next_goal, plan.state.next_goal);
    }
}
