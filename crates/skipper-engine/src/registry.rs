use std::collections::HashMap;

use skipper_core::actions::{Action, ParamSpec};

/// Prompt-facing view of one registered action.
#[derive(Clone, Debug)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

/// Registry of invocable actions.
///
/// Insertion order is preserved — it is the order the catalog is rendered
/// into the prompt. Registering a name again replaces the action in its
/// original slot.
pub struct ActionRegistry {
    actions: Vec<Action>,
    index: HashMap<String, usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register an action, overwriting any earlier one with the same name.
    pub fn register(&mut self, action: Action) {
        if let Some(&slot) = self.index.get(&action.name) {
            self.actions[slot] = action;
        } else {
            self.index.insert(action.name.clone(), self.actions.len());
            self.actions.push(action);
        }
    }

    /// Look an action up by name. Absence is a lookup outcome, not an error.
    pub fn resolve(&self, name: &str) -> Option<&Action> {
        self.index.get(name).map(|&slot| &self.actions[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// The ordered catalog consumed by the message composer.
    pub fn describe(&self) -> Vec<ActionDescriptor> {
        self.actions
            .iter()
            .map(|a| ActionDescriptor {
                name: a.name.clone(),
                description: a.description.clone(),
                params: a.params.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(name: &str, description: &str) -> Action {
        Action::new(name, description, vec![], |_| Box::pin(async { Ok(None) }))
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = ActionRegistry::new();
        registry.register(action("navigate", "go somewhere"));

        assert!(registry.contains("navigate"));
        assert!(!registry.contains("click"));
        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("navigate").is_some());
        assert!(registry.resolve("click").is_none());
    }

    #[test]
    fn describe_preserves_insertion_order() {
        let mut registry = ActionRegistry::new();
        registry.register(action("zulu", ""));
        registry.register(action("alpha", ""));
        registry.register(action("mike", ""));

        let names: Vec<_> = registry.describe().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["zulu", "alpha", "mike"]);
    }

    #[test]
    fn reregistration_overwrites_in_place() {
        let mut registry = ActionRegistry::new();
        registry.register(action("first", "old"));
        registry.register(action("second", ""));
        registry.register(action("first", "new"));

        assert_eq!(registry.len(), 2);
        let catalog = registry.describe();
        assert_eq!(catalog[0].name, "first");
        assert_eq!(catalog[0].description, "new");
        assert_eq!(catalog[1].name, "second");
    }

    #[test]
    fn empty_registry() {
        let registry = ActionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.describe().is_empty());
    }
}
