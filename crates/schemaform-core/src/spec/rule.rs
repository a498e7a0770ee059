use std::ops::Deref;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::expr::Expr;
use crate::spec::field::OptionItem;

/// Declarative condition plus the actions to run on either branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    pub id: String,
    pub when: Expr,
    pub then: Actions,
    #[serde(default, rename = "else", skip_serializing_if = "Actions::is_empty")]
    pub otherwise: Actions,
}

impl Rule {
    /// Field ids written by `SET_VALUE` on either branch.
    pub fn written_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        for action in self.then.iter().chain(self.otherwise.iter()) {
            if let Action::SetValue { target, .. } = action
                && !fields.contains(target)
            {
                fields.push(target.clone());
            }
        }
        fields
    }

    pub fn has_unknown_actions(&self) -> bool {
        self.then
            .iter()
            .chain(self.otherwise.iter())
            .any(|action| matches!(action, Action::Unknown))
    }
}

/// One action or a list; a single action normalizes to a one-element list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct Actions(pub Vec<Action>);

impl<'de> Deserialize<'de> for Actions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(Action),
            Many(Vec<Action>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(action) => Actions(vec![action]),
            OneOrMany::Many(actions) => Actions(actions),
        })
    }
}

impl Actions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for Actions {
    type Target = [Action];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Action>> for Actions {
    fn from(actions: Vec<Action>) -> Self {
        Actions(actions)
    }
}

/// Atomic mutation applied to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ShowField {
        target: String,
    },
    HideField {
        target: String,
    },
    ShowSection {
        target: String,
    },
    HideSection {
        target: String,
    },
    /// Enables a section and/or a field carrying this id.
    Enable {
        target: String,
    },
    /// Disables a section and/or a field carrying this id.
    Disable {
        target: String,
    },
    EnableField {
        target: String,
    },
    DisableField {
        target: String,
    },
    EnableSection {
        target: String,
    },
    DisableSection {
        target: String,
    },
    SetValue {
        target: String,
        #[serde(default)]
        value: Value,
    },
    SetOptions {
        target: String,
        #[serde(default)]
        options: Vec<OptionItem>,
    },
    SetError {
        target: String,
        #[serde(alias = "value")]
        message: String,
    },
    ClearError {
        target: String,
    },
    EnableOption {
        target: String,
        value: Value,
    },
    DisableOption {
        target: String,
        value: Value,
    },
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn target(&self) -> Option<&str> {
        match self {
            Action::ShowField { target }
            | Action::HideField { target }
            | Action::ShowSection { target }
            | Action::HideSection { target }
            | Action::Enable { target }
            | Action::Disable { target }
            | Action::EnableField { target }
            | Action::DisableField { target }
            | Action::EnableSection { target }
            | Action::DisableSection { target }
            | Action::SetValue { target, .. }
            | Action::SetOptions { target, .. }
            | Action::SetError { target, .. }
            | Action::ClearError { target }
            | Action::EnableOption { target, .. }
            | Action::DisableOption { target, .. } => Some(target),
            Action::Unknown => None,
        }
    }
}
