//! Per-action rate limit policies.
//!
//! Each guarded action has a quota and a window length. The built-in table
//! covers the authentication and checkout flows; any entry can be
//! overridden or extended from YAML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{GatekeeperError, Result};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

/// The actions guarded out of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Login,
    Signup,
    ForgotPassword,
    ResetPassword,
    VerifyEmail,
    Checkout,
}

impl Action {
    /// Every built-in action.
    pub const ALL: [Action; 6] = [
        Action::Login,
        Action::Signup,
        Action::ForgotPassword,
        Action::ResetPassword,
        Action::VerifyEmail,
        Action::Checkout,
    ];

    /// The action name used in window keys and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Login => "login",
            Action::Signup => "signup",
            Action::ForgotPassword => "forgot_password",
            Action::ResetPassword => "reset_password",
            Action::VerifyEmail => "verify_email",
            Action::Checkout => "checkout",
        }
    }

    /// The built-in policy for this action.
    pub fn default_policy(&self) -> ActionPolicy {
        match self {
            Action::Login => ActionPolicy::new(5, 15 * MINUTE_MS),
            Action::Signup => ActionPolicy::new(3, HOUR_MS),
            Action::ForgotPassword => ActionPolicy::new(3, HOUR_MS),
            Action::ResetPassword => ActionPolicy::new(5, HOUR_MS),
            Action::VerifyEmail => ActionPolicy::new(5, HOUR_MS),
            Action::Checkout => ActionPolicy::new(3, HOUR_MS),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota and window length for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionPolicy {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: i64,
}

impl ActionPolicy {
    pub fn new(max_requests: u32, window_ms: i64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }
}

/// A table of policies keyed by action name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySet {
    /// Map of action name to its policy
    #[serde(default)]
    pub actions: BTreeMap<String, ActionPolicy>,
}

impl Default for PolicySet {
    fn default() -> Self {
        let actions = Action::ALL
            .iter()
            .map(|action| (action.as_str().to_string(), action.default_policy()))
            .collect();
        Self { actions }
    }
}

impl PolicySet {
    /// Create a table with no policies at all.
    pub fn empty() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// Parse policies from YAML, layered over the built-in table.
    ///
    /// Accepts either a bare map of action name to policy or a document
    /// with a top-level `actions` map.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let overrides = match serde_yaml::from_str::<BTreeMap<String, ActionPolicy>>(yaml) {
            Ok(actions) => actions,
            Err(_) => serde_yaml::from_str::<PolicySet>(yaml)
                .map_err(|e| {
                    GatekeeperError::Config(format!("Failed to parse rate limit policies: {}", e))
                })?
                .actions,
        };

        let mut policies = PolicySet::default();
        policies.actions.extend(overrides);
        Ok(policies)
    }

    /// Get the policy for an action.
    pub fn get(&self, action: &str) -> Option<&ActionPolicy> {
        self.actions.get(action)
    }

    /// Add or replace the policy for an action.
    pub fn insert(&mut self, action: &str, policy: ActionPolicy) {
        self.actions.insert(action.to_string(), policy);
    }

    /// Render the table as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| GatekeeperError::Config(e.to_string()))
    }
}
