//! Window key generation.

/// A key that uniquely identifies one counting window.
///
/// The key pairs the limited action with the client identifier, so the
/// same client has an independent budget per action. The pair is hashed
/// as two fields, so `("a:b", "c")` and `("a", "b:c")` never collide even
/// though they render to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The action being limited (e.g. `login`)
    pub action: String,
    /// The client identifier (usually an IP address)
    pub identifier: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(action: &str, identifier: &str) -> Self {
        Self {
            action: action.to_string(),
            identifier: identifier.to_string(),
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.action, self.identifier)
    }
}
