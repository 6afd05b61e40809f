use serde::{Deserialize, Serialize};

/// The caller-supplied identity an import or export runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// ISO 4217 code adopted by accounts whose source carries no currency.
    pub default_currency: String,
}

impl User {
    pub fn new(id: i64, default_currency: &str) -> Self {
        User {
            id,
            default_currency: default_currency.to_string(),
        }
    }
}
