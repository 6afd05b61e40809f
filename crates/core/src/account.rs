use serde::{Deserialize, Serialize};

/// A user's account, unique per `(user_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub currency: String,
}

impl Account {
    pub fn new(id: i64, user_id: i64, name: &str, currency: &str) -> Self {
        Account {
            id,
            user_id,
            name: name.to_string(),
            currency: currency.to_string(),
        }
    }
}
