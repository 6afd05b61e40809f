use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

impl Tag {
    pub fn new(id: i64, user_id: i64, name: &str) -> Self {
        Tag {
            id,
            user_id,
            name: name.to_string(),
        }
    }
}
