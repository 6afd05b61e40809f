use serde::{Deserialize, Serialize};
use std::fmt;

/// Each category type is an independent name namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Income,
    Expense,
    Transfer,
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryType::Income => write!(f, "income"),
            CategoryType::Expense => write!(f, "expense"),
            CategoryType::Transfer => write!(f, "transfer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub category_type: CategoryType,
    pub parent_id: Option<i64>,
}

impl Category {
    pub fn new(id: i64, user_id: i64, name: &str, category_type: CategoryType) -> Self {
        Category {
            id,
            user_id,
            name: name.to_string(),
            category_type,
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}
