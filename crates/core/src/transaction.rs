use serde::{Deserialize, Serialize};
use std::fmt;

use super::category::CategoryType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    ModifyBalance,
    Income,
    #[default]
    Expense,
    TransferOut,
    TransferIn,
}

impl TransactionType {
    /// The name shown to users and written to delimited exports.
    pub fn display_name(self) -> &'static str {
        match self {
            TransactionType::ModifyBalance => "Balance Modification",
            TransactionType::Income => "Income",
            TransactionType::Expense => "Expense",
            TransactionType::TransferOut | TransactionType::TransferIn => "Transfer",
        }
    }

    /// The category namespace a transaction of this type draws from.
    /// Balance modifications are never categorized.
    pub fn category_type(self) -> Option<CategoryType> {
        match self {
            TransactionType::ModifyBalance => None,
            TransactionType::Income => Some(CategoryType::Income),
            TransactionType::Expense => Some(CategoryType::Expense),
            TransactionType::TransferOut | TransactionType::TransferIn => Some(CategoryType::Transfer),
        }
    }

    pub fn is_transfer(self) -> bool {
        matches!(self, TransactionType::TransferOut | TransactionType::TransferIn)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The canonical transaction every source format resolves to.
///
/// `amount` and `related_account_amount` are minor units (two implied decimal
/// digits). The related account fields are only populated for
/// [`TransactionType::TransferOut`]. A location of `(0, 0)` means no location.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub transaction_type: TransactionType,
    /// Unix time in milliseconds.
    pub transaction_time: i64,
    pub timezone_offset_minutes: i32,
    pub category_id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub related_account_id: i64,
    pub related_account_amount: i64,
    pub comment: String,
    pub geo_longitude: f64,
    pub geo_latitude: f64,
}

impl Transaction {
    pub fn has_geo_location(&self) -> bool {
        self.geo_longitude != 0.0 || self.geo_latitude != 0.0
    }
}
