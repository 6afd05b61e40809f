//! The uniform row contract every source format is adapted to.

use tallyport_core::User;

use crate::error::ImportError;

/// Canonical columns a source format can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    TransactionTime,
    TransactionTimezone,
    TransactionType,
    Category,
    SubCategory,
    AccountName,
    AccountCurrency,
    Amount,
    RelatedAccountName,
    RelatedAccountCurrency,
    RelatedAmount,
    GeographicLocation,
    Tags,
    Description,
}

impl Column {
    /// Export column order.
    pub const ALL: [Column; 14] = [
        Column::TransactionTime,
        Column::TransactionTimezone,
        Column::TransactionType,
        Column::Category,
        Column::SubCategory,
        Column::AccountName,
        Column::AccountCurrency,
        Column::Amount,
        Column::RelatedAccountName,
        Column::RelatedAccountCurrency,
        Column::RelatedAmount,
        Column::GeographicLocation,
        Column::Tags,
        Column::Description,
    ];

    /// Header text used by the self-describing delimited format.
    pub fn header_name(self) -> &'static str {
        match self {
            Column::TransactionTime => "Time",
            Column::TransactionTimezone => "Timezone",
            Column::TransactionType => "Type",
            Column::Category => "Category",
            Column::SubCategory => "Sub Category",
            Column::AccountName => "Account",
            Column::AccountCurrency => "Account Currency",
            Column::Amount => "Amount",
            Column::RelatedAccountName => "Account2",
            Column::RelatedAccountCurrency => "Account2 Currency",
            Column::RelatedAmount => "Account2 Amount",
            Column::GeographicLocation => "Geographic Location",
            Column::Tags => "Tags",
            Column::Description => "Description",
        }
    }

    pub fn from_header_name(name: &str) -> Option<Column> {
        Column::ALL.into_iter().find(|c| c.header_name() == name)
    }
}

/// One source row, already canonicalized: times are `YYYY-MM-DD HH:MM:SS`,
/// timezones `±HH:MM`, amounts plain decimals. `None` means the source has
/// nothing for that column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRow {
    pub time: Option<String>,
    pub timezone: Option<String>,
    pub transaction_type: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub account_name: Option<String>,
    pub account_currency: Option<String>,
    pub amount: Option<String>,
    pub related_account_name: Option<String>,
    pub related_account_currency: Option<String>,
    pub related_amount: Option<String>,
    pub geo_location: Option<String>,
    pub tags: Option<String>,
    pub description: Option<String>,
    invalid: bool,
}

impl TransactionRow {
    /// A row the importer must skip, e.g. a short CSV line or a pending bank entry.
    pub fn invalid() -> Self {
        TransactionRow {
            invalid: true,
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.invalid
    }

    /// The column's text, or `""` when absent.
    pub fn get(&self, column: Column) -> &str {
        self.field(column).as_deref().unwrap_or("")
    }

    pub fn set(&mut self, column: Column, value: impl Into<String>) {
        *self.field_mut(column) = Some(value.into());
    }

    fn field(&self, column: Column) -> &Option<String> {
        match column {
            Column::TransactionTime => &self.time,
            Column::TransactionTimezone => &self.timezone,
            Column::TransactionType => &self.transaction_type,
            Column::Category => &self.category,
            Column::SubCategory => &self.sub_category,
            Column::AccountName => &self.account_name,
            Column::AccountCurrency => &self.account_currency,
            Column::Amount => &self.amount,
            Column::RelatedAccountName => &self.related_account_name,
            Column::RelatedAccountCurrency => &self.related_account_currency,
            Column::RelatedAmount => &self.related_amount,
            Column::GeographicLocation => &self.geo_location,
            Column::Tags => &self.tags,
            Column::Description => &self.description,
        }
    }

    fn field_mut(&mut self, column: Column) -> &mut Option<String> {
        match column {
            Column::TransactionTime => &mut self.time,
            Column::TransactionTimezone => &mut self.timezone,
            Column::TransactionType => &mut self.transaction_type,
            Column::Category => &mut self.category,
            Column::SubCategory => &mut self.sub_category,
            Column::AccountName => &mut self.account_name,
            Column::AccountCurrency => &mut self.account_currency,
            Column::Amount => &mut self.amount,
            Column::RelatedAccountName => &mut self.related_account_name,
            Column::RelatedAccountCurrency => &mut self.related_account_currency,
            Column::RelatedAmount => &mut self.related_amount,
            Column::GeographicLocation => &mut self.geo_location,
            Column::Tags => &mut self.tags,
            Column::Description => &mut self.description,
        }
    }
}

/// A parsed source file seen as a sequence of canonical rows.
pub trait TransactionDataTable {
    /// Whether this format can ever populate `column`.
    fn has_column(&self, column: Column) -> bool;

    fn transaction_row_count(&self) -> usize;

    fn transaction_row_iterator(&self) -> Box<dyn TransactionRowIterator + '_>;
}

pub trait TransactionRowIterator {
    fn has_next(&self) -> bool;

    /// `Ok(None)` is a source row that carries no transaction and is skipped.
    fn next_row(&mut self, user: &User) -> Result<Option<TransactionRow>, ImportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_round_trip() {
        for column in Column::ALL {
            assert_eq!(Column::from_header_name(column.header_name()), Some(column));
        }
        assert_eq!(Column::from_header_name("Payee"), None);
    }

    #[test]
    fn get_defaults_to_empty() {
        let mut row = TransactionRow::default();
        assert_eq!(row.get(Column::Amount), "");
        row.set(Column::Amount, "1.00");
        assert_eq!(row.get(Column::Amount), "1.00");
        assert_eq!(row.amount.as_deref(), Some("1.00"));
    }

    #[test]
    fn invalid_rows_report_it() {
        assert!(TransactionRow::default().is_valid());
        assert!(!TransactionRow::invalid().is_valid());
    }

    #[test]
    fn rows_filled_column_by_column_stay_valid() {
        let mut row = TransactionRow::default();
        for column in Column::ALL {
            row.set(column, column.header_name());
        }
        assert!(row.is_valid());
        assert_eq!(row.get(Column::Description), Column::Description.header_name());
    }
}
