use std::collections::HashMap;

use tallyport_core::datetime::{parse_long_date_time, parse_timezone_offset};
use tallyport_core::{
    currency, parse_amount, Account, Category, CategoryType, Tag, Transaction, TransactionType, User,
};
use tracing::{debug, warn};

use crate::datatable::{Column, TransactionDataTable, TransactionRow};
use crate::error::ImportError;
use crate::ordering::sort_import_transactions;

/// Entities the caller already has, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ExistingEntities {
    pub accounts: HashMap<String, Account>,
    pub expense_categories: HashMap<String, Category>,
    pub income_categories: HashMap<String, Category>,
    pub transfer_categories: HashMap<String, Category>,
    pub tags: HashMap<String, Tag>,
}

/// A resolved transaction plus the source names it was resolved from.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportTransaction {
    pub transaction: Transaction,
    pub tag_ids: Vec<i64>,
    pub original_source_account_name: String,
    pub original_source_account_currency: String,
    pub original_destination_account_name: String,
    pub original_destination_account_currency: String,
    pub original_category_name: String,
    pub original_tag_names: Vec<String>,
}

/// Everything one import produced. New entities carry provisional negative
/// ids and are listed in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ImportedData {
    pub transactions: Vec<ImportTransaction>,
    pub new_accounts: Vec<Account>,
    pub new_expense_categories: Vec<Category>,
    pub new_income_categories: Vec<Category>,
    pub new_transfer_categories: Vec<Category>,
    pub new_tags: Vec<Tag>,
}

/// A source format able to turn a buffered file into canonical transactions.
pub trait TransactionDataImporter {
    fn parse_imported_data(
        &self,
        user: &User,
        data: &[u8],
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError>;
}

/// Maps the canonical display names. `Transfer` always imports as the outgoing half.
pub fn default_type_mapping() -> HashMap<String, TransactionType> {
    [
        TransactionType::ModifyBalance,
        TransactionType::Income,
        TransactionType::Expense,
        TransactionType::TransferOut,
    ]
    .into_iter()
    .map(|t| (t.display_name().to_string(), t))
    .collect()
}

/// Format-agnostic driver: walks any [`TransactionDataTable`], validates each
/// row and resolves names into deduplicated entities.
pub struct DataTableImporter {
    type_mapping: HashMap<String, TransactionType>,
    geo_separator: String,
    tag_separator: String,
}

impl DataTableImporter {
    pub fn new(type_mapping: HashMap<String, TransactionType>, geo_separator: &str, tag_separator: &str) -> Self {
        Self {
            type_mapping,
            geo_separator: geo_separator.to_string(),
            tag_separator: tag_separator.to_string(),
        }
    }

    pub fn parse(
        &self,
        user: &User,
        table: &dyn TransactionDataTable,
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError> {
        let row_count = table.transaction_row_count();
        if row_count == 0 {
            return Err(ImportError::TransactionDataNotFound);
        }

        debug!(user_id = user.id, row_count, "Importing transaction rows");

        let mut state = ImportState::new(user, existing);
        let mut transactions = Vec::with_capacity(row_count);
        let mut rows = table.transaction_row_iterator();

        while rows.has_next() {
            let Some(row) = rows.next_row(user)? else {
                debug!("Skipping source row without transaction data");
                continue;
            };

            if !row.is_valid() {
                warn!("Skipping invalid transaction row");
                continue;
            }

            transactions.push(self.convert_row(&row, table, default_timezone_offset, &mut state)?);
        }

        if transactions.is_empty() {
            return Err(ImportError::TransactionDataNotFound);
        }

        sort_import_transactions(&mut transactions);

        let data = state.finish(transactions);
        debug!(
            transactions = data.transactions.len(),
            new_accounts = data.new_accounts.len(),
            new_expense_categories = data.new_expense_categories.len(),
            new_income_categories = data.new_income_categories.len(),
            new_transfer_categories = data.new_transfer_categories.len(),
            new_tags = data.new_tags.len(),
            "Imported transactions"
        );

        Ok(data)
    }

    fn convert_row(
        &self,
        row: &TransactionRow,
        table: &dyn TransactionDataTable,
        default_timezone_offset: i32,
        state: &mut ImportState<'_>,
    ) -> Result<ImportTransaction, ImportError> {
        let timezone_text = field(row, Column::TransactionTimezone);
        let timezone_offset = if table.has_column(Column::TransactionTimezone) && !timezone_text.is_empty() {
            parse_timezone_offset(timezone_text)
                .map_err(|_| ImportError::TransactionTimezoneInvalid(timezone_text.to_string()))?
        } else {
            default_timezone_offset
        };

        let time_text = field(row, Column::TransactionTime);
        if time_text.is_empty() {
            return Err(ImportError::TransactionTimeMissing);
        }
        let transaction_time = parse_long_date_time(time_text, timezone_offset)
            .map_err(|_| ImportError::TransactionTimeInvalid(time_text.to_string()))?;

        let type_text = field(row, Column::TransactionType);
        let transaction_type = *self
            .type_mapping
            .get(type_text)
            .ok_or_else(|| ImportError::TransactionTypeInvalid(type_text.to_string()))?;

        let mut category_id = 0;
        let mut original_category_name = String::new();

        if let Some(category_type) = transaction_type.category_type() {
            let sub_category = field(row, Column::SubCategory);
            let category = field(row, Column::Category);
            let (parent_name, name) = if sub_category.is_empty() {
                ("", category)
            } else {
                (category, sub_category)
            };

            if !name.is_empty() {
                category_id = state.resolve_category(category_type, parent_name, name);
                original_category_name = name.to_string();
            }
        }

        let account = state.resolve_account(
            field(row, Column::AccountName),
            field(row, Column::AccountCurrency),
        )?;
        let amount = parse_row_amount(field(row, Column::Amount))?;

        let mut transaction = Transaction {
            user_id: state.user.id,
            transaction_type,
            transaction_time,
            timezone_offset_minutes: timezone_offset,
            category_id,
            account_id: account.id,
            amount,
            ..Default::default()
        };

        let mut original_destination_account_name = String::new();
        let mut original_destination_account_currency = String::new();

        if transaction_type == TransactionType::TransferOut {
            let related = state.resolve_account(
                field(row, Column::RelatedAccountName),
                field(row, Column::RelatedAccountCurrency),
            )?;
            transaction.related_account_id = related.id;
            transaction.related_account_amount = parse_row_amount(field(row, Column::RelatedAmount))?;
            original_destination_account_name = related.name;
            original_destination_account_currency = related.currency;
        }

        if table.has_column(Column::GeographicLocation) {
            if let Some((longitude, latitude)) = self.parse_geo_location(field(row, Column::GeographicLocation)) {
                transaction.geo_longitude = longitude;
                transaction.geo_latitude = latitude;
            }
        }

        let (tag_ids, original_tag_names) = if table.has_column(Column::Tags) {
            state.resolve_tags(field(row, Column::Tags), &self.tag_separator)
        } else {
            (Vec::new(), Vec::new())
        };

        if table.has_column(Column::Description) {
            transaction.comment = field(row, Column::Description).to_string();
        }

        Ok(ImportTransaction {
            transaction,
            tag_ids,
            original_source_account_name: account.name,
            original_source_account_currency: account.currency,
            original_destination_account_name,
            original_destination_account_currency,
            original_category_name,
            original_tag_names,
        })
    }

    fn parse_geo_location(&self, text: &str) -> Option<(f64, f64)> {
        if text.is_empty() {
            return None;
        }

        let parsed = text.split_once(self.geo_separator.as_str()).and_then(|(lon, lat)| {
            let longitude: f64 = lon.trim().parse().ok()?;
            let latitude: f64 = lat.trim().parse().ok()?;
            Some((longitude, latitude))
        });

        if parsed.is_none() {
            warn!(geo_location = text, "Dropping unparsable geographic location");
        }

        parsed
    }
}

fn field(row: &TransactionRow, column: Column) -> &str {
    row.get(column).trim()
}

fn parse_row_amount(text: &str) -> Result<i64, ImportError> {
    parse_amount(text).map_err(|_| ImportError::AmountInvalid(text.to_string()))
}

/// Hands out provisional ids `-1, -2, ...` for entities created during an import.
#[derive(Default)]
struct ProvisionalIds(i64);

impl ProvisionalIds {
    fn allocate(&mut self) -> i64 {
        self.0 -= 1;
        self.0
    }
}

/// A name-keyed lookup that remembers which entries it created.
struct DedupMap<T> {
    entries: HashMap<String, T>,
    created: Vec<T>,
}

impl<T: Clone> DedupMap<T> {
    fn new(existing: &HashMap<String, T>) -> Self {
        Self {
            entries: existing.clone(),
            created: Vec::new(),
        }
    }

    fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    fn insert(&mut self, name: &str, entity: T) {
        self.created.push(entity.clone());
        self.entries.insert(name.to_string(), entity);
    }
}

struct ImportState<'a> {
    user: &'a User,
    accounts: DedupMap<Account>,
    expense_categories: DedupMap<Category>,
    income_categories: DedupMap<Category>,
    transfer_categories: DedupMap<Category>,
    tags: DedupMap<Tag>,
    account_ids: ProvisionalIds,
    category_ids: ProvisionalIds,
    tag_ids: ProvisionalIds,
}

impl<'a> ImportState<'a> {
    fn new(user: &'a User, existing: &ExistingEntities) -> Self {
        Self {
            user,
            accounts: DedupMap::new(&existing.accounts),
            expense_categories: DedupMap::new(&existing.expense_categories),
            income_categories: DedupMap::new(&existing.income_categories),
            transfer_categories: DedupMap::new(&existing.transfer_categories),
            tags: DedupMap::new(&existing.tags),
            account_ids: ProvisionalIds::default(),
            category_ids: ProvisionalIds::default(),
            tag_ids: ProvisionalIds::default(),
        }
    }

    /// Currency precedence: the row's own currency, then the known account's,
    /// then the user's default.
    fn resolve_account(&mut self, name: &str, currency: &str) -> Result<Account, ImportError> {
        if name.is_empty() {
            return Err(ImportError::AccountNameMissing);
        }

        if let Some(account) = self.accounts.get(name) {
            if !currency.is_empty() && currency != account.currency {
                return Err(ImportError::AccountCurrencyInvalid {
                    account: name.to_string(),
                    currency: currency.to_string(),
                });
            }
            return Ok(account.clone());
        }

        let currency = if currency.is_empty() {
            self.user.default_currency.as_str()
        } else {
            currency
        };

        if !currency::is_supported(currency) {
            return Err(ImportError::AccountCurrencyInvalid {
                account: name.to_string(),
                currency: currency.to_string(),
            });
        }

        let account = Account::new(self.account_ids.allocate(), self.user.id, name, currency);
        self.accounts.insert(name, account.clone());
        Ok(account)
    }

    fn resolve_category(&mut self, category_type: CategoryType, parent_name: &str, name: &str) -> i64 {
        let user_id = self.user.id;
        let ids = &mut self.category_ids;
        let categories = match category_type {
            CategoryType::Expense => &mut self.expense_categories,
            CategoryType::Income => &mut self.income_categories,
            CategoryType::Transfer => &mut self.transfer_categories,
        };

        if let Some(category) = categories.get(name) {
            return category.id;
        }

        let parent_id = if parent_name.is_empty() || parent_name == name {
            None
        } else if let Some(parent) = categories.get(parent_name) {
            Some(parent.id)
        } else {
            let parent = Category::new(ids.allocate(), user_id, parent_name, category_type);
            let parent_id = parent.id;
            categories.insert(parent_name, parent);
            Some(parent_id)
        };

        let mut category = Category::new(ids.allocate(), user_id, name, category_type);
        category.parent_id = parent_id;
        let id = category.id;
        categories.insert(name, category);
        id
    }

    fn resolve_tags(&mut self, text: &str, separator: &str) -> (Vec<i64>, Vec<String>) {
        let mut ids = Vec::new();
        let mut names = Vec::new();

        if text.is_empty() || separator.is_empty() {
            return (ids, names);
        }

        for name in text.split(separator).map(str::trim).filter(|n| !n.is_empty()) {
            let id = match self.tags.get(name) {
                Some(tag) => tag.id,
                None => {
                    let tag = Tag::new(self.tag_ids.allocate(), self.user.id, name);
                    let id = tag.id;
                    self.tags.insert(name, tag);
                    id
                }
            };

            if !ids.contains(&id) {
                ids.push(id);
                names.push(name.to_string());
            }
        }

        (ids, names)
    }

    fn finish(self, transactions: Vec<ImportTransaction>) -> ImportedData {
        ImportedData {
            transactions,
            new_accounts: self.accounts.created,
            new_expense_categories: self.expense_categories.created,
            new_income_categories: self.income_categories.created,
            new_transfer_categories: self.transfer_categories.created,
            new_tags: self.tags.created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatable::TransactionRowIterator;
    use std::collections::HashSet;

    /// In-memory table over pre-built rows.
    struct RowTable {
        columns: HashSet<Column>,
        rows: Vec<Option<TransactionRow>>,
    }

    struct RowIter<'a> {
        rows: &'a [Option<TransactionRow>],
        index: usize,
    }

    impl TransactionDataTable for RowTable {
        fn has_column(&self, column: Column) -> bool {
            self.columns.contains(&column)
        }

        fn transaction_row_count(&self) -> usize {
            self.rows.len()
        }

        fn transaction_row_iterator(&self) -> Box<dyn TransactionRowIterator + '_> {
            Box::new(RowIter {
                rows: &self.rows,
                index: 0,
            })
        }
    }

    impl TransactionRowIterator for RowIter<'_> {
        fn has_next(&self) -> bool {
            self.index < self.rows.len()
        }

        fn next_row(&mut self, _user: &User) -> Result<Option<TransactionRow>, ImportError> {
            let row = self.rows[self.index].clone();
            self.index += 1;
            Ok(row)
        }
    }

    fn table(rows: Vec<Option<TransactionRow>>) -> RowTable {
        RowTable {
            columns: Column::ALL.into_iter().collect(),
            rows,
        }
    }

    fn row(time: &str, kind: &str, category: &str, account: &str, amount: &str) -> TransactionRow {
        let mut row = TransactionRow::default();
        row.set(Column::TransactionTime, time);
        row.set(Column::TransactionType, kind);
        row.set(Column::SubCategory, category);
        row.set(Column::AccountName, account);
        row.set(Column::Amount, amount);
        row
    }

    fn importer() -> DataTableImporter {
        DataTableImporter::new(default_type_mapping(), " ", ";")
    }

    fn user() -> User {
        User::new(7, "USD")
    }

    fn run(rows: Vec<Option<TransactionRow>>) -> Result<ImportedData, ImportError> {
        importer().parse(&user(), &table(rows), 0, &ExistingEntities::default())
    }

    #[test]
    fn same_names_resolve_to_one_entity() {
        let mut rows = Vec::new();
        for i in 0..3 {
            let mut r = row(&format!("2024-09-0{} 10:00:00", i + 1), "Expense", "Food", "Wallet", "1.00");
            r.tags = Some("trip;work".to_string());
            rows.push(Some(r));
        }

        let data = run(rows).unwrap();
        assert_eq!(data.transactions.len(), 3);
        assert_eq!(data.new_accounts.len(), 1);
        assert_eq!(data.new_expense_categories.len(), 1);
        assert_eq!(data.new_tags.len(), 2);

        let account_id = data.new_accounts[0].id;
        let category_id = data.new_expense_categories[0].id;
        for tx in &data.transactions {
            assert_eq!(tx.transaction.account_id, account_id);
            assert_eq!(tx.transaction.category_id, category_id);
            assert_eq!(tx.tag_ids, vec![data.new_tags[0].id, data.new_tags[1].id]);
        }
    }

    #[test]
    fn new_entities_keep_first_seen_order() {
        let data = run(vec![
            Some(row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00")),
            Some(row("2024-09-01 11:00:00", "Expense", "Rent", "Bank", "2.00")),
            Some(row("2024-09-01 12:00:00", "Expense", "Food", "Card", "3.00")),
        ])
        .unwrap();

        let accounts: Vec<_> = data.new_accounts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(accounts, ["Wallet", "Bank", "Card"]);
        let ids: Vec<_> = data.new_accounts.iter().map(|a| a.id).collect();
        assert_eq!(ids, [-1, -2, -3]);
        let categories: Vec<_> = data.new_expense_categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(categories, ["Food", "Rent"]);
    }

    #[test]
    fn existing_entities_are_reused_not_recreated() {
        let mut existing = ExistingEntities::default();
        existing
            .accounts
            .insert("Wallet".into(), Account::new(42, 7, "Wallet", "EUR"));
        existing
            .income_categories
            .insert("Salary".into(), Category::new(9, 7, "Salary", CategoryType::Income));

        let data = importer()
            .parse(
                &user(),
                &table(vec![Some(row("2024-09-01 10:00:00", "Income", "Salary", "Wallet", "10"))]),
                0,
                &existing,
            )
            .unwrap();

        assert!(data.new_accounts.is_empty());
        assert!(data.new_income_categories.is_empty());
        let tx = &data.transactions[0];
        assert_eq!(tx.transaction.account_id, 42);
        assert_eq!(tx.transaction.category_id, 9);
        assert_eq!(tx.original_source_account_currency, "EUR");
    }

    #[test]
    fn category_namespaces_are_independent() {
        let data = run(vec![
            Some(row("2024-09-01 10:00:00", "Expense", "Other", "Wallet", "1.00")),
            Some(row("2024-09-01 11:00:00", "Income", "Other", "Wallet", "1.00")),
        ])
        .unwrap();

        assert_eq!(data.new_expense_categories.len(), 1);
        assert_eq!(data.new_income_categories.len(), 1);
        assert_ne!(data.new_expense_categories[0].id, data.new_income_categories[0].id);
    }

    #[test]
    fn parent_category_created_before_child() {
        let mut r = row("2024-09-01 10:00:00", "Expense", "Lunch", "Wallet", "1.00");
        r.category = Some("Food".to_string());
        let data = run(vec![Some(r)]).unwrap();

        let names: Vec<_> = data.new_expense_categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Food", "Lunch"]);
        assert_eq!(data.new_expense_categories[0].parent_id, None);
        assert_eq!(
            data.new_expense_categories[1].parent_id,
            Some(data.new_expense_categories[0].id)
        );
        assert_eq!(data.transactions[0].transaction.category_id, data.new_expense_categories[1].id);
    }

    #[test]
    fn blank_sub_category_falls_back_to_category() {
        let mut r = row("2024-09-01 10:00:00", "Expense", "", "Wallet", "1.00");
        r.category = Some("Food".to_string());
        let data = run(vec![Some(r)]).unwrap();
        assert_eq!(data.new_expense_categories.len(), 1);
        assert_eq!(data.new_expense_categories[0].name, "Food");
        assert_eq!(data.new_expense_categories[0].parent_id, None);
    }

    #[test]
    fn uncategorized_rows_keep_category_zero() {
        let data = run(vec![Some(row("2024-09-01 10:00:00", "Income", "", "Wallet", "1.00"))]).unwrap();
        assert_eq!(data.transactions[0].transaction.category_id, 0);
        assert!(data.new_income_categories.is_empty());
    }

    #[test]
    fn balance_modification_never_categorized() {
        let data = run(vec![Some(row(
            "2024-09-01 10:00:00",
            "Balance Modification",
            "Ignored",
            "Wallet",
            "-5.00",
        ))])
        .unwrap();
        let tx = &data.transactions[0].transaction;
        assert_eq!(tx.transaction_type, TransactionType::ModifyBalance);
        assert_eq!(tx.category_id, 0);
        assert_eq!(tx.amount, -500);
        assert!(data.new_expense_categories.is_empty());
    }

    #[test]
    fn transfer_resolves_both_sides() {
        let mut r = row("2024-09-01 10:00:00", "Transfer", "", "Bank", "10.00");
        r.account_currency = Some("USD".to_string());
        r.related_account_name = Some("Broker".to_string());
        r.related_account_currency = Some("EUR".to_string());
        r.related_amount = Some("9.20".to_string());

        let data = run(vec![Some(r)]).unwrap();
        let tx = &data.transactions[0];
        assert_eq!(tx.transaction.transaction_type, TransactionType::TransferOut);
        assert_eq!(tx.transaction.amount, 1000);
        assert_eq!(tx.transaction.related_account_amount, 920);
        assert_eq!(tx.transaction.related_account_id, data.new_accounts[1].id);
        assert_eq!(tx.original_destination_account_currency, "EUR");
    }

    #[test]
    fn non_transfers_leave_related_side_zero() {
        let mut r = row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00");
        r.related_account_name = Some("Ignored".to_string());
        r.related_amount = Some("5.00".to_string());
        let data = run(vec![Some(r)]).unwrap();
        let tx = &data.transactions[0];
        assert_eq!(tx.transaction.related_account_id, 0);
        assert_eq!(tx.transaction.related_account_amount, 0);
        assert_eq!(data.new_accounts.len(), 1);
    }

    #[test]
    fn transfer_without_related_account_fails() {
        let r = row("2024-09-01 10:00:00", "Transfer", "", "Bank", "10.00");
        assert!(matches!(run(vec![Some(r)]), Err(ImportError::AccountNameMissing)));
    }

    #[test]
    fn currency_falls_back_to_known_account_then_default() {
        let mut first = row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00");
        first.account_currency = Some("EUR".to_string());
        let second = row("2024-09-01 11:00:00", "Expense", "Food", "Wallet", "1.00");
        let third = row("2024-09-01 12:00:00", "Expense", "Food", "Cash", "1.00");

        let data = run(vec![Some(first), Some(second), Some(third)]).unwrap();
        assert_eq!(data.new_accounts[0].currency, "EUR");
        assert_eq!(data.transactions[1].original_source_account_currency, "EUR");
        assert_eq!(data.new_accounts[1].currency, "USD");
    }

    #[test]
    fn currency_conflict_fails() {
        let mut first = row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00");
        first.account_currency = Some("EUR".to_string());
        let mut second = row("2024-09-01 11:00:00", "Expense", "Food", "Wallet", "1.00");
        second.account_currency = Some("USD".to_string());

        let err = run(vec![Some(first), Some(second)]).unwrap_err();
        assert!(matches!(err, ImportError::AccountCurrencyInvalid { ref currency, .. } if currency == "USD"));
    }

    #[test]
    fn unsupported_currency_fails() {
        let mut r = row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00");
        r.account_currency = Some("XYZ".to_string());
        assert!(matches!(
            run(vec![Some(r)]),
            Err(ImportError::AccountCurrencyInvalid { .. })
        ));
    }

    #[test]
    fn row_errors_abort_the_import() {
        let cases = [
            (row("", "Expense", "Food", "Wallet", "1.00"), "time missing"),
            (row("2024", "Expense", "Food", "Wallet", "1.00"), "time invalid"),
            (row("2024-09-01 10:00:00", "Refund", "Food", "Wallet", "1.00"), "type"),
            (row("2024-09-01 10:00:00", "Expense", "Food", "", "1.00"), "account"),
            (row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.234"), "amount"),
            (row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", ""), "empty amount"),
        ];

        for (bad, label) in cases {
            let good = row("2024-09-01 09:00:00", "Expense", "Food", "Wallet", "1.00");
            let result = run(vec![Some(good), Some(bad)]);
            let err = result.expect_err(label);
            match label {
                "time missing" => assert!(matches!(err, ImportError::TransactionTimeMissing)),
                "time invalid" => assert!(matches!(err, ImportError::TransactionTimeInvalid(_))),
                "type" => assert!(matches!(err, ImportError::TransactionTypeInvalid(_))),
                "account" => assert!(matches!(err, ImportError::AccountNameMissing)),
                _ => assert!(matches!(err, ImportError::AmountInvalid(_))),
            }
        }
    }

    #[test]
    fn timezone_column_overrides_default() {
        let mut r = row("2024-09-01 08:00:00", "Expense", "Food", "Wallet", "1.00");
        r.timezone = Some("+08:00".to_string());
        let data = importer()
            .parse(&user(), &table(vec![Some(r)]), -300, &ExistingEntities::default())
            .unwrap();
        let tx = &data.transactions[0].transaction;
        assert_eq!(tx.timezone_offset_minutes, 480);
        assert_eq!(tx.transaction_time, 1_725_148_800_000);
    }

    #[test]
    fn blank_timezone_uses_default_and_bad_timezone_fails() {
        let r = row("2024-09-01 00:00:00", "Expense", "Food", "Wallet", "1.00");
        let data = importer()
            .parse(&user(), &table(vec![Some(r.clone())]), 60, &ExistingEntities::default())
            .unwrap();
        assert_eq!(data.transactions[0].transaction.timezone_offset_minutes, 60);

        let mut bad = r;
        bad.timezone = Some("CET".to_string());
        assert!(matches!(
            run(vec![Some(bad)]),
            Err(ImportError::TransactionTimezoneInvalid(_))
        ));
    }

    #[test]
    fn skipped_rows_are_not_errors() {
        let data = run(vec![
            None,
            Some(TransactionRow::invalid()),
            Some(row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00")),
        ])
        .unwrap();
        assert_eq!(data.transactions.len(), 1);
    }

    #[test]
    fn empty_or_fully_skipped_tables_are_not_found() {
        assert!(matches!(run(vec![]), Err(ImportError::TransactionDataNotFound)));
        assert!(matches!(run(vec![None]), Err(ImportError::TransactionDataNotFound)));
    }

    #[test]
    fn geo_location_and_description() {
        let mut r = row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00");
        r.geo_location = Some("121.473700 31.230400".to_string());
        r.description = Some("  lunch  ".to_string());
        let data = run(vec![Some(r)]).unwrap();
        let tx = &data.transactions[0].transaction;
        assert_eq!(tx.geo_longitude, 121.4737);
        assert_eq!(tx.geo_latitude, 31.2304);
        assert_eq!(tx.comment, "lunch");
    }

    #[test]
    fn bad_geo_location_is_dropped() {
        let mut r = row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00");
        r.geo_location = Some("somewhere".to_string());
        let data = run(vec![Some(r)]).unwrap();
        assert!(!data.transactions[0].transaction.has_geo_location());
    }

    #[test]
    fn blank_and_duplicate_tags_dropped() {
        let mut r = row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00");
        r.tags = Some(" a ;; ;a;b".to_string());
        let data = run(vec![Some(r)]).unwrap();
        let tx = &data.transactions[0];
        assert_eq!(tx.original_tag_names, ["a", "b"]);
        assert_eq!(data.new_tags.len(), 2);
    }

    #[test]
    fn columns_the_format_lacks_are_ignored() {
        let mut r = row("2024-09-01 10:00:00", "Expense", "Food", "Wallet", "1.00");
        r.tags = Some("a".to_string());
        r.description = Some("text".to_string());
        let limited = RowTable {
            columns: [Column::TransactionTime, Column::TransactionType, Column::AccountName, Column::Amount]
                .into_iter()
                .collect(),
            rows: vec![Some(r)],
        };
        let data = importer()
            .parse(&user(), &limited, 0, &ExistingEntities::default())
            .unwrap();
        assert!(data.new_tags.is_empty());
        assert_eq!(data.transactions[0].transaction.comment, "");
    }

    #[test]
    fn output_is_ordered() {
        let data = run(vec![
            Some(row("2024-09-03 10:00:00", "Expense", "Food", "Wallet", "1.00")),
            Some(row("2024-09-02 10:00:00", "Balance Modification", "", "Wallet", "100.00")),
            Some(row("2024-09-01 10:00:00", "Income", "Pay", "Wallet", "5.00")),
        ])
        .unwrap();
        let types: Vec<_> = data
            .transactions
            .iter()
            .map(|t| t.transaction.transaction_type)
            .collect();
        assert_eq!(
            types,
            [TransactionType::ModifyBalance, TransactionType::Income, TransactionType::Expense]
        );
    }
}
