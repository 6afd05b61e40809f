//! Firefly III transaction CSV exports.

use chrono::{DateTime, NaiveDate};
use tallyport_core::datetime::{format_timezone_offset, to_long_date_time};
use tallyport_core::{TransactionType, User};

use crate::datatable::{Column, TransactionDataTable, TransactionRow, TransactionRowIterator};
use crate::error::ImportError;
use crate::importer::{default_type_mapping, DataTableImporter, ExistingEntities, ImportedData, TransactionDataImporter};
use crate::util::{
    abs_amount_text, cell, decimal_text_to_amount_text, decode_with_label, negate_amount_text, read_delimited_records,
    HeaderIndex,
};

const FORMAT: &str = "firefly iii";

const TAG_SEPARATOR: &str = ",";
const INITIAL_BALANCE_ACCOUNT: &str = "Initial balance account";

pub struct FireflyIiiCsvImporter;

impl TransactionDataImporter for FireflyIiiCsvImporter {
    fn parse_imported_data(
        &self,
        user: &User,
        data: &[u8],
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError> {
        let text = decode_with_label(data, None, FORMAT)?;
        let table = FireflyIiiTable::parse(&text)?;

        DataTableImporter::new(default_type_mapping(), " ", TAG_SEPARATOR).parse(
            user,
            &table,
            default_timezone_offset,
            existing,
        )
    }
}

struct FireflyIiiColumns {
    transaction_type: usize,
    amount: usize,
    currency: usize,
    date: usize,
    source_name: usize,
    destination_name: usize,
    foreign_amount: Option<usize>,
    foreign_currency: Option<usize>,
    description: Option<usize>,
    notes: Option<usize>,
    category: Option<usize>,
    tags: Option<usize>,
    source_type: Option<usize>,
}

impl FireflyIiiColumns {
    fn from_header(index: &HeaderIndex) -> Result<Self, ImportError> {
        Ok(Self {
            transaction_type: index.require("type")?,
            amount: index.require("amount")?,
            currency: index.require("currency_code")?,
            date: index.require("date")?,
            source_name: index.require("source_name")?,
            destination_name: index.require("destination_name")?,
            foreign_amount: index.position("foreign_amount"),
            foreign_currency: index.position("foreign_currency_code"),
            description: index.position("description"),
            notes: index.position("notes"),
            category: index.position("category"),
            tags: index.position("tags"),
            source_type: index.position("source_type"),
        })
    }
}

struct FireflyIiiTable {
    columns: FireflyIiiColumns,
    header_len: usize,
    records: Vec<Vec<String>>,
}

impl FireflyIiiTable {
    fn parse(text: &str) -> Result<Self, ImportError> {
        let mut records: Vec<Vec<String>> = read_delimited_records(text, b',', None, true, FORMAT)?
            .into_iter()
            .filter(|record| record.iter().any(|field| !field.trim().is_empty()))
            .collect();

        if records.is_empty() {
            return Err(ImportError::TransactionDataNotFound);
        }

        let header = records.remove(0);
        let columns = FireflyIiiColumns::from_header(&HeaderIndex::new(header.iter().map(String::as_str)))?;

        Ok(Self {
            columns,
            header_len: header.len(),
            records,
        })
    }
}

impl TransactionDataTable for FireflyIiiTable {
    fn has_column(&self, column: Column) -> bool {
        match column {
            Column::GeographicLocation | Column::Category => false,
            Column::Tags => self.columns.tags.is_some(),
            Column::Description => self.columns.description.is_some() || self.columns.notes.is_some(),
            _ => true,
        }
    }

    fn transaction_row_count(&self) -> usize {
        self.records.len()
    }

    fn transaction_row_iterator(&self) -> Box<dyn TransactionRowIterator + '_> {
        Box::new(FireflyIiiRowIterator {
            table: self,
            records: self.records.iter(),
        })
    }
}

struct FireflyIiiRowIterator<'a> {
    table: &'a FireflyIiiTable,
    records: std::slice::Iter<'a, Vec<String>>,
}

fn amount_text(text: &str) -> Result<String, ImportError> {
    decimal_text_to_amount_text(text).ok_or_else(|| ImportError::AmountInvalid(text.to_string()))
}

impl TransactionRowIterator for FireflyIiiRowIterator<'_> {
    fn has_next(&self) -> bool {
        !self.records.as_slice().is_empty()
    }

    fn next_row(&mut self, _user: &User) -> Result<Option<TransactionRow>, ImportError> {
        let Some(record) = self.records.next() else {
            return Ok(None);
        };
        if record.len() != self.table.header_len {
            return Ok(Some(TransactionRow::invalid()));
        }

        let columns = &self.table.columns;
        let get = |index: usize| cell(record, Some(index));
        let optional = |index: Option<usize>| cell(record, index);

        let mut row = TransactionRow::default();

        let date = get(columns.date);
        if !date.is_empty() {
            if let Ok(value) = DateTime::parse_from_rfc3339(date) {
                row.set(Column::TransactionTime, to_long_date_time(&value.naive_local()));
                row.set(
                    Column::TransactionTimezone,
                    format_timezone_offset(value.offset().local_minus_utc() / 60),
                );
            } else {
                let midnight = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .ok_or_else(|| ImportError::TransactionTimeInvalid(date.to_string()))?;
                row.set(Column::TransactionTime, to_long_date_time(&midnight));
            }
        }

        let amount = amount_text(get(columns.amount))?;
        let currency = get(columns.currency);
        let source = get(columns.source_name);
        let destination = get(columns.destination_name);

        let kind = get(columns.transaction_type);
        let (transaction_type, account, amount) = match kind {
            "Deposit" => (TransactionType::Income, destination, abs_amount_text(&amount).to_string()),
            "Withdrawal" => (TransactionType::Expense, source, abs_amount_text(&amount).to_string()),
            "Transfer" => (TransactionType::TransferOut, source, abs_amount_text(&amount).to_string()),
            "Opening balance" if optional(columns.source_type) == INITIAL_BALANCE_ACCOUNT => {
                (TransactionType::ModifyBalance, destination, amount)
            }
            "Opening balance" => (TransactionType::ModifyBalance, source, negate_amount_text(&amount)),
            other => return Err(ImportError::TransactionTypeInvalid(other.to_string())),
        };

        row.set(Column::TransactionType, transaction_type.display_name());
        row.set(Column::AccountName, account);
        row.set(Column::AccountCurrency, currency);
        row.set(Column::Amount, amount.as_str());

        if transaction_type == TransactionType::TransferOut {
            let foreign_amount = optional(columns.foreign_amount);
            let foreign_currency = optional(columns.foreign_currency);

            let related_amount = if foreign_amount.is_empty() {
                amount
            } else {
                abs_amount_text(&amount_text(foreign_amount)?).to_string()
            };
            let related_currency = if foreign_currency.is_empty() {
                currency
            } else {
                foreign_currency
            };

            row.set(Column::RelatedAccountName, destination);
            row.set(Column::RelatedAccountCurrency, related_currency);
            row.set(Column::RelatedAmount, related_amount);
        }

        row.set(Column::SubCategory, optional(columns.category));
        row.set(Column::Tags, optional(columns.tags));

        let description = [columns.description, columns.notes]
            .into_iter()
            .map(optional)
            .find(|text| !text.is_empty())
            .unwrap_or("");
        row.set(Column::Description, description);

        Ok(Some(row))
    }
}
