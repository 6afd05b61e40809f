use std::collections::HashMap;

use csv::{QuoteStyle, Terminator, WriterBuilder};
use tallyport_core::datetime::{format_long_date_time, format_timezone_offset};
use tallyport_core::{format_amount, Account, Category, Tag, Transaction, TransactionType};
use tracing::debug;

use crate::datatable::Column;
use crate::error::ExportError;
use crate::settings::{DelimitedTextSettings, SettingsError};

/// Lookups an exporter resolves transaction references against.
pub struct ExportContext<'a> {
    pub accounts: &'a HashMap<i64, Account>,
    pub categories: &'a HashMap<i64, Category>,
    pub tags: &'a HashMap<i64, Tag>,
    /// Tag ids attached to each transaction id.
    pub tag_index: &'a HashMap<i64, Vec<i64>>,
}

pub trait TransactionDataExporter {
    fn export(
        &self,
        user_id: i64,
        transactions: &[Transaction],
        context: &ExportContext<'_>,
    ) -> Result<Vec<u8>, ExportError>;
}

/// Writes the self-describing delimited format read by
/// [`crate::delimited::DelimitedTextImporter`].
pub struct DelimitedTextExporter {
    settings: DelimitedTextSettings,
    delimiter: u8,
}

impl DelimitedTextExporter {
    pub fn new(settings: DelimitedTextSettings) -> Result<Self, SettingsError> {
        let delimiter = settings.column_separator_byte()?;
        Ok(Self { settings, delimiter })
    }

    /// Replaces line breaks and both separators with a single space, so every
    /// field survives a plain split on the separators. Quote characters are
    /// written as they are.
    fn escape(&self, text: &str) -> String {
        let mut escaped = text.replace("\r\n", " ").replace(['\r', '\n'], " ");
        escaped = escaped.replace(self.settings.column_separator, " ");
        if !self.settings.line_separator.is_empty() {
            escaped = escaped.replace(self.settings.line_separator.as_str(), " ");
        }
        escaped
    }

    fn category_names(&self, category_id: i64, categories: &HashMap<i64, Category>) -> (String, String) {
        let Some(category) = categories.get(&category_id) else {
            return (String::new(), String::new());
        };

        match category.parent_id.and_then(|id| categories.get(&id)) {
            Some(parent) => (self.escape(&parent.name), self.escape(&category.name)),
            None => (self.escape(&category.name), String::new()),
        }
    }

    fn tag_names(&self, transaction_id: i64, context: &ExportContext<'_>) -> String {
        let Some(tag_ids) = context.tag_index.get(&transaction_id) else {
            return String::new();
        };

        tag_ids
            .iter()
            .filter_map(|id| context.tags.get(id))
            .map(|tag| self.escape(&tag.name))
            .collect::<Vec<_>>()
            .join(&self.settings.tag_separator)
    }

    fn geo_location(&self, transaction: &Transaction) -> String {
        if !transaction.has_geo_location() {
            return String::new();
        }
        format!(
            "{:.6}{}{:.6}",
            transaction.geo_longitude, self.settings.geo_separator, transaction.geo_latitude
        )
    }

    fn record(&self, transaction: &Transaction, context: &ExportContext<'_>) -> Result<Vec<String>, ExportError> {
        let account = context
            .accounts
            .get(&transaction.account_id)
            .ok_or(ExportError::AccountNotFound(transaction.account_id))?;

        let (related_name, related_currency, related_amount) =
            if transaction.transaction_type == TransactionType::TransferOut {
                let related = context
                    .accounts
                    .get(&transaction.related_account_id)
                    .ok_or(ExportError::AccountNotFound(transaction.related_account_id))?;
                (
                    self.escape(&related.name),
                    related.currency.clone(),
                    format_amount(transaction.related_account_amount),
                )
            } else {
                Default::default()
            };

        let (category, sub_category) = self.category_names(transaction.category_id, context.categories);

        Ok(vec![
            format_long_date_time(transaction.transaction_time, transaction.timezone_offset_minutes)?,
            format_timezone_offset(transaction.timezone_offset_minutes),
            transaction.transaction_type.display_name().to_string(),
            category,
            sub_category,
            self.escape(&account.name),
            account.currency.clone(),
            format_amount(transaction.amount),
            related_name,
            related_currency,
            related_amount,
            self.geo_location(transaction),
            self.tag_names(transaction.id, context),
            self.escape(&transaction.comment),
        ])
    }
}

impl TransactionDataExporter for DelimitedTextExporter {
    fn export(
        &self,
        user_id: i64,
        transactions: &[Transaction],
        context: &ExportContext<'_>,
    ) -> Result<Vec<u8>, ExportError> {
        let terminator = match self.settings.line_separator.as_bytes() {
            [b'\r', b'\n'] => Terminator::CRLF,
            [b] => Terminator::Any(*b),
            _ => Terminator::Any(b'\n'),
        };
        let mut writer = WriterBuilder::new()
            .delimiter(self.delimiter)
            .terminator(terminator)
            .quote_style(QuoteStyle::Never)
            .from_writer(Vec::new());

        writer.write_record(Column::ALL.iter().map(|c| c.header_name()))?;

        let mut written = 0usize;
        for transaction in transactions {
            if transaction.transaction_type == TransactionType::TransferIn {
                continue;
            }
            if transaction.user_id != user_id {
                return Err(ExportError::ForeignTransaction {
                    transaction_id: transaction.id,
                    user_id,
                });
            }

            writer.write_record(self.record(transaction, context)?)?;
            written += 1;
        }

        debug!(user_id, written, "Exported transactions");

        writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
    }
}
