//! The self-describing delimited text format: one header line naming
//! canonical columns, then one transaction per line.

use std::collections::HashMap;

use tallyport_core::User;

use crate::datatable::{Column, TransactionDataTable, TransactionRow, TransactionRowIterator};
use crate::error::ImportError;
use crate::importer::{default_type_mapping, DataTableImporter, ExistingEntities, ImportedData, TransactionDataImporter};
use crate::settings::DelimitedTextSettings;
use crate::util::{decode_with_label, read_delimited_records};

const FORMAT: &str = "delimited text";

const REQUIRED_COLUMNS: [Column; 7] = [
    Column::TransactionTime,
    Column::TransactionType,
    Column::SubCategory,
    Column::AccountName,
    Column::Amount,
    Column::RelatedAccountName,
    Column::RelatedAmount,
];

pub struct DelimitedTextImporter {
    settings: DelimitedTextSettings,
}

impl DelimitedTextImporter {
    pub fn new(settings: DelimitedTextSettings) -> Self {
        Self { settings }
    }
}

impl TransactionDataImporter for DelimitedTextImporter {
    fn parse_imported_data(
        &self,
        user: &User,
        data: &[u8],
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError> {
        let delimiter = self
            .settings
            .column_separator_byte()
            .map_err(|e| ImportError::invalid_content(FORMAT, e.to_string()))?;
        let terminator = match self.settings.line_separator.as_bytes() {
            [b] if *b != b'\n' => Some(*b),
            _ => None,
        };

        let text = decode_with_label(data, None, FORMAT)?;
        let table = DelimitedTextTable::parse(&text, delimiter, terminator)?;

        DataTableImporter::new(
            default_type_mapping(),
            &self.settings.geo_separator,
            &self.settings.tag_separator,
        )
        .parse(user, &table, default_timezone_offset, existing)
    }
}

pub(crate) struct DelimitedTextTable {
    columns: HashMap<Column, usize>,
    header_len: usize,
    records: Vec<Vec<String>>,
}

impl DelimitedTextTable {
    pub(crate) fn parse(text: &str, delimiter: u8, terminator: Option<u8>) -> Result<Self, ImportError> {
        let mut records: Vec<Vec<String>> = read_delimited_records(text, delimiter, terminator, false, FORMAT)?
            .into_iter()
            .filter(|record| record.iter().any(|field| !field.trim().is_empty()))
            .collect();

        if records.is_empty() {
            return Err(ImportError::TransactionDataNotFound);
        }

        let header = records.remove(0);
        let mut columns = HashMap::new();
        for (index, name) in header.iter().enumerate() {
            if let Some(column) = Column::from_header_name(name.trim()) {
                columns.entry(column).or_insert(index);
            }
        }

        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|c| !columns.contains_key(c)) {
            return Err(ImportError::MissingRequiredField(missing.header_name().to_string()));
        }

        Ok(Self {
            columns,
            header_len: header.len(),
            records,
        })
    }
}

impl TransactionDataTable for DelimitedTextTable {
    fn has_column(&self, column: Column) -> bool {
        self.columns.contains_key(&column)
    }

    fn transaction_row_count(&self) -> usize {
        self.records.len()
    }

    fn transaction_row_iterator(&self) -> Box<dyn TransactionRowIterator + '_> {
        Box::new(DelimitedTextRowIterator { table: self, index: 0 })
    }
}

struct DelimitedTextRowIterator<'a> {
    table: &'a DelimitedTextTable,
    index: usize,
}

impl TransactionRowIterator for DelimitedTextRowIterator<'_> {
    fn has_next(&self) -> bool {
        self.index < self.table.records.len()
    }

    fn next_row(&mut self, _user: &User) -> Result<Option<TransactionRow>, ImportError> {
        let Some(record) = self.table.records.get(self.index) else {
            return Ok(None);
        };
        self.index += 1;

        if record.len() != self.table.header_len {
            return Ok(Some(TransactionRow::invalid()));
        }

        let mut row = TransactionRow::default();
        for (column, index) in &self.table.columns {
            row.set(*column, record[*index].trim());
        }

        Ok(Some(row))
    }
}
