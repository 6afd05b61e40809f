pub mod camt;
pub mod datatable;
pub mod delimited;
pub mod error;
pub mod exporter;
pub mod feidee;
pub mod fireflyiii;
pub mod gnucash;
pub mod importer;
pub mod ofx;
pub mod ordering;
pub mod settings;
pub(crate) mod util;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tallyport_core::{Account, Category, Tag, Transaction, User};
use tracing::info;

pub use camt::{CamtImporter, CamtVariant};
pub use datatable::{Column, TransactionDataTable, TransactionRow, TransactionRowIterator};
pub use delimited::DelimitedTextImporter;
pub use error::{ErrorKind, ExportError, ImportError};
pub use exporter::{DelimitedTextExporter, ExportContext, TransactionDataExporter};
pub use feidee::{FeideeMymoneyCsvImporter, FeideeMymoneySpreadsheetImporter};
pub use fireflyiii::FireflyIiiCsvImporter;
pub use gnucash::GnuCashImporter;
pub use importer::{
    default_type_mapping, DataTableImporter, ExistingEntities, ImportTransaction, ImportedData,
    TransactionDataImporter,
};
pub use ofx::OfxImporter;
pub use ordering::{compare_transactions, sort_transactions};
pub use settings::{DelimitedTextSettings, SettingsError};

/// Every source format the converter reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Camt052,
    Camt053,
    Ofx,
    GnuCash,
    FireflyIiiCsv,
    FeideeMymoneyCsv,
    FeideeMymoneySpreadsheet,
    DefaultCsv,
    DefaultTsv,
}

impl FileType {
    pub const ALL: [FileType; 9] = [
        FileType::Camt052,
        FileType::Camt053,
        FileType::Ofx,
        FileType::GnuCash,
        FileType::FireflyIiiCsv,
        FileType::FeideeMymoneyCsv,
        FileType::FeideeMymoneySpreadsheet,
        FileType::DefaultCsv,
        FileType::DefaultTsv,
    ];

    pub fn id(self) -> &'static str {
        match self {
            FileType::Camt052 => "camt052",
            FileType::Camt053 => "camt053",
            FileType::Ofx => "ofx",
            FileType::GnuCash => "gnucash",
            FileType::FireflyIiiCsv => "fireflyiii_csv",
            FileType::FeideeMymoneyCsv => "feidee_mymoney_csv",
            FileType::FeideeMymoneySpreadsheet => "feidee_mymoney_xls",
            FileType::DefaultCsv => "csv",
            FileType::DefaultTsv => "tsv",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported file type: {0}")]
pub struct UnknownFileType(pub String);

impl FromStr for FileType {
    type Err = UnknownFileType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_ascii_lowercase();
        FileType::ALL
            .into_iter()
            .find(|t| t.id() == id)
            .ok_or(UnknownFileType(id))
    }
}

/// The format-selection switch: one importer per file type.
pub fn importer_for(file_type: FileType) -> Box<dyn TransactionDataImporter> {
    match file_type {
        FileType::Camt052 => Box::new(CamtImporter::new(CamtVariant::AccountReport)),
        FileType::Camt053 => Box::new(CamtImporter::new(CamtVariant::Statement)),
        FileType::Ofx => Box::new(OfxImporter),
        FileType::GnuCash => Box::new(GnuCashImporter),
        FileType::FireflyIiiCsv => Box::new(FireflyIiiCsvImporter),
        FileType::FeideeMymoneyCsv => Box::new(FeideeMymoneyCsvImporter),
        FileType::FeideeMymoneySpreadsheet => Box::new(FeideeMymoneySpreadsheetImporter),
        FileType::DefaultCsv => Box::new(DelimitedTextImporter::new(DelimitedTextSettings::csv())),
        FileType::DefaultTsv => Box::new(DelimitedTextImporter::new(DelimitedTextSettings::tsv())),
    }
}

pub fn import_transactions(
    file_type: FileType,
    user: &User,
    data: &[u8],
    default_timezone_offset: i32,
    existing: &ExistingEntities,
) -> Result<ImportedData, ImportError> {
    info!(%file_type, user_id = user.id, bytes = data.len(), "Importing transactions");
    importer_for(file_type).parse_imported_data(user, data, default_timezone_offset, existing)
}

pub fn export_transactions(
    settings: &DelimitedTextSettings,
    user_id: i64,
    transactions: &[Transaction],
    accounts: &HashMap<i64, Account>,
    categories: &HashMap<i64, Category>,
    tags: &HashMap<i64, Tag>,
    tag_index: &HashMap<i64, Vec<i64>>,
) -> Result<Vec<u8>, ExportError> {
    let exporter = DelimitedTextExporter::new(settings.clone())?;
    let context = ExportContext {
        accounts,
        categories,
        tags,
        tag_index,
    };
    info!(user_id, transactions = transactions.len(), "Exporting transactions");
    exporter.export(user_id, transactions, &context)
}
