use thiserror::Error;

/// Coarse grouping of [`ImportError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedFile,
    MissingRequiredField,
    InvalidValue,
    UnsupportedStructure,
    NotFound,
}

/// Every way an import can fail. The first error aborts the whole import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid {format} file: unrecognized file header")]
    InvalidFileHeader { format: &'static str },
    #[error("Invalid {format} file: {reason}")]
    InvalidFileContent { format: &'static str, reason: String },
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),
    #[error("Missing transaction time")]
    TransactionTimeMissing,
    #[error("Invalid transaction time: {0:?}")]
    TransactionTimeInvalid(String),
    #[error("Invalid transaction timezone: {0:?}")]
    TransactionTimezoneInvalid(String),
    #[error("Invalid transaction type: {0:?}")]
    TransactionTypeInvalid(String),
    #[error("Missing account name")]
    AccountNameMissing,
    #[error("Invalid currency {currency:?} for account {account:?}")]
    AccountCurrencyInvalid { account: String, currency: String },
    #[error("Invalid amount: {0:?}")]
    AmountInvalid(String),
    #[error("No transaction data found in file")]
    TransactionDataNotFound,
    #[error("Split transactions are not supported ({0} splits)")]
    SplitTransactionsNotSupported(usize),
    #[error("Unsupported transaction type: {0}")]
    TransactionTypeNotSupported(String),
}

impl ImportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::InvalidFileHeader { .. } | ImportError::InvalidFileContent { .. } => {
                ErrorKind::MalformedFile
            }
            ImportError::MissingRequiredField(_)
            | ImportError::TransactionTimeMissing
            | ImportError::AccountNameMissing => ErrorKind::MissingRequiredField,
            ImportError::TransactionTimeInvalid(_)
            | ImportError::TransactionTimezoneInvalid(_)
            | ImportError::TransactionTypeInvalid(_)
            | ImportError::AccountCurrencyInvalid { .. }
            | ImportError::AmountInvalid(_) => ErrorKind::InvalidValue,
            ImportError::SplitTransactionsNotSupported(_)
            | ImportError::TransactionTypeNotSupported(_) => ErrorKind::UnsupportedStructure,
            ImportError::TransactionDataNotFound => ErrorKind::NotFound,
        }
    }

    pub(crate) fn invalid_content(format: &'static str, reason: impl Into<String>) -> Self {
        ImportError::InvalidFileContent {
            format,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Account not found: {0}")]
    AccountNotFound(i64),
    #[error("Transaction {transaction_id} does not belong to user {user_id}")]
    ForeignTransaction { transaction_id: i64, user_id: i64 },
    #[error("Invalid transaction time: {0}")]
    InvalidTime(#[from] tallyport_core::datetime::DateTimeError),
    #[error("Invalid export settings: {0}")]
    Settings(#[from] crate::settings::SettingsError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
