//! GnuCash XML books, plain or gzip-compressed.
//!
//! Each two-split ledger transaction is classified by the account types on
//! either side: income or equity against an asset account is income (or an
//! opening balance), expense against an asset account is an expense, and two
//! asset accounts form a transfer.

use std::collections::HashMap;
use std::io::Read;

use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use roxmltree::Node;
use tallyport_core::datetime::{format_timezone_offset, parse_timezone_offset, LONG_DATE_TIME_FORMAT};
use tallyport_core::{TransactionType, User};
use tracing::debug;

use crate::datatable::{Column, TransactionDataTable, TransactionRow, TransactionRowIterator};
use crate::error::ImportError;
use crate::importer::{default_type_mapping, DataTableImporter, ExistingEntities, ImportedData, TransactionDataImporter};
use crate::util::{abs_amount_text, decode_xml, fraction_to_amount_text, negate_amount_text, parse_xml, xml_child, xml_children, xml_text};

const FORMAT: &str = "gnucash";

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];

const ASSET_ACCOUNT_TYPES: [&str; 9] = [
    "BANK",
    "CASH",
    "CREDIT",
    "ASSET",
    "LIABILITY",
    "STOCK",
    "MUTUAL",
    "RECEIVABLE",
    "PAYABLE",
];

pub struct GnuCashImporter;

impl TransactionDataImporter for GnuCashImporter {
    fn parse_imported_data(
        &self,
        user: &User,
        data: &[u8],
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError> {
        let book = read_book(data)?;
        debug!(
            accounts = book.accounts.len(),
            transactions = book.transactions.len(),
            "Read gnucash book"
        );

        DataTableImporter::new(default_type_mapping(), "", "").parse(user, &book, default_timezone_offset, existing)
    }
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, ImportError> {
    let mut inflated = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut inflated)
        .map_err(|e| ImportError::invalid_content(FORMAT, format!("gzip: {e}")))?;
    Ok(inflated)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountKind {
    Asset,
    Equity,
    Income,
    Expense,
    Root,
    Other,
}

impl AccountKind {
    fn from_type(account_type: &str) -> Self {
        match account_type {
            "EQUITY" => AccountKind::Equity,
            "INCOME" => AccountKind::Income,
            "EXPENSE" => AccountKind::Expense,
            "ROOT" => AccountKind::Root,
            t if ASSET_ACCOUNT_TYPES.contains(&t) => AccountKind::Asset,
            _ => AccountKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
struct GnuCashAccount {
    name: String,
    account_type: String,
    kind: AccountKind,
    currency: Option<String>,
    parent: Option<String>,
    opening_balance: bool,
}

#[derive(Debug, Clone)]
struct GnuCashSplit {
    quantity: String,
    account: String,
    memo: Option<String>,
}

#[derive(Debug, Clone)]
struct GnuCashTransaction {
    posted: Option<String>,
    description: Option<String>,
    splits: Vec<GnuCashSplit>,
}

struct GnuCashBook {
    accounts: HashMap<String, GnuCashAccount>,
    transactions: Vec<GnuCashTransaction>,
}

fn read_book(data: &[u8]) -> Result<GnuCashBook, ImportError> {
    let inflated;
    let data = if data.starts_with(GZIP_MAGIC) {
        inflated = inflate(data)?;
        inflated.as_slice()
    } else {
        data
    };

    let text = decode_xml(data, FORMAT)?;
    let document = parse_xml(&text, FORMAT)?;
    let root = document.root_element();

    if root.tag_name().name() != "gnc-v2" {
        return Err(ImportError::invalid_content(FORMAT, "root element is not gnc-v2"));
    }
    let book = xml_child(root, "book").ok_or_else(|| ImportError::invalid_content(FORMAT, "missing book"))?;

    let mut accounts = HashMap::new();
    for node in xml_children(book, "account") {
        let id = xml_text(node, &["id"]).ok_or_else(|| ImportError::invalid_content(FORMAT, "account without id"))?;
        accounts.insert(id, read_account(node));
    }

    let transactions = xml_children(book, "transaction").map(read_transaction).collect();

    Ok(GnuCashBook { accounts, transactions })
}

fn read_account(node: Node<'_, '_>) -> GnuCashAccount {
    let account_type = xml_text(node, &["type"]).unwrap_or_default();
    let opening_balance = xml_child(node, "slots").is_some_and(|slots| {
        xml_children(slots, "slot").any(|slot| {
            xml_text(slot, &["key"]).as_deref() == Some("equity-type")
                && xml_text(slot, &["value"]).as_deref() == Some("opening-balance")
        })
    });

    GnuCashAccount {
        name: xml_text(node, &["name"]).unwrap_or_default(),
        kind: AccountKind::from_type(&account_type),
        account_type,
        currency: xml_text(node, &["commodity", "id"]),
        parent: xml_text(node, &["parent"]),
        opening_balance,
    }
}

fn read_transaction(node: Node<'_, '_>) -> GnuCashTransaction {
    let splits = xml_child(node, "splits")
        .map(|splits| {
            xml_children(splits, "split")
                .map(|split| GnuCashSplit {
                    quantity: xml_text(split, &["quantity"])
                        .or_else(|| xml_text(split, &["value"]))
                        .unwrap_or_default(),
                    account: xml_text(split, &["account"]).unwrap_or_default(),
                    memo: xml_text(split, &["memo"]),
                })
                .collect()
        })
        .unwrap_or_default();

    GnuCashTransaction {
        posted: xml_text(node, &["date-posted", "date"]),
        description: xml_text(node, &["description"]),
        splits,
    }
}

impl TransactionDataTable for GnuCashBook {
    fn has_column(&self, column: Column) -> bool {
        !matches!(column, Column::GeographicLocation | Column::Tags)
    }

    fn transaction_row_count(&self) -> usize {
        self.transactions.len()
    }

    fn transaction_row_iterator(&self) -> Box<dyn TransactionRowIterator + '_> {
        Box::new(GnuCashRowIterator {
            book: self,
            transactions: self.transactions.iter(),
        })
    }
}

struct GnuCashRowIterator<'a> {
    book: &'a GnuCashBook,
    transactions: std::slice::Iter<'a, GnuCashTransaction>,
}

/// A split resolved against its account, with the quantity as amount text.
struct Leg<'a> {
    account: &'a GnuCashAccount,
    amount: String,
}

impl<'a> GnuCashRowIterator<'a> {
    fn leg(&self, split: &GnuCashSplit) -> Result<Leg<'a>, ImportError> {
        let account = self
            .book
            .accounts
            .get(&split.account)
            .ok_or_else(|| ImportError::invalid_content(FORMAT, format!("unknown account {}", split.account)))?;
        let amount =
            fraction_to_amount_text(&split.quantity).ok_or_else(|| ImportError::AmountInvalid(split.quantity.clone()))?;
        Ok(Leg { account, amount })
    }

    /// The parent's name unless the parent is the book root.
    fn parent_name(&self, account: &GnuCashAccount) -> Option<&'a str> {
        let parent = self.book.accounts.get(account.parent.as_deref()?)?;
        (parent.kind != AccountKind::Root).then_some(parent.name.as_str())
    }

    fn set_category(&self, row: &mut TransactionRow, account: &GnuCashAccount) {
        if let Some(parent) = self.parent_name(account) {
            row.set(Column::Category, parent);
        }
        row.set(Column::SubCategory, account.name.as_str());
    }

    fn classify(&self, row: &mut TransactionRow, first: Leg<'a>, second: Leg<'a>) -> Result<(), ImportError> {
        use AccountKind::{Asset, Equity, Expense, Income};

        match (first.account.kind, second.account.kind) {
            (Equity | Income, Asset) | (Asset, Equity | Income) => {
                let (category, asset) = if first.account.kind == Asset {
                    (second, first)
                } else {
                    (first, second)
                };
                let transaction_type = if category.account.opening_balance {
                    TransactionType::ModifyBalance
                } else {
                    TransactionType::Income
                };
                row.set(Column::TransactionType, transaction_type.display_name());
                self.set_category(row, category.account);
                set_account(row, Column::AccountName, Column::AccountCurrency, asset.account);
                row.set(Column::Amount, asset.amount);
            }
            (Expense, Asset) | (Asset, Expense) => {
                let (category, asset) = if first.account.kind == Asset {
                    (second, first)
                } else {
                    (first, second)
                };
                row.set(Column::TransactionType, TransactionType::Expense.display_name());
                self.set_category(row, category.account);
                set_account(row, Column::AccountName, Column::AccountCurrency, asset.account);
                row.set(Column::Amount, negate_amount_text(&asset.amount));
            }
            (Asset, Asset) => {
                let (source, destination) = if second.amount.starts_with('-') && !first.amount.starts_with('-') {
                    (second, first)
                } else {
                    (first, second)
                };
                row.set(Column::TransactionType, TransactionType::TransferOut.display_name());
                set_account(row, Column::AccountName, Column::AccountCurrency, source.account);
                row.set(Column::Amount, abs_amount_text(&source.amount));
                set_account(
                    row,
                    Column::RelatedAccountName,
                    Column::RelatedAccountCurrency,
                    destination.account,
                );
                row.set(Column::RelatedAmount, abs_amount_text(&destination.amount));
            }
            _ => {
                return Err(ImportError::TransactionTypeNotSupported(format!(
                    "{} and {}",
                    first.account.account_type, second.account.account_type
                )));
            }
        }

        Ok(())
    }
}

fn set_account(row: &mut TransactionRow, name: Column, currency: Column, account: &GnuCashAccount) {
    row.set(name, account.name.as_str());
    if let Some(code) = &account.currency {
        row.set(currency, code.as_str());
    }
}

/// `YYYY-MM-DD HH:MM:SS ±HHMM`
fn parse_posted_date(text: &str) -> Option<(String, i32)> {
    let (local, zone) = text.trim().rsplit_once(' ')?;
    let local = NaiveDateTime::parse_from_str(local.trim(), LONG_DATE_TIME_FORMAT).ok()?;
    let offset = parse_timezone_offset(zone).ok()?;
    Some((local.format(LONG_DATE_TIME_FORMAT).to_string(), offset))
}

impl TransactionRowIterator for GnuCashRowIterator<'_> {
    fn has_next(&self) -> bool {
        !self.transactions.as_slice().is_empty()
    }

    fn next_row(&mut self, _user: &User) -> Result<Option<TransactionRow>, ImportError> {
        let Some(transaction) = self.transactions.next() else {
            return Ok(None);
        };

        let (first, second) = match transaction.splits.as_slice() {
            [] => return Err(ImportError::invalid_content(FORMAT, "transaction without splits")),
            [only] => {
                let leg = self.leg(only)?;
                if leg.amount.trim_start_matches('-').chars().all(|c| c == '0' || c == '.') {
                    debug!("Skipping zero single-split transaction");
                    return Ok(None);
                }
                return Err(ImportError::SplitTransactionsNotSupported(1));
            }
            [first, second] => (self.leg(first)?, self.leg(second)?),
            splits => return Err(ImportError::SplitTransactionsNotSupported(splits.len())),
        };

        let mut row = TransactionRow::default();

        if let Some(posted) = &transaction.posted {
            let (local, offset) =
                parse_posted_date(posted).ok_or_else(|| ImportError::TransactionTimeInvalid(posted.clone()))?;
            row.set(Column::TransactionTime, local);
            row.set(Column::TransactionTimezone, format_timezone_offset(offset));
        }

        self.classify(&mut row, first, second)?;

        let description = transaction
            .description
            .as_ref()
            .or_else(|| transaction.splits.iter().find_map(|s| s.memo.as_ref()));
        if let Some(description) = description {
            row.set(Column::Description, description.as_str());
        }

        Ok(Some(row))
    }
}
