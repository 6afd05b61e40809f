//! Feidee Mymoney exports: the web CSV and the xls/xlsx spreadsheet.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tallyport_core::datetime::to_long_date_time;
use tallyport_core::{TransactionType, User};
use tracing::{debug, warn};

use crate::datatable::{Column, TransactionDataTable, TransactionRow, TransactionRowIterator};
use crate::error::ImportError;
use crate::importer::{DataTableImporter, ExistingEntities, ImportedData, TransactionDataImporter};
use crate::util::{
    cell, decimal_to_amount_text, decode_with_label, read_delimited_records, strip_utf8_bom, HeaderIndex,
};

const CSV_FORMAT: &str = "feidee mymoney csv";
const SPREADSHEET_FORMAT: &str = "feidee mymoney spreadsheet";

const CSV_MARKER: &str = "随手记导出文件";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

const TYPE_INCOME: &str = "收入";
const TYPE_EXPENSE: &str = "支出";
const TYPE_TRANSFER: &str = "转账";
const TYPE_MODIFY_BALANCE: &str = "余额变更";
const TYPE_TRANSFER_OUT: &str = "转出";
const TYPE_TRANSFER_IN: &str = "转入";

const HEADER_TYPE: &str = "交易类型";
const HEADER_TIME: &str = "日期";

fn type_mapping() -> HashMap<String, TransactionType> {
    [
        (TYPE_INCOME, TransactionType::Income),
        (TYPE_EXPENSE, TransactionType::Expense),
        (TYPE_TRANSFER, TransactionType::TransferOut),
        (TYPE_MODIFY_BALANCE, TransactionType::ModifyBalance),
    ]
    .into_iter()
    .map(|(name, t)| (name.to_string(), t))
    .collect()
}

pub struct FeideeMymoneyCsvImporter;

impl TransactionDataImporter for FeideeMymoneyCsvImporter {
    fn parse_imported_data(
        &self,
        user: &User,
        data: &[u8],
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError> {
        let text = decode_with_label(data, None, CSV_FORMAT)?;
        let mut grid = read_delimited_records(&text, b',', None, true, CSV_FORMAT)?;

        let marked = grid
            .first()
            .and_then(|record| record.first())
            .is_some_and(|first| first.trim().starts_with(CSV_MARKER));
        if !marked {
            return Err(ImportError::InvalidFileHeader { format: CSV_FORMAT });
        }
        grid.remove(0);

        let records = merge_transfer_pairs(read_records(&grid, CSV_FORMAT)?)?;
        import_records(user, records, default_timezone_offset, existing)
    }
}

pub struct FeideeMymoneySpreadsheetImporter;

impl TransactionDataImporter for FeideeMymoneySpreadsheetImporter {
    fn parse_imported_data(
        &self,
        user: &User,
        data: &[u8],
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError> {
        let data = strip_utf8_bom(data);
        if !data.starts_with(OLE2_MAGIC) && !data.starts_with(ZIP_MAGIC) {
            return Err(ImportError::InvalidFileHeader {
                format: SPREADSHEET_FORMAT,
            });
        }

        let mut workbook = open_workbook_auto_from_rs(Cursor::new(data))
            .map_err(|e| ImportError::invalid_content(SPREADSHEET_FORMAT, e.to_string()))?;

        let mut records = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| ImportError::invalid_content(SPREADSHEET_FORMAT, e.to_string()))?;
            let grid = range_to_grid(&range);

            if header_row(&grid).is_none() {
                debug!(sheet = name.as_str(), "Skipping sheet without transaction header");
                continue;
            }
            records.extend(read_records(&grid, SPREADSHEET_FORMAT)?);
        }

        if records.is_empty() {
            return Err(ImportError::TransactionDataNotFound);
        }

        import_records(user, records, default_timezone_offset, existing)
    }
}

fn import_records(
    user: &User,
    records: Vec<FeideeRecord>,
    default_timezone_offset: i32,
    existing: &ExistingEntities,
) -> Result<ImportedData, ImportError> {
    let table = FeideeTable { records };
    DataTableImporter::new(type_mapping(), " ", " ").parse(user, &table, default_timezone_offset, existing)
}

/// One transaction line with its columns already located.
#[derive(Debug, Clone, Default, PartialEq)]
struct FeideeRecord {
    kind: String,
    time: String,
    category: String,
    sub_category: String,
    account: String,
    related_account: String,
    currency: String,
    related_currency: String,
    amount: String,
    related_amount: String,
    description: String,
    relation_id: String,
}

/// Index of the header row among the leading rows of a sheet.
fn header_row(grid: &[Vec<String>]) -> Option<usize> {
    grid.iter().take(5).position(|row| {
        row.iter().any(|c| c.trim() == HEADER_TYPE) && row.iter().any(|c| c.trim() == HEADER_TIME)
    })
}

fn read_records(grid: &[Vec<String>], format: &'static str) -> Result<Vec<FeideeRecord>, ImportError> {
    let header_index = header_row(grid).ok_or(ImportError::InvalidFileHeader { format })?;
    let index = HeaderIndex::new(grid[header_index].iter().map(String::as_str));

    let kind = index.require(HEADER_TYPE)?;
    let time = index.require(HEADER_TIME)?;
    let sub_category = index.require_any(&["子分类", "子类别"])?;
    let account = index.require("账户1")?;
    let amount = index.require("金额")?;
    let category = index.position_any(&["分类", "类别"]);
    let related_account = index.position("账户2");
    let currency = index.position("账户币种");
    let description = index.position("备注");
    let relation_id = index.position("关联Id");

    let records = grid[header_index + 1..]
        .iter()
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
        .map(|row| {
            let amount = cell(row, Some(amount)).to_string();
            let currency = cell(row, currency).to_string();
            FeideeRecord {
                kind: cell(row, Some(kind)).to_string(),
                time: cell(row, Some(time)).to_string(),
                category: cell(row, category).to_string(),
                sub_category: cell(row, Some(sub_category)).to_string(),
                account: cell(row, Some(account)).to_string(),
                related_account: cell(row, related_account).to_string(),
                related_currency: currency.clone(),
                currency,
                related_amount: amount.clone(),
                amount,
                description: cell(row, description).to_string(),
                relation_id: cell(row, relation_id).to_string(),
            }
        })
        .collect();

    Ok(records)
}

/// Folds each `转出`/`转入` pair sharing a relation id into one transfer,
/// placed where its first half appeared.
fn merge_transfer_pairs(records: Vec<FeideeRecord>) -> Result<Vec<FeideeRecord>, ImportError> {
    let mut merged: Vec<Option<FeideeRecord>> = Vec::with_capacity(records.len());
    let mut pending: HashMap<String, (usize, FeideeRecord)> = HashMap::new();

    for record in records {
        if record.kind != TYPE_TRANSFER_OUT && record.kind != TYPE_TRANSFER_IN {
            merged.push(Some(record));
            continue;
        }

        if record.relation_id.is_empty() {
            return Err(ImportError::invalid_content(CSV_FORMAT, "transfer half without relation id"));
        }

        match pending.remove(&record.relation_id) {
            Some((slot, other)) => {
                if other.kind == record.kind {
                    return Err(ImportError::invalid_content(
                        CSV_FORMAT,
                        format!("duplicate transfer half for relation {}", record.relation_id),
                    ));
                }
                let (outgoing, incoming) = if record.kind == TYPE_TRANSFER_OUT {
                    (record, other)
                } else {
                    (other, record)
                };
                merged[slot] = Some(FeideeRecord {
                    kind: TYPE_TRANSFER.to_string(),
                    related_account: incoming.account,
                    related_currency: incoming.currency,
                    related_amount: incoming.amount,
                    ..outgoing
                });
            }
            None => {
                pending.insert(record.relation_id.clone(), (merged.len(), record));
                merged.push(None);
            }
        }
    }

    if let Some(relation_id) = pending.keys().next() {
        return Err(ImportError::invalid_content(
            CSV_FORMAT,
            format!("unpaired transfer for relation {relation_id}"),
        ));
    }

    Ok(merged.into_iter().flatten().collect())
}

fn range_to_grid(range: &Range<Data>) -> Vec<Vec<String>> {
    range.rows().map(|row| row.iter().map(cell_text).collect()).collect()
}

fn cell_text(value: &Data) -> String {
    match value {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => float_text(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_text(dt.as_f64()).unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) => s.replacen('T', " ", 1),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => {
            warn!(error = ?e, "Spreadsheet cell holds an error");
            String::new()
        }
        Data::Empty => String::new(),
    }
}

/// Two-digit decimal text for a float cell, e.g. `12.35` for `12.345`.
fn float_text(value: f64) -> String {
    Decimal::from_f64(value)
        .and_then(|d| decimal_to_amount_text(d.round_dp(8)))
        .unwrap_or_else(|| value.to_string())
}

/// Excel serial days count from 1899-12-30, with the time of day as the fraction.
fn excel_serial_to_text(serial: f64) -> Option<String> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (serial * 86_400.0).round();
    if seconds >= i64::MAX as f64 {
        return None;
    }
    let value = base.checked_add_signed(Duration::try_seconds(seconds as i64)?)?;
    Some(to_long_date_time(&value))
}

struct FeideeTable {
    records: Vec<FeideeRecord>,
}

impl TransactionDataTable for FeideeTable {
    fn has_column(&self, column: Column) -> bool {
        !matches!(
            column,
            Column::TransactionTimezone | Column::GeographicLocation | Column::Tags
        )
    }

    fn transaction_row_count(&self) -> usize {
        self.records.len()
    }

    fn transaction_row_iterator(&self) -> Box<dyn TransactionRowIterator + '_> {
        Box::new(FeideeRowIterator {
            records: self.records.iter(),
        })
    }
}

struct FeideeRowIterator<'a> {
    records: std::slice::Iter<'a, FeideeRecord>,
}

impl TransactionRowIterator for FeideeRowIterator<'_> {
    fn has_next(&self) -> bool {
        !self.records.as_slice().is_empty()
    }

    fn next_row(&mut self, _user: &User) -> Result<Option<TransactionRow>, ImportError> {
        let Some(record) = self.records.next() else {
            return Ok(None);
        };

        let unsigned = |text: &str| text.strip_prefix('-').unwrap_or(text).to_string();
        let amount = if record.kind == TYPE_MODIFY_BALANCE {
            record.amount.clone()
        } else {
            unsigned(&record.amount)
        };

        let mut row = TransactionRow::default();
        row.set(Column::TransactionTime, record.time.as_str());
        row.set(Column::TransactionType, record.kind.as_str());
        row.set(Column::Category, record.category.as_str());
        row.set(Column::SubCategory, record.sub_category.as_str());
        row.set(Column::AccountName, record.account.as_str());
        row.set(Column::AccountCurrency, record.currency.as_str());
        row.set(Column::Amount, amount);
        row.set(Column::Description, record.description.as_str());

        if record.kind == TYPE_TRANSFER {
            row.set(Column::RelatedAccountName, record.related_account.as_str());
            row.set(Column::RelatedAccountCurrency, record.related_currency.as_str());
            row.set(Column::RelatedAmount, unsigned(&record.related_amount));
        }

        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new(1, "CNY")
    }

    fn import_csv(text: &str) -> Result<ImportedData, ImportError> {
        FeideeMymoneyCsvImporter.parse_imported_data(&user(), text.as_bytes(), 480, &ExistingEntities::default())
    }

    const CSV_HEADER: &str = "随手记导出文件(headers:v5;xxxxx)\n交易类型,日期,类别,子类别,账户1,账户2,账户币种,金额,成员,商家,项目分类,项目,记账人,备注,关联Id\n";

    #[test]
    fn csv_export_with_transfer_pair() {
        let text = format!(
            "{CSV_HEADER}\
             支出,2024-09-01 12:30:00,餐饮,午餐,现金,,CNY,25.50,,,,,,面条,\n\
             转出,2024-09-02 08:00:00,,,银行卡,,CNY,100.00,,,,,,,T1\n\
             收入,2024-09-03 09:00,职业收入,工资,银行卡,,CNY,8000,,,,,,,\n\
             转入,2024-09-02 08:00:00,,,现金,,CNY,100.00,,,,,,,T1\n\
             余额变更,2024-08-31 00:00:00,,,现金,,CNY,-12.00,,,,,,,\n"
        );
        let data = import_csv(&text).unwrap();

        let summary: Vec<(TransactionType, i64, &str)> = data
            .transactions
            .iter()
            .map(|t| {
                (
                    t.transaction.transaction_type,
                    t.transaction.amount,
                    t.original_source_account_name.as_str(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            [
                (TransactionType::ModifyBalance, -1200, "现金"),
                (TransactionType::Expense, 2550, "现金"),
                (TransactionType::TransferOut, 10000, "银行卡"),
                (TransactionType::Income, 800000, "银行卡"),
            ]
        );

        let transfer = &data.transactions[2];
        assert_eq!(transfer.original_destination_account_name, "现金");
        assert_eq!(transfer.transaction.related_account_amount, 10000);
        assert_eq!(transfer.transaction.timezone_offset_minutes, 480);

        let lunch = data.new_expense_categories.iter().find(|c| c.name == "午餐").unwrap();
        assert!(lunch.parent_id.is_some());
        assert_eq!(data.transactions[1].transaction.comment, "面条");
    }

    #[test]
    fn unpaired_transfer_half_is_rejected() {
        let text = format!("{CSV_HEADER}转出,2024-09-02 08:00:00,,,银行卡,,CNY,100.00,,,,,,,T9\n");
        assert!(matches!(import_csv(&text), Err(ImportError::InvalidFileContent { .. })));
    }

    #[test]
    fn csv_without_marker_is_rejected() {
        assert!(matches!(
            import_csv("交易类型,日期\n"),
            Err(ImportError::InvalidFileHeader { format: CSV_FORMAT })
        ));
    }

    #[test]
    fn csv_missing_required_column() {
        let text = "随手记导出文件\n交易类型,日期,类别,账户1,金额\n支出,2024-09-01 12:30:00,餐饮,现金,1\n";
        assert!(matches!(
            import_csv(text),
            Err(ImportError::MissingRequiredField(ref f)) if f == "子分类/子类别"
        ));
    }

    #[test]
    fn unknown_type_is_invalid() {
        let text = format!("{CSV_HEADER}借入,2024-09-01 12:30:00,,,现金,,CNY,1,,,,,,,\n");
        assert!(matches!(import_csv(&text), Err(ImportError::TransactionTypeInvalid(ref t)) if t == "借入"));
    }

    fn sheet(rows: &[Vec<Data>]) -> Range<Data> {
        let width = rows.iter().map(Vec::len).max().unwrap_or(1) as u32;
        let mut range = Range::new((0, 0), (rows.len() as u32 - 1, width - 1));
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                range.set_value((r as u32, c as u32), value.clone());
            }
        }
        range
    }

    fn text(value: &str) -> Data {
        Data::String(value.to_string())
    }

    #[test]
    fn spreadsheet_cells_become_records() {
        let range = sheet(&[
            vec![text("随手记导出文件")],
            vec![
                text("交易类型"),
                text("日期"),
                text("分类"),
                text("子分类"),
                text("账户1"),
                text("账户2"),
                text("账户币种"),
                text("金额"),
                text("备注"),
            ],
            vec![
                text("转账"),
                Data::DateTimeIso("2024-09-01T12:00:00".to_string()),
                Data::Empty,
                Data::Empty,
                text("银行卡"),
                text("支付宝"),
                text("CNY"),
                Data::Float(99.9),
                text("充值"),
            ],
            vec![
                text("支出"),
                text("2024-09-02 10:00"),
                text("交通"),
                text("地铁"),
                text("支付宝"),
                Data::Empty,
                text("CNY"),
                Data::Int(4),
                Data::Empty,
            ],
        ]);

        let grid = range_to_grid(&range);
        assert_eq!(header_row(&grid), Some(1));

        let records = read_records(&grid, SPREADSHEET_FORMAT).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, "2024-09-01 12:00:00");
        assert_eq!(records[0].amount, "99.90");
        assert_eq!(records[0].related_account, "支付宝");
        assert_eq!(records[1].amount, "4");

        let data = import_records(&user(), records, 480, &ExistingEntities::default()).unwrap();
        assert_eq!(data.transactions[0].transaction.transaction_type, TransactionType::TransferOut);
        assert_eq!(data.transactions[0].transaction.amount, 9990);
        assert_eq!(data.transactions[0].transaction.related_account_amount, 9990);
        assert_eq!(data.transactions[1].transaction.amount, 400);
        assert_eq!(data.new_accounts.len(), 2);
    }

    #[test]
    fn float_cells_become_two_digit_amounts() {
        assert_eq!(float_text(0.1 + 0.2), "0.30");
        assert_eq!(float_text(-12.5), "-12.50");
        assert_eq!(float_text(100.0), "100.00");
        assert_eq!(float_text(12.345), "12.35");
        assert_eq!(float_text(-0.125), "-0.13");
    }

    #[test]
    fn three_decimal_amount_cell_imports_rounded() {
        let range = sheet(&[
            vec![text("交易类型"), text("日期"), text("子分类"), text("账户1"), text("金额")],
            vec![
                text("收入"),
                text("2024-09-01 08:00:00"),
                text("利息"),
                text("银行卡"),
                Data::Float(12.345),
            ],
        ]);
        let records = read_records(&range_to_grid(&range), SPREADSHEET_FORMAT).unwrap();

        let data = import_records(&user(), records, 480, &ExistingEntities::default()).unwrap();
        assert_eq!(data.transactions[0].transaction.amount, 1235);
    }

    #[test]
    fn serial_dates() {
        assert_eq!(excel_serial_to_text(45667.0).as_deref(), Some("2025-01-10 00:00:00"));
        assert_eq!(excel_serial_to_text(45667.75).as_deref(), Some("2025-01-10 18:00:00"));
        assert_eq!(excel_serial_to_text(-1.0), None);
    }

    #[test]
    fn out_of_range_serial_dates_are_rejected() {
        assert_eq!(excel_serial_to_text(1e20), None);
        assert_eq!(excel_serial_to_text(1e12), None);
        assert_eq!(excel_serial_to_text(f64::INFINITY), None);
    }

    #[test]
    fn spreadsheet_requires_container_magic() {
        assert!(matches!(
            FeideeMymoneySpreadsheetImporter.parse_imported_data(&user(), b"a,b\n", 0, &ExistingEntities::default()),
            Err(ImportError::InvalidFileHeader { format: SPREADSHEET_FORMAT })
        ));
    }
}
