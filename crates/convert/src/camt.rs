//! ISO 20022 bank-to-customer reports (camt.052) and statements (camt.053).

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use roxmltree::Node;
use tallyport_core::datetime::{format_timezone_offset, to_long_date_time};
use tallyport_core::{TransactionType, User};
use tracing::debug;

use crate::datatable::{Column, TransactionDataTable, TransactionRow, TransactionRowIterator};
use crate::error::ImportError;
use crate::importer::{default_type_mapping, DataTableImporter, ExistingEntities, ImportedData, TransactionDataImporter};
use crate::util::{decimal_text_to_amount_text, decode_xml, parse_xml, xml_child, xml_children, xml_path, xml_text};

const FORMAT: &str = "camt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CamtVariant {
    /// camt.052, `BkToCstmrAcctRpt/Rpt`
    AccountReport,
    /// camt.053, `BkToCstmrStmt/Stmt`
    Statement,
}

impl CamtVariant {
    fn container(self) -> (&'static str, &'static str) {
        match self {
            CamtVariant::AccountReport => ("BkToCstmrAcctRpt", "Rpt"),
            CamtVariant::Statement => ("BkToCstmrStmt", "Stmt"),
        }
    }
}

pub struct CamtImporter {
    variant: CamtVariant,
}

impl CamtImporter {
    pub fn new(variant: CamtVariant) -> Self {
        Self { variant }
    }
}

impl TransactionDataImporter for CamtImporter {
    fn parse_imported_data(
        &self,
        user: &User,
        data: &[u8],
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError> {
        let statements = read_statements(data, self.variant)?;
        debug!(statements = statements.len(), "Read camt statements");

        let table = CamtTable { statements };
        DataTableImporter::new(default_type_mapping(), "", "").parse(user, &table, default_timezone_offset, existing)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CamtAmount {
    value: String,
    currency: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct CamtStatement {
    account: Option<String>,
    currency: Option<String>,
    entries: Vec<CamtEntry>,
}

#[derive(Debug, Clone, Default)]
struct CamtEntry {
    amount: Option<CamtAmount>,
    credit_debit: Option<String>,
    status: Option<String>,
    reversal: bool,
    time: Option<String>,
    additional_info: Option<String>,
    details: Vec<CamtDetail>,
}

#[derive(Debug, Clone, Default)]
struct CamtDetail {
    amount: Option<CamtAmount>,
    credit_debit: Option<String>,
    remittance: Option<String>,
    additional_info: Option<String>,
}

fn read_statements(data: &[u8], variant: CamtVariant) -> Result<Vec<CamtStatement>, ImportError> {
    let text = decode_xml(data, FORMAT)?;
    let document = parse_xml(&text, FORMAT)?;
    let root = document.root_element();

    if root.tag_name().name() != "Document" {
        return Err(ImportError::invalid_content(FORMAT, "root element is not Document"));
    }

    let (container_name, statement_name) = variant.container();
    let container = xml_child(root, container_name)
        .ok_or_else(|| ImportError::invalid_content(FORMAT, format!("missing {container_name}")))?;

    Ok(xml_children(container, statement_name).map(read_statement).collect())
}

fn read_statement(node: Node<'_, '_>) -> CamtStatement {
    CamtStatement {
        account: xml_text(node, &["Acct", "Id", "IBAN"]).or_else(|| xml_text(node, &["Acct", "Id", "Othr", "Id"])),
        currency: xml_text(node, &["Acct", "Ccy"]),
        entries: xml_children(node, "Ntry").map(read_entry).collect(),
    }
}

fn read_entry(node: Node<'_, '_>) -> CamtEntry {
    let time = [
        ["BookgDt", "DtTm"],
        ["BookgDt", "Dt"],
        ["ValDt", "DtTm"],
        ["ValDt", "Dt"],
    ]
    .iter()
    .find_map(|path| xml_text(node, path));

    let details = xml_children(node, "NtryDtls")
        .flat_map(|group| xml_children(group, "TxDtls"))
        .map(read_detail)
        .collect();

    CamtEntry {
        amount: read_amount(node, &["Amt"]),
        credit_debit: xml_text(node, &["CdtDbtInd"]),
        status: xml_text(node, &["Sts", "Cd"]).or_else(|| xml_text(node, &["Sts"])),
        reversal: xml_text(node, &["RvslInd"]).is_some_and(|v| v.eq_ignore_ascii_case("true")),
        time,
        additional_info: xml_text(node, &["AddtlNtryInf"]),
        details,
    }
}

fn read_detail(node: Node<'_, '_>) -> CamtDetail {
    let remittance: Vec<String> = xml_child(node, "RmtInf")
        .map(|info| {
            xml_children(info, "Ustrd")
                .filter_map(|n| n.text())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    CamtDetail {
        amount: read_amount(node, &["Amt"]).or_else(|| read_amount(node, &["AmtDtls", "TxAmt", "Amt"])),
        credit_debit: xml_text(node, &["CdtDbtInd"]),
        remittance: (!remittance.is_empty()).then(|| remittance.join(" ")),
        additional_info: xml_text(node, &["AddtlTxInf"]),
    }
}

fn read_amount(node: Node<'_, '_>, path: &[&str]) -> Option<CamtAmount> {
    let element = xml_path(node, path)?;
    let value = element.text().map(str::trim).filter(|s| !s.is_empty())?;
    Some(CamtAmount {
        value: value.to_string(),
        currency: element
            .attribute("Ccy")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}

/// Statement -> entry -> detail counts, so the flattening walk can be
/// exercised without XML.
pub(crate) trait NestedShape {
    fn statement_count(&self) -> usize;
    fn entry_count(&self, statement: usize) -> usize;
    fn detail_count(&self, statement: usize, entry: usize) -> usize;
}

impl NestedShape for Vec<CamtStatement> {
    fn statement_count(&self) -> usize {
        self.len()
    }

    fn entry_count(&self, statement: usize) -> usize {
        self.get(statement).map_or(0, |s| s.entries.len())
    }

    fn detail_count(&self, statement: usize, entry: usize) -> usize {
        self.get(statement)
            .and_then(|s| s.entries.get(entry))
            .map_or(0, |e| e.details.len())
    }
}

/// A leaf of the statement tree. `detail` is `None` for an entry without details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub statement: usize,
    pub entry: usize,
    pub detail: Option<usize>,
}

/// Visits every detail, or the entry itself when it has none, exactly once.
#[derive(Debug)]
pub(crate) struct StatementCursor {
    next: Option<Position>,
}

impl StatementCursor {
    pub(crate) fn new(shape: &impl NestedShape) -> Self {
        Self {
            next: first_leaf_from(shape, 0, 0),
        }
    }

    pub(crate) fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub(crate) fn advance(&mut self, shape: &impl NestedShape) -> Option<Position> {
        let current = self.next?;

        self.next = match current.detail {
            Some(detail) if detail + 1 < shape.detail_count(current.statement, current.entry) => Some(Position {
                detail: Some(detail + 1),
                ..current
            }),
            _ => first_leaf_from(shape, current.statement, current.entry + 1),
        };

        Some(current)
    }
}

fn first_leaf_from(shape: &impl NestedShape, mut statement: usize, mut entry: usize) -> Option<Position> {
    while statement < shape.statement_count() {
        if entry < shape.entry_count(statement) {
            let detail = (shape.detail_count(statement, entry) > 0).then_some(0);
            return Some(Position { statement, entry, detail });
        }
        statement += 1;
        entry = 0;
    }
    None
}

fn leaf_count(shape: &impl NestedShape) -> usize {
    (0..shape.statement_count())
        .flat_map(|s| (0..shape.entry_count(s)).map(move |e| (s, e)))
        .map(|(s, e)| shape.detail_count(s, e).max(1))
        .sum()
}

struct CamtTable {
    statements: Vec<CamtStatement>,
}

impl TransactionDataTable for CamtTable {
    fn has_column(&self, column: Column) -> bool {
        matches!(
            column,
            Column::TransactionTime
                | Column::TransactionTimezone
                | Column::TransactionType
                | Column::AccountName
                | Column::AccountCurrency
                | Column::Amount
                | Column::Description
        )
    }

    fn transaction_row_count(&self) -> usize {
        leaf_count(&self.statements)
    }

    fn transaction_row_iterator(&self) -> Box<dyn TransactionRowIterator + '_> {
        Box::new(CamtRowIterator {
            statements: &self.statements,
            cursor: StatementCursor::new(&self.statements),
        })
    }
}

struct CamtRowIterator<'a> {
    statements: &'a Vec<CamtStatement>,
    cursor: StatementCursor,
}

impl TransactionRowIterator for CamtRowIterator<'_> {
    fn has_next(&self) -> bool {
        self.cursor.has_next()
    }

    fn next_row(&mut self, _user: &User) -> Result<Option<TransactionRow>, ImportError> {
        let Some(position) = self.cursor.advance(self.statements) else {
            return Ok(None);
        };

        let statement = &self.statements[position.statement];
        let entry = &statement.entries[position.entry];
        let detail = position.detail.map(|d| &entry.details[d]);

        if entry.status.as_deref().is_some_and(|s| s != "BOOK") {
            debug!(status = entry.status.as_deref(), "Skipping unbooked camt entry");
            return Ok(Some(TransactionRow::invalid()));
        }

        let mut row = TransactionRow::default();

        if let Some(time) = &entry.time {
            let (local, offset) = parse_iso_date_time(time).ok_or_else(|| ImportError::TransactionTimeInvalid(time.clone()))?;
            row.set(Column::TransactionTime, to_long_date_time(&local));
            if let Some(offset) = offset {
                row.set(Column::TransactionTimezone, format_timezone_offset(offset));
            }
        }

        let indicator = detail
            .and_then(|d| d.credit_debit.as_deref())
            .or(entry.credit_debit.as_deref())
            .unwrap_or("");
        row.set(Column::TransactionType, transaction_type_name(indicator, entry.reversal));

        let amount = entry_amount(entry, detail)?;
        row.set(
            Column::Amount,
            decimal_text_to_amount_text(&amount.value).ok_or_else(|| ImportError::AmountInvalid(amount.value.clone()))?,
        );

        if let Some(account) = &statement.account {
            row.set(Column::AccountName, account.as_str());
        }
        let currency = amount
            .currency
            .as_ref()
            .or_else(|| entry.amount.as_ref().and_then(|a| a.currency.as_ref()))
            .or(statement.currency.as_ref());
        if let Some(currency) = currency {
            row.set(Column::AccountCurrency, currency.as_str());
        }

        let description = detail
            .and_then(|d| d.remittance.as_ref().or(d.additional_info.as_ref()))
            .or(entry.additional_info.as_ref());
        if let Some(description) = description {
            row.set(Column::Description, description.as_str());
        }

        Ok(Some(row))
    }
}

/// Several details make the entry amount an aggregate, so each detail must
/// carry its own.
fn entry_amount<'a>(entry: &'a CamtEntry, detail: Option<&'a CamtDetail>) -> Result<&'a CamtAmount, ImportError> {
    let detail_amount = detail.and_then(|d| d.amount.as_ref());

    if entry.details.len() > 1 {
        return detail_amount.ok_or_else(|| ImportError::AmountInvalid(String::new()));
    }

    detail_amount
        .or(entry.amount.as_ref())
        .ok_or_else(|| ImportError::AmountInvalid(String::new()))
}

fn transaction_type_name(indicator: &str, reversal: bool) -> String {
    let credit = match indicator {
        "CRDT" => true,
        "DBIT" => false,
        other => return other.to_string(),
    };

    let transaction_type = if credit != reversal {
        TransactionType::Income
    } else {
        TransactionType::Expense
    };
    transaction_type.display_name().to_string()
}

/// `YYYY-MM-DDTHH:MM:SS[.fff][offset]` or a bare `YYYY-MM-DD`.
fn parse_iso_date_time(text: &str) -> Option<(NaiveDateTime, Option<i32>)> {
    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Some((value.naive_local(), Some(value.offset().local_minus_utc() / 60)));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some((value, None));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|value| (value, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    impl NestedShape for Vec<Vec<usize>> {
        fn statement_count(&self) -> usize {
            self.len()
        }

        fn entry_count(&self, statement: usize) -> usize {
            self[statement].len()
        }

        fn detail_count(&self, statement: usize, entry: usize) -> usize {
            self[statement][entry]
        }
    }

    fn walk(shape: &Vec<Vec<usize>>) -> Vec<(usize, usize, Option<usize>)> {
        let mut cursor = StatementCursor::new(shape);
        let mut out = Vec::new();
        while cursor.has_next() {
            let p = cursor.advance(shape).unwrap();
            out.push((p.statement, p.entry, p.detail));
        }
        out
    }

    #[test]
    fn cursor_visits_every_leaf_once() {
        let shape = vec![vec![0, 2], vec![], vec![1], vec![], vec![3, 0]];
        assert_eq!(
            walk(&shape),
            [
                (0, 0, None),
                (0, 1, Some(0)),
                (0, 1, Some(1)),
                (2, 0, Some(0)),
                (4, 0, Some(0)),
                (4, 0, Some(1)),
                (4, 0, Some(2)),
                (4, 1, None),
            ]
        );
        assert_eq!(leaf_count(&shape), 8);
    }

    #[test]
    fn cursor_handles_empty_shapes() {
        assert!(walk(&vec![]).is_empty());
        assert!(walk(&vec![vec![], vec![]]).is_empty());
        assert_eq!(leaf_count(&vec![vec![], vec![]]), 0);
    }

    #[test]
    fn leaf_count_matches_walk() {
        for shape in [vec![vec![5]], vec![vec![0, 0, 0]], vec![vec![], vec![1, 0, 2], vec![]]] {
            assert_eq!(walk(&shape).len(), leaf_count(&shape));
        }
    }

    fn document(statements: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02">
  <BkToCstmrStmt>
    <GrpHdr><MsgId>1</MsgId></GrpHdr>
    {statements}
  </BkToCstmrStmt>
</Document>"#
        )
    }

    fn statement(iban: &str, entries: &str) -> String {
        format!(
            "<Stmt><Id>s</Id><Acct><Id><IBAN>{iban}</IBAN></Id><Ccy>EUR</Ccy></Acct>{entries}</Stmt>"
        )
    }

    fn entry(amount: &str, indicator: &str, time: &str, extra: &str) -> String {
        format!(
            "<Ntry><Amt Ccy=\"EUR\">{amount}</Amt><CdtDbtInd>{indicator}</CdtDbtInd>\
             <Sts><Cd>BOOK</Cd></Sts><BookgDt><DtTm>{time}</DtTm></BookgDt>{extra}</Ntry>"
        )
    }

    fn import(xml: &str) -> Result<ImportedData, ImportError> {
        CamtImporter::new(CamtVariant::Statement).parse_imported_data(
            &User::new(1, "USD"),
            xml.as_bytes(),
            60,
            &ExistingEntities::default(),
        )
    }

    #[test]
    fn two_statements_three_entries() {
        let xml = document(&format!(
            "{}{}",
            statement(
                "DE00111",
                &format!(
                    "{}{}",
                    entry("123.45", "CRDT", "2024-09-01T10:00:00+02:00", ""),
                    entry("0.12", "CRDT", "2024-09-02T10:00:00+02:00", "")
                )
            ),
            statement("DE00222", &entry("1.23", "DBIT", "2024-09-03T10:00:00", ""))
        ));

        let data = import(&xml).unwrap();
        assert_eq!(data.transactions.len(), 3);
        assert_eq!(data.new_accounts.len(), 2);
        assert!(data.new_accounts.iter().all(|a| a.currency == "EUR"));

        let summary: Vec<(TransactionType, i64, i32)> = data
            .transactions
            .iter()
            .map(|t| {
                (
                    t.transaction.transaction_type,
                    t.transaction.amount,
                    t.transaction.timezone_offset_minutes,
                )
            })
            .collect();
        assert_eq!(
            summary,
            [
                (TransactionType::Income, 12345, 120),
                (TransactionType::Income, 12, 120),
                (TransactionType::Expense, 123, 60),
            ]
        );
        assert_eq!(data.transactions[2].original_source_account_name, "DE00222");
        assert_eq!(data.transactions[0].transaction.category_id, 0);
    }

    #[test]
    fn invalid_date_time_aborts_import() {
        let xml = document(&statement("DE00111", &entry("1.00", "CRDT", "2024", "")));
        let err = import(&xml).unwrap_err();
        assert!(matches!(err, ImportError::TransactionTimeInvalid(ref t) if t == "2024"));
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn multiple_details_without_amounts_are_rejected() {
        let details = "<NtryDtls><TxDtls><RmtInf><Ustrd>a</Ustrd></RmtInf></TxDtls>\
                       <TxDtls><RmtInf><Ustrd>b</Ustrd></RmtInf></TxDtls></NtryDtls>";
        let xml = document(&statement("DE00111", &entry("5.00", "DBIT", "2024-09-01T10:00:00", details)));
        assert!(matches!(import(&xml), Err(ImportError::AmountInvalid(_))));
    }

    #[test]
    fn details_become_separate_rows() {
        let details = "<NtryDtls><TxDtls><Amt Ccy=\"USD\">2.00</Amt><RmtInf><Ustrd>first</Ustrd><Ustrd>line</Ustrd></RmtInf></TxDtls>\
                       <TxDtls><AmtDtls><TxAmt><Amt Ccy=\"USD\">3.00</Amt></TxAmt></AmtDtls><AddtlTxInf>second</AddtlTxInf></TxDtls></NtryDtls>";
        let xml = document(&statement("DE00111", &entry("5.00", "DBIT", "2024-09-01", details)));

        let data = import(&xml).unwrap();
        let rows: Vec<(i64, &str)> = data
            .transactions
            .iter()
            .map(|t| (t.transaction.amount, t.transaction.comment.as_str()))
            .collect();
        assert_eq!(rows, [(200, "first line"), (300, "second")]);
        assert_eq!(data.new_accounts[0].currency, "USD");
        assert_eq!(data.transactions[0].transaction.timezone_offset_minutes, 60);
    }

    #[test]
    fn single_detail_falls_back_to_entry_amount() {
        let details = "<NtryDtls><TxDtls><AddtlTxInf>fee</AddtlTxInf></TxDtls></NtryDtls><AddtlNtryInf>entry</AddtlNtryInf>";
        let xml = document(&statement("DE00111", &entry("4.50", "DBIT", "2024-09-01T08:00:00", details)));
        let data = import(&xml).unwrap();
        assert_eq!(data.transactions[0].transaction.amount, 450);
        assert_eq!(data.transactions[0].transaction.comment, "fee");
    }

    #[test]
    fn detail_amount_without_currency_takes_the_entry_currency() {
        let details = "<NtryDtls><TxDtls><Amt>2.00</Amt></TxDtls></NtryDtls>";
        let ntry = format!(
            "<Ntry><Amt Ccy=\"USD\">2.00</Amt><CdtDbtInd>DBIT</CdtDbtInd><Sts><Cd>BOOK</Cd></Sts>\
             <BookgDt><DtTm>2024-09-01T08:00:00</DtTm></BookgDt>{details}</Ntry>"
        );
        let xml = document(&statement("DE00111", &ntry));

        let data = import(&xml).unwrap();
        assert_eq!(data.transactions[0].transaction.amount, 200);
        assert_eq!(data.new_accounts[0].currency, "USD");
        assert_eq!(data.transactions[0].original_source_account_currency, "USD");
    }

    #[test]
    fn pending_entries_are_skipped_and_reversals_flip() {
        let pending = "<Ntry><Amt Ccy=\"EUR\">9.00</Amt><CdtDbtInd>CRDT</CdtDbtInd><Sts>PDNG</Sts>\
                       <BookgDt><Dt>2024-09-01</Dt></BookgDt></Ntry>";
        let reversed = entry("7.00", "CRDT", "2024-09-02T00:00:00Z", "<RvslInd>true</RvslInd>");
        let xml = document(&statement("DE00111", &format!("{pending}{reversed}")));

        let data = import(&xml).unwrap();
        assert_eq!(data.transactions.len(), 1);
        assert_eq!(data.transactions[0].transaction.transaction_type, TransactionType::Expense);
        assert_eq!(data.transactions[0].transaction.timezone_offset_minutes, 0);
    }

    #[test]
    fn account_report_uses_its_own_container() {
        let xml = r#"<?xml version="1.0"?>
<Document><BkToCstmrAcctRpt><Rpt><Acct><Id><Othr><Id>12345</Id></Othr></Id></Acct>
<Ntry><Amt Ccy="CHF">10</Amt><CdtDbtInd>CRDT</CdtDbtInd><ValDt><Dt>2024-01-05</Dt></ValDt></Ntry>
</Rpt></BkToCstmrAcctRpt></Document>"#;

        let data = CamtImporter::new(CamtVariant::AccountReport)
            .parse_imported_data(&User::new(1, "USD"), xml.as_bytes(), 0, &ExistingEntities::default())
            .unwrap();
        assert_eq!(data.new_accounts[0].name, "12345");
        assert_eq!(data.new_accounts[0].currency, "CHF");
        assert_eq!(data.transactions[0].transaction.amount, 1000);

        assert!(matches!(import(xml), Err(ImportError::InvalidFileContent { .. })));
    }

    #[test]
    fn statement_without_entries_is_not_found() {
        let xml = document(&statement("DE00111", ""));
        assert!(matches!(import(&xml), Err(ImportError::TransactionDataNotFound)));
    }

    #[test]
    fn non_xml_payload_is_rejected() {
        assert!(matches!(
            import("Date,Amount\n"),
            Err(ImportError::InvalidFileHeader { format: "camt" })
        ));
    }
}
