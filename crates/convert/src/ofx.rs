//! Open Financial Exchange statements, SGML 1.x and XML 2.x.

use chrono::{NaiveDate, NaiveDateTime};
use tallyport_core::datetime::{format_timezone_offset, to_long_date_time};
use tallyport_core::{TransactionType, User};
use tracing::debug;

use crate::datatable::{Column, TransactionDataTable, TransactionRow, TransactionRowIterator};
use crate::error::ImportError;
use crate::importer::{default_type_mapping, DataTableImporter, ExistingEntities, ImportedData, TransactionDataImporter};
use crate::util::{abs_amount_text, decimal_text_to_amount_text, decode_with_label, decode_xml, strip_utf8_bom, trim_ascii_start};

const FORMAT: &str = "ofx";

pub struct OfxImporter;

impl TransactionDataImporter for OfxImporter {
    fn parse_imported_data(
        &self,
        user: &User,
        data: &[u8],
        default_timezone_offset: i32,
        existing: &ExistingEntities,
    ) -> Result<ImportedData, ImportError> {
        let text = decode_ofx(data)?;
        let root = OfxElement::parse(&text);
        let ofx = root
            .child("OFX")
            .ok_or_else(|| ImportError::invalid_content(FORMAT, "missing OFX element"))?;

        let transactions = read_transactions(ofx);
        debug!(transactions = transactions.len(), "Read ofx transactions");

        let table = OfxTable { transactions };
        DataTableImporter::new(default_type_mapping(), "", "").parse(user, &table, default_timezone_offset, existing)
    }
}

/// Sniffs the header variant and decodes the payload in the charset it names.
fn decode_ofx(data: &[u8]) -> Result<String, ImportError> {
    let body = trim_ascii_start(strip_utf8_bom(data));

    if body.starts_with(b"OFXHEADER:100") {
        let header_end = body.iter().position(|b| *b == b'<').unwrap_or(body.len());
        let header = String::from_utf8_lossy(&body[..header_end]);
        let label = header_charset(&header);
        return decode_with_label(body, label.as_deref(), FORMAT);
    }

    if body.starts_with(b"<?xml") {
        let text = decode_xml(body, FORMAT)?;
        if !text.contains("<?OFX") {
            return Err(ImportError::InvalidFileHeader { format: FORMAT });
        }
        return Ok(text);
    }

    if body.len() >= 5 && body[..5].eq_ignore_ascii_case(b"<OFX>") {
        return decode_with_label(body, None, FORMAT);
    }

    Err(ImportError::InvalidFileHeader { format: FORMAT })
}

/// `ENCODING:UTF-8` wins. `CHARSET:1252` names a Windows code page and
/// `CHARSET:NONE` means the default.
fn header_charset(header: &str) -> Option<String> {
    let value = |key: &str| {
        header.lines().find_map(|line| {
            let (name, value) = line.trim().split_once(':')?;
            name.trim().eq_ignore_ascii_case(key).then(|| value.trim().to_string())
        })
    };

    if value("ENCODING").is_some_and(|e| e.eq_ignore_ascii_case("UTF-8")) {
        return Some("utf-8".to_string());
    }

    match value("CHARSET") {
        None => None,
        Some(charset) if charset.is_empty() || charset.eq_ignore_ascii_case("NONE") => None,
        Some(charset) if charset.chars().all(|c| c.is_ascii_digit()) => Some(format!("windows-{charset}")),
        Some(charset) => Some(charset),
    }
}

/// A node of the OFX tree. Leaf aggregates carry `text`.
#[derive(Debug, Clone, Default, PartialEq)]
struct OfxElement {
    name: String,
    text: Option<String>,
    children: Vec<OfxElement>,
}

impl OfxElement {
    /// Builds a tree from SGML or XML markup. SGML leaves are closed implicitly
    /// by the next tag, and an unmatched end tag is ignored.
    fn parse(text: &str) -> OfxElement {
        let mut stack = vec![OfxElement::default()];
        let mut rest = text;

        while let Some(open) = rest.find('<') {
            let content = rest[..open].trim();
            if !content.is_empty() {
                if let Some(top) = stack.last_mut() {
                    top.text = Some(decode_entities(content));
                }
            }

            let after = &rest[open + 1..];
            let Some(close) = after.find('>') else {
                break;
            };
            let tag = after[..close].trim();
            rest = &after[close + 1..];

            if tag.starts_with('?') || tag.starts_with('!') || tag.is_empty() {
                continue;
            }

            if let Some(name) = tag.strip_prefix('/') {
                let name = name.trim().to_ascii_uppercase();
                if stack[1..].iter().any(|e| e.name == name) {
                    while let Some(element) = stack.pop() {
                        let done = element.name == name;
                        attach(&mut stack, element);
                        if done {
                            break;
                        }
                    }
                }
                continue;
            }

            if stack.len() > 1 && stack.last().is_some_and(|e| e.text.is_some()) {
                if let Some(leaf) = stack.pop() {
                    attach(&mut stack, leaf);
                }
            }

            let (name, self_closing) = match tag.strip_suffix('/') {
                Some(name) => (name, true),
                None => (tag, false),
            };
            let name = name.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
            let element = OfxElement {
                name,
                ..Default::default()
            };

            if self_closing {
                attach(&mut stack, element);
            } else {
                stack.push(element);
            }
        }

        while stack.len() > 1 {
            if let Some(element) = stack.pop() {
                attach(&mut stack, element);
            }
        }

        stack.pop().unwrap_or_default()
    }

    fn child(&self, name: &str) -> Option<&OfxElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a OfxElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn path(&self, path: &[&str]) -> Option<&OfxElement> {
        path.iter().try_fold(self, |current, name| current.child(name))
    }

    fn text_at(&self, path: &[&str]) -> Option<String> {
        self.path(path)
            .and_then(|e| e.text.as_deref())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

fn attach(stack: &mut [OfxElement], element: OfxElement) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let decoded = candidate.find(';').and_then(|end| {
            let entity = &candidate[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &candidate[end + 1..];
            }
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Default)]
struct OfxTransaction {
    account: Option<String>,
    statement_currency: Option<String>,
    transaction_type: String,
    posted: Option<String>,
    amount: Option<String>,
    currency: Option<String>,
    destination: Option<String>,
    description: Option<String>,
}

fn read_transactions(ofx: &OfxElement) -> Vec<OfxTransaction> {
    let bank = ofx
        .children("BANKMSGSRSV1")
        .flat_map(|m| m.children("STMTTRNRS"))
        .flat_map(|t| t.children("STMTRS"))
        .map(|s| (s, "BANKACCTFROM"));
    let card = ofx
        .children("CREDITCARDMSGSRSV1")
        .flat_map(|m| m.children("CCSTMTTRNRS"))
        .flat_map(|t| t.children("CCSTMTRS"))
        .map(|s| (s, "CCACCTFROM"));

    let mut transactions = Vec::new();
    for (statement, account_aggregate) in bank.chain(card) {
        let account = statement.text_at(&[account_aggregate, "ACCTID"]);
        let statement_currency = statement.text_at(&["CURDEF"]);

        let Some(list) = statement.child("BANKTRANLIST") else {
            continue;
        };

        for entry in list.children("STMTTRN") {
            transactions.push(OfxTransaction {
                account: account.clone(),
                statement_currency: statement_currency.clone(),
                transaction_type: entry.text_at(&["TRNTYPE"]).unwrap_or_default().to_ascii_uppercase(),
                posted: entry.text_at(&["DTPOSTED"]).or_else(|| entry.text_at(&["DTUSER"])),
                amount: entry.text_at(&["TRNAMT"]),
                currency: entry
                    .text_at(&["CURRENCY", "CURSYM"])
                    .or_else(|| entry.text_at(&["ORIGCURRENCY", "CURSYM"])),
                destination: entry
                    .text_at(&["BANKACCTTO", "ACCTID"])
                    .or_else(|| entry.text_at(&["CCACCTTO", "ACCTID"])),
                description: entry
                    .text_at(&["MEMO"])
                    .or_else(|| entry.text_at(&["NAME"]))
                    .or_else(|| entry.text_at(&["PAYEE", "NAME"])),
            });
        }
    }

    transactions
}

fn classify(transaction_type: &str, negative: bool, has_destination: bool) -> TransactionType {
    match transaction_type {
        "CREDIT" | "INT" | "DIV" | "DEP" | "DIRECTDEP" => TransactionType::Income,
        "DEBIT" | "FEE" | "SRVCHG" | "POS" | "CHECK" | "PAYMENT" | "DIRECTDEBIT" | "REPEATPMT" => {
            TransactionType::Expense
        }
        "XFER" if has_destination && negative => TransactionType::TransferOut,
        _ if negative => TransactionType::Expense,
        _ => TransactionType::Income,
    }
}

/// `TRNAMT` with either `.` or a lone `,` as decimal mark.
fn normalize_amount(text: &str) -> Option<String> {
    let text = text.trim();
    let normalized = if text.contains('.') {
        text.replace(',', "")
    } else {
        text.replace(',', ".")
    };
    decimal_text_to_amount_text(&normalized)
}

/// `YYYYMMDD[HHMM[SS[.XXX]]][[±H[.hh]][:TZNAME]]`
fn parse_ofx_date_time(text: &str) -> Option<(NaiveDateTime, Option<i32>)> {
    let text = text.trim();
    let (stamp, zone) = match text.find('[') {
        Some(index) => (&text[..index], Some(text[index + 1..].strip_suffix(']')?)),
        None => (text, None),
    };

    let (main, fraction) = match stamp.split_once('.') {
        Some((main, fraction)) => (main, Some(fraction)),
        None => (stamp, None),
    };
    if !main.bytes().all(|b| b.is_ascii_digit()) || fraction.is_some_and(|f| !f.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }

    let number = |range: std::ops::Range<usize>| main.get(range).and_then(|s| s.parse::<u32>().ok());
    let (hour, minute, second) = match main.len() {
        8 => (0, 0, 0),
        12 => (number(8..10)?, number(10..12)?, 0),
        14 => (number(8..10)?, number(10..12)?, number(12..14)?),
        _ => return None,
    };
    let year = i32::try_from(number(0..4)?).ok()?;
    let local = NaiveDate::from_ymd_opt(year, number(4..6)?, number(6..8)?)?.and_hms_opt(hour, minute, second)?;

    let offset = match zone {
        Some(zone) => {
            let hours = zone.split(':').next().unwrap_or("").trim();
            if hours.is_empty() {
                None
            } else {
                let hours: f64 = hours.parse().ok()?;
                let minutes = (hours * 60.0).round();
                if minutes.abs() > 14.0 * 60.0 {
                    return None;
                }
                Some(minutes as i32)
            }
        }
        None => None,
    };

    Some((local, offset))
}

struct OfxTable {
    transactions: Vec<OfxTransaction>,
}

impl TransactionDataTable for OfxTable {
    fn has_column(&self, column: Column) -> bool {
        matches!(
            column,
            Column::TransactionTime
                | Column::TransactionTimezone
                | Column::TransactionType
                | Column::AccountName
                | Column::AccountCurrency
                | Column::Amount
                | Column::RelatedAccountName
                | Column::RelatedAccountCurrency
                | Column::RelatedAmount
                | Column::Description
        )
    }

    fn transaction_row_count(&self) -> usize {
        self.transactions.len()
    }

    fn transaction_row_iterator(&self) -> Box<dyn TransactionRowIterator + '_> {
        Box::new(OfxRowIterator {
            transactions: self.transactions.iter(),
        })
    }
}

struct OfxRowIterator<'a> {
    transactions: std::slice::Iter<'a, OfxTransaction>,
}

impl TransactionRowIterator for OfxRowIterator<'_> {
    fn has_next(&self) -> bool {
        !self.transactions.as_slice().is_empty()
    }

    fn next_row(&mut self, _user: &User) -> Result<Option<TransactionRow>, ImportError> {
        let Some(transaction) = self.transactions.next() else {
            return Ok(None);
        };

        let mut row = TransactionRow::default();

        if let Some(posted) = &transaction.posted {
            let (local, offset) =
                parse_ofx_date_time(posted).ok_or_else(|| ImportError::TransactionTimeInvalid(posted.clone()))?;
            row.set(Column::TransactionTime, to_long_date_time(&local));
            if let Some(offset) = offset {
                row.set(Column::TransactionTimezone, format_timezone_offset(offset));
            }
        }

        let raw_amount = transaction.amount.as_deref().unwrap_or("");
        let amount = normalize_amount(raw_amount).ok_or_else(|| ImportError::AmountInvalid(raw_amount.to_string()))?;
        let negative = amount.starts_with('-');
        let amount = abs_amount_text(&amount).to_string();

        let transaction_type = classify(
            &transaction.transaction_type,
            negative,
            transaction.destination.is_some(),
        );
        row.set(Column::TransactionType, transaction_type.display_name());

        let currency = transaction
            .currency
            .as_ref()
            .or(transaction.statement_currency.as_ref());

        if let Some(account) = &transaction.account {
            row.set(Column::AccountName, account.as_str());
        }
        if let Some(currency) = currency {
            row.set(Column::AccountCurrency, currency.as_str());
        }

        if transaction_type == TransactionType::TransferOut {
            if let Some(destination) = &transaction.destination {
                row.set(Column::RelatedAccountName, destination.as_str());
            }
            if let Some(currency) = currency {
                row.set(Column::RelatedAccountCurrency, currency.as_str());
            }
            row.set(Column::RelatedAmount, amount.as_str());
        }

        row.set(Column::Amount, amount);

        if let Some(description) = &transaction.description {
            row.set(Column::Description, description.as_str());
        }

        Ok(Some(row))
    }
}
