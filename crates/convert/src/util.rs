use std::collections::HashMap;
use std::str::FromStr;

use encoding_rs::{Encoding, UTF_8};
use roxmltree::{Document, Node, ParsingOptions};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tallyport_core::format_amount;
use tracing::warn;

use crate::error::ImportError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub(crate) fn strip_utf8_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

pub(crate) fn trim_ascii_start(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

/// Decodes with an `encoding_rs` label, falling back to UTF-8 when none is given.
pub(crate) fn decode_with_label(
    data: &[u8],
    label: Option<&str>,
    format: &'static str,
) -> Result<String, ImportError> {
    let encoding = match label {
        Some(label) => Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| ImportError::invalid_content(format, format!("unsupported charset {label:?}")))?,
        None => UTF_8,
    };

    let (text, had_errors) = encoding.decode_without_bom_handling(strip_utf8_bom(data));
    if had_errors {
        warn!(format, charset = encoding.name(), "Replaced undecodable bytes");
    }

    Ok(text.into_owned())
}

/// The `encoding="..."` pseudo-attribute of an XML declaration.
fn declared_encoding(declaration: &str) -> Option<&str> {
    let rest = &declaration[declaration.find("encoding")? + "encoding".len()..];
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &rest[1..];
    rest.find(quote).map(|end| &rest[..end])
}

/// Checks the `<?xml` signature and decodes the document in the charset its
/// declaration names.
pub(crate) fn decode_xml(data: &[u8], format: &'static str) -> Result<String, ImportError> {
    let body = trim_ascii_start(strip_utf8_bom(data));
    if !body.starts_with(b"<?xml") {
        return Err(ImportError::InvalidFileHeader { format });
    }

    let declaration_end = body
        .windows(2)
        .position(|w| w == b"?>")
        .ok_or(ImportError::InvalidFileHeader { format })?;
    let declaration = String::from_utf8_lossy(&body[..declaration_end]);

    decode_with_label(body, declared_encoding(&declaration), format)
}

pub(crate) fn parse_xml<'input>(text: &'input str, format: &'static str) -> Result<Document<'input>, ImportError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Document::parse_with_options(text, options).map_err(|e| ImportError::invalid_content(format, e.to_string()))
}

pub(crate) fn xml_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

pub(crate) fn xml_children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

pub(crate) fn xml_path<'a, 'input>(node: Node<'a, 'input>, path: &[&str]) -> Option<Node<'a, 'input>> {
    path.iter().try_fold(node, |current, name| xml_child(current, name))
}

/// Trimmed, non-empty text of the element at `path`.
pub(crate) fn xml_text(node: Node<'_, '_>, path: &[&str]) -> Option<String> {
    xml_path(node, path)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Rounds to two decimals (half away from zero) and renders canonical amount text.
pub(crate) fn decimal_to_amount_text(value: Decimal) -> Option<String> {
    let cents = value
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()?;
    Some(format_amount(cents))
}

/// Converts a decimal string with any number of fraction digits, e.g. `"-49.990"`.
pub(crate) fn decimal_text_to_amount_text(text: &str) -> Option<String> {
    Decimal::from_str(text.trim()).ok().and_then(decimal_to_amount_text)
}

/// Converts a `num/den` fraction.
pub(crate) fn fraction_to_amount_text(text: &str) -> Option<String> {
    let (num, den) = text.trim().split_once('/')?;
    let num: i64 = num.trim().parse().ok()?;
    let den: i64 = den.trim().parse().ok()?;
    if den == 0 {
        return None;
    }
    decimal_to_amount_text(Decimal::from(num) / Decimal::from(den))
}

pub(crate) fn abs_amount_text(text: &str) -> &str {
    text.strip_prefix('-').unwrap_or(text)
}

pub(crate) fn negate_amount_text(text: &str) -> String {
    match text.strip_prefix('-') {
        Some(rest) => rest.to_string(),
        None if text.chars().all(|c| c == '0' || c == '.') => text.to_string(),
        None => format!("-{text}"),
    }
}

/// Reads every record of a delimited file as raw strings, header included.
/// A `terminator` of `None` accepts both `\n` and `\r\n`. Without `quoting`,
/// quote characters are ordinary field text.
pub(crate) fn read_delimited_records(
    text: &str,
    delimiter: u8,
    terminator: Option<u8>,
    quoting: bool,
    format: &'static str,
) -> Result<Vec<Vec<String>>, ImportError> {
    let terminator = terminator.map_or(csv::Terminator::CRLF, csv::Terminator::Any);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .terminator(terminator)
        .quoting(quoting)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ImportError::invalid_content(format, e.to_string()))?;
        records.push(record.iter().map(str::to_string).collect());
    }

    Ok(records)
}

/// Positions of named columns in a header record. The first occurrence wins.
#[derive(Debug, Default)]
pub(crate) struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    pub(crate) fn new<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut positions = HashMap::new();
        for (index, name) in headers.into_iter().enumerate() {
            positions.entry(name.trim().to_string()).or_insert(index);
        }
        Self { positions }
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// The first of several alternative header spellings that is present.
    pub(crate) fn position_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| self.position(name))
    }

    pub(crate) fn require(&self, name: &str) -> Result<usize, ImportError> {
        self.position(name)
            .ok_or_else(|| ImportError::MissingRequiredField(name.to_string()))
    }

    pub(crate) fn require_any(&self, names: &[&str]) -> Result<usize, ImportError> {
        self.position_any(names)
            .ok_or_else(|| ImportError::MissingRequiredField(names.join("/")))
    }
}

/// Trimmed cell text, `""` when the column is absent or the record is short.
pub(crate) fn cell(record: &[String], index: Option<usize>) -> &str {
    index
        .and_then(|i| record.get(i))
        .map(|s| s.trim())
        .unwrap_or("")
}
