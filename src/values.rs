//! Ordered key/value stores for acquisition metadata (component J, part 2).
//!
//! Both the textual `header`/`header2`/`xheader` sections and the `xhash`
//! section boil down to the same shape at the API: an ordered table of
//! string identifiers to string values, addressable by index or by name.
//! `HeaderValues` and `HashValues` are thin, differently-named wrappers
//! around the same underlying ordered map so callers can't mix them up at
//! the type level while the parsing/encoding helpers are shared.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EwfError, EwfResult};

/// Codepages accepted for the legacy (non-UTF-16, non-XML) `header` section.
///
/// `libewf_set_header_codepage` in the original implementation guards this
/// set with a chain of `||` comparisons that can never be true (see
/// spec §9's Open Questions) — every codepage is rejected by the original
/// code as written. This crate implements the evidently intended `&&`
/// semantics: accept exactly this enumerated set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCodepage {
    Ascii,
    Windows1250,
    Windows1251,
    Windows1252,
    Windows1253,
    Windows1254,
    Windows1256,
    Windows1257,
}

impl HeaderCodepage {
    pub const ALL: [HeaderCodepage; 8] = [
        HeaderCodepage::Ascii,
        HeaderCodepage::Windows1250,
        HeaderCodepage::Windows1251,
        HeaderCodepage::Windows1252,
        HeaderCodepage::Windows1253,
        HeaderCodepage::Windows1254,
        HeaderCodepage::Windows1256,
        HeaderCodepage::Windows1257,
    ];

    pub fn is_supported(self) -> bool {
        Self::ALL.contains(&self)
    }
}

impl Default for HeaderCodepage {
    fn default() -> Self {
        HeaderCodepage::Ascii
    }
}

/// A generic ordered identifier → value table, insertion-order iterable.
///
/// Identifier comparisons are case-sensitive, matching spec §3's
/// "Header values" contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueTable {
    entries: IndexMap<String, String>,
}

impl ValueTable {
    pub fn new() -> Self {
        ValueTable {
            entries: IndexMap::new(),
        }
    }

    pub fn amount(&self) -> usize {
        self.entries.len()
    }

    pub fn get_by_index(&self, index: usize) -> EwfResult<(&str, &str)> {
        self.entries
            .get_index(index)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .ok_or_else(|| {
                EwfError::ArgumentOutOfRange(format!(
                    "value index {} out of range (amount = {})",
                    index,
                    self.entries.len()
                ))
            })
    }

    pub fn get_by_name(&self, identifier: &str) -> Option<&str> {
        self.entries.get(identifier).map(|s| s.as_str())
    }

    pub fn set_by_name(&mut self, identifier: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(identifier.into(), value.into());
    }

    pub fn identifier_at(&self, index: usize) -> EwfResult<&str> {
        self.get_by_index(index).map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Used by the delta overwriter, which inherits the main chain's
    /// header values verbatim into its own minimal `volume`/`header`
    /// sections (spec §SPEC_FULL.md "Supplemented features" item 3).
    pub fn merge_from(&mut self, other: &ValueTable) {
        for (k, v) in other.iter() {
            self.set_by_name(k, v);
        }
    }

    /// Structured export for callers outside the acquisition-tool text
    /// format (case-management systems, report generators) that want the
    /// header/hash value tables as JSON rather than the on-disk
    /// tab-separated form.
    pub fn to_json(&self) -> EwfResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EwfError::FormatInvalid(format!("value table JSON export failed: {e}")))
    }

    pub fn from_json(text: &str) -> EwfResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| EwfError::FormatInvalid(format!("value table JSON import failed: {e}")))
    }
}

/// Ordered `header`/`header2`/`xheader` acquisition metadata
/// (`case_number`, `examiner_name`, …). See spec §3 "Header values".
#[derive(Debug, Clone, Default)]
pub struct HeaderValues(pub ValueTable);

/// Ordered `xhash` / legacy key-value hash metadata, distinct from the raw
/// MD5/SHA1 digest bytes carried in `digest`/`hash` sections (those live on
/// `HashState`, see `src/digest.rs`-equivalent fields on the handle).
#[derive(Debug, Clone, Default)]
pub struct HashValues(pub ValueTable);

/// Well-known header identifiers, in the canonical display order the
/// original tooling uses.
pub const HEADER_IDENTIFIER_ORDER: &[&str] = &[
    "case_number",
    "description",
    "examiner_name",
    "evidence_number",
    "notes",
    "acquiry_date",
    "system_date",
    "acquiry_operating_system",
    "acquiry_software_version",
    "password",
    "compression_type",
    "model",
    "serial_number",
];

/// Decodes header section bytes, trying ASCII/UTF-8 first and falling back
/// to UTF-16LE (used by `header2`). Mirrors the teacher's `EwfHeaderSection::decode`.
pub fn decode_text(raw: &[u8]) -> String {
    if let Ok(txt) = String::from_utf8(raw.to_vec()) {
        return txt;
    }
    if raw.len() % 2 == 0 {
        let utf16: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if let Ok(txt) = String::from_utf16(&utf16) {
            return txt;
        }
    }
    String::new()
}

/// Parses the tab-separated `identifier` / `value` table that makes up the
/// body of a `header`/`header2` section, tolerating a leading BOM and blank
/// lines the way real acquisitions produce them.
pub fn parse_value_table(raw: &[u8]) -> ValueTable {
    let txt = decode_text(raw);
    let mut lines: Vec<&str> = txt
        .split(['\n', '\r'])
        .filter(|l| !l.trim().is_empty())
        .collect();

    if let Some(first) = lines.first_mut() {
        *first = first.trim_start_matches('\u{FEFF}');
    }

    let mut table = ValueTable::new();
    for i in 0..lines.len().saturating_sub(1) {
        if lines[i].contains('\t') && lines[i + 1].contains('\t') {
            for (k, v) in lines[i].split('\t').zip(lines[i + 1].split('\t')) {
                table.set_by_name(k.trim_matches('\0'), v.trim_matches('\0'));
            }
            return table;
        }
    }

    for l in lines {
        if let Some((k, v)) = l.split_once('\t') {
            table.set_by_name(k.trim_matches('\0'), v.trim_matches('\0'));
        }
    }
    table
}

/// Encodes a value table back into the tab-separated two-line form used by
/// the legacy `header`/`header2` sections, in `HEADER_IDENTIFIER_ORDER` when
/// possible and appending any remaining identifiers afterwards.
pub fn encode_value_table(table: &ValueTable) -> Vec<u8> {
    let mut ordered: Vec<&str> = Vec::new();
    for id in HEADER_IDENTIFIER_ORDER {
        if table.get_by_name(id).is_some() {
            ordered.push(id);
        }
    }
    for (k, _) in table.iter() {
        if !ordered.contains(&k) {
            ordered.push(k);
        }
    }

    let keys = ordered.join("\t");
    let values: Vec<&str> = ordered
        .iter()
        .map(|k| table.get_by_name(k).unwrap_or(""))
        .collect();
    let values = values.join("\t");

    format!("1\r\n{keys}\r\n{values}\r\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_codepage_bug_is_resolved_to_and_semantics() {
        assert!(HeaderCodepage::Ascii.is_supported());
        assert!(HeaderCodepage::Windows1257.is_supported());
    }

    #[test]
    fn value_table_round_trips_through_text() {
        let mut t = ValueTable::new();
        t.set_by_name("case_number", "CASE-1");
        t.set_by_name("examiner_name", "J. Doe");
        let bytes = encode_value_table(&t);
        let parsed = parse_value_table(&bytes);
        assert_eq!(parsed.get_by_name("case_number"), Some("CASE-1"));
        assert_eq!(parsed.get_by_name("examiner_name"), Some("J. Doe"));
    }

    #[test]
    fn get_by_index_out_of_range_errors() {
        let t = ValueTable::new();
        assert!(t.get_by_index(0).is_err());
    }

    #[test]
    fn value_table_exports_to_json_and_back() {
        let mut t = ValueTable::new();
        t.set_by_name("case_number", "CASE-1");
        t.set_by_name("examiner_name", "J. Doe");
        let json = t.to_json().expect("export");
        assert!(json.contains("CASE-1"));
        let restored = ValueTable::from_json(&json).expect("import");
        assert_eq!(restored.get_by_name("case_number"), Some("CASE-1"));
        assert_eq!(restored.get_by_name("examiner_name"), Some("J. Doe"));
        assert_eq!(restored.amount(), t.amount());
    }

    #[test]
    fn utf16_header2_decodes() {
        let text = "a\tb\r\n1\t2\r\n";
        let utf16: Vec<u8> = text
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let table = parse_value_table(&utf16);
        assert_eq!(table.get_by_name("a"), Some("1"));
        assert_eq!(table.get_by_name("b"), Some("2"));
    }
}
