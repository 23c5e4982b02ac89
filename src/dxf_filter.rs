//! Entity filtering over the raw DXF group-code/value token stream.
//!
//! A DXF text file is a sequence of two-line records: an integer group code
//! followed by its value. A record with code `0` opens a new entity (or
//! section marker) whose type name is the record's value. The filter drops
//! whole entities by type name, from their own `0` record up to the next `0`
//! record.
//!
//! The stream is handled as bytes. Values in code-page encoded drawings
//! (layer names, text) are copied through untouched; only group codes and
//! entity type names, which are ASCII, are interpreted.

use crate::error::StreamError;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

/// Entity types that carry annotation rather than cut geometry.
pub const DEFAULT_DROPPED_ENTITIES: &[&str] =
    &["DIMENSION", "HATCH", "INSERT", "MTEXT", "TEXT", "SOLID"];

/// Leading bytes of a binary DXF file.
const BINARY_SENTINEL: &[u8] = b"AutoCAD Binary DXF";

/// A single group-code/value pair, borrowing the source bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub code: i32,
    /// Code line as written (leading spaces are common in DXF writers).
    pub raw_code: &'a [u8],
    pub value: &'a [u8],
}

impl Record<'_> {
    pub fn is_entity_start(&self) -> bool {
        self.code == 0
    }

    /// Value decoded for display; invalid UTF-8 is replaced.
    pub fn value_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.value)
    }

    /// Entity type name, trimmed and upper-cased for comparison.
    pub fn entity_type(&self) -> String {
        self.value_str().trim().to_ascii_uppercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterState {
    Copying,
    Skipping(String),
}

/// Output of [`EntityFilter::filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredStream {
    pub data: Vec<u8>,
    /// Number of entities removed, per type.
    pub dropped: BTreeMap<String, usize>,
}

impl FilteredStream {
    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }
}

/// Removes entities whose type is in a caller-supplied drop set.
#[derive(Debug, Clone)]
pub struct EntityFilter {
    dropped: HashSet<String>,
}

impl EntityFilter {
    /// Creates a filter; names are matched case-insensitively.
    pub fn new<I, S>(entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            dropped: entity_types
                .into_iter()
                .map(|name| name.as_ref().trim().to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn drops(&self, entity_type: &str) -> bool {
        self.dropped.contains(&entity_type.trim().to_ascii_uppercase())
    }

    /// Filters a DXF text stream.
    ///
    /// When nothing matches the drop set the input is returned byte for
    /// byte. Otherwise the kept records are joined with `\n`, whatever the
    /// input line endings were.
    pub fn filter(&self, input: &[u8]) -> Result<FilteredStream, StreamError> {
        let records = parse_records(input)?;

        let mut out = Vec::with_capacity(input.len());
        let mut dropped = BTreeMap::new();
        let mut state = FilterState::Copying;

        for record in &records {
            if record.is_entity_start() {
                let entity_type = record.entity_type();
                state = if self.dropped.contains(&entity_type) {
                    *dropped.entry(entity_type.clone()).or_insert(0) += 1;
                    FilterState::Skipping(entity_type)
                } else {
                    FilterState::Copying
                };
            }

            if state == FilterState::Copying {
                out.extend_from_slice(record.raw_code);
                out.push(b'\n');
                out.extend_from_slice(record.value);
                out.push(b'\n');
            }
        }

        if dropped.is_empty() {
            out = input.to_vec();
        }

        Ok(FilteredStream { data: out, dropped })
    }
}

impl Default for EntityFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DROPPED_ENTITIES)
    }
}

/// Splits bytes into lines on `\r\n`, `\n` or a lone `\r`.
///
/// A trailing line terminator does not produce an empty final line.
fn split_lines(input: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'\n' => {
                lines.push(&input[start..i]);
                start = i + 1;
            }
            b'\r' => {
                lines.push(&input[start..i]);
                if input.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < input.len() {
        lines.push(&input[start..]);
    }
    lines
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_group_code(line: &[u8]) -> Option<i32> {
    std::str::from_utf8(line).ok()?.trim().parse().ok()
}

/// Parses a DXF text stream into records.
pub fn parse_records(input: &[u8]) -> Result<Vec<Record<'_>>, StreamError> {
    let mut lines = split_lines(input);

    // Blank padding after the final record is tolerated.
    while lines.len() % 2 == 1 && lines.last().is_some_and(|l| is_blank(l)) {
        lines.pop();
    }

    let mut records = Vec::with_capacity(lines.len() / 2);
    let mut pairs = lines.chunks_exact(2);

    for (index, pair) in pairs.by_ref().enumerate() {
        let line = index * 2 + 1;
        let code = parse_group_code(pair[0]).ok_or_else(|| StreamError::InvalidGroupCode {
            line,
            text: String::from_utf8_lossy(pair[0]).into_owned(),
        })?;

        records.push(Record {
            code,
            raw_code: pair[0],
            value: pair[1],
        });
    }

    if !pairs.remainder().is_empty() {
        return Err(StreamError::Truncated { line: lines.len() });
    }

    Ok(records)
}

/// Counts entity types in the ENTITIES section.
pub fn entity_census(input: &[u8]) -> Result<BTreeMap<String, usize>, StreamError> {
    let records = parse_records(input)?;
    let mut census = BTreeMap::new();
    let mut in_entities = false;
    let mut previous_was_section = false;

    for record in &records {
        if previous_was_section && record.code == 2 {
            in_entities = record.value_str().trim().eq_ignore_ascii_case("ENTITIES");
        }
        previous_was_section = false;

        if !record.is_entity_start() {
            continue;
        }

        match record.entity_type().as_str() {
            "SECTION" => previous_was_section = true,
            "ENDSEC" => in_entities = false,
            entity_type if in_entities => {
                *census.entry(entity_type.to_string()).or_insert(0) += 1;
            }
            _ => {}
        }
    }

    Ok(census)
}

pub fn is_binary_dxf(bytes: &[u8]) -> bool {
    bytes.starts_with(BINARY_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(out: &FilteredStream) -> &str {
        std::str::from_utf8(&out.data).unwrap()
    }

    const DRAWING: &str = "0\nSECTION\n2\nENTITIES\n0\nTEXT\n8\n0\n1\nHello\n0\nLINE\n8\n0\n10\n0.0\n20\n0.0\n11\n5.0\n21\n5.0\n0\nENDSEC\n0\nEOF\n";

    #[test]
    fn test_drops_text_keeps_line() {
        let filter = EntityFilter::new(["TEXT"]);
        let out = filter.filter(DRAWING.as_bytes()).unwrap();

        assert_eq!(
            text(&out),
            "0\nSECTION\n2\nENTITIES\n0\nLINE\n8\n0\n10\n0.0\n20\n0.0\n11\n5.0\n21\n5.0\n0\nENDSEC\n0\nEOF\n"
        );
        assert_eq!(out.dropped.get("TEXT"), Some(&1));
        assert_eq!(out.dropped_total(), 1);
    }

    #[test]
    fn test_no_match_is_unchanged() {
        let filter = EntityFilter::new(["HATCH"]);
        let out = filter.filter(DRAWING.as_bytes()).unwrap();

        assert_eq!(text(&out), DRAWING);
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn test_case_insensitive_match() {
        let filter = EntityFilter::new(["text"]);
        let out = filter.filter(b"0\ntext\n1\nabc\n0\nLINE\n").unwrap();

        assert_eq!(text(&out), "0\nLINE\n");
    }

    #[test]
    fn test_line_endings_do_not_change_classification() {
        let filter = EntityFilter::default();
        let lf = filter.filter(DRAWING.as_bytes()).unwrap();
        let crlf = filter.filter(DRAWING.replace('\n', "\r\n").as_bytes()).unwrap();
        let cr = filter.filter(DRAWING.replace('\n', "\r").as_bytes()).unwrap();

        assert_eq!(lf, crlf);
        assert_eq!(lf, cr);
    }

    #[test]
    fn test_last_entity_dropped_to_end_of_stream() {
        let filter = EntityFilter::new(["MTEXT"]);
        let out = filter.filter(b"0\nLINE\n10\n1\n0\nMTEXT\n1\nnote\n").unwrap();

        assert_eq!(text(&out), "0\nLINE\n10\n1\n");
    }

    #[test]
    fn test_padded_type_names_match() {
        let filter = EntityFilter::new(["INSERT"]);
        let out = filter.filter(b"  0\nINSERT  \n2\nBLOCK1\n  0\nLINE\n").unwrap();

        assert_eq!(text(&out), "  0\nLINE\n");
    }

    #[test]
    fn test_code_page_bytes_pass_through() {
        // Layer "Слой" in cp1251.
        let drawing: &[u8] = b"0\r\nLINE\r\n8\r\n\xD1\xEB\xEE\xE9\r\n10\r\n0\r\n";
        let out = EntityFilter::default().filter(drawing).unwrap();
        assert_eq!(out.data, drawing);

        let mut with_text = drawing.to_vec();
        with_text.extend_from_slice(b"0\r\nTEXT\r\n1\r\n\xD2\xE5\xEA\xF1\xF2\r\n");
        let out = EntityFilter::default().filter(&with_text).unwrap();
        assert_eq!(out.data, b"0\nLINE\n8\n\xD1\xEB\xEE\xE9\n10\n0\n".to_vec());
        assert_eq!(out.dropped.get("TEXT"), Some(&1));
    }

    #[test]
    fn test_truncated_stream() {
        let err = parse_records(b"0\nLINE\n10").unwrap_err();
        assert_eq!(err, StreamError::Truncated { line: 3 });
    }

    #[test]
    fn test_invalid_group_code() {
        let err = parse_records(b"zero\nLINE\n").unwrap_err();
        assert!(matches!(err, StreamError::InvalidGroupCode { line: 1, .. }));
    }

    #[test]
    fn test_entity_census_counts_entities_section_only() {
        let text = "0\nSECTION\n2\nTABLES\n0\nLAYER\n2\nA\n0\nENDSEC\n0\nSECTION\n2\nENTITIES\n0\nLINE\n0\nLINE\n0\nCIRCLE\n0\nENDSEC\n0\nEOF\n";
        let census = entity_census(text.as_bytes()).unwrap();

        assert_eq!(census.get("LINE"), Some(&2));
        assert_eq!(census.get("CIRCLE"), Some(&1));
        assert_eq!(census.get("LAYER"), None);
    }

    #[test]
    fn test_binary_sentinel() {
        assert!(is_binary_dxf(b"AutoCAD Binary DXF\r\n\x1a\0"));
        assert!(!is_binary_dxf(b"0\nSECTION\n"));
    }
}
