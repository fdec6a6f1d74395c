//! Parser for the DMV wait-time feed (`output3.txt`)
//!
//! The payload is CRLF delimited text:
//!
//! ```text
//! <column header line>
//! <ill-formed XML fragment without a root element, any number of lines>
//! 658,0,0
//! 697,3,5
//! ...
//! ```
//!
//! The first line is always dropped. The first line of the remainder that
//! looks like `branch,appt,non_appt` integers starts the wait-time table;
//! everything before it is the XML fragment.

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

static ROW_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*-?\d+\s*,\s*-?\d+\s*,\s*-?\d+\s*,?\s*$").expect("row pattern is valid")
});

/// One `branch,appt,non_appt` line of the wait-time table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedRow {
    pub branch_number: i64,
    pub appt: i64,
    pub non_appt: i64,
}

/// Top-level element of the XML fragment preceding the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct FeedHeader {
    pub raw: String,
    /// Empty when the fragment is not well-formed even with a synthetic root
    pub elements: Vec<HeaderElement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based line number within the payload
    pub line: usize,
    pub content: String,
    pub reason: RowError,
}

#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub header: FeedHeader,
    /// Rows in payload order
    pub rows: Vec<FeedRow>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("expected 3 fields, found {0}")]
    FieldCount(usize),
    #[error("field {index} is not an integer: {value:?}")]
    NotInteger { index: usize, value: String },
}

/// The payload no longer looks like a wait-time feed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedFormatError {
    #[error("feed is empty")]
    Empty,
    #[error("no wait-time table found in feed")]
    MissingTable,
    #[error("none of the {0} table rows could be parsed")]
    NoValidRows(usize),
}

pub fn parse_feed(raw: &str) -> Result<ParsedFeed, FeedFormatError> {
    if raw.trim().is_empty() {
        return Err(FeedFormatError::Empty);
    }

    // Drop the column header line
    let lines: Vec<(usize, &str)> = raw.lines().enumerate().skip(1).collect();

    let table_start = lines
        .iter()
        .position(|(_, line)| ROW_PATTERN.is_match(line))
        .ok_or(FeedFormatError::MissingTable)?;
    let (fragment, table) = lines.split_at(table_start);

    let header = FeedHeader::parse(
        fragment
            .iter()
            .map(|(_, line)| *line)
            .collect::<Vec<_>>()
            .join("\r\n"),
    );

    let mut rows = Vec::with_capacity(table.len());
    let mut skipped = Vec::new();

    for (index, line) in table {
        let content = line.trim();
        if content.is_empty() {
            continue;
        }

        match parse_row(content) {
            Ok(row) => rows.push(row),
            Err(reason) => {
                warn!(line = index + 1, content = %content, error = %reason, "Skipping malformed wait-time row");
                skipped.push(SkippedRow {
                    line: index + 1,
                    content: content.to_string(),
                    reason,
                });
            }
        }
    }

    if rows.is_empty() {
        return Err(FeedFormatError::NoValidRows(skipped.len()));
    }

    debug!(
        rows = rows.len(),
        skipped = skipped.len(),
        header_elements = header.elements.len(),
        "Parsed wait-time feed"
    );

    Ok(ParsedFeed {
        header,
        rows,
        skipped,
    })
}

fn parse_row(line: &str) -> Result<FeedRow, RowError> {
    // Upstream terminates rows with a comma: `658,0,0,`
    let line = line.strip_suffix(',').unwrap_or(line);
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(RowError::FieldCount(fields.len()));
    }

    let field = |index: usize| {
        fields[index]
            .parse::<i64>()
            .map_err(|_| RowError::NotInteger {
                index,
                value: fields[index].to_string(),
            })
    };

    Ok(FeedRow {
        branch_number: field(0)?,
        appt: field(1)?,
        non_appt: field(2)?,
    })
}

impl FeedHeader {
    fn parse(raw: String) -> Self {
        let elements = match parse_elements(&raw) {
            Ok(elements) => elements,
            Err(e) => {
                warn!(error = %e, "Feed header is not well-formed XML, keeping raw text only");
                Vec::new()
            }
        };

        Self { raw, elements }
    }

    #[cfg(test)]
    fn element(&self, name: &str) -> Option<&HeaderElement> {
        self.elements.iter().find(|e| e.name == name)
    }
}

impl HeaderElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, quick_xml::Error> {
        let attributes = start
            .attributes()
            .flatten()
            .map(|attr| {
                Ok((
                    String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                    attr.unescape_value()?.into_owned(),
                ))
            })
            .collect::<Result<_, quick_xml::Error>>()?;

        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            text: String::new(),
        })
    }
}

/// Expand `&#NN;` and the predefined entities; unknown entities are kept verbatim
fn resolve_reference(reference: &BytesRef<'_>) -> Result<String, quick_xml::Error> {
    if let Some(ch) = reference.resolve_char_ref()? {
        return Ok(ch.to_string());
    }

    let name = reference.decode()?;
    Ok(match resolve_predefined_entity(&name) {
        Some(value) => value.to_string(),
        None => format!("&{name};"),
    })
}

/// Wrap the fragment in a synthetic `<cadmv>` root and collect its children
fn parse_elements(fragment: &str) -> Result<Vec<HeaderElement>, quick_xml::Error> {
    let wrapped = format!("<cadmv>{fragment}</cadmv>");
    // Text is trimmed per element; trimming per event would eat the spaces around entities
    let mut reader = Reader::from_str(&wrapped);

    let mut elements = Vec::new();
    let mut current: Option<HeaderElement> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                depth += 1;
                if depth == 2 {
                    current = Some(HeaderElement::from_start(&start)?);
                }
            }
            Event::Empty(start) => {
                if depth == 1 {
                    elements.push(HeaderElement::from_start(&start)?);
                }
            }
            Event::Text(text) => {
                if let Some(element) = current.as_mut() {
                    element.text.push_str(&String::from_utf8_lossy(&text));
                }
            }
            Event::GeneralRef(reference) => {
                if let Some(element) = current.as_mut() {
                    element.text.push_str(&resolve_reference(&reference)?);
                }
            }
            Event::CData(data) => {
                if let Some(element) = current.as_mut() {
                    element.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    elements.extend(current.take().map(|mut element| {
                        element.text = element.text.trim().to_string();
                        element
                    }));
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(branch_number: i64, appt: i64, non_appt: i64) -> FeedRow {
        FeedRow {
            branch_number,
            appt,
            non_appt,
        }
    }

    #[test]
    fn header_line_is_dropped_and_rows_parsed_in_order() {
        let feed = parse_feed("branch,appt,nonappt\r\n658,0,0\r\n697,3,5\r\n").unwrap();

        assert_eq!(feed.rows, vec![row(658, 0, 0), row(697, 3, 5)]);
        assert!(feed.skipped.is_empty());
        assert!(feed.header.raw.is_empty());
    }

    #[test]
    fn trailing_commas_are_tolerated() {
        let feed = parse_feed("hdr\r\n658,0,0,\r\n697,0,0,\r\n648,12,41,\r\n").unwrap();
        assert_eq!(feed.rows, vec![row(658, 0, 0), row(697, 0, 0), row(648, 12, 41)]);
    }

    #[test]
    fn xml_fragment_before_table_is_split_off() {
        let raw = "Last updated\r\n<time zone=\"PST\">12/06/2018 3:22 PM</time>\r\n<status>ok</status>\r\n<note/>\r\n542,15,27\r\n537,26,47\r\n";
        let feed = parse_feed(raw).unwrap();

        assert_eq!(feed.rows, vec![row(542, 15, 27), row(537, 26, 47)]);
        let names: Vec<&str> = feed.header.elements.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["time", "status", "note"]);

        let time = feed.header.element("time").unwrap();
        assert_eq!(time.text, "12/06/2018 3:22 PM");
        assert_eq!(time.attributes, vec![("zone".to_string(), "PST".to_string())]);
    }

    #[test]
    fn malformed_header_does_not_fail_the_feed() {
        let feed = parse_feed("hdr\r\n<open>never closed\r\n542,1,2\r\n").unwrap();

        assert_eq!(feed.rows, vec![row(542, 1, 2)]);
        assert!(feed.header.elements.is_empty());
        assert_eq!(feed.header.raw, "<open>never closed");
    }

    #[test]
    fn one_malformed_row_among_ten_is_skipped() {
        let mut raw = String::from("branch,appt,nonappt\r\n");
        for i in 0..10 {
            if i == 4 {
                raw.push_str("604,abc,3\r\n");
            } else {
                raw.push_str(&format!("{},{},{}\r\n", 600 + i, i, i * 2));
            }
        }

        let feed = parse_feed(&raw).unwrap();
        assert_eq!(feed.rows.len(), 9);
        assert_eq!(feed.skipped.len(), 1);
        assert_eq!(feed.skipped[0].line, 6);
        assert_eq!(
            feed.skipped[0].reason,
            RowError::NotInteger {
                index: 1,
                value: "abc".to_string()
            }
        );
    }

    #[test]
    fn wrong_field_count_is_a_row_error() {
        let feed = parse_feed("hdr\r\n542,1,2\r\n543,1\r\n544,1,2,3\r\n").unwrap();

        assert_eq!(feed.rows, vec![row(542, 1, 2)]);
        let reasons: Vec<RowError> = feed.skipped.into_iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![RowError::FieldCount(2), RowError::FieldCount(4)]);
    }

    #[test]
    fn negative_waits_are_kept() {
        let feed = parse_feed("hdr\r\n542,-1,-5\r\n").unwrap();
        assert_eq!(feed.rows, vec![row(542, -1, -5)]);
    }

    #[test]
    fn payload_without_valid_rows_is_a_format_error() {
        assert_eq!(parse_feed("").unwrap_err(), FeedFormatError::Empty);
        assert_eq!(
            parse_feed("branch,appt,nonappt\r\n").unwrap_err(),
            FeedFormatError::MissingTable
        );
        assert_eq!(
            parse_feed("hdr\r\n<html>maintenance</html>\r\nx,y,z\r\n").unwrap_err(),
            FeedFormatError::MissingTable
        );
    }

    #[test]
    fn overflowing_rows_are_a_format_error() {
        assert_eq!(
            parse_feed("hdr\r\n99999999999999999999,0,0\r\n").unwrap_err(),
            FeedFormatError::NoValidRows(1)
        );
    }

    #[test]
    fn header_entities_are_expanded_in_text_and_attributes() {
        let feed = parse_feed(
            "hdr\r\n<note a=\"x &amp; y\">A &amp; B &#38; &lt;C&gt;</note>\r\n542,1,2\r\n",
        )
        .unwrap();

        let note = feed.header.element("note").unwrap();
        assert_eq!(note.text, "A & B & <C>");
        assert_eq!(note.attributes, vec![("a".to_string(), "x & y".to_string())]);
    }

    #[test]
    fn negative_branch_number_starts_the_table() {
        let feed = parse_feed("hdr\r\n-5,1,2\r\n658,abc,1\r\n542,1,2\r\n").unwrap();

        assert_eq!(feed.rows, vec![row(-5, 1, 2), row(542, 1, 2)]);
        assert!(feed.header.raw.is_empty());
        assert_eq!(feed.skipped.len(), 1);
        assert_eq!(feed.skipped[0].line, 3);
        assert_eq!(feed.skipped[0].content, "658,abc,1");
    }

    #[test]
    fn bare_newlines_are_accepted() {
        let feed = parse_feed("hdr\n658,0,0\n697,3,5").unwrap();
        assert_eq!(feed.rows, vec![row(658, 0, 0), row(697, 3, 5)]);
    }
}
