//! Partition file codec.
//!
//! One partition holds every record saved on one calendar day:
//!
//! ````text
//! ---
//! date: 2025-05-06
//! count: 2
//! ---
//!
//! ```json
//! [ { "id": "hn-1", ... }, { "id": "hn-2", ... } ]
//! ```
//! ````
//!
//! Decoding is lenient about what humans might do to the file (a missing
//! language tag, an empty block, no fence at all) but refuses anything it
//! cannot read back losslessly.

use crate::error::{Error, Result};
use crate::models::Trend;
use chrono::NaiveDate;
use serde::Deserialize;

const HEADER_MARKER: &str = "---";
const FENCE: &str = "```";

/// Header fields; informational only, the record list is authoritative.
#[derive(Debug, Default, Deserialize)]
pub struct PartitionHeader {
    pub date: Option<String>,
    pub count: Option<usize>,
}

/// Render a partition document.
///
/// The header `count` is written from `trends.len()`; records are
/// pretty-printed JSON inside a `json` fence.
pub fn encode(date: NaiveDate, trends: &[Trend]) -> Result<String> {
    let body = serde_json::to_string_pretty(trends)?;
    Ok(format!(
        "{HEADER_MARKER}\ndate: {date}\ncount: {count}\n{HEADER_MARKER}\n\n\
         {FENCE}json\n{body}\n{FENCE}\n",
        date = date.format("%Y-%m-%d"),
        count = trends.len(),
    ))
}

/// Parse a partition document into its header and records.
///
/// Accepts a fence with or without a language tag, JSON on the fence line
/// itself, or a bare JSON body with no fence. An empty body or `null` is a
/// partition with zero records.
///
/// # Arguments
///
/// * `content` - The whole file, optionally starting with a UTF-8 BOM
///
/// # Returns
///
/// The parsed header (fields absent from the file are `None`) and the records
/// in file order.
///
/// # Errors
///
/// [`Error::Decode`] when the header is missing or unterminated, the header
/// is not YAML, the code block is never closed, or the records are not a JSON
/// array of trends.
///
/// # Examples
///
/// ```ignore
/// let doc = encode(date, &trends)?;
/// let (header, decoded) = decode(&doc)?;
/// assert_eq!(header.count, Some(trends.len()));
/// ```
pub fn decode(content: &str) -> Result<(PartitionHeader, Vec<Trend>)> {
    let content = content.trim_start_matches('\u{feff}').trim_start();
    let after_open = content
        .strip_prefix(HEADER_MARKER)
        .ok_or_else(|| Error::Decode("partition has no header".to_string()))?;
    let close = after_open
        .find(HEADER_MARKER)
        .ok_or_else(|| Error::Decode("partition header is not closed".to_string()))?;

    let header_text = after_open[..close].trim();
    let header = if header_text.is_empty() {
        PartitionHeader::default()
    } else {
        serde_yaml::from_str(header_text)
            .map_err(|e| Error::Decode(format!("partition header: {e}")))?
    };

    let body = after_open[close + HEADER_MARKER.len()..].trim();
    let json = match body.strip_prefix(FENCE) {
        Some(rest) => fenced_block(rest)?,
        None => body.to_string(),
    };
    let json = json.trim();

    if json.is_empty() || json == "null" {
        return Ok((header, Vec::new()));
    }
    let trends: Vec<Trend> =
        serde_json::from_str(json).map_err(|e| Error::Decode(format!("partition records: {e}")))?;
    Ok((header, trends))
}

/// Lines between the opening fence and the first line that is exactly a
/// closing fence. `rest` starts right after the opening backticks.
///
/// Only a whole line can close the block. Pretty-printed JSON never has a
/// line made of bare backticks, so backticks inside titles stay intact.
fn fenced_block(rest: &str) -> Result<String> {
    let (first, remaining) = rest.split_once('\n').unwrap_or((rest, ""));
    let mut json = String::new();
    let first = first.trim();
    if !is_language_tag(first) {
        json.push_str(first);
        json.push('\n');
    }
    for line in remaining.lines() {
        if line.trim() == FENCE {
            return Ok(json);
        }
        json.push_str(line);
        json.push('\n');
    }
    Err(Error::Decode("partition code block is not closed".to_string()))
}

/// `json`, `JSON`, `jsonc`...; anything else on the fence line is content.
fn is_language_tag(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
