//! Parser for Met Office areal-series bulletins
//!
//! A bulletin is a few free-text header lines followed by one
//! whitespace-delimited row per year:
//!
//! ```text
//! year   jan   feb   mar ...   dec   win   spr   sum   aut   ann
//! 2023   5.1   6.2   7.3 ...   4.0   3.5   6.2  11.1   8.3   7.8
//! ```
//!
//! Rows for the current year are truncated: only the months published so
//! far are present, followed by whichever seasonal columns are available.
//! The layout is not self-describing, so the number of month columns in a
//! short row is inferred by [`infer_month_count`].
//!
//! Parsing is best-effort. Malformed rows and tokens are logged and skipped;
//! only a bulletin without any recognizable data start is an error.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{IngestError, IngestResult};
use crate::models::{Season, SeasonalSummary, WeatherRecord};

/// Substrings (lowercase) that mark the column header line
pub const HEADER_MARKERS: [&str; 6] = ["jan", "feb", "mar", "apr", "may", "jun"];

/// Token count of a complete row: year, 12 months, 5 seasonal columns
pub const FULL_ROW_TOKENS: usize = 18;

/// Minimum token count for a header-less line to be taken as a data row
const MIN_DATA_ROW_TOKENS: usize = 13;

/// Index of the first seasonal column (winter)
const SEASON_COLUMN_START: usize = 13;

/// Past this month position, a value below [`SMALL_VALUE_THRESHOLD`] is
/// taken to be a seasonal statistic rather than a month
const SMALL_VALUE_MONTH_POSITION: usize = 7;
const SMALL_VALUE_THRESHOLD: f64 = 10.0;

const MONTH_VALUE_MIN: f64 = -50.0;
const MONTH_VALUE_MAX: f64 = 50.0;

/// Counters describing how much of a bulletin was usable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub rows_parsed: usize,
    pub rows_skipped: usize,
    pub tokens_skipped: usize,
}

/// Output of [`parse_bulletin`], records in row then month order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBulletin {
    pub records: Vec<WeatherRecord>,
    pub summaries: Vec<SeasonalSummary>,
    pub stats: ParseStats,
}

impl ParsedBulletin {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.summaries.is_empty()
    }
}

/// `---` and blank tokens stand for values not yet published
pub fn is_placeholder(token: &str) -> bool {
    let token = token.trim();
    token.is_empty() || token == "---"
}

fn is_comment_or_blank(line: &str) -> bool {
    line.is_empty() || line.starts_with('#')
}

fn is_year_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Index of the first data row, or `None` if the bulletin has no header
///
/// A line containing a month abbreviation is the column header and data
/// starts on the next line. A line that already looks like a data row (a
/// numeric first token and at least 13 tokens) is itself the start.
pub fn find_data_start(lines: &[&str]) -> Option<usize> {
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if is_comment_or_blank(line) {
            continue;
        }

        let lowered = line.to_lowercase();
        if HEADER_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Some(i + 1);
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() >= MIN_DATA_ROW_TOKENS && is_year_token(tokens[0]) {
            return Some(i);
        }
    }
    None
}

/// Number of month columns present in a row (`tokens[0]` is the year)
///
/// Rows with [`FULL_ROW_TOKENS`] or more tokens carry all 12 months. For a
/// shorter row the month positions are scanned in order and counting stops
/// at the first token that is a placeholder, is not numeric, lies outside
/// [-50, 50], or sits past month 7 with a value below 10. The last rule
/// cannot tell a genuinely small late-year value from a seasonal column.
pub fn infer_month_count(tokens: &[&str]) -> usize {
    if tokens.len() >= FULL_ROW_TOKENS {
        return 12;
    }

    let mut count = 0;
    for (i, token) in tokens.iter().enumerate().take(13).skip(1) {
        if is_placeholder(token) {
            break;
        }
        let Ok(value) = token.trim().parse::<f64>() else {
            break;
        };
        if i > SMALL_VALUE_MONTH_POSITION && value < SMALL_VALUE_THRESHOLD {
            break;
        }
        if !(MONTH_VALUE_MIN..=MONTH_VALUE_MAX).contains(&value) {
            break;
        }
        count += 1;
    }
    count
}

/// Parse a numeric token into a decimal, rejecting NaN and infinities
fn parse_value(token: &str) -> Option<BigDecimal> {
    let token = token.trim();
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() => BigDecimal::from_str(token).ok(),
        _ => None,
    }
}

/// Parse a raw bulletin into monthly records and seasonal summaries
pub fn parse_bulletin(raw: &str, parameter: &str, region: &str) -> IngestResult<ParsedBulletin> {
    let lines: Vec<&str> = raw.lines().collect();
    let Some(start) = find_data_start(&lines) else {
        warn!(parameter = %parameter, region = %region, "Could not find data start");
        return Err(IngestError::NoDataStart);
    };

    let mut bulletin = ParsedBulletin::default();
    for line in &lines[start..] {
        let line = line.trim();
        if is_comment_or_blank(line) {
            continue;
        }
        parse_row(line, parameter, region, &mut bulletin);
    }

    info!(
        parameter = %parameter,
        region = %region,
        records = bulletin.records.len(),
        summaries = bulletin.summaries.len(),
        rows_skipped = bulletin.stats.rows_skipped,
        "Parsed bulletin"
    );
    Ok(bulletin)
}

fn parse_row(line: &str, parameter: &str, region: &str, bulletin: &mut ParsedBulletin) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        bulletin.stats.rows_skipped += 1;
        return;
    }

    let year = match tokens[0].parse::<i32>() {
        Ok(year) => year,
        Err(e) => {
            warn!(parameter = %parameter, region = %region, line = %line, "Skipping row: {}", e);
            bulletin.stats.rows_skipped += 1;
            return;
        },
    };

    let months = infer_month_count(&tokens);
    debug!(year, months, tokens = tokens.len(), "Inferred month count");

    for (month_idx, token) in tokens.iter().skip(1).take(months).enumerate() {
        if is_placeholder(token) {
            continue;
        }
        let month = month_idx as u32 + 1;
        let (Some(value), Some(date)) = (parse_value(token), NaiveDate::from_ymd_opt(year, month, 1))
        else {
            warn!(
                parameter = %parameter,
                region = %region,
                "Invalid value '{}' for {}-{:02}",
                token,
                year,
                month
            );
            bulletin.stats.tokens_skipped += 1;
            continue;
        };
        bulletin.records.push(WeatherRecord {
            region: region.to_string(),
            parameter: parameter.to_string(),
            date,
            value,
            quality_flag: String::new(),
        });
    }

    for (season, token) in Season::COLUMNS
        .iter()
        .zip(tokens.iter().skip(SEASON_COLUMN_START))
    {
        if is_placeholder(token) {
            continue;
        }
        let Some(value) = parse_value(token) else {
            warn!(
                parameter = %parameter,
                region = %region,
                "Invalid seasonal value '{}' for {} {}",
                token,
                year,
                season
            );
            bulletin.stats.tokens_skipped += 1;
            continue;
        };
        bulletin.summaries.push(SeasonalSummary {
            region: region.to_string(),
            parameter: parameter.to_string(),
            year,
            season: *season,
            value,
        });
    }

    bulletin.stats.rows_parsed += 1;
}
