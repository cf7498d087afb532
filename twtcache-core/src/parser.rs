//! Parsing of twtxt feed text.
//!
//! A feed is a sequence of `<timestamp><whitespace><text>` lines. Blank lines
//! and `#` comments carry no twt. Parsed twts are split into the `current`
//! working set kept in the cache and the `overflow` handed to the archive:
//! first by age (anything at or before `now - ttl`), then by count (only the
//! newest `max_items` stay current).

use std::io::BufRead;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::twt::{Twt, Twter, Twts};

static LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)(\s+)(.+)$").expect("valid regex"));

// Tried in order; the first layout that parses wins.
const OFFSET_LAYOUTS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
];
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Result of [`parse_file`]: both halves are sorted oldest first.
#[derive(Debug, Default, Clone)]
pub struct ParsedFeed {
    pub current: Twts,
    pub overflow: Twts,
}

impl ParsedFeed {
    pub fn len(&self) -> usize {
        self.current.len() + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses a twtxt timestamp. Offsets are kept as written; timestamps without
/// one are taken as UTC.
pub fn parse_time(value: &str) -> Option<DateTime<FixedOffset>> {
    let upper = value.to_uppercase();
    let normalized = match upper.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => upper.clone(),
    };

    for layout in OFFSET_LAYOUTS {
        if let Ok(created) = DateTime::parse_from_str(&normalized, layout) {
            return Some(created);
        }
    }

    let utc = FixedOffset::east_opt(0)?;
    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&upper, layout) {
            return Some(utc.from_utc_datetime(&naive));
        }
    }

    None
}

/// Parses one line. Blank lines and comments yield `Ok(None)`.
pub fn parse_line(line: &str, twter: &Twter) -> Result<Option<Twt>, ParseError> {
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let caps = LINE_RE.captures(line).ok_or(ParseError::InvalidLine)?;
    let created = parse_time(&caps[1]).ok_or_else(|| ParseError::InvalidTimestamp(caps[1].to_owned()))?;

    Ok(Some(Twt::new(twter.clone(), created, &caps[3])))
}

/// Parses a whole feed relative to the current time. See [`parse_file_at`].
pub fn parse_file<R: BufRead>(
    reader: R,
    twter: &Twter,
    ttl: Duration,
    max_items: usize,
) -> Result<ParsedFeed, ParseError> {
    parse_file_at(reader, twter, ttl, max_items, Utc::now())
}

/// Parses a whole feed and partitions it around `now`.
///
/// Unparsable lines are skipped. A non-empty feed in which every line was
/// rejected is reported as [`ParseError::InvalidFeed`] rather than as an
/// empty feed; blank lines and comments count as valid. A zero `ttl`
/// disables the age split.
pub fn parse_file_at<R: BufRead>(
    reader: R,
    twter: &Twter,
    ttl: Duration,
    max_items: usize,
    now: DateTime<Utc>,
) -> Result<ParsedFeed, ParseError> {
    let mut twts = Twts::new();
    let mut lines = 0usize;
    let mut errors = 0usize;

    for raw in reader.split(b'\n') {
        let raw = raw?;
        lines += 1;
        let line = String::from_utf8_lossy(&raw);
        let line = line.strip_suffix('\r').unwrap_or(&*line);
        match parse_line(line, twter) {
            Ok(Some(twt)) => twts.push(twt),
            Ok(None) => {}
            Err(err) => {
                errors += 1;
                debug!(url = %twter.url, line = %line, error = %err, "skipping unparsable line");
            }
        }
    }

    if lines > 0 && errors == lines {
        return Err(ParseError::InvalidFeed { lines });
    }
    if errors > 0 {
        warn!(url = %twter.url, lines, errors, "feed contains unparsable lines");
    }

    Ok(partition(twts, ttl, max_items, now))
}

fn partition(twts: Twts, ttl: Duration, max_items: usize, now: DateTime<Utc>) -> ParsedFeed {
    let cutoff = if ttl.is_zero() {
        None
    } else {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
    };

    let (mut overflow, mut current): (Twts, Twts) = match cutoff {
        Some(cutoff) => twts.into_iter().partition(|twt| twt.created.with_timezone(&Utc) <= cutoff),
        None => (Twts::new(), twts),
    };

    current.sort_by(|a, b| a.created.cmp(&b.created));
    if current.len() > max_items {
        let excess = current.len() - max_items;
        overflow.extend(current.drain(..excess));
    }
    overflow.sort_by(|a, b| a.created.cmp(&b.created));

    ParsedFeed { current, overflow }
}
