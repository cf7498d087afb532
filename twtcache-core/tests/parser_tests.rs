use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use twtcache_core::{parse_file_at, parse_line, ParseError, Twter};

const DAY: Duration = Duration::from_secs(60 * 60 * 24);

fn twter() -> Twter {
    Twter::new("alice", "https://example.com/twtxt.txt")
}

fn frozen_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
}

fn feed_of(days_ago: &[i64]) -> String {
    days_ago
        .iter()
        .map(|&days| {
            let created = frozen_now() - chrono::Duration::days(days);
            format!("{}\tpost from {days} days ago\n", created.to_rfc3339())
        })
        .collect()
}

#[test]
fn parse_line_splits_on_first_whitespace_run() {
    let twt = parse_line("2024-01-01T00:00:00Z \t hello  world", &twter())
        .unwrap()
        .unwrap();
    assert_eq!(twt.text, "hello  world");
    assert_eq!(twt.twter, twter());
    assert_eq!(twt.created, DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap());
}

#[test]
fn blank_lines_and_comments_are_skipped_without_error() {
    assert!(parse_line("", &twter()).unwrap().is_none());
    assert!(parse_line("   ", &twter()).unwrap().is_none());
    assert!(parse_line("# nick = alice", &twter()).unwrap().is_none());
}

#[test]
fn malformed_lines_are_errors() {
    assert!(matches!(parse_line("nowhitespace", &twter()), Err(ParseError::InvalidLine)));
    assert!(matches!(
        parse_line("yesterday something happened", &twter()),
        Err(ParseError::InvalidTimestamp(ts)) if ts == "yesterday"
    ));
}

#[test]
fn end_to_end_partition_by_age() {
    let body = "2024-01-01T00:00:00Z\thello\n2023-01-01T00:00:00Z\told\n";
    let parsed = parse_file_at(body.as_bytes(), &twter(), 30 * DAY, 10, frozen_now()).unwrap();

    assert_eq!(parsed.current.len(), 1);
    assert_eq!(parsed.current[0].text, "hello");
    assert_eq!(parsed.overflow.len(), 1);
    assert_eq!(parsed.overflow[0].text, "old");
}

#[test]
fn a_feed_where_nothing_parses_is_invalid() {
    let err = parse_file_at("not a valid line\n".as_bytes(), &twter(), 30 * DAY, 10, frozen_now()).unwrap_err();
    assert!(matches!(err, ParseError::InvalidFeed { lines: 1 }));

    let err = parse_file_at("bogus\nlater maybe\n".as_bytes(), &twter(), 30 * DAY, 10, frozen_now()).unwrap_err();
    assert!(matches!(err, ParseError::InvalidFeed { lines: 2 }));
}

#[test]
fn comments_and_blank_lines_keep_a_feed_valid() {
    let parsed = parse_file_at("# comment\nbogus\n\n".as_bytes(), &twter(), 30 * DAY, 10, frozen_now()).unwrap();
    assert!(parsed.is_empty());

    let parsed = parse_file_at(
        "# nick = alice\nyesterday something happened\n".as_bytes(),
        &twter(),
        30 * DAY,
        10,
        frozen_now(),
    )
    .unwrap();
    assert!(parsed.is_empty());
}

#[test]
fn empty_and_comment_only_feeds_are_valid() {
    let parsed = parse_file_at("".as_bytes(), &twter(), 30 * DAY, 10, frozen_now()).unwrap();
    assert!(parsed.is_empty());

    let parsed = parse_file_at("# nick = alice\n\n".as_bytes(), &twter(), 30 * DAY, 10, frozen_now()).unwrap();
    assert!(parsed.is_empty());
}

#[test]
fn bad_lines_are_skipped_among_good_ones() {
    let body = "garbage\n2024-01-30T00:00:00Z\tgood\r\nlater maybe\n";
    let parsed = parse_file_at(body.as_bytes(), &twter(), 30 * DAY, 10, frozen_now()).unwrap();
    assert_eq!(parsed.current.len(), 1);
    assert_eq!(parsed.current[0].text, "good");
    assert!(parsed.overflow.is_empty());
}

#[test]
fn twt_exactly_at_the_ttl_boundary_overflows() {
    let body = feed_of(&[30, 29]);
    let parsed = parse_file_at(body.as_bytes(), &twter(), 30 * DAY, 10, frozen_now()).unwrap();
    assert_eq!(parsed.current.len(), 1);
    assert_eq!(parsed.current[0].text, "post from 29 days ago");
    assert_eq!(parsed.overflow.len(), 1);
    assert_eq!(parsed.overflow[0].text, "post from 30 days ago");
}

#[test]
fn count_cap_keeps_the_newest_and_overflows_the_rest() {
    let body = feed_of(&[1, 5, 3, 2, 4, 45]);
    let parsed = parse_file_at(body.as_bytes(), &twter(), 30 * DAY, 2, frozen_now()).unwrap();

    let current: Vec<_> = parsed.current.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(current, vec!["post from 2 days ago", "post from 1 days ago"]);

    let overflow: Vec<_> = parsed.overflow.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(
        overflow,
        vec![
            "post from 45 days ago",
            "post from 5 days ago",
            "post from 4 days ago",
            "post from 3 days ago",
        ]
    );
}

#[test]
fn partitions_are_complete_and_capped_for_any_size() {
    for size in 0..40i64 {
        let days: Vec<i64> = (0..size).map(|i| (i * 7) % 61).collect();
        let body = feed_of(&days);
        for max_items in [0usize, 1, 5, 100] {
            let parsed = parse_file_at(body.as_bytes(), &twter(), 30 * DAY, max_items, frozen_now()).unwrap();
            assert_eq!(parsed.len(), size as usize, "size {size} max {max_items}");
            assert!(parsed.current.len() <= max_items);
            assert!(parsed.current.windows(2).all(|w| w[0].created <= w[1].created));
            assert!(parsed.overflow.windows(2).all(|w| w[0].created <= w[1].created));
        }
    }
}

#[test]
fn zero_ttl_disables_the_age_split() {
    let body = feed_of(&[1, 400]);
    let parsed = parse_file_at(body.as_bytes(), &twter(), Duration::ZERO, 10, frozen_now()).unwrap();
    assert_eq!(parsed.current.len(), 2);
    assert!(parsed.overflow.is_empty());

    let parsed = parse_file_at(body.as_bytes(), &twter(), Duration::ZERO, 1, frozen_now()).unwrap();
    assert_eq!(parsed.current[0].text, "post from 1 days ago");
    assert_eq!(parsed.overflow[0].text, "post from 400 days ago");
}
