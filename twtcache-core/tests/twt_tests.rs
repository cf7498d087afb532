use chrono::DateTime;
use twtcache_core::twt::sort_newest_first;
use twtcache_core::{parse_time, Twt, Twter};

fn twt(url: &str, created: &str, text: &str) -> Twt {
    let created = DateTime::parse_from_rfc3339(created).unwrap();
    Twt::new(Twter::new("alice", url), created, text)
}

#[test]
fn hash_is_a_stable_seven_char_base32_suffix() {
    let a = twt("https://example.com/twtxt.txt", "2024-01-01T00:00:00Z", "hello");
    assert_eq!(a.hash(), "365hpbq");
    assert_eq!(a.hash(), a.hash());

    let b = twt("https://example.com/twtxt.txt", "2023-01-01T00:00:00Z", "old");
    assert_eq!(b.hash(), "7jxvb6q");
}

#[test]
fn hash_keeps_the_written_offset() {
    let t = twt(
        "http://example.org/alice.txt",
        "2020-11-13T16:13:00+01:00",
        "Hello @<bob https://example.org/bob.txt> #<rust https://example.org/tag/rust>",
    );
    assert_eq!(t.hash(), "hzibbqq");
}

#[test]
fn identical_fields_collide_and_any_change_does_not() {
    let a = twt("https://example.com/twtxt.txt", "2024-01-01T00:00:00Z", "hello");
    let mut b = twt("https://example.com/twtxt.txt", "2024-01-01T00:00:00Z", "hello");
    b.twter.nick = "someone-else".into();
    assert_eq!(a.hash(), b.hash());

    let c = twt("https://example.com/twtxt.txt", "2024-01-01T00:00:01Z", "hello");
    let d = twt("https://example.com/other.txt", "2024-01-01T00:00:00Z", "hello");
    let e = twt("https://example.com/twtxt.txt", "2024-01-01T00:00:00Z", "hello!");
    assert_ne!(a.hash(), c.hash());
    assert_ne!(a.hash(), d.hash());
    assert_ne!(a.hash(), e.hash());
}

#[test]
fn hash_is_not_serialized_and_recomputed_after_decode() {
    let a = twt("https://example.com/twtxt.txt", "2024-01-01T00:00:00Z", "hello");
    let json = serde_json::to_value(&a).unwrap();
    assert!(json.get("hash").is_none());

    let decoded: Twt = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, a);
    assert_eq!(decoded.hash(), "365hpbq");
}

#[test]
fn mentions_and_tags_are_extracted_once_in_order() {
    let t = twt(
        "http://example.org/alice.txt",
        "2020-11-13T16:13:00Z",
        "@<bob https://b.org/twtxt.txt> @<carol https://c.org/twtxt.txt> hi @<bob https://b.org/twtxt.txt> #<rust https://x/rust> #<go https://x/go> #<rust https://x/rust>",
    );
    let mentions = t.mentions();
    assert_eq!(mentions.len(), 2);
    assert_eq!(mentions[0], Twter::new("bob", "https://b.org/twtxt.txt"));
    assert_eq!(mentions[1].nick, "carol");
    assert_eq!(t.tags(), vec!["rust".to_owned(), "go".to_owned()]);
}

#[test]
fn subject_defaults_to_own_hash() {
    let reply = twt(
        "http://example.org/alice.txt",
        "2020-11-13T16:13:00Z",
        "@<bob https://b.org/twtxt.txt> (#abcdefg) agreed",
    );
    assert_eq!(reply.subject(), "(#abcdefg)");

    let root = twt("http://example.org/alice.txt", "2020-11-13T16:13:00Z", "new thread");
    assert_eq!(root.subject(), format!("(#{})", root.hash()));
}

#[test]
fn parse_time_accepts_known_layouts() {
    let cases = [
        ("2024-01-01T00:00:00Z", "2024-01-01T00:00:00+00:00"),
        ("2024-01-01t00:00:00z", "2024-01-01T00:00:00+00:00"),
        ("2024-01-01T00:00:00.123456789+01:00", "2024-01-01T00:00:00.123456789+01:00"),
        ("2024-01-01T00:00:00+0100", "2024-01-01T00:00:00+01:00"),
        ("2024-01-01T00:00:00", "2024-01-01T00:00:00+00:00"),
        ("2024-01-01T10:30+02:00", "2024-01-01T10:30:00+02:00"),
        ("2024-01-01T10:30Z", "2024-01-01T10:30:00+00:00"),
        ("2024-01-01T10:30", "2024-01-01T10:30:00+00:00"),
    ];
    for (input, expected) in cases {
        let parsed = parse_time(input).unwrap_or_else(|| panic!("failed to parse {input}"));
        assert_eq!(parsed, DateTime::parse_from_rfc3339(expected).unwrap(), "{input}");
    }
}

#[test]
fn parse_time_rejects_garbage() {
    assert!(parse_time("yesterday").is_none());
    assert!(parse_time("2024-13-01T00:00:00Z").is_none());
    assert!(parse_time("").is_none());
}

#[test]
fn timelines_sort_newest_first() {
    let mut twts = vec![
        twt("https://example.com/twtxt.txt", "2024-01-02T00:00:00Z", "middle"),
        twt("https://example.com/twtxt.txt", "2024-01-03T00:00:00+05:00", "newest"),
        twt("https://example.com/twtxt.txt", "2024-01-01T00:00:00Z", "oldest"),
    ];
    sort_newest_first(&mut twts);
    let texts: Vec<_> = twts.iter().map(|t| t.text()).collect();
    assert_eq!(texts, vec!["newest", "middle", "oldest"]);
}
