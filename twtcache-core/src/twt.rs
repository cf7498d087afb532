use std::fmt;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, FixedOffset, SecondsFormat};
use data_encoding::BASE32_NOPAD;
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of base32 characters kept from the digest. Archived files and
/// external links depend on it, so changing it breaks the on-disk format.
pub const HASH_LENGTH: usize = 7;

type Blake2b256 = Blake2b<U32>;

static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@<(.*?) (.*?)>").expect("valid regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#<(.*?) .*?>").expect("valid regex"));
static SUBJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(@<.*>[, ]*)*(\(.*?\))(.*)").expect("valid regex"));

/// The author of a twt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Twter {
    pub nick: String,
    pub url: String,
    #[serde(default)]
    pub avatar: String,
}

impl Twter {
    pub fn new(nick: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            url: url.into(),
            avatar: String::new(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.nick.is_empty() && self.url.is_empty()
    }
}

/// One immutable, timestamped entry of a feed.
///
/// The hash is never stored: it is derived from the author URL, the creation
/// instant and the text, and memoized per instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct Twt {
    pub twter: Twter,
    pub text: String,
    pub created: DateTime<FixedOffset>,
    #[serde(skip)]
    hash: OnceCell<String>,
}

impl Twt {
    pub fn new(twter: Twter, created: DateTime<FixedOffset>, text: impl Into<String>) -> Self {
        Self {
            twter,
            text: text.into(),
            created,
            hash: OnceCell::new(),
        }
    }

    pub fn hash(&self) -> &str {
        self.hash.get_or_init(|| {
            let payload = format!(
                "{}\n{}\n{}",
                self.twter.url,
                self.created.to_rfc3339_opts(SecondsFormat::Secs, true),
                self.text
            );
            let sum = Blake2b256::digest(payload.as_bytes());
            let encoded = BASE32_NOPAD.encode(&sum).to_lowercase();
            encoded[encoded.len() - HASH_LENGTH..].to_owned()
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Mentions written as `@<nick url>`, deduplicated in order of appearance.
    pub fn mentions(&self) -> Vec<Twter> {
        let mut mentions: Vec<Twter> = Vec::new();
        for caps in MENTION_RE.captures_iter(&self.text) {
            let mention = Twter::new(&caps[1], &caps[2]);
            if !mentions.contains(&mention) {
                mentions.push(mention);
            }
        }
        mentions
    }

    /// Tags written as `#<tag url>`, deduplicated in order of appearance.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for caps in TAG_RE.captures_iter(&self.text) {
            let tag = caps[1].to_owned();
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }

    /// The `(...)` group following any leading mentions, or `(#hash)` when
    /// the twt starts a new conversation.
    pub fn subject(&self) -> String {
        match SUBJECT_RE.captures(&self.text) {
            Some(caps) => caps[2].to_owned(),
            None => format!("(#{})", self.hash()),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.twter.is_zero() && self.text.is_empty()
    }
}

impl PartialEq for Twt {
    fn eq(&self, other: &Self) -> bool {
        self.twter == other.twter && self.created == other.created && self.text == other.text
    }
}

impl Eq for Twt {}

impl fmt::Debug for Twt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Twt")
            .field("hash", &self.hash())
            .field("twter", &self.twter.url)
            .field("created", &self.created)
            .field("text", &self.text)
            .finish()
    }
}

pub type Twts = Vec<Twt>;

/// Sorts newest first, the order timelines are rendered in.
pub fn sort_newest_first(twts: &mut [Twt]) {
    twts.sort_by(|a, b| b.created.cmp(&a.created));
}
