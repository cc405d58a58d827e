//! Query canonicalization and content fingerprints.
//!
//! A caller may ask for content by bare video identifier, by any of the
//! common watch-page URL shapes, or by a free-text search phrase. All of
//! these collapse into a [`CanonicalQuery`], and the canonical form plus
//! the requested stream kind hash into a [`Fingerprint`] that keys both
//! cache tiers.

use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::content::StreamKind;
use crate::VIDEO_ID_LEN;

/// Canonical form of a content query.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CanonicalQuery {
    /// A validated 11-character video identifier.
    VideoId(String),
    /// A trimmed, case-folded search phrase.
    Search(String),
}

impl CanonicalQuery {
    /// Canonicalize a raw query string.
    ///
    /// URL shapes that name a specific video reduce to its identifier.
    /// A URL that cannot be reduced is rejected rather than treated as a
    /// search phrase, since callers passing URLs always mean one video.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidQuery("empty query".to_string()));
        }
        if is_video_id(trimmed) {
            return Ok(Self::VideoId(trimmed.to_string()));
        }
        if looks_like_url(trimmed) {
            return match extract_video_id(trimmed) {
                Some(id) => Ok(Self::VideoId(id)),
                None => Err(crate::Error::InvalidQuery(format!(
                    "no video identifier in URL: {trimmed}"
                ))),
            };
        }
        Ok(Self::Search(trimmed.to_lowercase()))
    }

    /// Compute the fingerprint for this query resolved as `kind`.
    pub fn fingerprint(&self, kind: StreamKind) -> Fingerprint {
        // The class prefix keeps an 11-character search phrase from ever
        // colliding with a video identifier of the same spelling.
        let material = match self {
            Self::VideoId(id) => format!("id:{id}:{}", kind.as_str()),
            Self::Search(text) => format!("q:{text}:{}", kind.as_str()),
        };
        let digest = Sha256::digest(material.as_bytes());
        Fingerprint(hex_encode(&digest))
    }

    /// The string handed to the upstream extractor.
    ///
    /// Video identifiers expand back into a watch URL; search phrases
    /// pass through as-is.
    pub fn upstream_query(&self) -> String {
        match self {
            Self::VideoId(id) => format!("https://www.youtube.com/watch?v={id}"),
            Self::Search(text) => text.clone(),
        }
    }

    /// The video identifier, if this query names one.
    pub fn video_id(&self) -> Option<&str> {
        match self {
            Self::VideoId(id) => Some(id),
            Self::Search(_) => None,
        }
    }

    /// Canonical string form, reversible via [`CanonicalQuery::from_canonical`].
    pub fn as_canonical_str(&self) -> String {
        match self {
            Self::VideoId(id) => format!("id:{id}"),
            Self::Search(text) => format!("q:{text}"),
        }
    }

    /// Rebuild from a stored canonical string.
    pub fn from_canonical(s: &str) -> crate::Result<Self> {
        if let Some(id) = s.strip_prefix("id:") {
            if is_video_id(id) {
                return Ok(Self::VideoId(id.to_string()));
            }
            return Err(crate::Error::InvalidQuery(format!(
                "malformed canonical id: {s}"
            )));
        }
        if let Some(text) = s.strip_prefix("q:") {
            if !text.is_empty() {
                return Ok(Self::Search(text.to_string()));
            }
        }
        Err(crate::Error::InvalidQuery(format!(
            "malformed canonical query: {s}"
        )))
    }
}

impl fmt::Display for CanonicalQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VideoId(id) => write!(f, "video {id}"),
            Self::Search(text) => write!(f, "search {text:?}"),
        }
    }
}

/// Hex-encoded SHA-256 fingerprint keying both cache tiers.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.0[..12])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check whether a string is a well-formed video identifier.
pub fn is_video_id(s: &str) -> bool {
    s.len() == VIDEO_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn looks_like_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("www.")
        || s.starts_with("youtube.com/")
        || s.starts_with("youtu.be/")
        || s.starts_with("m.youtube.com/")
}

/// Pull the video identifier out of a watch-page URL, if present.
///
/// Handles `watch?v=`, `youtu.be/`, `embed/`, and `shorts/` shapes, with
/// or without an explicit scheme.
pub fn extract_video_id(input: &str) -> Option<String> {
    let with_scheme = if input.starts_with("http://") || input.starts_with("https://") {
        input.to_string()
    } else {
        format!("https://{input}")
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.strip_prefix("www.").unwrap_or(url.host_str()?);

    let candidate = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next()? {
                "watch" => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                "embed" | "shorts" | "live" | "v" => segments.next().map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
