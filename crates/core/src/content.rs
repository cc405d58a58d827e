//! Stream kinds and playback tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which rendition of a piece of content a caller asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            _ => Err(crate::Error::InvalidStreamKind(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Human-facing label used in content responses.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Audio => "Audio",
            Self::Video => "Video",
        }
    }

    /// Content type served when the rendition streams from the blob tier.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Audio => "audio/mpeg",
            Self::Video => "video/mp4",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token naming one resolved content record on the stream route.
///
/// Tokens are minted at resolution time and carry no caller identity,
/// so the stream route itself needs no key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackToken(Uuid);

impl PlaybackToken {
    /// Mint a new random token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidToken(format!("{e}")))
    }
}

impl Default for PlaybackToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlaybackToken({})", self.0)
    }
}

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
