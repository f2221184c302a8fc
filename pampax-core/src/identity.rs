//! Identity types shared across the PAMPAX pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// Trait for type-safe entity IDs.
///
/// Keeps chunk/repository/edge identifiers from being accidentally mixed up
/// at call sites that otherwise only see opaque UUIDs.
pub trait EntityIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const ENTITY_NAME: &'static str;

    fn new(uuid: Uuid) -> Self;
    fn as_uuid(&self) -> Uuid;

    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    fn new_v4() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Error parsing an entity ID from a string.
#[derive(Debug, Clone)]
pub struct EntityIdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for EntityIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to parse {} id from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for EntityIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

macro_rules! define_entity_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self::new)
                    .map_err(|e| EntityIdParseError {
                        entity_name: Self::ENTITY_NAME,
                        input: s.to_string(),
                        source: e,
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                Uuid::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

define_entity_id!(RepositoryId, "repository", "Type-safe ID for an indexed repository.");
define_entity_id!(ChunkId, "chunk", "Type-safe ID for an indexed code chunk.");
define_entity_id!(EdgeId, "edge", "Type-safe ID for a code-edge graph relationship.");

/// A symbol identifier as produced by the indexer. Symbols are addressed by
/// name/path, not surrogate key, so the graph stays diffable across reindexes.
pub type SymbolId = String;

/// Wall-clock timestamp, always UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Hex-encoded SHA-256 content digest, used for chunk identity and cache keys.
pub type ContentHash = String;

/// Compute a hex-encoded SHA-256 digest of content bytes.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Truncate a full content hash to the 16 hex characters used in cache keys.
pub fn short_hash(hash: &str) -> String {
    hash.chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_type_safety() {
        let repo = RepositoryId::now_v7();
        let chunk = ChunkId::now_v7();
        assert_ne!(repo.as_uuid(), chunk.as_uuid());
    }

    #[test]
    fn entity_id_display_and_debug() {
        let id = ChunkId::new(Uuid::nil());
        assert_eq!(format!("{:?}", id), "ChunkId(00000000-0000-0000-0000-000000000000)");
        assert_eq!(format!("{}", id), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn entity_id_from_str_roundtrip() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id: ChunkId = uuid_str.parse().expect("valid uuid should parse");
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn entity_id_parse_error_reports_entity_name() {
        let result: Result<ChunkId, _> = "not-a-uuid".parse();
        let err = result.unwrap_err();
        assert_eq!(err.entity_name, "chunk");
    }

    #[test]
    fn entity_id_serde_roundtrip() {
        let id = ChunkId::now_v7();
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with('"'));
        let back: ChunkId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = compute_content_hash(b"fn main() {}");
        let b = compute_content_hash(b"fn main() {}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn content_hash_differs_for_different_input() {
        let a = compute_content_hash(b"fn a() {}");
        let b = compute_content_hash(b"fn b() {}");
        assert_ne!(a, b);
    }

    #[test]
    fn short_hash_truncates_to_16_chars() {
        let full = compute_content_hash(b"hello world");
        assert_eq!(short_hash(&full).len(), 16);
        assert!(full.starts_with(&short_hash(&full)));
    }
}
