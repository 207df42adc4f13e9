//! Composite lookup keys.
//!
//! Every record class and every index gets a distinct category tag as the
//! key's first segment, so primary snapshots and key-reference sets can
//! never collide inside one physical store. Identical `(category, parts)`
//! sequences encode identically; the delimiter is escaped inside parts so
//! no part value can alias a different key.

use std::borrow::Cow;
use std::fmt;

const DELIMITER: char = ':';

/// A canonical multi-part store key: `category:part1:part2:…`.
///
/// Categories are crate-internal tags and must not contain the delimiter;
/// parts may contain anything and are escaped.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct CompositeKey {
    encoded: String,
}

impl CompositeKey {
    pub fn of(category: &str, parts: &[&str]) -> Self {
        debug_assert!(!category.is_empty(), "key category must be provided");
        debug_assert!(!category.contains(DELIMITER), "key category must not contain ':'");

        let mut encoded = String::from(category);
        for part in parts {
            encoded.push(DELIMITER);
            encoded.push_str(&escape(part));
        }
        Self { encoded }
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// An index key tied to the primary key it indexes, so membership can be
/// added or removed without a reverse lookup.
#[derive(Clone, Debug)]
pub struct IndexKey {
    key: CompositeKey,
    owner: CompositeKey,
}

impl IndexKey {
    pub fn linking(owner: &CompositeKey, category: &str, parts: &[&str]) -> Self {
        Self {
            key: CompositeKey::of(category, parts),
            owner: owner.clone(),
        }
    }

    pub fn key(&self) -> &CompositeKey {
        &self.key
    }

    /// The owning primary-key string stored in the key-reference set.
    pub fn owner_value(&self) -> &str {
        self.owner.as_str()
    }
}

fn escape(part: &str) -> Cow<'_, str> {
    if part.contains(['%', DELIMITER]) {
        Cow::Owned(part.replace('%', "%25").replace(DELIMITER, "%3A"))
    } else {
        Cow::Borrowed(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sequences_encode_identically() {
        let a = CompositeKey::of("bli#pk", &["12345", "bli1"]);
        let b = CompositeKey::of("bli#pk", &["12345", "bli1"]);
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn categories_partition_the_key_space() {
        let primary = CompositeKey::of("bli#pk", &["12345"]);
        let index = CompositeKey::of("bli#product", &["12345"]);
        assert_ne!(primary, index);
    }

    #[test]
    fn delimiter_in_part_cannot_alias_another_key() {
        let split = CompositeKey::of("k", &["a", "b"]);
        let joined = CompositeKey::of("k", &["a:b"]);
        assert_ne!(split, joined);

        let left = CompositeKey::of("k", &["a:b", "c"]);
        let right = CompositeKey::of("k", &["a", "b:c"]);
        assert_ne!(left, right);
    }

    #[test]
    fn escape_is_injective_for_escape_character() {
        let literal = CompositeKey::of("k", &["a%3Ab"]);
        let colon = CompositeKey::of("k", &["a:b"]);
        assert_ne!(literal, colon);
    }

    #[test]
    fn linked_key_carries_owner() {
        let primary = CompositeKey::of("bli#pk", &["12345", "bli1"]);
        let index = IndexKey::linking(&primary, "bli#product", &["12345", "p1"]);
        assert_eq!(index.owner_value(), "bli#pk:12345:bli1");
        assert_eq!(index.key().as_str(), "bli#product:12345:p1");
    }
}
