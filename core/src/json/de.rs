//! serde helpers for the shapes ADU documents use
//!
//! `members` reads a JSON object into a bounded list, one entry per member,
//! so keyed collections such as `files`, `hashes` and `fileUrls` keep the
//! member name with each value. Objects with more members than the list
//! holds fail to deserialize.

use core::fmt;
use core::marker::PhantomData;

use heapless::Vec;
use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};

use super::JsonSpan;

/// One member of a JSON object read into a bounded list
pub(crate) trait Member<'de>: Sized {
    /// Member value
    type Value: Deserialize<'de>;

    fn from_member(name: JsonSpan<'de>, value: Self::Value) -> Self;
}

/// Deserialize an object into at most `N` members
pub(crate) fn members<'de, D, M, const N: usize>(deserializer: D) -> Result<Vec<M, N>, D::Error>
where
    D: Deserializer<'de>,
    M: Member<'de>,
{
    deserializer.deserialize_map(MembersVisitor(PhantomData))
}

struct MembersVisitor<M, const N: usize>(PhantomData<M>);

impl<'de, M: Member<'de>, const N: usize> Visitor<'de> for MembersVisitor<M, N> {
    type Value = Vec<M, N>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an object with at most {} members", N)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut list = Vec::new();
        while let Some(name) = map.next_key::<JsonSpan<'de>>()? {
            let value = map.next_value::<M::Value>()?;
            if list.push(M::from_member(name, value)).is_err() {
                return Err(de::Error::invalid_length(N + 1, &self));
            }
        }
        Ok(list)
    }
}

/// Deserialize a string that may be `null`, which reads as empty
pub(crate) fn nullable<'de, D>(deserializer: D) -> Result<JsonSpan<'de>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<JsonSpan<'de>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AduError;
    use crate::json::from_slice;
    use serde::Deserialize;

    #[derive(Debug, PartialEq)]
    struct Tag<'a> {
        name: JsonSpan<'a>,
        value: i32,
    }

    impl<'de> Member<'de> for Tag<'de> {
        type Value = i32;

        fn from_member(name: JsonSpan<'de>, value: i32) -> Self {
            Self { name, value }
        }
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Tagged<'a> {
        #[serde(borrow, deserialize_with = "members")]
        tags: Vec<Tag<'a>, 2>,
        #[serde(borrow, deserialize_with = "nullable")]
        note: JsonSpan<'a>,
    }

    #[test]
    fn test_members_keep_order_and_names() {
        let tagged: Tagged<'_> = from_slice(br#"{"tags":{"b":2,"a":1},"note":null}"#).unwrap();
        assert_eq!(tagged.tags.len(), 2);
        assert!(tagged.tags[0].name.matches("b"));
        assert_eq!(tagged.tags[1].value, 1);
        assert!(tagged.note.is_empty());
    }

    #[test]
    fn test_members_over_capacity() {
        let result = from_slice::<Tagged<'_>>(br#"{"tags":{"a":1,"b":2,"c":3}}"#);
        assert_eq!(result.err(), Some(AduError::ParseFailed));
    }

    #[test]
    fn test_members_require_an_object() {
        assert!(from_slice::<Tagged<'_>>(br#"{"tags":[1,2]}"#).is_err());
        assert!(from_slice::<Tagged<'_>>(br#"{"note":5}"#).is_err());
    }
}
