//! Topic derivation from message content.
//!
//! Topics have the form `<prefix>/<device_class>/<selector>`, where the
//! selector is, in order of preference:
//!
//! 1. the record's numeric `id`, as a decimal integer;
//! 2. `unknown`, when the record parses but has no numeric `id`;
//! 3. `raw`, when the record does not parse at all.
//!
//! Subscribers depend on this scheme, so the fallbacks must not change.

use crate::config::{TopicScheme, TOPIC_CAPACITY};
use core::fmt::{self, Write};
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};

/// A publish topic.
pub type Topic = heapless::String<TOPIC_CAPACITY>;

/// Last path segment of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TopicSelector {
    /// The record's `id` field.
    Id(i32),
    /// The record has no numeric `id`.
    Unknown,
    /// The record is not structured text.
    Raw,
}

impl TopicSelector {
    /// Pick the selector for `message`. Never fails.
    pub fn from_message(message: &str) -> Self {
        match serde_json::from_str::<IdField>(message) {
            Ok(IdField(id)) => id.map_or(Self::Unknown, Self::Id),
            Err(_) => Self::Raw,
        }
    }
}

impl fmt::Display for TopicSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Unknown => f.write_str("unknown"),
            Self::Raw => f.write_str("raw"),
        }
    }
}

/// The numeric `id` of a record, found without building the document.
///
/// The first member whose key equals `id` ignoring ASCII case wins, in
/// document order. Non-integral numbers truncate toward zero and
/// out-of-range values saturate to the `i32` bounds. Anything that is not an
/// object, or whose `id` is not a number, has no id.
struct IdField(Option<i32>);

impl<'de> Deserialize<'de> for IdField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RecordVisitor).map(IdField)
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Option<i32>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut id = None;
        let mut found = false;
        while let Some(IdKey(is_id)) = map.next_key()? {
            if is_id && !found {
                found = true;
                id = map.next_value::<IdValue>()?.0;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(id)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Self::Value, A::Error> {
        IgnoredAny.visit_seq(seq).map(|_| None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_i64<E: de::Error>(self, _v: i64) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_u64<E: de::Error>(self, _v: u64) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_str<E: de::Error>(self, _v: &str) -> Result<Self::Value, E> {
        Ok(None)
    }
}

/// Whether an object key names the id.
struct IdKey(bool);

impl<'de> Deserialize<'de> for IdKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = IdKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object key")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<IdKey, E> {
                Ok(IdKey(v.eq_ignore_ascii_case("id")))
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}

/// The value under the id key, if numeric.
struct IdValue(Option<i32>);

impl<'de> Deserialize<'de> for IdValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IdValueVisitor).map(IdValue)
    }
}

struct IdValueVisitor;

impl<'de> Visitor<'de> for IdValueVisitor {
    type Value = Option<i32>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(i32::try_from(v).unwrap_or(i32::MAX)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        // Saturating float-to-int cast.
        Ok(Some(v as i32))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
        IgnoredAny.visit_map(map).map(|_| None)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<Self::Value, A::Error> {
        IgnoredAny.visit_seq(seq).map(|_| None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_str<E: de::Error>(self, _v: &str) -> Result<Self::Value, E> {
        Ok(None)
    }
}

/// Maps validated messages to topics under a fixed [`TopicScheme`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicRouter {
    scheme: TopicScheme,
}

impl TopicRouter {
    #[must_use]
    pub const fn new(scheme: TopicScheme) -> Self {
        Self { scheme }
    }

    #[must_use]
    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Topic for `message`.
    ///
    /// Total and deterministic. A scheme too long for [`TOPIC_CAPACITY`]
    /// yields a truncated topic rather than an error.
    pub fn topic_for(&self, message: &str) -> Topic {
        self.topic_with(TopicSelector::from_message(message))
    }

    /// Topic for an already chosen selector.
    pub fn topic_with(&self, selector: TopicSelector) -> Topic {
        let mut topic = Topic::new();
        let _ = write!(
            topic,
            "{}/{}/{}",
            self.scheme.prefix, self.scheme.device_class, selector
        );
        topic
    }
}

/// Topic for `message` under the default scheme.
pub fn topic_for(message: &str) -> Topic {
    TopicRouter::default().topic_for(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_id() {
        assert_eq!(topic_for(r#"{"id":7,"t":21.5}"#), "sensors/bluepill/7");
    }

    #[test]
    fn test_negative_id() {
        assert_eq!(topic_for(r#"{"id":-3}"#), "sensors/bluepill/-3");
    }

    #[test]
    fn test_missing_id() {
        assert_eq!(topic_for(r#"{"t":21.5}"#), "sensors/bluepill/unknown");
    }

    #[test]
    fn test_non_numeric_id() {
        assert_eq!(topic_for(r#"{"id":"7"}"#), "sensors/bluepill/unknown");
        assert_eq!(topic_for(r#"{"id":null}"#), "sensors/bluepill/unknown");
        assert_eq!(topic_for(r#"{"id":[7]}"#), "sensors/bluepill/unknown");
    }

    #[test]
    fn test_non_object_record() {
        assert_eq!(topic_for("[1,2,3]"), "sensors/bluepill/unknown");
        assert_eq!(topic_for("42"), "sensors/bluepill/unknown");
    }

    #[test]
    fn test_unparseable_message() {
        assert_eq!(topic_for("not json"), "sensors/bluepill/raw");
        assert_eq!(topic_for(""), "sensors/bluepill/raw");
    }

    #[test]
    fn test_fractional_id_truncates() {
        assert_eq!(topic_for(r#"{"id":7.9}"#), "sensors/bluepill/7");
        assert_eq!(topic_for(r#"{"id":-7.9}"#), "sensors/bluepill/-7");
    }

    #[test]
    fn test_out_of_range_id_saturates() {
        assert_eq!(
            topic_for(r#"{"id":99999999999}"#),
            "sensors/bluepill/2147483647"
        );
        assert_eq!(
            topic_for(r#"{"id":-99999999999}"#),
            "sensors/bluepill/-2147483648"
        );
        assert_eq!(
            topic_for(r#"{"id":18446744073709551615}"#),
            "sensors/bluepill/2147483647"
        );
    }

    #[test]
    fn test_id_key_ignores_case() {
        assert_eq!(topic_for(r#"{"ID":12}"#), "sensors/bluepill/12");
        assert_eq!(topic_for(r#"{"Id":4,"t":1}"#), "sensors/bluepill/4");
    }

    #[test]
    fn test_first_id_key_in_document_order_wins() {
        assert_eq!(topic_for(r#"{"ID":12,"id":3}"#), "sensors/bluepill/12");
        assert_eq!(topic_for(r#"{"id":3,"ID":12}"#), "sensors/bluepill/3");
        assert_eq!(topic_for(r#"{"iD":"x","id":3}"#), "sensors/bluepill/unknown");
    }

    #[test]
    fn test_nested_id_is_not_used() {
        assert_eq!(
            topic_for(r#"{"meta":{"id":9},"t":[{"id":8}]}"#),
            "sensors/bluepill/unknown"
        );
        assert_eq!(topic_for(r#"{"meta":{"id":9},"id":2}"#), "sensors/bluepill/2");
    }

    #[test]
    fn test_escaped_id_key() {
        assert_eq!(topic_for(r#"{"\u0069d":5}"#), "sensors/bluepill/5");
    }

    #[test]
    fn test_trailing_content_is_raw() {
        assert_eq!(topic_for(r#"{"id":1} x"#), "sensors/bluepill/raw");
    }

    #[test]
    fn test_custom_scheme() {
        let router = TopicRouter::new(TopicScheme::new("plant", "greenhouse"));
        assert_eq!(router.topic_for(r#"{"id":1}"#), "plant/greenhouse/1");
        assert_eq!(
            router.topic_with(TopicSelector::Raw),
            "plant/greenhouse/raw"
        );
    }

    #[test]
    fn test_deterministic() {
        let message = r#"{"id":5,"h":40}"#;
        assert_eq!(topic_for(message), topic_for(message));
        assert_eq!(
            TopicSelector::from_message(message),
            TopicSelector::Id(5)
        );
    }
}
