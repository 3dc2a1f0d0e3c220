//! Represents the object reference delivered by a storage write trigger.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// User-defined key-value metadata attached to an object.
pub type Metadata = Map<String, Value>;

/// A storage object as described by the triggering event.
///
/// Only the fields the pipeline reads are typed. Everything else the trigger
/// sends (`id`, `size`, `timeCreated`, ...) is kept in `extra` so the record
/// can be re-serialized as it arrived.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// Name of the bucket holding the object.
    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub name: String,

    /// MIME type reported by storage. Empty when the trigger omitted it.
    #[serde(default)]
    pub content_type: String,

    /// Counter bumped by storage on every rewrite of the object or its metadata.
    pub metageneration: Metageneration,

    /// Custom metadata, absent when the object never had any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Remaining trigger fields, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectRef {
    pub fn new(
        bucket: impl Into<String>,
        name: impl Into<String>,
        content_type: impl Into<String>,
        metageneration: i64,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            content_type: content_type.into(),
            metageneration: Metageneration::from(metageneration),
            metadata: None,
            extra: Map::new(),
        }
    }

    /// `bucket/name`, used in log fields and error messages.
    pub fn path(&self) -> String {
        format!("{}/{}", self.bucket, self.name)
    }

    pub fn metageneration(&self) -> i64 {
        self.metageneration.get()
    }
}

/// An int64 counter as it appeared on the wire.
///
/// Storage APIs encode int64 fields as JSON strings; background triggers
/// sometimes send plain numbers. Both are accepted, and the original form is
/// what gets serialized again.
#[derive(Clone, Debug, PartialEq)]
pub struct Metageneration {
    value: i64,
    raw: Value,
}

impl Metageneration {
    pub fn get(&self) -> i64 {
        self.value
    }
}

impl From<i64> for Metageneration {
    fn from(value: i64) -> Self {
        Self {
            value,
            raw: Value::from(value),
        }
    }
}

impl Serialize for Metageneration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Metageneration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let value = match &raw {
            Value::Number(n) => n.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| D::Error::custom(format!("expected an int64 counter, got {raw}")))?;
        Ok(Self { value, raw })
    }
}
