//! Push payload codec.
//!
//! A leased task carries opaque bytes. For this worker those bytes are a JSON
//! object describing the HTTP request to issue:
//!
//! ```json
//! {"method": "POST", "absUrl": "https://example.com/x",
//!  "headers": {"Content-Type": "text/plain"}, "payload": "body"}
//! ```
//!
//! `headers` and `payload` are optional. A payload that fails to decode can
//! never succeed on retry, so callers treat `DecodeError` as fatal for the task.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("push payload does not decode: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub method: String,

    #[serde(rename = "absUrl")]
    pub abs_url: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "unique_headers"
    )]
    pub headers: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl PushPayload {
    pub fn new(method: impl Into<String>, abs_url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            abs_url: abs_url.into(),
            headers: None,
            payload: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.payload = Some(body.into());
        self
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Vec<u8> {
        // string keys and string values only; serialization cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn body(&self) -> &str {
        self.payload.as_deref().unwrap_or_default()
    }
}

/// Header map that rejects repeated keys instead of keeping the last one.
fn unique_headers<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueMap;

    impl<'de> Visitor<'de> for UniqueMap {
        type Value = Option<BTreeMap<String, String>>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of header names to string values")
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_map(self)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut headers = BTreeMap::new();
            while let Some((name, value)) = access.next_entry::<String, String>()? {
                if headers.contains_key(&name) {
                    return Err(serde::de::Error::custom(format!(
                        "duplicate header `{name}`"
                    )));
                }
                headers.insert(name, value);
            }
            Ok(Some(headers))
        }
    }

    deserializer.deserialize_option(UniqueMap)
}
