//! Typed wire records for the reader API.
//!
//! The service is loose about number encoding (ids and counters arrive as
//! JSON numbers or numeric strings), so integer fields go through
//! [`de_int`]/[`de_id`] instead of plain `i64`.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(i64),
    Float(f64),
    Str(String),
}

impl NumOrStr {
    fn into_i64(self) -> Option<i64> {
        match self {
            NumOrStr::Num(n) => Some(n),
            NumOrStr::Float(f) if f.is_finite() => Some(f as i64),
            NumOrStr::Float(_) => None,
            NumOrStr::Str(s) => s.trim().parse().ok(),
        }
    }
}

/// Required positive id.
fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = Option::<NumOrStr>::deserialize(deserializer)?;
    match raw.and_then(NumOrStr::into_i64) {
        Some(id) if id > 0 => Ok(id),
        _ => Err(serde::de::Error::custom("missing or invalid id")),
    }
}

/// Optional integer; null, empty, or garbage decode as 0.
fn de_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = Option::<NumOrStr>::deserialize(deserializer)?;
    Ok(raw.and_then(NumOrStr::into_i64).unwrap_or(0))
}

/// Optional string; blank strings decode as `None`.
fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

/// One entry of the subscription list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(rename = "subscribe_id", deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub title: Option<String>,
    #[serde(rename = "icon", default, deserialize_with = "de_text")]
    pub icon_uri: Option<String>,
    #[serde(rename = "link", default, deserialize_with = "de_text")]
    pub uri: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub folder: Option<String>,
    #[serde(default, deserialize_with = "de_int")]
    pub rate: i64,
    #[serde(default, deserialize_with = "de_int")]
    pub unread_count: i64,
    #[serde(default, deserialize_with = "de_int")]
    pub subscribers_count: i64,
    #[serde(rename = "modified_on", default, deserialize_with = "de_int")]
    pub modified_time: i64,
}

/// One item of an unread or full item listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "de_text")]
    pub author: Option<String>,
    #[serde(rename = "link", default, deserialize_with = "de_text")]
    pub uri: Option<String>,
    #[serde(rename = "created_on", default, deserialize_with = "de_int")]
    pub created_time: i64,
    #[serde(rename = "modified_on", default, deserialize_with = "de_int")]
    pub modified_time: i64,
}

/// A page of the full item listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ItemPage {
    #[serde(default)]
    pub items: Vec<ItemRecord>,
    /// Server says there is nothing past this page, whatever its length.
    #[serde(rename = "nomore", default)]
    pub no_more: bool,
}

/// Envelope of the unread listing.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct UnreadEnvelope {
    #[serde(default)]
    pub items: Vec<ItemRecord>,
}
