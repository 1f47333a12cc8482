use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One attribute value in the tagged-envelope wire format used by the
/// structured table service: `{"S": ...}`, `{"M": {...}}`, `{"L": [...]}`,
/// `{"SS": [...]}` and so on. The externally-tagged enum representation
/// round-trips the envelope byte-for-byte in meaning: a value always
/// serializes as a single-key map whose key is the type tag.
///
/// Maps use `BTreeMap` so iteration (and therefore any serialization derived
/// from it) is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    #[serde(rename = "L")]
    L(Vec<AttrValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttrValue>),
}

/// One table record: attribute name to tagged value.
pub type Item = BTreeMap<String, AttrValue>;

impl AttrValue {
    pub fn s(value: impl Into<String>) -> Self {
        Self::S(value.into())
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_m(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            Self::M(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_m_mut(&mut self) -> Option<&mut BTreeMap<String, AttrValue>> {
        match self {
            Self::M(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_l(&self) -> Option<&[AttrValue]> {
        match self {
            Self::L(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_l_mut(&mut self) -> Option<&mut Vec<AttrValue>> {
        match self {
            Self::L(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_ss_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            Self::Ss(values) => Some(values),
            _ => None,
        }
    }
}

/// Read a nested string attribute, e.g. `string_at(&item, &["meta", "type"])`
/// for `item.meta.M.type.S`. Intermediate segments must be `M` values.
pub fn string_at<'a>(map: &'a BTreeMap<String, AttrValue>, path: &[&str]) -> Option<&'a str> {
    let (last, inner) = path.split_last()?;
    let mut current = map;
    for segment in inner {
        current = current.get(*segment)?.as_m()?;
    }
    current.get(*last)?.as_s()
}
