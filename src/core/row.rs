//! Purpose: Positional rows and header-keyed records.
//! Exports: `Row`, `Record`.
//! Role: Value types exchanged between sessions and callers.
//! Invariants: Record keys are unique and keep header order.
//! Invariants: Repeated headers resolve last-write-wins at the first key position.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

pub type Row = Vec<String>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs `headers` with `row` positionally; extra values on either side are dropped.
    pub fn zip(headers: &[String], row: Row) -> Self {
        headers.iter().cloned().zip(row).collect()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Projects onto `headers`; missing keys become empty values, extra keys are ignored.
    pub fn project(&self, headers: &[String]) -> Row {
        headers
            .iter()
            .map(|header| self.get(header).unwrap_or_default().to_string())
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
