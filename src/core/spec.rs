//! Purpose: Canonical table specification and the normalizer that produces it.
//! Exports: `TableSpec`, `TableSource`, `normalize`, well-known key names.
//! Role: Every accepted spec shape is resolved here, once, at the boundary.
//! Invariants: A `TableSpec` is validated on construction and immutable afterwards.
//! Invariants: Normalization is pure: no filesystem or network access.
//! Invariants: Unrecognised keys are carried to the backend untouched.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::{Map, Value};
use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::core::location::uri_scheme;
use crate::core::spec_text::{looks_structured, parse_spec_text};

pub const KEY_KIND: &str = "kind";
pub const KEY_TYPE: &str = "type";
pub const KEY_LOCATION: &str = "location";
pub const KEY_HEADERS: &str = "headers";
pub const KEY_WIDTHS: &str = "widths";

/// Declarative description of one table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSpec {
    kind: String,
    location: String,
    headers: Option<Vec<String>>,
    params: Map<String, Value>,
}

impl TableSpec {
    pub fn new(kind: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            location: location.into(),
            headers: None,
            params: Map::new(),
        }
    }

    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a format-specific parameter. Reserved keys are routed to their fields.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            KEY_KIND | KEY_TYPE => {
                if let Value::String(kind) = value {
                    self.kind = kind;
                }
            }
            KEY_LOCATION => {
                if let Value::String(location) = value {
                    self.location = location;
                }
            }
            KEY_HEADERS => match value {
                Value::Null => self.headers = None,
                Value::Array(items) if items.iter().all(Value::is_string) => {
                    self.headers = Some(
                        items
                            .into_iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect(),
                    );
                }
                // Left in params so `validate` reports it.
                other => {
                    self.params.insert(key, other);
                }
            },
            _ => {
                self.params.insert(key, value);
            }
        }
        self
    }

    /// Builds a spec from a structured map, validating every well-known key.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, Error> {
        let legacy_kind = map.remove(KEY_TYPE);
        let kind = match map.remove(KEY_KIND).or(legacy_kind) {
            Some(Value::String(kind)) => kind,
            Some(other) => return Err(invalid(format!("`kind` must be a string, got {other}"))),
            None => {
                return Err(invalid("spec is missing `kind`")
                    .with_hint("Add a format identifier, e.g. :kind delimited."));
            }
        };
        let location = match map.remove(KEY_LOCATION) {
            Some(Value::String(location)) => location,
            Some(other) => {
                return Err(invalid(format!("`location` must be a string, got {other}")));
            }
            None => return Err(invalid("spec is missing `location`")),
        };
        let headers = match map.remove(KEY_HEADERS) {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(header) => Ok(header),
                        other => Err(invalid(format!("header names must be strings, got {other}"))),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(other) => return Err(invalid(format!("`headers` must be a list, got {other}"))),
        };

        let spec = Self {
            kind,
            location,
            headers,
            params: map,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.kind.trim().is_empty() {
            return Err(invalid("`kind` must not be empty"));
        }
        if self.location.trim().is_empty() {
            return Err(invalid("`location` must not be empty"));
        }
        if self.params.contains_key(KEY_HEADERS) {
            return Err(invalid("`headers` must be a list of strings"));
        }
        if let Some(widths) = self.widths()? {
            if let Some(headers) = &self.headers {
                if headers.len() != widths.len() {
                    return Err(invalid(format!(
                        "{} widths declared for {} headers",
                        widths.len(),
                        headers.len()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Column widths, when the spec declares them.
    pub fn widths(&self) -> Result<Option<Vec<usize>>, Error> {
        let Some(value) = self.params.get(KEY_WIDTHS) else {
            return Ok(None);
        };
        let Value::Array(items) = value else {
            return Err(invalid(format!("`widths` must be a list, got {value}")));
        };
        items
            .iter()
            .map(|item| match item.as_u64() {
                Some(width) if width > 0 => usize::try_from(width)
                    .map_err(|_| invalid(format!("width {width} is too large"))),
                _ => Err(invalid(format!("widths must be positive integers, got {item}"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for TableSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(KEY_KIND, &self.kind)?;
        map.serialize_entry(KEY_LOCATION, &self.location)?;
        if let Some(headers) = &self.headers {
            map.serialize_entry(KEY_HEADERS, headers)?;
        }
        for (key, value) in &self.params {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Any of the shapes a caller may hand to the factory.
#[derive(Clone, Debug, PartialEq)]
pub enum TableSource {
    Spec(TableSpec),
    Map(Map<String, Value>),
    Text(String),
    Path(PathBuf),
    Uri(Url),
}

impl From<TableSpec> for TableSource {
    fn from(spec: TableSpec) -> Self {
        Self::Spec(spec)
    }
}

impl From<Map<String, Value>> for TableSource {
    fn from(map: Map<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl From<&str> for TableSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for TableSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&Path> for TableSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for TableSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Url> for TableSource {
    fn from(url: Url) -> Self {
        Self::Uri(url)
    }
}

/// Canonicalizes `source`, giving bare locations `default_kind`.
pub fn normalize(source: TableSource, default_kind: &str) -> Result<TableSpec, Error> {
    let spec = match source {
        TableSource::Spec(spec) => {
            spec.validate()?;
            spec
        }
        TableSource::Map(map) => TableSpec::from_map(map)?,
        TableSource::Text(text) => normalize_text(&text, default_kind)?,
        TableSource::Path(path) => {
            let location = path.to_str().ok_or_else(|| {
                invalid("path is not valid UTF-8").with_path(path.clone())
            })?;
            bare_location(location, default_kind)?
        }
        TableSource::Uri(url) => bare_location(url.as_str(), default_kind)?,
    };
    tracing::debug!(kind = spec.kind(), location = spec.location(), "normalized table spec");
    Ok(spec)
}

fn normalize_text(text: &str, default_kind: &str) -> Result<TableSpec, Error> {
    if looks_structured(text) {
        let map = parse_spec_text(text)?;
        return TableSpec::from_map(map);
    }
    let location = text.trim();
    if location.chars().any(char::is_control) {
        return Err(invalid("location must not contain control characters"));
    }
    if uri_scheme(location).is_none() && location.contains("://") {
        return Err(invalid(format!("`{location}` is neither a spec nor a location")));
    }
    bare_location(location, default_kind)
}

fn bare_location(location: &str, default_kind: &str) -> Result<TableSpec, Error> {
    let spec = TableSpec::new(default_kind, location);
    spec.validate()?;
    Ok(spec)
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidSpec).with_message(message)
}
