use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::Location;

/// Call site attached to an entry as `logging.googleapis.com/sourceLocation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    /// Cloud Logging expects the line as a string.
    #[serde(with = "line_as_string")]
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self { file: file.into(), line }
    }

    /// Location of whoever called the enclosing `#[track_caller]` chain.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&Location<'_>> for SourceLocation {
    fn from(loc: &Location<'_>) -> Self {
        Self::new(loc.file(), loc.line())
    }
}

mod line_as_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(line: &u32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&line.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Service identity attached to an entry as `serviceContext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContext {
    pub service: String,
    pub version: String,
}

impl ServiceContext {
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self { service: service.into(), version: version.into() }
    }
}

/// Structured field attached to a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Free-form string label, grouped under `logging.googleapis.com/labels`.
    Label { key: String, value: String },
    SourceLocation(SourceLocation),
    ServiceContext(ServiceContext),
}

impl Field {
    pub fn label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Field::Label { key: key.into(), value: value.into() }
    }

    /// Source location of the caller of the enclosing `#[track_caller]` chain.
    #[track_caller]
    pub fn source_location() -> Self {
        Field::SourceLocation(SourceLocation::caller())
    }

    pub fn service_context(service: impl Into<String>, version: impl Into<String>) -> Self {
        Field::ServiceContext(ServiceContext::new(service, version))
    }
}

/// Fields of one entry after merging, ready to be encoded.
///
/// Labels with the same key keep the last value; a later source location or
/// service context replaces an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFields {
    pub labels: BTreeMap<String, String>,
    pub source_location: Option<SourceLocation>,
    pub service_context: Option<ServiceContext>,
}

impl EntryFields {
    pub fn merge<'a>(&mut self, fields: impl IntoIterator<Item = &'a Field>) {
        for field in fields {
            match field {
                Field::Label { key, value } => {
                    self.labels.insert(key.clone(), value.clone());
                }
                Field::SourceLocation(loc) => self.source_location = Some(loc.clone()),
                Field::ServiceContext(ctx) => self.service_context = Some(ctx.clone()),
            }
        }
    }
}
