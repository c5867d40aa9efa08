//! Document and collection paths, and path patterns with parameter bindings.
//!
//! Paths alternate collection ids and document ids:
//! `organizations/{orgId}` is a document, `organizations/{orgId}/users` a collection.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Parameter bindings captured by a [`PathPattern`] match.
pub type PathParams = BTreeMap<String, String>;

fn split_segments(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(StoreError::invalid_path(path, "path is empty"));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::invalid_path(path, "path contains an empty segment"));
    }
    Ok(segments)
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StoreError::invalid_path(id, "id is empty"));
    }
    if id.contains('/') {
        return Err(StoreError::invalid_path(id, "id must not contain '/'"));
    }
    Ok(())
}

/// Path of a single document (even number of segments).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn parse(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let count = split_segments(&path)?.len();
        if count % 2 != 0 {
            return Err(StoreError::invalid_path(
                path,
                "document paths need an even number of segments",
            ));
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment: the document id.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Collection that contains this document.
    pub fn parent(&self) -> CollectionPath {
        let cut = self.0.rfind('/').unwrap_or(0);
        CollectionPath(self.0[..cut].to_string())
    }

    /// Subcollection under this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<DocumentPath> for String {
    fn from(value: DocumentPath) -> Self {
        value.0
    }
}

/// Path of a collection (odd number of segments).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Top-level collection.
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn parse(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let count = split_segments(&path)?.len();
        if count % 2 != 1 {
            return Err(StoreError::invalid_path(
                path,
                "collection paths need an odd number of segments",
            ));
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Document with the given id inside this collection.
    pub fn doc(&self, id: &str) -> Result<DocumentPath> {
        validate_id(id)?;
        Ok(DocumentPath(format!("{}/{}", self.0, id)))
    }

    /// Document that owns this collection, if it is a subcollection.
    pub fn parent(&self) -> Option<DocumentPath> {
        self.0
            .rfind('/')
            .map(|cut| DocumentPath(self.0[..cut].to_string()))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CollectionPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<CollectionPath> for String {
    fn from(value: CollectionPath) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Param(String),
}

/// Document path template such as `organizations/{orgId}/users/{uid}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let raw_segments = split_segments(pattern)?;
        if raw_segments.len() % 2 != 0 {
            return Err(StoreError::invalid_path(
                pattern,
                "patterns must describe document paths",
            ));
        }

        let mut segments = Vec::with_capacity(raw_segments.len());
        for segment in raw_segments {
            let parsed = match segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
            {
                Some("") => {
                    return Err(StoreError::invalid_path(pattern, "empty parameter name"));
                }
                Some(name) => PatternSegment::Param(name.to_string()),
                None => PatternSegment::Literal(segment.to_string()),
            };
            segments.push(parsed);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a document path, returning its parameter bindings.
    pub fn matches(&self, path: &DocumentPath) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut actual = path.segments();

        for expected in &self.segments {
            let segment = actual.next()?;
            match expected {
                PatternSegment::Literal(lit) if lit == segment => {}
                PatternSegment::Literal(_) => return None,
                PatternSegment::Param(name) => {
                    params.insert(name.clone(), segment.to_string());
                }
            }
        }

        if actual.next().is_some() {
            return None;
        }
        Some(params)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
