//! Strongly-typed identifiers for reconciled entities
//!
//! Resource identity is derived from the API group, the kind and the name, so
//! the same declaration always maps onto the same stored resource. The
//! version part of the apiVersion is left out, which lets a resource move to
//! a newer apiVersion of its group without changing identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The (apiVersion, kind) pair that selects a resource handler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceKind {
    pub api_version: String,
    pub kind: String,
}

impl ResourceKind {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// The API group, `ec2.aws` for `ec2.aws/v1`.
    ///
    /// An apiVersion without a version part is its own group.
    pub fn group(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or(&self.api_version)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Error parsing a `apiVersion/kind` string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resource kind '{0}': expected <apiVersion>/<kind>")]
pub struct ResourceKindParseError(pub String);

impl FromStr for ResourceKind {
    type Err = ResourceKindParseError;

    /// The kind is everything after the last `/`, so api versions such as
    /// `ec2.aws/v1` parse as expected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('/') {
            Some((api_version, kind)) if !api_version.is_empty() && !kind.is_empty() => {
                Ok(Self::new(api_version, kind))
            }
            _ => Err(ResourceKindParseError(s.to_string())),
        }
    }
}

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the identifier of a resource from its group, kind and name
    pub fn for_resource(kind: &ResourceKind, name: &str) -> Self {
        Self(format!("{}:{}:{}", kind.group(), kind.kind, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}
