//! Network and endpoint ID validation.
//!
//! Docker hands the plugin 64-character hex IDs. They end up as file and
//! directory names under the data root, so anything that could escape that
//! layout is rejected up front.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{QcnetError, QcnetResult};

/// Maximum length of a network or endpoint ID.
pub const MAX_ID_LENGTH: usize = 64;

/// Length of the host-side interface name derived from an endpoint ID.
pub const INTERFACE_NAME_LENGTH: usize = 12;

fn validate(id: &str) -> QcnetResult<()> {
    let invalid = || QcnetError::InvalidId { id: id.to_string() };

    let Some(first) = id.chars().next() else {
        return Err(invalid());
    };
    if id.len() > MAX_ID_LENGTH || !first.is_ascii_alphanumeric() {
        return Err(invalid());
    }
    if id
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
    {
        return Err(invalid());
    }
    Ok(())
}

/// A validated network ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(String);

impl NetworkId {
    /// Create a new network ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`QcnetError::InvalidId`] if the ID is empty, too long, or
    /// contains characters other than ASCII alphanumerics, `-` and `_`.
    pub fn new(id: impl Into<String>) -> QcnetResult<Self> {
        let id = id.into();
        validate(&id)?;
        Ok(Self(id))
    }

    /// Get the network ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A validated endpoint ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointId(String);

impl EndpointId {
    /// Create a new endpoint ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`QcnetError::InvalidId`] on a malformed ID.
    pub fn new(id: impl Into<String>) -> QcnetResult<Self> {
        let id = id.into();
        validate(&id)?;
        Ok(Self(id))
    }

    /// Get the endpoint ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host-side interface name for this endpoint: the first 12 characters.
    ///
    /// Fits within the kernel's 15-byte `IFNAMSIZ` limit.
    #[must_use]
    pub fn interface_name(&self) -> &str {
        if self.0.len() <= INTERFACE_NAME_LENGTH {
            &self.0
        } else {
            &self.0[..INTERFACE_NAME_LENGTH]
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = QcnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl FromStr for EndpointId {
    type Err = QcnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NetworkId {
    type Error = QcnetError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<String> for EndpointId {
    type Error = QcnetError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<NetworkId> for String {
    fn from(id: NetworkId) -> Self {
        id.0
    }
}

impl From<EndpointId> for String {
    fn from(id: EndpointId) -> Self {
        id.0
    }
}

impl AsRef<str> for NetworkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EndpointId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
