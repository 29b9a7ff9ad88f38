//! Request parameters and signing.
//!
//! QingCloud signs the canonical query string: keys sorted, keys and values
//! query-escaped, joined with `&`, prefixed by the method and the URI path.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use qcnet_common::{QcnetError, QcnetResult};

type HmacSha256 = Hmac<Sha256>;

/// Sorted request parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    /// Empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. Empty values are skipped, the API treats them as unset.
    pub fn add(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        if !value.is_empty() {
            self.0.insert(key.to_string(), value);
        }
    }

    /// Add a list as `prefix.0`, `prefix.1`, ...
    pub fn add_indexed<S: AsRef<str>>(&mut self, prefix: &str, values: &[S]) {
        for (i, value) in values.iter().enumerate() {
            self.add(&format!("{prefix}.{i}"), value.as_ref());
        }
    }

    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate over parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical query string.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", query_escape(k), query_escape(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Compute the base64 HMAC-SHA256 signature for a GET on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`QcnetError::Config`] if the secret key cannot key the MAC.
    pub fn signature(&self, secret_key: &str, path: &str) -> QcnetResult<String> {
        let string_to_sign = format!("GET\n{path}\n{}", self.canonical());
        let mut mac =
            HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| QcnetError::Config {
                message: "invalid secret key".to_string(),
            })?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Signed query string, ready to append to the endpoint URL.
    ///
    /// # Errors
    ///
    /// See [`Params::signature`].
    pub fn signed_query(&self, secret_key: &str, path: &str) -> QcnetResult<String> {
        let signature = self.signature(secret_key, path)?;
        Ok(format!(
            "{}&signature={}",
            self.canonical(),
            query_escape(&signature)
        ))
    }
}

/// Escape a query component: unreserved characters pass through, spaces become
/// `+`, everything else is percent-encoded with uppercase hex.
#[must_use]
pub fn query_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                let _ = write!(out, "%{b:02X}");
            }
        }
    }
    out
}
