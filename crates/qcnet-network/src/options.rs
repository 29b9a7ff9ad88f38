//! Network options passed by Docker at network creation.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use qcnet_common::{QcnetError, QcnetResult};

/// Key Docker nests driver options (`docker network create -o ...`) under.
pub const GENERIC_OPTIONS_KEY: &str = "com.docker.network.generic";

/// Driver options recognized on a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    /// Provider vxnet the network maps onto.
    pub vxnet: String,
}

#[derive(Deserialize)]
struct RawGeneric {
    #[serde(default)]
    vxnet: Option<String>,
}

impl NetworkOptions {
    /// Decode the top-level `Options` map of a create-network request.
    ///
    /// Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// [`QcnetError::InvalidOption`] if the generic options are malformed or
    /// `vxnet` is missing or blank.
    pub fn from_docker_options(options: &HashMap<String, Value>) -> QcnetResult<Self> {
        let generic = options
            .get(GENERIC_OPTIONS_KEY)
            .cloned()
            .unwrap_or(Value::Null);
        let raw = if generic.is_null() {
            RawGeneric { vxnet: None }
        } else {
            serde_json::from_value::<RawGeneric>(generic).map_err(|e| QcnetError::InvalidOption {
                message: format!("{GENERIC_OPTIONS_KEY}: {e}"),
            })?
        };

        let vxnet = raw.vxnet.map(|v| v.trim().to_string()).unwrap_or_default();
        if vxnet.is_empty() {
            return Err(QcnetError::InvalidOption {
                message: "vxnet option is required".into(),
            });
        }
        Ok(Self { vxnet })
    }
}
