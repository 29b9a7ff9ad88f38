//! Common error types for qcnet.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`QcnetError`].
pub type QcnetResult<T> = Result<T, QcnetError>;

/// Errors surfaced by the plugin core and its collaborators.
#[derive(Error, Diagnostic, Debug)]
pub enum QcnetError {
    /// Network not found.
    #[error("network {id} not found")]
    #[diagnostic(code(qcnet::network::not_found))]
    NetworkNotFound {
        /// The network ID that was not found.
        id: String,
    },

    /// Endpoint not found.
    #[error("endpoint {endpoint_id} not found in network {network_id}")]
    #[diagnostic(code(qcnet::endpoint::not_found))]
    EndpointNotFound {
        /// The owning network.
        network_id: String,
        /// The endpoint that was not found.
        endpoint_id: String,
    },

    /// No host interface carries the requested hardware address.
    #[error("no host link with hardware address {mac}")]
    #[diagnostic(
        code(qcnet::link::not_found),
        help("The NIC may still be attaching; retry the request")
    )]
    LinkNotFound {
        /// The hardware address.
        mac: String,
    },

    /// Endpoint is bound to a running container.
    #[error("endpoint {id} is used by another container")]
    #[diagnostic(code(qcnet::endpoint::in_use))]
    EndpointInUse {
        /// The endpoint ID.
        id: String,
    },

    /// Network still has endpoints.
    #[error("can't delete network {id}: {endpoints} active endpoints within the network")]
    #[diagnostic(code(qcnet::network::in_use))]
    NetworkInUse {
        /// The network ID.
        id: String,
        /// Number of remaining endpoint records.
        endpoints: usize,
    },

    /// No NIC could be found or created for the vxnet.
    #[error("no available nic in vxnet {vxnet}")]
    #[diagnostic(code(qcnet::nic::exhausted))]
    AllocationExhausted {
        /// The vxnet searched.
        vxnet: String,
    },

    /// The cloud API answered with a non-zero return code.
    #[error("{action} failed: code={code}, message={message:?}")]
    #[diagnostic(code(qcnet::provider))]
    Provider {
        /// API action name.
        action: String,
        /// Provider return code.
        code: i64,
        /// Provider message.
        message: String,
    },

    /// An asynchronous provider job ended in failure.
    #[error("job {job_id} failed: {error_codes}")]
    #[diagnostic(code(qcnet::provider::job_failed))]
    JobFailed {
        /// The job ID.
        job_id: String,
        /// Error codes reported by the provider.
        error_codes: String,
    },

    /// An asynchronous provider job did not finish in time.
    #[error("job {job_id} timed out")]
    #[diagnostic(code(qcnet::provider::job_timeout))]
    JobTimeout {
        /// The job ID.
        job_id: String,
    },

    /// Transport failure talking to the cloud API.
    #[error("HTTP error: {message}")]
    #[diagnostic(code(qcnet::provider::http))]
    Http {
        /// The error message.
        message: String,
    },

    /// Netlink request failure.
    #[error("netlink error: {message}")]
    #[diagnostic(
        code(qcnet::netlink),
        help("Renaming interfaces requires CAP_NET_ADMIN")
    )]
    Netlink {
        /// The error message.
        message: String,
    },

    /// A plugin option was missing or malformed.
    #[error("{message}")]
    #[diagnostic(code(qcnet::option), help("Create the network with `-o vxnet=<vxnet-id>`"))]
    InvalidOption {
        /// The error message.
        message: String,
    },

    /// Invalid network or endpoint ID format.
    #[error("invalid ID: {id:?}")]
    #[diagnostic(
        code(qcnet::invalid_id),
        help("IDs must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidId {
        /// The invalid ID.
        id: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(qcnet::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(qcnet::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(qcnet::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(qcnet::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl QcnetError {
    /// Whether the error came from the cloud provider or the path to it.
    #[must_use]
    pub const fn is_provider(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::JobFailed { .. } | Self::JobTimeout { .. } | Self::Http { .. }
        )
    }

    /// Whether the error reports an unknown network, endpoint or link.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NetworkNotFound { .. } | Self::EndpointNotFound { .. } | Self::LinkNotFound { .. }
        )
    }

    /// Whether the error reports a resource held by someone else.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::EndpointInUse { .. } | Self::NetworkInUse { .. })
    }
}

impl From<serde_json::Error> for QcnetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
