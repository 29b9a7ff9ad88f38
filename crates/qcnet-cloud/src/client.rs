//! QingCloud IaaS API client.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use qcnet_common::{QcnetError, QcnetResult};

use crate::job::{self, DEFAULT_JOB_TIMEOUT, DEFAULT_POLL_INTERVAL, JobSource};
use crate::params::Params;
use crate::provider::{CloudNicProvider, NicFilter};
use crate::types::{Job, Nic, NicStatus};

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.qingcloud.com/iaas/";

/// Per-request HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(50);

/// Credentials and tuning for the API client.
#[derive(Clone)]
pub struct CloudConfig {
    /// Access key ID.
    pub access_key_id: String,
    /// Secret key paired with the access key.
    pub secret_key: String,
    /// Zone the host lives in.
    pub zone: String,
    /// API endpoint.
    pub endpoint: String,
    /// How long to wait for attach/detach jobs.
    pub job_timeout: Duration,
    /// How often to poll job status.
    pub poll_interval: Duration,
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &"<redacted>")
            .field("zone", &self.zone)
            .field("endpoint", &self.endpoint)
            .field("job_timeout", &self.job_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl CloudConfig {
    /// Create a configuration with default endpoint and timeouts.
    #[must_use]
    pub fn new(
        access_key_id: impl Into<String>,
        secret_key: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_key: secret_key.into(),
            zone: zone.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            job_timeout: DEFAULT_JOB_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the job timeout.
    #[must_use]
    pub const fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    #[serde(default = "unknown_code")]
    ret_code: i64,
    #[serde(default)]
    message: String,
}

const fn unknown_code() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
struct DescribeNicsResponse {
    #[serde(default)]
    nic_set: Vec<Nic>,
}

#[derive(Debug, Deserialize)]
struct CreateNicsResponse {
    #[serde(default)]
    nics: Vec<Nic>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeJobsResponse {
    #[serde(default)]
    job_set: Vec<Job>,
}

/// Signed client for the QingCloud API.
#[derive(Debug, Clone)]
pub struct QingCloudClient {
    client: Client,
    config: CloudConfig,
    endpoint: Url,
}

impl QingCloudClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// [`QcnetError::Config`] if the endpoint is not a valid URL, or
    /// [`QcnetError::Http`] if the HTTP client cannot be built.
    pub fn new(config: CloudConfig) -> QcnetResult<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| QcnetError::Config {
            message: format!("invalid API endpoint {:?}: {}", config.endpoint, e),
        })?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QcnetError::Http {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    /// Parameters every request carries.
    fn common_params(&self, action: &str) -> Params {
        let mut params = Params::new();
        params.add("action", action);
        params.add("access_key_id", &self.config.access_key_id);
        params.add("zone", &self.config.zone);
        params.add(
            "time_stamp",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        );
        params.add("version", 1);
        params.add("signature_version", 1);
        params.add("signature_method", "HmacSHA256");
        params
    }

    /// Sign and send a request, decoding the body on `ret_code == 0`.
    async fn send<T: DeserializeOwned>(&self, action: &str, extra: Params) -> QcnetResult<T> {
        let mut params = self.common_params(action);
        for (key, value) in extra.iter() {
            params.add(key, value);
        }

        let query = params.signed_query(&self.config.secret_key, self.endpoint.path())?;
        let mut url = self.endpoint.clone();
        url.set_query(Some(&query));
        tracing::debug!(action, "Sending API request");

        let value: serde_json::Value = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| QcnetError::Http {
                message: format!("{action} request failed: {e}"),
            })?
            .json()
            .await
            .map_err(|e| QcnetError::Http {
                message: format!("Failed to parse {action} response: {e}"),
            })?;

        let status = ResponseStatus::deserialize(&value)?;
        if status.ret_code != 0 {
            tracing::debug!(
                action,
                code = status.ret_code,
                message = %status.message,
                "API returned an error"
            );
            return Err(QcnetError::Provider {
                action: action.to_string(),
                code: status.ret_code,
                message: status.message,
            });
        }

        Ok(T::deserialize(value)?)
    }

    async fn wait(&self, job_id: String) -> QcnetResult<String> {
        job::wait_for_job_success(
            self,
            &job_id,
            self.config.job_timeout,
            self.config.poll_interval,
        )
        .await
    }
}

/// Translate a filter into `DescribeNics` parameters.
fn describe_nics_params(filter: &NicFilter) -> Params {
    let mut params = Params::new();
    params.add_indexed("vxnets", &[filter.vxnet.as_str()]);
    if let Some(status) = &filter.status {
        params.add_indexed("status", &[status.as_str()]);
    }
    if let Some(instance) = &filter.instance {
        params.add_indexed("instances", &[instance.as_str()]);
    }
    if let Some(ip) = filter.ip {
        params.add("search_word", ip);
    }
    // The API pages at 20 by default.
    params.add("limit", 100);
    params
}

#[async_trait]
impl JobSource for QingCloudClient {
    async fn describe_job(&self, job_id: &str) -> QcnetResult<Option<Job>> {
        let mut params = Params::new();
        params.add_indexed("jobs", &[job_id]);
        let resp: DescribeJobsResponse = self.send("DescribeJobs", params).await?;
        let mut jobs = resp.job_set;
        Ok(if jobs.len() == 1 { jobs.pop() } else { None })
    }
}

#[async_trait]
impl CloudNicProvider for QingCloudClient {
    async fn list_nics(&self, filter: &NicFilter) -> QcnetResult<Vec<Nic>> {
        let resp: DescribeNicsResponse = self
            .send("DescribeNics", describe_nics_params(filter))
            .await?;
        // search_word is a substring match; keep exact hits only.
        Ok(resp
            .nic_set
            .into_iter()
            .filter(|nic| filter.matches(nic))
            .collect())
    }

    async fn create_nic(&self, vxnet: &str, desired_ip: Option<Ipv4Addr>) -> QcnetResult<Nic> {
        let mut params = Params::new();
        params.add("vxnet", vxnet);
        params.add("count", 1);
        if let Some(ip) = desired_ip {
            params.add_indexed("private_ips", &[ip.to_string()]);
        }

        let resp: CreateNicsResponse = self.send("CreateNics", params).await?;
        let mut nic = resp
            .nics
            .into_iter()
            .next()
            .ok_or_else(|| QcnetError::AllocationExhausted {
                vxnet: vxnet.to_string(),
            })?;
        // The create response only carries the ID and IP.
        nic.vxnet_id = vxnet.to_string();
        nic.status = NicStatus::Available;
        if nic.private_ip.is_none() {
            nic.private_ip = desired_ip;
        }
        tracing::info!(nic_id = %nic.id, vxnet, ip = ?nic.private_ip, "Created NIC");
        Ok(nic)
    }

    async fn attach_nic(&self, nic_id: &str, instance_id: &str, wait: bool) -> QcnetResult<String> {
        let mut params = Params::new();
        params.add_indexed("nics", &[nic_id]);
        params.add("instance", instance_id);

        let resp: JobResponse = self.send("AttachNics", params).await?;
        tracing::debug!(nic_id, instance_id, job_id = %resp.job_id, "Attaching NIC");
        if wait {
            self.wait(resp.job_id).await
        } else {
            Ok(resp.job_id)
        }
    }

    async fn detach_nic(&self, nic_id: &str, wait: bool) -> QcnetResult<String> {
        let mut params = Params::new();
        params.add_indexed("nics", &[nic_id]);

        let resp: JobResponse = self.send("DetachNics", params).await?;
        tracing::debug!(nic_id, job_id = %resp.job_id, "Detaching NIC");
        if wait {
            self.wait(resp.job_id).await
        } else {
            Ok(resp.job_id)
        }
    }
}
