use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use qcnet_common::{EndpointId, NetworkId, QcnetError, QcnetResult};
use qcnet_network::record::strip_prefix_len;
use qcnet_network::{EndpointLifecycle, NetworkOptions};

use super::types::{
    ActivateResponse, CapabilitiesResponse, CreateEndpointRequest, CreateEndpointResponse,
    CreateNetworkRequest, CreatedInterface, EndpointRequest, ErrorResponse, InfoResponse,
    InterfaceName, JoinRequest, JoinResponse, NetworkRequest, PLUGIN_CONTENT_TYPE,
};

type AppState = Arc<EndpointLifecycle>;
type ApiResult<T> = Result<PluginJson<T>, ApiError>;

pub fn app(lifecycle: AppState) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/NetworkDriver.GetCapabilities", post(capabilities))
        .route("/NetworkDriver.CreateNetwork", post(create_network))
        .route("/NetworkDriver.AllocateNetwork", post(allocate_network))
        .route("/NetworkDriver.DeleteNetwork", post(delete_network))
        .route("/NetworkDriver.FreeNetwork", post(free_network))
        .route("/NetworkDriver.CreateEndpoint", post(create_endpoint))
        .route("/NetworkDriver.EndpointOperInfo", post(endpoint_info))
        .route("/NetworkDriver.DeleteEndpoint", post(delete_endpoint))
        .route("/NetworkDriver.Join", post(join))
        .route("/NetworkDriver.Leave", post(leave))
        .route("/NetworkDriver.DiscoverNew", post(discover_new))
        .route("/NetworkDriver.DiscoverDelete", post(discover_delete))
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            post(program_external_connectivity),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            post(revoke_external_connectivity),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(lifecycle)
}

/// JSON body with the plugin content type.
pub struct PluginJson<T>(pub T);

impl<T: Serialize> IntoResponse for PluginJson<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(body) => ([(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], body).into_response(),
            Err(e) => ApiError(e.into()).into_response(),
        }
    }
}

/// JSON request body; decoding failures answer in the plugin error format.
pub struct PluginRequest<T>(pub T);

impl<T, S> FromRequest<S> for PluginRequest<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError(QcnetError::InvalidOption { message: e.body_text() }))?;
        serde_json::from_slice(&body)
            .map(PluginRequest)
            .map_err(|e| {
                ApiError(QcnetError::InvalidOption {
                    message: format!("malformed request: {e}"),
                })
            })
    }
}

/// Any failure, reported as `500 {"Err": ...}`.
#[derive(Debug)]
pub struct ApiError(pub QcnetError);

impl From<QcnetError> for ApiError {
    fn from(e: QcnetError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "Plugin request failed");
        let body = serde_json::to_vec(&ErrorResponse {
            err: self.0.to_string(),
        })
        .unwrap_or_default();
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
            body,
        )
            .into_response()
    }
}

fn not_implemented(operation: &str) -> ApiError {
    ApiError(QcnetError::Internal {
        message: format!("{operation} is not implemented"),
    })
}

/// Run a lifecycle operation on its own task. A caller that hangs up drops
/// only the wait; the operation still completes and persists.
async fn run_detached<T, F>(operation: F) -> Result<T, ApiError>
where
    F: Future<Output = QcnetResult<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result.map_err(ApiError),
        Err(e) => Err(ApiError(QcnetError::Internal {
            message: format!("request task failed: {e}"),
        })),
    }
}

fn requested_ip(req: &CreateEndpointRequest) -> Result<Option<Ipv4Addr>, QcnetError> {
    let Some(address) = req.interface.as_ref().map(|i| i.address.trim()) else {
        return Ok(None);
    };
    if address.is_empty() {
        return Ok(None);
    }
    strip_prefix_len(address)
        .parse()
        .map(Some)
        .map_err(|_| QcnetError::InvalidOption {
            message: format!("invalid IPv4 address {address:?}"),
        })
}

async fn activate() -> PluginJson<ActivateResponse> {
    tracing::debug!("Plugin.Activate");
    PluginJson(ActivateResponse {
        implements: vec!["NetworkDriver"],
    })
}

async fn capabilities() -> PluginJson<CapabilitiesResponse> {
    tracing::debug!("NetworkDriver.GetCapabilities");
    PluginJson(CapabilitiesResponse { scope: "local" })
}

async fn create_network(
    State(lifecycle): State<AppState>,
    PluginRequest(req): PluginRequest<CreateNetworkRequest>,
) -> ApiResult<Value> {
    tracing::debug!(network_id = %req.network_id, "NetworkDriver.CreateNetwork");
    let id = NetworkId::new(req.network_id)?;
    let options = NetworkOptions::from_docker_options(&req.options)?;
    let ipam = req.ipv4_data.into_iter().next().unwrap_or_default();
    lifecycle.create_network(id, &options, ipam)?;
    Ok(PluginJson(json!({})))
}

async fn allocate_network() -> Result<PluginJson<Value>, ApiError> {
    Err(not_implemented("AllocateNetwork"))
}

async fn delete_network(
    State(lifecycle): State<AppState>,
    PluginRequest(req): PluginRequest<NetworkRequest>,
) -> ApiResult<Value> {
    tracing::debug!(network_id = %req.network_id, "NetworkDriver.DeleteNetwork");
    let id = NetworkId::new(req.network_id)?;
    run_detached(async move { lifecycle.delete_network(&id).await }).await?;
    Ok(PluginJson(json!({})))
}

async fn free_network() -> Result<PluginJson<Value>, ApiError> {
    Err(not_implemented("FreeNetwork"))
}

async fn create_endpoint(
    State(lifecycle): State<AppState>,
    PluginRequest(req): PluginRequest<CreateEndpointRequest>,
) -> ApiResult<CreateEndpointResponse> {
    tracing::debug!(
        network_id = %req.network_id,
        endpoint_id = %req.endpoint_id,
        "NetworkDriver.CreateEndpoint"
    );
    let ip = requested_ip(&req)?;
    let network_id = NetworkId::new(req.network_id)?;
    let endpoint_id = EndpointId::new(req.endpoint_id)?;

    let created = run_detached(async move {
        lifecycle
            .create_endpoint(&network_id, endpoint_id, ip)
            .await
    })
    .await?;
    // Docker already knows the address it asked for.
    let address = ip.is_none().then_some(created.address);
    Ok(PluginJson(CreateEndpointResponse {
        interface: CreatedInterface {
            mac_address: created.mac_address,
            address,
        },
    }))
}

async fn endpoint_info() -> PluginJson<InfoResponse> {
    PluginJson(InfoResponse {
        value: HashMap::new(),
    })
}

async fn delete_endpoint(
    State(lifecycle): State<AppState>,
    PluginRequest(req): PluginRequest<EndpointRequest>,
) -> ApiResult<Value> {
    tracing::debug!(
        network_id = %req.network_id,
        endpoint_id = %req.endpoint_id,
        "NetworkDriver.DeleteEndpoint"
    );
    let network_id = NetworkId::new(req.network_id)?;
    let endpoint_id = EndpointId::new(req.endpoint_id)?;
    run_detached(async move { lifecycle.delete_endpoint(&network_id, &endpoint_id).await })
        .await?;
    Ok(PluginJson(json!({})))
}

async fn join(
    State(lifecycle): State<AppState>,
    PluginRequest(req): PluginRequest<JoinRequest>,
) -> ApiResult<JoinResponse> {
    tracing::debug!(
        network_id = %req.network_id,
        endpoint_id = %req.endpoint_id,
        sandbox_key = %req.sandbox_key,
        "NetworkDriver.Join"
    );
    let network_id = NetworkId::new(req.network_id)?;
    let endpoint_id = EndpointId::new(req.endpoint_id)?;
    let sandbox_key = req.sandbox_key;
    let info = run_detached(async move {
        lifecycle
            .join(&network_id, &endpoint_id, &sandbox_key)
            .await
    })
    .await?;
    Ok(PluginJson(JoinResponse {
        interface_name: InterfaceName {
            src_name: info.src_name,
            dst_prefix: info.dst_prefix,
        },
        gateway: info.gateway,
    }))
}

async fn leave(
    State(lifecycle): State<AppState>,
    PluginRequest(req): PluginRequest<EndpointRequest>,
) -> ApiResult<Value> {
    tracing::debug!(
        network_id = %req.network_id,
        endpoint_id = %req.endpoint_id,
        "NetworkDriver.Leave"
    );
    let network_id = NetworkId::new(req.network_id)?;
    let endpoint_id = EndpointId::new(req.endpoint_id)?;
    run_detached(async move { lifecycle.leave(&network_id, &endpoint_id).await }).await?;
    Ok(PluginJson(json!({})))
}

async fn discover_new() -> Result<PluginJson<Value>, ApiError> {
    Err(not_implemented("DiscoverNew"))
}

async fn discover_delete() -> Result<PluginJson<Value>, ApiError> {
    Err(not_implemented("DiscoverDelete"))
}

async fn program_external_connectivity() -> PluginJson<Value> {
    PluginJson(json!({}))
}

async fn revoke_external_connectivity() -> PluginJson<Value> {
    PluginJson(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::EndpointInterface;

    use std::time::Duration;

    use async_trait::async_trait;
    use qcnet_cloud::{CloudNicProvider, Nic, NicFilter, NicStatus};
    use qcnet_network::{DriverConfig, Link, LinkRegistry};
    use tokio::sync::Mutex;

    /// Networks never reach the cloud or the host; endpoints fail loudly.
    struct Offline;

    fn offline() -> QcnetError {
        QcnetError::Http {
            message: "offline".into(),
        }
    }

    #[async_trait]
    impl CloudNicProvider for Offline {
        async fn list_nics(&self, _filter: &NicFilter) -> QcnetResult<Vec<Nic>> {
            Err(offline())
        }
        async fn create_nic(&self, _vxnet: &str, _ip: Option<Ipv4Addr>) -> QcnetResult<Nic> {
            Err(offline())
        }
        async fn attach_nic(&self, _nic: &str, _instance: &str, _wait: bool) -> QcnetResult<String> {
            Err(offline())
        }
        async fn detach_nic(&self, _nic: &str, _wait: bool) -> QcnetResult<String> {
            Err(offline())
        }
    }

    #[async_trait]
    impl LinkRegistry for Offline {
        async fn list_links(&self) -> QcnetResult<HashMap<String, Link>> {
            Ok(HashMap::new())
        }
        async fn rename_link(&self, _link: &Link, _name: &str) -> QcnetResult<()> {
            Err(offline())
        }
    }

    const SLOW_NIC: &str = "52:54:9a:00:00:09";

    /// Creates one NIC whose attach job takes five seconds, then hot-plugs it.
    #[derive(Default)]
    struct SlowAttach {
        links: Mutex<HashMap<String, Link>>,
    }

    #[async_trait]
    impl CloudNicProvider for SlowAttach {
        async fn list_nics(&self, _filter: &NicFilter) -> QcnetResult<Vec<Nic>> {
            Ok(Vec::new())
        }
        async fn create_nic(&self, vxnet: &str, ip: Option<Ipv4Addr>) -> QcnetResult<Nic> {
            Ok(Nic {
                id: SLOW_NIC.into(),
                nic_name: String::new(),
                vxnet_id: vxnet.into(),
                private_ip: Some(ip.unwrap_or(Ipv4Addr::new(10, 0, 0, 9))),
                role: 0,
                status: NicStatus::Available,
                instance_id: String::new(),
            })
        }
        async fn attach_nic(&self, nic: &str, _instance: &str, _wait: bool) -> QcnetResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.links.lock().await.insert(
                nic.to_string(),
                Link {
                    index: 3,
                    name: "eth1".into(),
                    mac: nic.to_string(),
                    is_device: true,
                },
            );
            Ok("j-attach".into())
        }
        async fn detach_nic(&self, _nic: &str, _wait: bool) -> QcnetResult<String> {
            Ok("j-detach".into())
        }
    }

    #[async_trait]
    impl LinkRegistry for SlowAttach {
        async fn list_links(&self) -> QcnetResult<HashMap<String, Link>> {
            Ok(self.links.lock().await.clone())
        }
        async fn rename_link(&self, link: &Link, name: &str) -> QcnetResult<()> {
            if let Some(entry) = self.links.lock().await.get_mut(&link.mac) {
                entry.name = name.to_string();
            }
            Ok(())
        }
    }

    fn lifecycle(root: &std::path::Path) -> AppState {
        let lifecycle = EndpointLifecycle::new(
            DriverConfig::new("i-testhost01").with_root(root),
            Arc::new(Offline),
            Arc::new(Offline),
        );
        lifecycle.load().unwrap();
        Arc::new(lifecycle)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request<T: DeserializeOwned>(value: Value) -> PluginRequest<T> {
        PluginRequest(serde_json::from_value(value).unwrap())
    }

    #[tokio::test]
    async fn handshake() {
        let activate = activate().await.into_response();
        assert_eq!(
            activate.headers()[header::CONTENT_TYPE],
            PLUGIN_CONTENT_TYPE
        );
        assert_eq!(
            body_json(activate).await,
            json!({ "Implements": ["NetworkDriver"] })
        );
        assert_eq!(
            body_json(capabilities().await.into_response()).await,
            json!({ "Scope": "local" })
        );
    }

    #[tokio::test]
    async fn network_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let state = lifecycle(dir.path());

        create_network(
            State(Arc::clone(&state)),
            request(json!({
                "NetworkID": "n1",
                "Options": { "com.docker.network.generic": { "vxnet": "vxnet-abc" } },
                "IPv4Data": [{ "Pool": "10.0.0.0/24", "Gateway": "10.0.0.1/24" }]
            })),
        )
        .await
        .unwrap();
        assert!(dir.path().join("networks/n1/n1.json").exists());

        delete_network(State(Arc::clone(&state)), request(json!({ "NetworkID": "n1" })))
            .await
            .unwrap();
        assert!(!dir.path().join("networks/n1").exists());
    }

    #[tokio::test]
    async fn errors_use_the_plugin_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let state = lifecycle(dir.path());

        let Err(err) = create_network(
            State(Arc::clone(&state)),
            request(json!({ "NetworkID": "n1", "Options": {} })),
        )
        .await
        else {
            panic!("network without vxnet was accepted");
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "Err": "vxnet option is required" })
        );

        let Err(err) = create_endpoint(
            State(state),
            request(json!({ "NetworkID": "missing", "EndpointID": "e1" })),
        )
        .await
        else {
            panic!("endpoint on unknown network was created");
        };
        assert!(matches!(err.0, QcnetError::NetworkNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn endpoint_survives_a_caller_hanging_up() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(SlowAttach::default());
        let state = Arc::new(EndpointLifecycle::new(
            DriverConfig::new("i-testhost01").with_root(dir.path()),
            Arc::clone(&host) as Arc<dyn CloudNicProvider>,
            Arc::clone(&host) as Arc<dyn LinkRegistry>,
        ));
        state.load().unwrap();
        create_network(
            State(Arc::clone(&state)),
            request(json!({
                "NetworkID": "n1",
                "Options": { "com.docker.network.generic": { "vxnet": "vxnet-abc" } },
                "IPv4Data": [{ "Pool": "10.0.0.0/24", "Gateway": "10.0.0.1/24" }]
            })),
        )
        .await
        .unwrap();

        let pending = create_endpoint(
            State(Arc::clone(&state)),
            request(json!({ "NetworkID": "n1", "EndpointID": "e1" })),
        );
        // The response is dropped while the attach job is still running.
        assert!(
            tokio::time::timeout(Duration::from_secs(1), pending)
                .await
                .is_err()
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(dir.path().join("networks/n1/endpoints/e1.json").exists());
        let network = state
            .context()
            .network(&NetworkId::new("n1").unwrap())
            .unwrap();
        let endpoints = network.endpoints.lock().await;
        assert_eq!(endpoints[&EndpointId::new("e1").unwrap()].nic_id, SLOW_NIC);
        assert_eq!(host.links.lock().await[SLOW_NIC].name, "e1");
    }

    #[test]
    fn requested_ip_parsing() {
        let mut req = CreateEndpointRequest {
            network_id: "n1".into(),
            endpoint_id: "e1".into(),
            interface: None,
        };
        assert_eq!(requested_ip(&req).unwrap(), None);

        req.interface = Some(EndpointInterface {
            address: "10.0.0.9/24".into(),
            ..EndpointInterface::default()
        });
        assert_eq!(
            requested_ip(&req).unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 9))
        );

        req.interface = Some(EndpointInterface {
            address: "not-an-ip".into(),
            ..EndpointInterface::default()
        });
        assert!(requested_ip(&req).is_err());
    }
}
