use adapter_core::adapter::InferenceAdapter;
use adapter_core::encoding::{ResponseFormat, encode_prediction};
use adapter_core::error::AdapterError;
use anyhow::{Result, anyhow};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use axum_server::tls_rustls::RustlsConfig;
use serde::Serialize;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct InferenceServer {
    adapter: Arc<InferenceAdapter>,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls_enabled: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<AdapterError>() {
            Some(AdapterError::UnsupportedContentType { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Some(AdapterError::UnsupportedAccept { .. }) => StatusCode::NOT_ACCEPTABLE,
            Some(AdapterError::MalformedRequest { .. }) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Invocation failed: {:#}", err);
        } else {
            tracing::debug!("Rejected invocation: {}", err);
        }
        Self::new(status, format!("{:#}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (status, body).into_response()
    }
}

/// Builds the serving routes: `GET /ping` and `POST /invocations`.
pub fn router(adapter: Arc<InferenceAdapter>) -> Router {
    let server = InferenceServer { adapter };
    Router::new()
        .route("/invocations", post(handle_invocation))
        .route("/ping", get(|| async { StatusCode::OK }))
        .with_state(server)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

pub async fn start_server(
    server_config: ServerConfig,
    adapter: InferenceAdapter,
    metrics_enabled: bool,
    shutdown_handler: axum_server::Handle,
) -> Result<()> {
    let mut app = router(Arc::new(adapter));
    if metrics_enabled {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        app = app
            .route("/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer)
    }

    let addr: SocketAddr = format!("{}:{}", server_config.host, server_config.port)
        .to_socket_addrs()?
        .next()
        .ok_or(anyhow!("Cannot resolve host"))?;

    tracing::info!(
        "Server listening on {}:{}",
        server_config.host,
        server_config.port
    );
    if server_config.tls_enabled {
        let cert_path = server_config
            .tls_cert_path
            .ok_or(anyhow!("TLS is enabled but cert path is not provided"))?;
        let key_path = server_config
            .tls_key_path
            .ok_or(anyhow!("TLS is enabled but key path is not provided"))?;
        let rustls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .map_err(|e| anyhow!("Failed to load TLS config: {}", e))?;
        axum_server::bind_rustls(addr, rustls_config)
            .handle(shutdown_handler)
            .serve(app.into_make_service())
            .await?;
    } else {
        axum_server::bind(addr)
            .handle(shutdown_handler)
            .serve(app.into_make_service())
            .await?;
    }
    Ok(())
}

/// Runs the server until `shutdown` resolves, then stops accepting
/// connections and lets in-flight requests finish within `grace_period`.
pub async fn serve_until<F>(
    server_config: ServerConfig,
    adapter: InferenceAdapter,
    metrics_enabled: bool,
    grace_period: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let handle = axum_server::Handle::new();
    let mut server = tokio::spawn(start_server(
        server_config,
        adapter,
        metrics_enabled,
        handle.clone(),
    ));
    let signal = tokio::select! {
        res = &mut server => return res?,
        signal = shutdown => signal,
    };
    handle.graceful_shutdown(Some(grace_period));
    server.await??;
    signal
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn handle_invocation(
    State(server): State<InferenceServer>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AppError> {
    let content_type = header_value(&headers, header::CONTENT_TYPE).unwrap_or_default();
    let format = ResponseFormat::from_accept(header_value(&headers, header::ACCEPT))?;

    let prediction = server.adapter.invoke(&body, content_type).await?;
    let encoded = encode_prediction(&prediction, format)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], encoded).into_response())
}
