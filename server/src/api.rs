use crate::responses::empty_response;
use crate::responses::raw_json_response;
use crate::responses::text_response;
use crate::responses::with_cors;
use crate::sandbox::SandboxRunner;
use anyhow::Context;
use anyhow::Result;
use hyper::Body;
use hyper::Method;
use hyper::Request;
use hyper::Response;
use hyper::Server;
use hyper::StatusCode;
use hyper::body::HttpBody;
use hyper::service::make_service_fn;
use hyper::service::service_fn;
use proxycheck_harness::ValidationRequest;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use tracing::info;
use tracing::warn;

const HEALTHCHECK: &str = include_str!("../healthcheck.json");

pub struct AppState {
    runner: SandboxRunner,
    health_request: ValidationRequest,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(runner: SandboxRunner, max_body_bytes: usize) -> Result<Self> {
        let health_request = serde_json::from_str(HEALTHCHECK)
            .context("embedded healthcheck request is invalid")?;
        Ok(Self {
            runner,
            health_request,
            max_body_bytes,
        })
    }

    pub fn with_health_request(mut self, request: ValidationRequest) -> Self {
        self.health_request = request;
        self
    }
}

pub async fn run_api(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let make_svc = make_service_fn(move |conn: &hyper::server::conn::AddrStream| {
        let state = state.clone();
        let client_addr = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle_request(req, state.clone(), client_addr)
            }))
        }
    });
    let server = Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?
        .serve(make_svc);
    info!(addr = %addr, "validation API listening");
    server.await.context("validation API failed")?;
    Ok(())
}

pub async fn handle_request(
    req: Request<Body>,
    state: Arc<AppState>,
    client_addr: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = if path == "/health" {
        handle_health(&state).await
    } else {
        with_cors(handle_validate(req, &state).await)
    };

    info!(
        client = %client_addr,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
    Ok(response)
}

/// Anything other than a POST is answered as a CORS preflight.
async fn handle_validate(req: Request<Body>, state: &AppState) -> Response<Body> {
    if req.method() != Method::POST {
        return empty_response(StatusCode::OK);
    }

    let body = match read_body(req.into_body(), state.max_body_bytes).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let request: ValidationRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "failed to parse validation request");
            return text_response(StatusCode::BAD_REQUEST, "invalid json");
        }
    };

    match state.runner.run(&request).await {
        Ok(run) => {
            let status = if run.response.is_success() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            raw_json_response(status, run.body)
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "sandboxed run failed");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn handle_health(state: &AppState) -> Response<Body> {
    match state.runner.run(&state.health_request).await {
        Ok(run) if run.response.is_success() => empty_response(StatusCode::OK),
        Ok(run) => {
            warn!(error = %run.response.error, "health check validation failed");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "health check run failed");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn read_body(mut body: Body, limit: usize) -> Result<Vec<u8>, Response<Body>> {
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                error!("failed to read request body: {err}");
                return Err(text_response(StatusCode::BAD_REQUEST, "invalid body"));
            }
        };
        if buf.len().saturating_add(chunk.len()) > limit {
            return Err(text_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "body too large",
            ));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}
