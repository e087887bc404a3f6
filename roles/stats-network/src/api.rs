use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use hyper::{
    body::Incoming,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use network_stats::event_log::DEFAULT_LOG_LIMIT;
use serde_json::{json, Value};
use std::{convert::Infallible, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::ServiceState;

const MAX_LOG_LIMIT: i64 = 1000;

pub async fn run_http_server(
    address: String,
    state: Arc<ServiceState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(&address).await?;
    info!("Network stats API listening on http://{}", address);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, state).await }
            });

            if let Err(err) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                error!("Error serving connection: {:?}", err);
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServiceState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(&state, req.method(), req.uri().path(), req.uri().query()).await)
}

pub async fn route(
    state: &ServiceState,
    method: &Method,
    path: &str,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/health") => json_response(StatusCode::OK, &json!({ "status": "ok" })),
        (&Method::GET, "/api/network-stats") => serve_network_stats(state).await,
        (&Method::GET, "/api/network-stats/logs") => serve_logs(state, parse_limit(query)).await,
        (&Method::POST, "/api/network-stats/update") => trigger_update(state).await,
        _ => {
            let mut response = Response::new(Full::new(Bytes::from("Not Found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }
}

async fn serve_network_stats(state: &ServiceState) -> Response<Full<Bytes>> {
    match state.aggregator.current_period_averages(Utc::now()).await {
        Some(averages) => json_response(
            StatusCode::OK,
            &json!({ "status": "success", "data": averages }),
        ),
        None => json_response(
            StatusCode::NOT_FOUND,
            &json!({
                "status": "error",
                "message": "No network stats available for the current period"
            }),
        ),
    }
}

async fn serve_logs(state: &ServiceState, limit: usize) -> Response<Full<Bytes>> {
    match state.events.recent(limit).await {
        Ok(logs) => json_response(StatusCode::OK, &json!({ "status": "success", "logs": logs })),
        Err(e) => {
            error!("Error reading network stats logs: {}", e);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "status": "error", "message": e.to_string() }),
            )
        }
    }
}

async fn trigger_update(state: &ServiceState) -> Response<Full<Bytes>> {
    let outcome = state.collector.run_once(Utc::now()).await;
    json_response(
        StatusCode::OK,
        &json!({
            "status": "success",
            "message": "Network stats update triggered",
            "outcome": outcome
        }),
    )
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// `limit` query parameter, defaulting to 100 and clamped to 1..=1000.
fn parse_limit(query: Option<&str>) -> usize {
    query
        .unwrap_or("")
        .split('&')
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| *key == "limit")
        .and_then(|(_, value)| value.parse::<i64>().ok())
        .map(|limit| limit.clamp(1, MAX_LOG_LIMIT) as usize)
        .unwrap_or(DEFAULT_LOG_LIMIT)
}
