//! The downstream HTTP server: a `hyper` service that takes an instance from the [`Pool`],
//! drives one guest invocation per request, and finalizes the downstream response (§4.12, §6).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use hyper::{Body, Server};
use hyper::service::{make_service_fn, service_fn};
use tokio::sync::oneshot;

use crate::http::body::BodyObj;
use crate::http::request::RequestObj;
use crate::http::response::{loop_detected_response, trap_response};
use crate::instance::Instance;
use crate::pool::Pool;

/// How long a single request may run before the watcher forces the engine epoch forward,
/// standing in for "downstream context cancellation" (§4.12) since this runtime has no richer
/// client-disconnect signal than the request's own deadline.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Binds a `hyper` server at `addr` that serves every connection against `pool`, blocking until
/// the server stops (normally never, outside of a process signal).
pub async fn serve(addr: SocketAddr, pool: Arc<Pool>) -> anyhow::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let pool = pool.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let pool = pool.clone();
                async move { Ok::<_, Infallible>(handle_request(pool, req).await) }
            }))
        }
    });

    tracing::info!(%addr, "xqd-host listening");
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

async fn handle_request(pool: Arc<Pool>, req: Request<Body>) -> Response<Body> {
    let host_identifier = pool.registry().config.host_identifier.clone();
    let (parts, body) = req.into_parts();

    if parts
        .headers
        .get_all("cdn-loop")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(host_identifier.as_str()))
    {
        tracing::warn!(%host_identifier, "cdn-loop detected, rejecting with 508");
        return respond(loop_detected_response(), "request loop detected".to_string());
    }

    let body_bytes = match hyper::body::to_bytes(body).await {
        Ok(b) => b,
        Err(err) => {
            tracing::warn!(%err, "failed to read downstream request body");
            return respond(StatusCode::BAD_REQUEST, "failed to read request body".to_string());
        }
    };

    let mut instance = match pool.take() {
        Ok(instance) => instance,
        Err(err) => {
            tracing::error!(%err, "failed to obtain an instance from the pool");
            return respond(StatusCode::INTERNAL_SERVER_ERROR, "instance pool exhausted".to_string());
        }
    };

    install_downstream_request(&mut instance, &parts, body_bytes);

    let engine = pool.engine().clone();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(DEFAULT_REQUEST_TIMEOUT) => {
                engine.increment_epoch();
            }
            _ = done_rx => {}
        }
    });

    let outcome = tokio::task::spawn_blocking(move || {
        let result = instance.call_entry_point();
        (instance, result)
    })
    .await;

    let _ = done_tx.send(());
    watcher.abort();

    let (mut instance, response) = match outcome {
        Ok((instance, Ok(()))) => {
            let response = finalize_downstream_response(&instance);
            (instance, response)
        }
        Ok((instance, Err(err))) => {
            tracing::warn!(%err, "guest execution failed");
            let (status, message) = trap_response(&err.to_string());
            (instance, respond(status, message))
        }
        Err(join_err) => {
            tracing::error!(%join_err, "guest invocation task panicked");
            return respond(StatusCode::INTERNAL_SERVER_ERROR, "guest invocation panicked".to_string());
        }
    };

    instance.state_mut().reset();
    pool.offer(instance);
    response
}

fn install_downstream_request(instance: &mut Instance, parts: &http::request::Parts, body: Bytes) {
    let state = instance.state_mut();
    let mut req_obj = RequestObj::new();
    req_obj.method = parts.method.clone();
    req_obj.uri = parts.uri.clone();
    req_obj.headers = parts.headers.clone();
    req_obj.version = parts.version;

    let mut body_obj = BodyObj::new();
    let _ = body_obj.write(&body, xqd_shared::BodyWriteEnd::Back);
    let body_handle = state.bodies.insert(body_obj);
    req_obj.body = Some(body_handle);

    let request_handle = state.requests.insert(req_obj);
    state.downstream_request = Some(request_handle);
}

fn finalize_downstream_response(instance: &Instance) -> Response<Body> {
    let state = instance.state();
    let handle = match state.downstream_response {
        Some(h) => h,
        None => {
            tracing::warn!("guest returned without setting a downstream response");
            return respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "guest did not produce a response".to_string(),
            );
        }
    };
    let resp_obj = match state.responses.get(handle) {
        Some(r) => r,
        None => {
            return respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "downstream response handle was invalid".to_string(),
            )
        }
    };

    let body_bytes = resp_obj
        .body
        .and_then(|h| state.bodies.get(h))
        .map(body_to_bytes)
        .unwrap_or_default();

    build_response(resp_obj.status, &resp_obj.headers, Body::from(body_bytes))
}

/// Reads a buffered downstream response body's bytes without draining it, since the response
/// handle is only ever observed once, at finalization. Streaming bodies would need draining via
/// `BodyObj::read`, which isn't exercised on the downstream response path in this runtime's
/// scope.
fn body_to_bytes(body: &BodyObj) -> Vec<u8> {
    match body {
        BodyObj::Buffered(buffered) => buffered.as_slice().to_vec(),
        BodyObj::Streaming(_) => Vec::new(),
    }
}

fn respond(status: StatusCode, message: String) -> Response<Body> {
    build_response(status, &HeaderMap::new(), Body::from(message))
}

fn build_response(status: StatusCode, headers: &HeaderMap, body: Body) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    if let Some(h) = builder.headers_mut() {
        *h = headers.clone();
    }
    builder.body(body).unwrap_or_else(|_| {
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("failed to build response"))
            .expect("static response always builds")
    })
}
