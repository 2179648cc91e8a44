//! Scrape endpoint for one window
//!
//! Serves the window's registry in the Prometheus text format. The listener is
//! independent of the export loop: a scrape never triggers an upstream call.

use bytes::Bytes;
use costgauge_common::{Error, Result};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::TEXT_FORMAT;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::publisher::WindowPublisher;

/// Bind `addr` and serve until `shutdown` flips to `true`
pub async fn serve(
    publisher: Arc<WindowPublisher>,
    addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = bind(addr).await?;
    serve_listener(publisher, listener, shutdown).await
}

/// Bind a scrape listener
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Publish(format!("failed to bind {}: {}", addr, e)))
}

/// Serve scrapes on an already bound listener
#[instrument(skip_all, fields(window = %publisher.window_id()))]
pub async fn serve_listener(
    publisher: Arc<WindowPublisher>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Metrics endpoint listening");

    // Open connections end with the accept loop
    let mut connections = JoinSet::new();

    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let publisher = publisher.clone();

        connections.spawn(async move {
            let service = service_fn(move |req| {
                let publisher = publisher.clone();
                async move { handle(&publisher, req) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!(remote = %remote_addr, "Connection error: {:?}", err);
            }
        });
    }

    debug!(open = connections.len(), "Closing scrape connections");
    connections.shutdown().await;
    info!(addr = %addr, "Metrics endpoint stopped");
    Ok(())
}

fn handle(
    publisher: &WindowPublisher,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }

    let response = match req.uri().path() {
        "/" | "/metrics" => match publisher.render() {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                response
            }
            Err(e) => {
                error!("Failed to render metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics")
            }
        },
        "/health" => text(StatusCode::OK, "ok"),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}
