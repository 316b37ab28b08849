mod classify;
mod resolver;

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tower::ServiceExt;

use crate::config::Config;

/// Serve `router` on an ephemeral local port from its own thread and runtime.
pub fn spawn_server(router: Router) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    listener
        .set_nonblocking(true)
        .expect("failed to set nonblocking");
    let addr = listener.local_addr().expect("failed to read local addr");

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build runtime");

        rt.block_on(async move {
            let listener =
                tokio::net::TcpListener::from_std(listener).expect("failed to adopt listener");
            axum::serve(listener, router).await.expect("server failed");
        });
    });

    addr
}

/// An address nothing listens on.
pub fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    listener.local_addr().expect("failed to read local addr")
}

#[derive(Clone, Default)]
pub struct Hits(Arc<AtomicUsize>);

impl Hits {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Defaults that can talk to local mock servers and never reach the network.
pub fn test_config() -> Config {
    let dead = closed_addr();

    let mut config = Config::default();
    config.scrape.block_private_ips = false;
    config.scrape.origin_timeout_secs = 5;
    config.scrape.mirror_timeout_secs = 5;
    config.scrape.mirror_url = format!("http://{dead}/mirror?u={{url_encoded}}");
    config.classify.backend = crate::classify::Backend::Mock;
    config.classify.hf_base_url = format!("http://{dead}");
    config.classify.hf_timeout_secs = 5;
    config.classify.backoff_base_ms = 10;
    config.classify.backoff_cap_ms = 40;
    config
}

/// Product-ish HTML padded past the minimum body size.
pub fn product_page(head: &str) -> String {
    format!(
        "<!doctype html><html><head>{head}</head><body><main><p>{}</p></main></body></html>",
        "Lorem ipsum dolor sit amet. ".repeat(10)
    )
}

/// Run `router` against `request` on a multi-threaded runtime, returning the status,
/// headers and JSON body (`Value::Null` when empty).
pub fn call(router: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime");

    rt.block_on(async move {
        let resp = tokio::spawn(router.oneshot(request))
            .await
            .expect("handler panicked")
            .expect("router failed");

        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .expect("failed to read body")
            .to_bytes();

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body is not JSON")
        };

        (status, headers, body)
    })
}
