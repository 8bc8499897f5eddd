// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTPS server presenting a freshly generated self-signed certificate.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::{http::HeaderMap, routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::time::timeout;

/// Spawns the server on an ephemeral port and returns its address.
///
/// `GET /echo-cv` answers with the `ms-cv` header it received.
pub async fn spawn_self_signed() -> SocketAddr {
    // reqwest and the server share the ring provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("self-signed certificate");
    let tls_config = RustlsConfig::from_pem(
        certified.cert.pem().into_bytes(),
        certified.key_pair.serialize_pem().into_bytes(),
    )
    .await
    .expect("tls config");

    let app = Router::new().route("/echo-cv", get(echo_cv));
    let handle = axum_server::Handle::new();
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    let server = axum_server::bind_rustls(addr, tls_config)
        .handle(handle.clone())
        .serve(app.into_make_service());
    tokio::spawn(server);

    timeout(Duration::from_secs(10), handle.listening())
        .await
        .expect("server did not start in time")
        .expect("server failed to bind")
}

async fn echo_cv(headers: HeaderMap) -> String {
    headers
        .get("ms-cv")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
