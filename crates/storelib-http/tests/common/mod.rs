// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

pub mod tls_server;

use storelib_http::{CertificateValidation, TransportConfig};

/// Config for a direct (no proxy) transport with the given certificate policy.
pub fn config(certificate_validation: CertificateValidation) -> TransportConfig {
    TransportConfig {
        certificate_validation,
        ..TransportConfig::default()
    }
}
