// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Instrumented HTTP transport for store catalog clients.
//!
//! Every request sent through [`InstrumentedTransport`] carries an `MS-CV`
//! correlation vector, unique per request, and a fixed `User-Agent` identity.
//! Proxy routing and the certificate policy are chosen once from a
//! [`TransportConfig`].

pub mod config;
pub mod correlation;
pub mod error;
pub mod instrumented;
pub mod logger;
pub mod tls;
pub mod transport;

pub use config::{CertificateValidation, TransportConfig};
pub use correlation::{CorrelationVector, Extension, VectorLimits};
pub use error::{BuildError, CorrelationError, ReqwestTransportError, SendError};
pub use instrumented::{InstrumentedTransport, OverflowPolicy, CORRELATION_VECTOR_HEADER};
pub use transport::{ReqwestTransport, Transport};
