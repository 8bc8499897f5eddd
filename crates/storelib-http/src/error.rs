// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the instrumented transport.
//!
//! Failures fall into three groups:
//! - **Correlation**: the MS-CV generator could not produce or advance a vector
//! - **Build**: the transport could not be constructed from its configuration
//! - **Send**: a request failed, either before leaving the process (correlation)
//!   or inside the wrapped transport
//!
//! Errors raised by the wrapped transport are carried verbatim in
//! [`SendError::Transport`]; this layer never reclassifies them.

use thiserror::Error;

/// Errors raised by [`CorrelationVector`](crate::correlation::CorrelationVector).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// The operating system RNG could not supply a base identifier.
    #[error("unable to draw a random correlation vector base: {0}")]
    Entropy(String),
    /// The extension cannot grow without exceeding the configured length ceiling.
    #[error("correlation vector {value} cannot advance past {max_length} characters")]
    Overflow {
        /// Last value the vector produced.
        value: String,
        /// Length ceiling that was hit.
        max_length: usize,
    },
    /// A caller supplied base is empty, non-printable or too long to extend.
    #[error("invalid correlation vector base: {0:?}")]
    InvalidBase(String),
}

/// Errors raised while constructing a transport.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The correlation vector could not be initialized.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    /// The vector's length ceiling cannot hold a generated base, so rebasing
    /// after overflow would never succeed.
    #[error(
        "overflow policy Rebase needs a max_length of at least {required}, the vector allows {max_length}"
    )]
    RebaseUnsupported {
        /// Configured length ceiling.
        max_length: usize,
        /// Shortest ceiling that fits a generated base plus `.0`.
        required: usize,
    },
    /// The identity string is not a valid header value.
    #[error("identity {0:?} is not a valid header value")]
    InvalidIdentity(String),
    /// The proxy address could not be parsed.
    #[error("invalid proxy address: {0}")]
    Proxy(#[source] reqwest::Error),
    /// The HTTP client failed to build (TLS backend, resolver, ...).
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Errors returned from [`InstrumentedTransport::send`](crate::InstrumentedTransport::send).
#[derive(Debug, Error)]
pub enum SendError<E>
where
    E: std::error::Error + 'static,
{
    /// No correlation vector could be assigned; the request never left the process.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    /// The wrapped transport failed. The error is passed through untouched.
    #[error(transparent)]
    Transport(E),
}

impl<E> SendError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns the wrapped transport error, if that is where the failure came from.
    pub fn transport(&self) -> Option<&E> {
        match self {
            SendError::Transport(err) => Some(err),
            SendError::Correlation(_) => None,
        }
    }
}

/// Errors produced by [`ReqwestTransport`](crate::transport::ReqwestTransport).
#[derive(Debug, Error)]
pub enum ReqwestTransportError {
    /// DNS, connect, TLS, timeout or protocol failure reported by reqwest.
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    /// The caller cancelled the send before a response arrived.
    #[error("request cancelled")]
    Cancelled,
}
