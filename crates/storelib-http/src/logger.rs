// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatter for hosts embedding the transport.
//!
//! The crate only emits `tracing` events; installing a subscriber is left to
//! the host. [`Formatter`] lifts the `ms_cv` field of an event into the line
//! prefix, so the log line of a request lines up with the `MS-CV` header the
//! service received:
//!
//! ```text
//! STORELIB | DEBUG | tul4NUsfs9Cl7mOfN/dupsl.3 | sending request method=GET url=https://...
//! STORELIB | WARN | TLS certificate validation is disabled, every server certificate will be accepted
//! ```
//!
//! ```rust,ignore
//! let subscriber = tracing_subscriber::fmt()
//!     .event_format(storelib_http::logger::Formatter)
//!     .with_ansi(false)
//!     .with_max_level(tracing::Level::INFO)
//!     .finish();
//! tracing::subscriber::set_global_default(subscriber)?;
//! ```

use std::fmt::{self, Write as _};
use tracing_core::field::{Field, Visit};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

/// Event field carrying the correlation vector of a request.
pub const CORRELATION_FIELD: &str = "ms_cv";

/// Formats events as `STORELIB | LEVEL | [ms_cv |] span: message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        write!(writer, "STORELIB | {} | ", event.metadata().level())?;
        if let Some(ms_cv) = &fields.ms_cv {
            write!(writer, "{ms_cv} | ")?;
        }

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(span_fields) = ext.get::<FormattedFields<N>>() {
                    if !span_fields.is_empty() {
                        write!(writer, "{{{span_fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        writer.write_str(&fields.message)?;
        for (name, value) in &fields.rest {
            write!(writer, " {name}={value}")?;
        }
        writeln!(writer)
    }
}

/// Event fields split into the message, the correlation vector and the rest.
#[derive(Default)]
struct EventFields {
    message: String,
    ms_cv: Option<String>,
    rest: Vec<(&'static str, String)>,
}

impl EventFields {
    fn record(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            CORRELATION_FIELD => self.ms_cv = Some(value),
            name => self.rest.push((name, value)),
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let mut rendered = String::new();
        // writing into a String cannot fail
        let _ = write!(rendered, "{value:?}");
        self.record(field, rendered);
    }
}
