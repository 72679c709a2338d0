//! Structured Logging Configuration
//!
//! JSON output for production (`LOG_FORMAT=json`), human-readable text
//! otherwise. Campaign loops run inside an
//! `info_span!("campaign_loop", campaign_id = ...)`, so every line a loop
//! emits carries the campaign id in both formats.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cd_common::logging::init_logging;
//!
//! fn main() {
//!     init_logging("cd-scheduler-server");
//!
//!     tracing::info!(campaign_id = %id, "Campaign loop started");
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `LOG_FORMAT`: `json` or `text` (default: text)
//! - `RUST_LOG`: level filter, default [`DEFAULT_FILTER`].
//!   Examples: `RUST_LOG=debug`, `RUST_LOG=cd_scheduler=trace,sqlx=warn`

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// sqlx logs every statement at info; the claim loop would drown everything else.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }

    pub fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

/// Filter from `RUST_LOG`, falling back to [`DEFAULT_FILTER`]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber for `service_name`. Call once per process.
pub fn init_logging(service_name: &str) {
    let format = LogFormat::from_env();
    let registry = tracing_subscriber::registry().with(env_filter());

    match format {
        // One flat object per line; the loop span contributes campaign_id.
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().compact().with_target(false))
            .init(),
    }

    tracing::info!(service = %service_name, format = ?format, "Logging initialized");
}
