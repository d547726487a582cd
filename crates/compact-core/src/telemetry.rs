//! Log output for `compactd`.
//!
//! Every compilation runs inside the `compile` span from [`crate::obs`]. The
//! subscriber logs span closes, so each request ends with one line carrying
//! its compile id, contract, compiler version and busy/idle time.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter applied when neither `RUST_LOG` nor the caller's directive parses.
const FALLBACK_DIRECTIVE: &str = "info";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_directive` (the `--log-level` / `LOG_LEVEL`
/// value). An unparsable directive degrades to `info` instead of failing
/// startup. Only the first call in a process has any effect.
pub fn init_tracing(json: bool, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVE));

    let layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json().flatten_event(true))
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
