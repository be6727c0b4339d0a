//! Tracing subscriber setup for hosts that do not install their own.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Keeps optional trace output alive; drop it to flush.
#[derive(Default)]
pub struct LogGuard {
    #[cfg(feature = "chrome-trace")]
    _chrome: Option<tracing_chrome::FlushGuard>,
}

/// Install a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// With the `chrome-trace` feature and `VIEWPORT_TRACE=1` a Chrome trace is
/// also written to `trace.json`. Returns an inert guard if a global
/// subscriber is already set.
pub fn init() -> LogGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer().with_target(true);

    #[cfg(feature = "chrome-trace")]
    {
        if std::env::var("VIEWPORT_TRACE").ok().as_deref() == Some("1") {
            let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .file("trace.json")
                .build();
            let subscriber = tracing_subscriber::registry().with(filter).with(fmt).with(chrome_layer);
            if tracing::subscriber::set_global_default(subscriber).is_err() {
                return LogGuard::default();
            }
            return LogGuard { _chrome: Some(guard) };
        }
    }

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt);
    let _ = tracing::subscriber::set_global_default(subscriber);
    LogGuard::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let _a = init();
        let _b = init();
        tracing::info!("logging initialised");
    }
}
