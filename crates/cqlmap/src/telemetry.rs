//! Tracing setup for the cqlmap binary and embedding services.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber; only the first call in a process wins.
///
/// `RUST_LOG` takes precedence over `level`. Repository spans carry the
/// table and key, so the JSON form keeps span fields on every line.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let base = fmt::layer().with_target(false);
    let output: OutputLayer = if json {
        base.json().with_current_span(true).boxed()
    } else {
        base.compact().boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing(true, Level::DEBUG);
        init_tracing(false, Level::INFO);
        tracing::info!(table = "imageasset", "subscriber installed");
    }
}
