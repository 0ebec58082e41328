use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber at INFO, honouring `RUST_LOG`.
pub fn init() {
    initialize_tracing(LevelFilter::INFO, &[]);
}

/// Same as [`init`], with extra filter directives such as
/// `"ipwatch::monitoring=debug"` layered on top of `RUST_LOG`.
pub fn init_with_directives(directives: &[&str]) {
    initialize_tracing(LevelFilter::INFO, directives);
}

fn build_filter(level: LevelFilter, directives: &[&str]) -> EnvFilter {
    let mut env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    for directive in directives {
        match directive.parse() {
            Ok(parsed) => env_filter = env_filter.add_directive(parsed),
            Err(error) => eprintln!("ignoring invalid log directive {directive:?}: {error}"),
        }
    }

    env_filter
}

fn initialize_tracing(level: LevelFilter, directives: &[&str]) {
    let env_filter = build_filter(level, directives);

    let log_format = var("RUST_LOG_FORMAT").unwrap_or_default();

    let log_layer = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer().compact().with_filter(env_filter).boxed(),
    };

    if let Err(error) = tracing_subscriber::registry().with(log_layer).try_init() {
        warn!("Tracing subscriber already installed: {error}");
    }
}
