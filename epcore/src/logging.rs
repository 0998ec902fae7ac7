//! Tracing subscriber setup.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::Logger;

struct Time;

impl FormatTime for Time {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        w.write_fmt(format_args!("{:?}", Utc::now().timestamp_micros()))
    }
}

fn level_from(name: &str) -> LevelFilter {
    match name.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        _ => LevelFilter::ERROR,
    }
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs the process subscriber. The `LOG_LEVEL` environment variable
/// overrides the configured level; repeated calls are no-ops so embedding
/// applications can install their own subscriber first.
pub fn init(config: Option<&Logger>) {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let level = std::env::var("LOG_LEVEL").ok().map_or_else(
        || {
            config
                .and_then(|l| l.log_level.as_deref())
                .map_or(LevelFilter::INFO, level_from)
        },
        |v| level_from(&v),
    );

    let result = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_timer(Time)
                .with_target(true)
                .with_filter(level),
        )
        .try_init();

    if result.is_err() {
        // another subscriber won the race; defer to it
        INSTALLED.store(true, Ordering::SeqCst);
    }
}
