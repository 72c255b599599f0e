//! Logging Setup
//!
//! `EnvFilter` behind a reload layer so the level can change at runtime,
//! pretty or JSON output to stdout or rolling files, plus optional OTLP export.

use crate::config::{LogConfig, LogFormat};
use crate::telemetry::{self, TelemetryGuard};
use anyhow::{Context, Result};
use apihub_api_http::LogLevelControl;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

const LOG_FILE_PREFIX: &str = "apihub.log";

/// Keeps background log writers alive; drop on exit
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
    _telemetry: TelemetryGuard,
}

/// Runtime log level knob backed by the reload handle
pub struct ReloadableFilter {
    handle: reload::Handle<EnvFilter, Registry>,
    directive: Mutex<String>,
}

impl LogLevelControl for ReloadableFilter {
    fn current(&self) -> String {
        self.directive
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn set(&self, directive: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(directive).map_err(|e| e.to_string())?;
        self.handle.reload(filter).map_err(|e| e.to_string())?;
        if let Ok(mut current) = self.directive.lock() {
            *current = directive.to_string();
        }
        Ok(())
    }
}

/// Initial directive: `RUST_LOG` when set, else the configured level
fn initial_directive(config: &LogConfig) -> String {
    std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| config.level.clone())
}

pub fn init(config: &LogConfig) -> Result<(Arc<dyn LogLevelControl>, LoggingGuard)> {
    let directive = initial_directive(config);
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log level directive '{}'", directive))?;
    let (filter, handle) = reload::Layer::new(filter);

    let (writer, file_guard) = match &config.directory {
        Some(dir) => {
            let dir = shellexpand::tilde(dir).into_owned();
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };
    let ansi = config.directory.is_none();

    let output = match config.format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        // Development: pretty formatting
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    };
    let (otel, telemetry_guard) = telemetry::layer()?;
    let exporting = otel.is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .with(otel)
        .try_init()
        .context("global subscriber already installed")?;

    if exporting {
        info!("OpenTelemetry export enabled");
    } else if telemetry::requested_but_disabled() {
        warn!(
            endpoint_var = telemetry::ENDPOINT_VAR,
            "OpenTelemetry endpoint set but feature 'telemetry' not enabled"
        );
    }

    let control: Arc<dyn LogLevelControl> = Arc::new(ReloadableFilter {
        handle,
        directive: Mutex::new(directive),
    });
    Ok((
        control,
        LoggingGuard {
            _file: file_guard,
            _telemetry: telemetry_guard,
        },
    ))
}
