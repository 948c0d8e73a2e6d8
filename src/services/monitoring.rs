// Error reporting with Sentry integration
use tracing::info;

use crate::common::AppConfig;

/// The subset of configuration sentry needs
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringConfig {
    pub sentry_dsn: Option<String>,
    pub environment: String,
    pub traces_sample_rate: f32,
}

impl From<&AppConfig> for MonitoringConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            sentry_dsn: config.sentry_dsn.clone(),
            environment: config.environment.clone(),
            traces_sample_rate: config.sentry_traces_sample_rate,
        }
    }
}

impl MonitoringConfig {
    pub fn is_enabled(&self) -> bool {
        self.sentry_dsn.as_deref().is_some_and(|dsn| !dsn.is_empty())
    }
}

/// Initialize the sentry client. The returned guard flushes pending events
/// on drop, so `main` must hold it for the life of the process.
pub fn initialize_sentry(config: &MonitoringConfig) -> Option<sentry::ClientInitGuard> {
    if !config.is_enabled() {
        info!("Sentry DSN not configured");
        return None;
    }
    let dsn = config.sentry_dsn.as_deref()?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            traces_sample_rate: config.traces_sample_rate,
            ..Default::default()
        },
    ));

    info!(environment = %config.environment, "Sentry initialized successfully");
    Some(guard)
}
