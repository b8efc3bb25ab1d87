use std::time::Duration;
use time::format_description::well_known::Rfc3339;

/// Start/stop notifications for named runs ("article collection", "index build").
pub trait RunHook: Send + Sync {
    fn started(&self, name: &str);
    fn finished(&self, name: &str, elapsed: Duration);
}

/// Logs run boundaries through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl RunHook for TracingHook {
    fn started(&self, name: &str) {
        let at = time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        tracing::info!(run = name, started_at = %at, "run started");
    }

    fn finished(&self, name: &str, elapsed: Duration) {
        tracing::info!(run = name, took_s = elapsed.as_secs_f64(), "run finished");
    }
}
