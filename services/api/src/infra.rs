use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use foil_portal::workflows::requests::Notification;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Drain the notification queue. Stands in for the email relay: each message is logged.
pub(crate) fn spawn_delivery(mut receiver: mpsc::Receiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = receiver.recv().await {
            log_notification(&notification);
        }
        info!("notification queue closed");
    })
}

pub(crate) fn log_notification(notification: &Notification) {
    info!(
        request_id = %notification.request_id,
        event_id = notification.event_id.0,
        template = notification.template.name(),
        "notification delivered"
    );
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

/// Noon UTC on `date`, so day-based arithmetic in demos stays on the same calendar day.
pub(crate) fn midday(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default())
        .and_utc()
}
