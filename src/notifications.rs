//! Notification transport contract (out-of-scope collaborator, consumed
//! only by contract per spec.md §6). Concrete transports (SMTP, PagerDuty,
//! OpsGenie, Slack) live outside the core; a couple of test doubles are
//! provided so the Alarm Engine's fan-out logic is exercisable.

use async_trait::async_trait;

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send_alert(&self, alarm_name: &str, destination: &str, message: &str) -> bool;

    async fn send_grouped_alert(&self, grouping_key: &str, destination: &str, message: &str, count: u32) -> bool;
}

/// Always succeeds; useful in tests that only assert dispatch happened.
pub struct NoopTransport;

#[async_trait]
impl NotificationTransport for NoopTransport {
    async fn send_alert(&self, _alarm_name: &str, _destination: &str, _message: &str) -> bool {
        true
    }

    async fn send_grouped_alert(&self, _grouping_key: &str, _destination: &str, _message: &str, _count: u32) -> bool {
        true
    }
}

/// Records every call for assertions in tests.
#[derive(Default)]
pub struct RecordingTransport {
    pub alerts: std::sync::Mutex<Vec<(String, String, String)>>,
    pub grouped: std::sync::Mutex<Vec<(String, String, String, u32)>>,
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_alert(&self, alarm_name: &str, destination: &str, message: &str) -> bool {
        self.alerts
            .lock()
            .unwrap()
            .push((alarm_name.to_string(), destination.to_string(), message.to_string()));
        true
    }

    async fn send_grouped_alert(&self, grouping_key: &str, destination: &str, message: &str, count: u32) -> bool {
        self.grouped.lock().unwrap().push((
            grouping_key.to_string(),
            destination.to_string(),
            message.to_string(),
            count,
        ));
        true
    }
}
