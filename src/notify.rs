//! Moderator notification seam. Delivery (mail, in-app, whatever) is an
//! external concern; the core only announces that a report was filed.

use async_trait::async_trait;

use crate::models::{Id, ReportType};

#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub report_id: Id,
    pub reporter_id: Id,
    pub report_type: ReportType,
    /// "image 12" / "comment 7", for human-readable notification text.
    pub target: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn report_filed(&self, summary: &ReportSummary);
}

/// Default sink: structured log line, nothing else.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn report_filed(&self, summary: &ReportSummary) {
        tracing::info!(
            report_id = summary.report_id,
            reporter_id = summary.reporter_id,
            report_type = ?summary.report_type,
            target = %summary.target,
            "report filed, moderators notified"
        );
    }
}
