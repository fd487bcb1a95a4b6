use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide business counters, exposed on `/metrics`.
#[derive(Default)]
pub struct PlatformMetrics {
    pub subscriptions_created: AtomicU64,
    pub payments_verified: AtomicU64,
    pub signature_failures: AtomicU64,
    pub refunds_issued: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_failed: AtomicU64,
}

impl PlatformMetrics {
    pub fn inc_subscription(&self) {
        self.subscriptions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_verified(&self) {
        self.payments_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_signature_failure(&self) {
        self.signature_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_refund(&self) {
        self.refunds_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Serialize to Prometheus text exposition format.
    pub fn to_prometheus_text(&self) -> String {
        let created = self.subscriptions_created.load(Ordering::Relaxed);
        let verified = self.payments_verified.load(Ordering::Relaxed);
        let bad_sig = self.signature_failures.load(Ordering::Relaxed);
        let refunds = self.refunds_issued.load(Ordering::Relaxed);
        let sent = self.notifications_sent.load(Ordering::Relaxed);
        let failed = self.notifications_failed.load(Ordering::Relaxed);

        format!(
            "# HELP newsdesk_subscriptions_created_total Subscriptions created\n\
             # TYPE newsdesk_subscriptions_created_total counter\n\
             newsdesk_subscriptions_created_total {created}\n\
             # HELP newsdesk_payments_total Payment verification outcomes\n\
             # TYPE newsdesk_payments_total counter\n\
             newsdesk_payments_total{{result=\"verified\"}} {verified}\n\
             newsdesk_payments_total{{result=\"invalid_signature\"}} {bad_sig}\n\
             # HELP newsdesk_refunds_total Refunds issued\n\
             # TYPE newsdesk_refunds_total counter\n\
             newsdesk_refunds_total {refunds}\n\
             # HELP newsdesk_notifications_total Outbound SMS notifications\n\
             # TYPE newsdesk_notifications_total counter\n\
             newsdesk_notifications_total{{status=\"sent\"}} {sent}\n\
             newsdesk_notifications_total{{status=\"failed\"}} {failed}\n"
        )
    }
}
