//! Fire-and-forget notification dispatch.
//!
//! A bounded queue feeds one worker task; the worker spawns an
//! independent task per notification, so one slow or failing delivery
//! cannot hold up the rest. Enqueueing never blocks: when the queue is
//! full the job is dropped with a warning rather than delaying a scan.

use crate::message;
use crate::Messenger;
use reunite_core::MatchResult;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which ranked results may trigger an alert.
#[derive(Debug, Clone, Copy)]
pub struct AlertPolicy {
    /// Only the first `top_k` ranked results are considered.
    pub top_k: usize,
    /// Looser bound than the match threshold; near-misses may alert.
    pub alert_threshold: f32,
}

#[derive(Debug)]
enum Notification {
    MatchAlert {
        case_id: i64,
        recipient: String,
        missing_name: String,
        distance: f32,
        location: String,
        officer_contact: String,
    },
    ReportConfirmation {
        case_id: i64,
        recipient: String,
        complainant_name: String,
        missing_name: String,
    },
}

/// Handle to the dispatch worker. Cheap to clone; dropping every handle
/// closes the queue and lets the worker drain and exit.
#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<Notification>,
}

impl AlertDispatcher {
    /// Start the dispatch worker on the current runtime.
    ///
    /// The worker is owned by the daemon, not by any request scope:
    /// notifications queued during a scan keep going out after the scan
    /// has responded, or even after its caller has gone away.
    pub fn spawn(messenger: Arc<dyn Messenger>, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Notification>(queue_depth.max(1));

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let messenger = Arc::clone(&messenger);
                tokio::spawn(async move {
                    deliver(messenger, job).await;
                });
            }
            tracing::debug!("alert queue closed, dispatch worker exiting");
        });

        Self { tx }
    }

    /// Queue alerts for the eligible top-ranked results and return
    /// immediately. Eligible: within `top_k`, distance under the alert
    /// threshold, and a contact phone on file. Returns how many alerts
    /// were queued.
    pub fn dispatch_match_alerts(
        &self,
        ranked: &[MatchResult],
        policy: &AlertPolicy,
        location: &str,
        officer_contact: &str,
    ) -> usize {
        let mut queued = 0;
        for result in ranked.iter().take(policy.top_k) {
            if result.distance >= policy.alert_threshold {
                continue;
            }
            let Some(phone) = result
                .complainant_phone
                .as_deref()
                .filter(|p| !p.trim().is_empty())
            else {
                tracing::debug!(case_id = result.case_id, "no contact phone on file, skipping alert");
                continue;
            };

            if self.enqueue(Notification::MatchAlert {
                case_id: result.case_id,
                recipient: phone.to_string(),
                missing_name: result.name.clone(),
                distance: result.distance,
                location: location.to_string(),
                officer_contact: officer_contact.to_string(),
            }) {
                queued += 1;
            }
        }
        queued
    }

    /// Queue a report confirmation for a freshly filed case.
    pub fn confirm_report(
        &self,
        case_id: i64,
        recipient: &str,
        complainant_name: &str,
        missing_name: &str,
    ) -> bool {
        self.enqueue(Notification::ReportConfirmation {
            case_id,
            recipient: recipient.to_string(),
            complainant_name: complainant_name.to_string(),
            missing_name: missing_name.to_string(),
        })
    }

    fn enqueue(&self, job: Notification) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(?job, "alert queue full, dropping notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(?job, "alert queue closed, dropping notification");
                false
            }
        }
    }
}

/// Deliver one notification. Failures are logged and die here; nothing
/// unwinds into the scan path or into sibling deliveries.
async fn deliver(messenger: Arc<dyn Messenger>, job: Notification) {
    let (case_id, recipient, body) = match &job {
        Notification::MatchAlert {
            case_id,
            recipient,
            missing_name,
            distance,
            location,
            officer_contact,
        } => (
            *case_id,
            message::normalize_phone(recipient),
            message::match_alert_body(missing_name, *distance, location, officer_contact),
        ),
        Notification::ReportConfirmation {
            case_id,
            recipient,
            complainant_name,
            missing_name,
        } => (
            *case_id,
            message::normalize_phone(recipient),
            message::report_confirmation_body(complainant_name, missing_name, *case_id),
        ),
    };

    match messenger.send(&recipient, &body).await {
        Ok(id) => {
            tracing::info!(case_id, recipient, delivery_id = %id.0, "notification delivered");
        }
        Err(err) => {
            tracing::warn!(case_id, recipient, error = %err, "notification delivery failed");
        }
    }
}
