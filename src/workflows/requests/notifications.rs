use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::domain::{ClosureReason, EventId, RequestId};

/// Email templates the portal sends on lifecycle changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    Acknowledgment,
    Extension,
    ClosedFulfilledInWhole,
    ClosedFulfilledInPart,
    ClosedByEmail,
    ClosedByMail,
    ClosedByPickup,
    Refer311,
    ReferOpendata,
    ReferOtherAgency,
    ReferWebLink,
    Denied,
    AddNote,
    RecordsReleased,
    RequestAssigned,
    RequestReopened,
}

impl NotificationTemplate {
    pub const fn name(self) -> &'static str {
        match self {
            NotificationTemplate::Acknowledgment => "acknowledgment",
            NotificationTemplate::Extension => "extension",
            NotificationTemplate::ClosedFulfilledInWhole => "closed_fulfilled_in_whole",
            NotificationTemplate::ClosedFulfilledInPart => "closed_fulfilled_in_part",
            NotificationTemplate::ClosedByEmail => "closed_by_email",
            NotificationTemplate::ClosedByMail => "closed_by_mail",
            NotificationTemplate::ClosedByPickup => "closed_by_pickup",
            NotificationTemplate::Refer311 => "refer_311",
            NotificationTemplate::ReferOpendata => "refer_opendata",
            NotificationTemplate::ReferOtherAgency => "refer_other_agency",
            NotificationTemplate::ReferWebLink => "refer_web_link",
            NotificationTemplate::Denied => "denied",
            NotificationTemplate::AddNote => "add_note",
            NotificationTemplate::RecordsReleased => "records_released",
            NotificationTemplate::RequestAssigned => "request_assigned",
            NotificationTemplate::RequestReopened => "request_reopened",
        }
    }

    /// Pick the closing letter. Fulfilment and referral reasons win over a denial
    /// in the order the agency letters are checked; anything else is a denial.
    pub fn for_closure(reasons: &[ClosureReason]) -> Self {
        const PRIORITY: [(ClosureReason, NotificationTemplate); 9] = [
            (
                ClosureReason::Completed,
                NotificationTemplate::ClosedFulfilledInWhole,
            ),
            (
                ClosureReason::FulfilledInPart,
                NotificationTemplate::ClosedFulfilledInPart,
            ),
            (
                ClosureReason::DeliveredByEmail,
                NotificationTemplate::ClosedByEmail,
            ),
            (
                ClosureReason::DeliveredByMail,
                NotificationTemplate::ClosedByMail,
            ),
            (
                ClosureReason::AvailableForPickup,
                NotificationTemplate::ClosedByPickup,
            ),
            (ClosureReason::Refer311, NotificationTemplate::Refer311),
            (
                ClosureReason::ReferOpenData,
                NotificationTemplate::ReferOpendata,
            ),
            (
                ClosureReason::ReferOtherAgency,
                NotificationTemplate::ReferOtherAgency,
            ),
            (
                ClosureReason::PubliclyAvailable,
                NotificationTemplate::ReferWebLink,
            ),
        ];

        PRIORITY
            .iter()
            .find(|(reason, _)| reasons.contains(reason))
            .map(|(_, template)| *template)
            .unwrap_or(NotificationTemplate::Denied)
    }
}

/// Outbound notification tied to the event that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub request_id: RequestId,
    pub event_id: EventId,
    pub template: NotificationTemplate,
    pub details: BTreeMap<String, String>,
}

/// Result of handing a notification to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Handed to the delivery system.
    Delivered,
    /// Accepted for a later attempt by the delivery system.
    Deferred,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Outbound notification hook (email, webhooks). Implementations must not block.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<DispatchOutcome, NotificationError>;
}

/// Hands notifications to a bounded queue drained by a background delivery task.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::Sender<Notification>,
}

impl ChannelDispatcher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl NotificationDispatcher for ChannelDispatcher {
    fn notify(&self, notification: Notification) -> Result<DispatchOutcome, NotificationError> {
        match self.sender.try_send(notification) {
            Ok(()) => Ok(DispatchOutcome::Delivered),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(DispatchOutcome::Deferred),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NotificationError::Transport(
                "delivery queue closed".to_string(),
            )),
        }
    }
}
