//! FOIL request lifecycle: storage, the append-only event log, the state machine that
//! moves requests between statuses, and the notifications those moves trigger.

pub mod access;
pub mod deadlines;
pub mod domain;
pub mod events;
pub mod lifecycle;
pub mod notifications;
pub mod router;
pub mod store;

#[cfg(test)]
mod tests;

pub use access::{Caller, StaffDirectory, REQUESTER_HEADER};
pub use deadlines::{
    AgencyDigest, DeadlineEntry, DeadlineMonitor, DeadlineReport, DeadlineReportSummary, DueState,
};
pub use domain::{
    Action, ActionCommand, Actor, Agency, ClosurePayload, ClosureReason, DayCountForm,
    DescriptionPayload, DueChange, DueDateRequest, Event, EventId, EventKind, EventPayload,
    NewEvent, NewRequest, NotePayload, NotifyPayload, RecordAttachment, RecordPrivacy,
    ReleasePayload, Request, RequestId, RequestStatus, RequestView, UserId, Visibility,
};
pub use events::{Audience, EventLog, EventPage, EventPages, EventQuery};
pub use lifecycle::{
    next_status, Clock, FixedClock, LifecycleEngine, LifecycleError, NotificationReceipt,
    SystemClock, TransitionOutcome,
};
pub use notifications::{
    ChannelDispatcher, DispatchOutcome, Notification, NotificationDispatcher, NotificationError,
    NotificationTemplate,
};
pub use router::request_router;
pub use store::{
    CommittedTransition, InMemoryRequestStore, RequestDraft, RequestRepository, RequestStore,
    StoreError, Transition,
};
