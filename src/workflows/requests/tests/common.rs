use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::config::LifecycleConfig;
use crate::workflows::requests::domain::{
    Action, ActionCommand, Actor, Agency, ClosurePayload, ClosureReason, DueChange,
    DueDateRequest, Event, NewEvent, NewRequest, RecordAttachment, RecordPrivacy, Request,
    RequestId, RequestStatus, UserId,
};
use crate::workflows::requests::events::{EventLog, EventPage, EventQuery};
use crate::workflows::requests::lifecycle::{FixedClock, LifecycleEngine};
use crate::workflows::requests::notifications::{
    DispatchOutcome, Notification, NotificationDispatcher, NotificationError,
};
use crate::workflows::requests::store::{
    CommittedTransition, InMemoryRequestStore, RequestDraft, RequestRepository, RequestStore,
    StoreError, Transition,
};
use crate::workflows::requests::{request_router, StaffDirectory};

pub(super) type MemoryEngine = LifecycleEngine<InMemoryRequestStore, RecordingDispatcher>;

pub(super) const STAFF_TOKEN: &str = "records-officer-token";

pub(super) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 12, 20, 9, 30, 0)
        .single()
        .expect("valid start")
}

pub(super) fn agency() -> Agency {
    Agency {
        code: "860".to_string(),
        name: "Department of Records".to_string(),
    }
}

pub(super) fn other_agency() -> Agency {
    Agency {
        code: "057".to_string(),
        name: "Department of Finance".to_string(),
    }
}

pub(super) fn attachment(index: usize, privacy: RecordPrivacy) -> RecordAttachment {
    RecordAttachment {
        file_name: format!("record-{index}.pdf"),
        title: format!("Responsive record {index}"),
        privacy,
    }
}

pub(super) fn submission(title: &str) -> NewRequest {
    NewRequest {
        title: title.to_string(),
        description: "All inspection reports for 2023".to_string(),
        agency: agency(),
        assigned_users: vec![UserId("records-officer".to_string())],
        attachments: Vec::new(),
    }
}

pub(super) fn staff() -> Actor {
    Actor::Agency(UserId("records-officer".to_string()))
}

pub(super) fn requester() -> Actor {
    Actor::Requester(UserId("requester-17".to_string()))
}

pub(super) fn days(count: u32) -> DueChange {
    DueChange {
        due: DueDateRequest::Days(count),
        reason: None,
    }
}

pub(super) fn denial(explanation: Option<&str>) -> Action {
    Action::Close(ClosurePayload {
        reasons: vec![ClosureReason::Denied],
        explanation: explanation.map(str::to_string),
    })
}

pub(super) fn command(request_id: &RequestId, actor: Actor, action: Action) -> ActionCommand {
    ActionCommand {
        request_id: request_id.clone(),
        actor,
        expected_revision: None,
        action,
    }
}

pub(super) fn build_engine() -> (Arc<MemoryEngine>, Arc<FixedClock>, Arc<RecordingDispatcher>) {
    let clock = Arc::new(FixedClock::new(start()));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let engine = LifecycleEngine::with_clock(
        Arc::new(InMemoryRequestStore::default()),
        dispatcher.clone(),
        LifecycleConfig::default(),
        clock.clone(),
    );
    (Arc::new(engine), clock, dispatcher)
}

pub(super) fn submitted(engine: &MemoryEngine) -> Request {
    engine
        .submit(submission("Inspection reports"))
        .expect("submission accepted")
}

pub(super) fn staff_directory() -> StaffDirectory {
    StaffDirectory::default().with_token(STAFF_TOKEN, UserId("records-officer".to_string()))
}

pub(super) fn router_with_engine(engine: Arc<MemoryEngine>) -> axum::Router {
    request_router(engine, staff_directory())
}

/// Request as the store would hold it, for sweeps that do not need the engine.
pub(super) fn stored_request(
    sequence: u64,
    agency: Agency,
    status: RequestStatus,
    due_in: Duration,
) -> Request {
    Request {
        id: RequestId::compose(2023, &agency.code, sequence),
        status,
        created_at: start() - Duration::days(10),
        due_date: start() + due_in,
        agency,
        assigned_users: Vec::new(),
        title: format!("Request {sequence}"),
        description: String::new(),
        agency_description: None,
        agency_description_release: None,
        acknowledged_at: (status != RequestStatus::Open).then(|| start() - Duration::days(9)),
        records: Vec::new(),
        events: Vec::new(),
        revision: 0,
    }
}

#[derive(Default)]
pub(super) struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("dispatcher mutex").clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn notify(&self, notification: Notification) -> Result<DispatchOutcome, NotificationError> {
        self.sent.lock().expect("dispatcher mutex").push(notification);
        Ok(DispatchOutcome::Delivered)
    }
}

pub(super) struct FailingDispatcher;

impl NotificationDispatcher for FailingDispatcher {
    fn notify(&self, _notification: Notification) -> Result<DispatchOutcome, NotificationError> {
        Err(NotificationError::Transport("smtp relay offline".to_string()))
    }
}

pub(super) struct UnavailableStore;

fn offline() -> StoreError {
    StoreError::Unavailable("database offline".to_string())
}

impl RequestStore for UnavailableStore {
    fn create(&self, _draft: RequestDraft) -> Result<Request, StoreError> {
        Err(offline())
    }

    fn get(&self, _id: &RequestId) -> Result<Request, StoreError> {
        Err(offline())
    }

    fn update_status(
        &self,
        _id: &RequestId,
        _expected_revision: u64,
        _status: RequestStatus,
        _due_date: DateTime<Utc>,
    ) -> Result<Request, StoreError> {
        Err(offline())
    }

    fn all(&self) -> Result<Vec<Request>, StoreError> {
        Err(offline())
    }
}

impl EventLog for UnavailableStore {
    fn append(&self, _event: NewEvent, _at: DateTime<Utc>) -> Result<Event, StoreError> {
        Err(offline())
    }

    fn list(&self, _request_id: &RequestId, _query: &EventQuery) -> Result<EventPage, StoreError> {
        Err(offline())
    }
}

impl RequestRepository for UnavailableStore {
    fn commit(&self, _transition: Transition) -> Result<CommittedTransition, StoreError> {
        Err(offline())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) async fn read_text_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}
