use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Datelike, Duration, Utc};

use super::domain::{
    Agency, Event, EventId, NewEvent, RecordAttachment, Request, RequestId, RequestStatus, UserId,
};
use super::events::{page_of, EventLog, EventPage, EventQuery};

/// Storage error enumeration shared by the request store and the event log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("request not found")]
    NotFound,
    #[error("stale revision (expected {expected}, found {actual})")]
    Conflict { expected: u64, actual: u64 },
    #[error("store invariant violated: {0}")]
    Invariant(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fields supplied when a request is first stored; the store assigns the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDraft {
    pub created_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub agency: Agency,
    pub assigned_users: Vec<UserId>,
    pub title: String,
    pub description: String,
    pub records: Vec<RecordAttachment>,
}

/// Durable record of requests and their lifecycle status.
pub trait RequestStore: Send + Sync {
    fn create(&self, draft: RequestDraft) -> Result<Request, StoreError>;
    fn get(&self, id: &RequestId) -> Result<Request, StoreError>;
    fn update_status(
        &self,
        id: &RequestId,
        expected_revision: u64,
        status: RequestStatus,
        due_date: DateTime<Utc>,
    ) -> Result<Request, StoreError>;
    /// Snapshot of every stored request, in identifier order.
    fn all(&self) -> Result<Vec<Request>, StoreError>;
}

/// One validated lifecycle step: the next request state plus the events that explain it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub expected_revision: u64,
    pub at: DateTime<Utc>,
    pub request: Request,
    pub events: Vec<NewEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommittedTransition {
    pub request: Request,
    pub events: Vec<Event>,
}

/// Store capable of applying a transition and its events as one unit.
pub trait RequestRepository: RequestStore + EventLog {
    fn commit(&self, transition: Transition) -> Result<CommittedTransition, StoreError>;
}

#[derive(Debug, Default)]
struct Ledger {
    requests: HashMap<RequestId, Request>,
    timelines: HashMap<RequestId, Vec<Event>>,
    sequence: u64,
}

impl Ledger {
    fn request_mut(&mut self, id: &RequestId) -> Result<&mut Request, StoreError> {
        self.requests.get_mut(id).ok_or(StoreError::NotFound)
    }

    fn push_event(&mut self, event: NewEvent, at: DateTime<Utc>) -> Result<Event, StoreError> {
        if !self.requests.contains_key(&event.request_id) {
            return Err(StoreError::NotFound);
        }
        let timeline = self.timelines.entry(event.request_id.clone()).or_default();
        let (id, timestamp) = match timeline.last() {
            Some(last) => {
                let floor = last.timestamp + Duration::microseconds(1);
                (EventId(last.id.0 + 1), at.max(floor))
            }
            None => (EventId(1), at),
        };

        let stored = Event {
            id,
            request_id: event.request_id,
            actor: event.actor,
            timestamp,
            visibility: event.visibility,
            payload: event.payload,
        };
        timeline.push(stored.clone());

        self.request_mut(&stored.request_id)?.events.push(id);
        Ok(stored)
    }
}

fn check_revision(request: &Request, expected: u64) -> Result<(), StoreError> {
    if request.revision == expected {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            expected,
            actual: request.revision,
        })
    }
}

fn check_invariants(request: &Request) -> Result<(), StoreError> {
    if !request.status.is_persistable() {
        return Err(StoreError::Invariant(format!(
            "status {} cannot be stored",
            request.status.label()
        )));
    }
    if request.due_date < request.created_at {
        return Err(StoreError::Invariant(
            "due date precedes creation timestamp".to_string(),
        ));
    }
    Ok(())
}

/// In-process request store and event log sharing a single ledger lock.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRequestStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryRequestStore {
    fn read(&self) -> Result<RwLockReadGuard<'_, Ledger>, StoreError> {
        self.ledger
            .read()
            .map_err(|_| StoreError::Unavailable("ledger lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Ledger>, StoreError> {
        self.ledger
            .write()
            .map_err(|_| StoreError::Unavailable("ledger lock poisoned".to_string()))
    }
}

impl RequestStore for InMemoryRequestStore {
    fn create(&self, draft: RequestDraft) -> Result<Request, StoreError> {
        let mut ledger = self.write()?;
        ledger.sequence += 1;
        let id = RequestId::compose(draft.created_at.year(), &draft.agency.code, ledger.sequence);
        if ledger.requests.contains_key(&id) {
            return Err(StoreError::Invariant(format!("duplicate request id {id}")));
        }

        let request = Request {
            id: id.clone(),
            status: RequestStatus::Open,
            created_at: draft.created_at,
            due_date: draft.due_date,
            agency: draft.agency,
            assigned_users: draft.assigned_users,
            title: draft.title,
            description: draft.description,
            agency_description: None,
            agency_description_release: None,
            acknowledged_at: None,
            records: draft.records,
            events: Vec::new(),
            revision: 0,
        };
        check_invariants(&request)?;

        ledger.timelines.insert(id.clone(), Vec::new());
        ledger.requests.insert(id, request.clone());
        Ok(request)
    }

    fn get(&self, id: &RequestId) -> Result<Request, StoreError> {
        self.read()?
            .requests
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn update_status(
        &self,
        id: &RequestId,
        expected_revision: u64,
        status: RequestStatus,
        due_date: DateTime<Utc>,
    ) -> Result<Request, StoreError> {
        let mut ledger = self.write()?;
        let current = ledger.request_mut(id)?;
        check_revision(current, expected_revision)?;

        let mut next = current.clone();
        next.status = status;
        next.due_date = due_date;
        check_invariants(&next)?;

        next.revision += 1;
        *current = next.clone();
        Ok(next)
    }

    fn all(&self) -> Result<Vec<Request>, StoreError> {
        let ledger = self.read()?;
        let mut requests: Vec<Request> = ledger.requests.values().cloned().collect();
        requests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(requests)
    }
}

impl EventLog for InMemoryRequestStore {
    fn append(&self, event: NewEvent, at: DateTime<Utc>) -> Result<Event, StoreError> {
        self.write()?.push_event(event, at)
    }

    fn list(&self, request_id: &RequestId, query: &EventQuery) -> Result<EventPage, StoreError> {
        let ledger = self.read()?;
        let timeline = ledger.timelines.get(request_id).ok_or(StoreError::NotFound)?;
        Ok(page_of(timeline, query))
    }
}

impl RequestRepository for InMemoryRequestStore {
    fn commit(&self, transition: Transition) -> Result<CommittedTransition, StoreError> {
        let Transition {
            expected_revision,
            at,
            request: mut next,
            events,
        } = transition;

        let id = next.id.clone();
        let mut ledger = self.write()?;
        let current = ledger.request_mut(&id)?;
        check_revision(current, expected_revision)?;
        if current.created_at != next.created_at || current.agency != next.agency {
            return Err(StoreError::Invariant(
                "creation timestamp and agency are immutable".to_string(),
            ));
        }
        if events.iter().any(|event| event.request_id != id) {
            return Err(StoreError::Invariant(
                "transition events must belong to the transitioned request".to_string(),
            ));
        }
        check_invariants(&next)?;

        // Validation is complete; nothing below can fail for an existing request.
        next.events = current.events.clone();
        next.revision = current.revision + 1;
        *current = next;

        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            stored.push(ledger.push_event(event, at)?);
        }

        let request = ledger
            .requests
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        Ok(CommittedTransition {
            request,
            events: stored,
        })
    }
}
