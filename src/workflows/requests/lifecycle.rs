use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::deadlines::{DeadlineMonitor, DeadlineReport};
use super::domain::{
    add_days, Action, ActionCommand, Actor, ClosurePayload, ClosureReason, DueChange, Event,
    EventId, EventPayload, NewEvent, NewRequest, RecordAttachment, Request, RequestId,
    RequestStatus, Visibility, MAX_FILES_PER_SUBMISSION, MAX_TITLE_CHARS,
};
use super::events::{Audience, EventPage, EventPages, EventQuery};
use super::notifications::{
    DispatchOutcome, Notification, NotificationDispatcher, NotificationTemplate,
};
use super::store::{
    CommittedTransition, RequestDraft, RequestRepository, StoreError, Transition,
};
use crate::config::{LifecycleConfig, MAX_EVENT_PAGE_SIZE};

/// Source of the current time, injectable so due dates can be asserted exactly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock used by demos and tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Errors returned synchronously to the caller; none of them leaves partial state behind.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error("request {request_id} was modified concurrently (expected revision {expected}, found {actual})")]
    Conflict {
        request_id: RequestId,
        expected: u64,
        actual: u64,
    },
    #[error("due date {requested} is earlier than {now}")]
    InvalidExtension {
        requested: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    #[error("a denial requires an explanation")]
    MissingExplanation,
    #[error("at most {max} files may be submitted at once (received {count})")]
    TooManyFiles { count: usize, max: usize },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("cannot {action} a request that is {}", .status.label())]
    InvalidTransition {
        action: &'static str,
        status: RequestStatus,
    },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Store(StoreError),
}

impl LifecycleError {
    /// Attribute a store failure to the request it happened on.
    pub fn from_store(err: StoreError, request_id: &RequestId) -> Self {
        match err {
            StoreError::NotFound => LifecycleError::NotFound(request_id.clone()),
            StoreError::Conflict { expected, actual } => LifecycleError::Conflict {
                request_id: request_id.clone(),
                expected,
                actual,
            },
            StoreError::Invariant(message) => LifecycleError::Validation(message),
            other @ StoreError::Unavailable(_) => LifecycleError::Store(other),
        }
    }
}

/// Status reached by applying `action` to a request in `current`.
///
/// Extensions pass through `ExtensionRequested`; the engine collapses it back to the
/// originating status once the new due date is set.
pub fn next_status(
    current: RequestStatus,
    action: &Action,
) -> Result<RequestStatus, LifecycleError> {
    use RequestStatus::{Acknowledged, Closed, ExtensionRequested, Open};

    let next = match (current, action) {
        (ExtensionRequested, _) => None,
        (Open, Action::Acknowledge(_)) => Some(Acknowledged),
        (Open | Acknowledged, Action::Extend(_)) => Some(ExtensionRequested),
        (Open | Acknowledged, Action::Close(_)) => Some(Closed),
        (Closed, Action::Reopen(_)) => Some(Open),
        (
            status,
            Action::Note(_)
            | Action::ReleaseRecord(_)
            | Action::EditDescription(_)
            | Action::Notify(_),
        ) => Some(status),
        _ => None,
    };

    next.ok_or(LifecycleError::InvalidTransition {
        action: action.name(),
        status: current,
    })
}

/// Notification sent (or deferred) for one committed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationReceipt {
    pub event_id: EventId,
    pub template: NotificationTemplate,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub request: Request,
    pub events: Vec<Event>,
    pub notifications: Vec<NotificationReceipt>,
}

struct PlannedEvent {
    visibility: Visibility,
    payload: EventPayload,
    template: Option<NotificationTemplate>,
}

struct Plan {
    request: Request,
    events: Vec<PlannedEvent>,
}

/// Serializes writers per request id.
#[derive(Default)]
struct RequestLocks {
    locks: Mutex<HashMap<RequestId, Arc<Mutex<()>>>>,
}

impl RequestLocks {
    fn handle(&self, id: &RequestId) -> Result<Arc<Mutex<()>>, LifecycleError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| poisoned("request lock table"))?;
        Ok(locks.entry(id.clone()).or_default().clone())
    }

    /// Drop the entry once the table and `handle` are its only owners.
    fn release(&self, id: &RequestId, handle: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        let idle = locks.get(id).is_some_and(|entry| {
            Arc::ptr_eq(entry, &handle) && Arc::strong_count(&handle) == 2
        });
        if idle {
            locks.remove(id);
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

fn poisoned(what: &str) -> LifecycleError {
    LifecycleError::Store(StoreError::Unavailable(format!("{what} poisoned")))
}

/// Validates and applies request lifecycle actions.
pub struct LifecycleEngine<R, D> {
    repository: Arc<R>,
    dispatcher: Arc<D>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    locks: RequestLocks,
}

impl<R, D> LifecycleEngine<R, D>
where
    R: RequestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    pub fn new(repository: Arc<R>, dispatcher: Arc<D>, config: LifecycleConfig) -> Self {
        Self::with_clock(repository, dispatcher, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        repository: Arc<R>,
        dispatcher: Arc<D>,
        config: LifecycleConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            dispatcher,
            clock,
            config,
            locks: RequestLocks::default(),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store a new request in `Open` with the initial acknowledgment deadline.
    pub fn submit(&self, submission: NewRequest) -> Result<Request, LifecycleError> {
        let title = validate_title(&submission.title)?;
        if !submission.agency.is_valid() {
            return Err(LifecycleError::Validation(
                "agency code must be three digits and the agency must be named".to_string(),
            ));
        }
        validate_files(&submission.attachments)?;

        let created_at = self.clock.now();
        let due_date = add_days(created_at, self.config.acknowledgment_days)
            .ok_or_else(|| out_of_range("acknowledgment deadline"))?;
        let draft = RequestDraft {
            created_at,
            due_date,
            agency: submission.agency,
            assigned_users: submission.assigned_users,
            title,
            description: submission.description.trim().to_string(),
            records: submission.attachments,
        };

        let request = self.repository.create(draft).map_err(|err| match err {
            StoreError::Unavailable(_) => LifecycleError::Store(err),
            other => LifecycleError::Validation(other.to_string()),
        })?;
        info!(request_id = %request.id, agency = %request.agency.code, "request submitted");
        Ok(request)
    }

    pub fn get(&self, id: &RequestId) -> Result<Request, LifecycleError> {
        self.repository
            .get(id)
            .map_err(|err| LifecycleError::from_store(err, id))
    }

    /// One page of a request's timeline; `limit` defaults to the configured page size.
    pub fn events(
        &self,
        id: &RequestId,
        after: Option<EventId>,
        limit: Option<usize>,
        audience: Audience,
    ) -> Result<EventPage, LifecycleError> {
        let limit = limit
            .unwrap_or(self.config.event_page_size)
            .clamp(1, MAX_EVENT_PAGE_SIZE);
        let query = EventQuery {
            after,
            limit,
            audience,
        };
        self.repository
            .list(id, &query)
            .map_err(|err| LifecycleError::from_store(err, id))
    }

    /// Lazily iterate the full timeline page by page.
    pub fn timeline(&self, id: &RequestId, audience: Audience) -> EventPages<'_, R> {
        EventPages::new(
            self.repository.as_ref(),
            id.clone(),
            self.config.event_page_size,
            audience,
        )
    }

    /// Sweep every stored request for overdue and due-soon deadlines.
    pub fn deadlines(&self) -> Result<DeadlineReport, LifecycleError> {
        let requests = self.repository.all().map_err(LifecycleError::Store)?;
        Ok(DeadlineMonitor::from_config(&self.config).sweep(&requests, self.clock.now()))
    }

    /// Number of request ids with a writer lock currently tracked.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Validate and commit an action, then hand its notifications to the dispatcher.
    pub fn apply(&self, command: ActionCommand) -> Result<TransitionOutcome, LifecycleError> {
        // Unknown ids never reach the lock table.
        self.get(&command.request_id)?;

        let request_id = command.request_id.clone();
        let handle = self.locks.handle(&request_id)?;
        let result = {
            // The mutex guards no data, so a poisoned lock is still usable.
            let _writer = handle.lock().unwrap_or_else(PoisonError::into_inner);
            self.commit_action(command)
        };
        self.locks.release(&request_id, handle);

        let (committed, templates) = result?;
        let notifications = committed
            .events
            .iter()
            .zip(templates)
            .filter_map(|(event, template)| template.map(|template| (event, template)))
            .map(|(event, template)| self.dispatch(&committed.request, event, template))
            .collect();

        Ok(TransitionOutcome {
            request: committed.request,
            events: committed.events,
            notifications,
        })
    }

    fn commit_action(
        &self,
        command: ActionCommand,
    ) -> Result<(CommittedTransition, Vec<Option<NotificationTemplate>>), LifecycleError> {
        let ActionCommand {
            request_id,
            actor,
            expected_revision,
            action,
        } = command;

        let current = self.get(&request_id)?;
        if let Some(expected) = expected_revision {
            if expected != current.revision {
                return Err(LifecycleError::Conflict {
                    request_id,
                    expected,
                    actual: current.revision,
                });
            }
        }
        authorize(&actor, &action)?;

        let now = self.clock.now();
        let plan = self.plan(&current, &action, now)?;
        let templates: Vec<Option<NotificationTemplate>> =
            plan.events.iter().map(|event| event.template).collect();
        let transition = Transition {
            expected_revision: current.revision,
            at: now,
            request: plan.request,
            events: plan
                .events
                .into_iter()
                .map(|event| NewEvent {
                    request_id: request_id.clone(),
                    actor: actor.clone(),
                    visibility: event.visibility,
                    payload: event.payload,
                })
                .collect(),
        };

        let committed = self
            .repository
            .commit(transition)
            .map_err(|err| LifecycleError::from_store(err, &request_id))?;
        info!(
            request_id = %request_id,
            action = action.name(),
            status = committed.request.status.label(),
            revision = committed.request.revision,
            "transition committed"
        );
        Ok((committed, templates))
    }

    fn dispatch(
        &self,
        request: &Request,
        event: &Event,
        template: NotificationTemplate,
    ) -> NotificationReceipt {
        let mut details = BTreeMap::new();
        details.insert("status".to_string(), request.status.label().to_string());
        details.insert("due_date".to_string(), request.due_date.date_naive().to_string());
        details.insert("agency".to_string(), request.agency.name.clone());

        let notification = Notification {
            request_id: request.id.clone(),
            event_id: event.id,
            template,
            details,
        };

        let outcome = match self.dispatcher.notify(notification) {
            Ok(DispatchOutcome::Delivered) => DispatchOutcome::Delivered,
            Ok(DispatchOutcome::Deferred) => {
                warn!(
                    request_id = %request.id,
                    template = template.name(),
                    "notification deferred"
                );
                DispatchOutcome::Deferred
            }
            Err(err) => {
                warn!(
                    request_id = %request.id,
                    template = template.name(),
                    error = %err,
                    "notification failed; left for retry"
                );
                DispatchOutcome::Deferred
            }
        };

        NotificationReceipt {
            event_id: event.id,
            template,
            outcome,
        }
    }

    fn plan(
        &self,
        current: &Request,
        action: &Action,
        now: DateTime<Utc>,
    ) -> Result<Plan, LifecycleError> {
        let status = next_status(current.status, action)?;
        let mut next = current.clone();

        let event = match action {
            Action::Acknowledge(change) => {
                let due_date = resolve_due(change, now)?;
                next.status = status;
                next.due_date = due_date;
                next.acknowledged_at.get_or_insert(now);
                PlannedEvent {
                    visibility: Visibility::Public,
                    payload: EventPayload::Acknowledgement {
                        due_date,
                        info: optional_text(change.reason.as_deref()),
                    },
                    template: Some(NotificationTemplate::Acknowledgment),
                }
            }
            Action::Extend(change) => {
                let due_date = resolve_due(change, now)?;
                next.due_date = due_date;
                next.status = settle_extension(status, current.status);
                PlannedEvent {
                    visibility: Visibility::Public,
                    payload: EventPayload::Extension {
                        previous_due: current.due_date,
                        due_date,
                        reason: optional_text(change.reason.as_deref()),
                    },
                    template: Some(NotificationTemplate::Extension),
                }
            }
            Action::Close(payload) => {
                let (reasons, explanation) = validate_closure(current, payload)?;
                next.status = status;
                let release = add_days(now, self.config.description_release_days)
                    .ok_or_else(|| out_of_range("description release date"))?;
                next.agency_description_release = Some(release);
                let template = NotificationTemplate::for_closure(&reasons);
                PlannedEvent {
                    visibility: Visibility::Public,
                    payload: EventPayload::Closure {
                        reasons,
                        explanation,
                    },
                    template: Some(template),
                }
            }
            Action::Reopen(change) => {
                let reason =
                    required_text(change.reason.as_deref(), "a reopen reason is required")?;
                let due_date = resolve_due(change, now)?;
                next.status = status;
                next.due_date = due_date;
                next.agency_description_release = None;
                PlannedEvent {
                    visibility: Visibility::Public,
                    payload: EventPayload::Reopened { due_date, reason },
                    template: Some(NotificationTemplate::RequestReopened),
                }
            }
            Action::Note(note) => {
                let text = required_text(Some(note.text.as_str()), "note text is required")?;
                PlannedEvent {
                    visibility: note.visibility,
                    payload: EventPayload::Note { text },
                    template: (note.visibility == Visibility::Public)
                        .then_some(NotificationTemplate::AddNote),
                }
            }
            Action::ReleaseRecord(release) => {
                if release.records.is_empty() {
                    return Err(LifecycleError::Validation(
                        "at least one record is required".to_string(),
                    ));
                }
                validate_files(&release.records)?;
                let released = release.records.iter().any(|record| record.privacy.is_released());
                next.records.extend(release.records.iter().cloned());
                PlannedEvent {
                    visibility: if released {
                        Visibility::Public
                    } else {
                        Visibility::AgencyInternal
                    },
                    payload: EventPayload::RecordRelease {
                        records: release.records.clone(),
                    },
                    template: released.then_some(NotificationTemplate::RecordsReleased),
                }
            }
            Action::EditDescription(edit) => {
                let description = required_text(
                    Some(edit.description.as_str()),
                    "agency description is required",
                )?;
                let previous = next.agency_description.replace(description.clone());
                PlannedEvent {
                    visibility: Visibility::AgencyInternal,
                    payload: EventPayload::DescriptionEdit {
                        previous,
                        description,
                    },
                    template: None,
                }
            }
            Action::Notify(notify) => {
                let reason = required_text(
                    Some(notify.reason.as_str()),
                    "a reason is required to add a helper",
                )?;
                if next.assigned_users.contains(&notify.user_id) {
                    return Err(LifecycleError::Validation(format!(
                        "user {} is already assigned",
                        notify.user_id.0
                    )));
                }
                next.assigned_users.push(notify.user_id.clone());
                PlannedEvent {
                    visibility: Visibility::AgencyInternal,
                    payload: EventPayload::HelperAdded {
                        user_id: notify.user_id.clone(),
                        reason,
                    },
                    template: Some(NotificationTemplate::RequestAssigned),
                }
            }
        };

        Ok(Plan {
            request: next,
            events: vec![event],
        })
    }
}

fn settle_extension(transient: RequestStatus, origin: RequestStatus) -> RequestStatus {
    match transient {
        RequestStatus::ExtensionRequested => origin,
        other => other,
    }
}

fn authorize(actor: &Actor, action: &Action) -> Result<(), LifecycleError> {
    match (actor, action) {
        (Actor::Agency(_), _) => Ok(()),
        (Actor::Requester(_), Action::Note(note)) if note.visibility == Visibility::Public => {
            Ok(())
        }
        (Actor::Requester(_), _) => Err(LifecycleError::Forbidden(format!(
            "requesters may not {}",
            action.name()
        ))),
    }
}

fn resolve_due(change: &DueChange, now: DateTime<Utc>) -> Result<DateTime<Utc>, LifecycleError> {
    let requested = change
        .due
        .resolve(now)
        .ok_or_else(|| out_of_range("requested due date"))?;
    if requested < now {
        return Err(LifecycleError::InvalidExtension { requested, now });
    }
    Ok(requested)
}

fn out_of_range(what: &str) -> LifecycleError {
    LifecycleError::Validation(format!("{what} is beyond the supported calendar range"))
}

fn validate_closure(
    current: &Request,
    payload: &ClosurePayload,
) -> Result<(Vec<ClosureReason>, Option<String>), LifecycleError> {
    let mut reasons: Vec<ClosureReason> = Vec::with_capacity(payload.reasons.len());
    for reason in &payload.reasons {
        if !reasons.contains(reason) {
            reasons.push(*reason);
        }
    }
    if reasons.is_empty() {
        return Err(LifecycleError::Validation(
            "at least one closure reason is required".to_string(),
        ));
    }

    let explanation = optional_text(payload.explanation.as_deref());
    if reasons.contains(&ClosureReason::Denied) && explanation.is_none() {
        return Err(LifecycleError::MissingExplanation);
    }

    let withheld = current
        .records
        .iter()
        .any(|record| record.privacy.needs_agency_description());
    if withheld && !current.has_agency_description() {
        return Err(LifecycleError::Validation(
            "an agency description is required before closing a request with private records"
                .to_string(),
        ));
    }

    Ok((reasons, explanation))
}

fn validate_title(title: &str) -> Result<String, LifecycleError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(LifecycleError::Validation("title is required".to_string()));
    }
    let length = trimmed.chars().count();
    if length > MAX_TITLE_CHARS {
        return Err(LifecycleError::Validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters (got {length})"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_files(records: &[RecordAttachment]) -> Result<(), LifecycleError> {
    if records.len() > MAX_FILES_PER_SUBMISSION {
        return Err(LifecycleError::TooManyFiles {
            count: records.len(),
            max: MAX_FILES_PER_SUBMISSION,
        });
    }
    for record in records {
        if record.file_name.trim().is_empty() {
            return Err(LifecycleError::Validation("file name is required".to_string()));
        }
        validate_title(&record.title)?;
    }
    Ok(())
}

fn optional_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn required_text(text: Option<&str>, message: &str) -> Result<String, LifecycleError> {
    optional_text(text).ok_or_else(|| LifecycleError::Validation(message.to_string()))
}
