use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum number of characters accepted for request and record titles.
pub const MAX_TITLE_CHARS: usize = 140;

/// Maximum number of files accepted in a single submission or release.
pub const MAX_FILES_PER_SUBMISSION: usize = 4;

/// Identifier for a FOIL request (`FOIL-2025-860-00001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn compose(year: i32, agency_code: &str, sequence: u64) -> Self {
        Self(format!("FOIL-{year}-{agency_code}-{sequence:05}"))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request event sequence number; the first event on a request is `1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EventId(pub u64);

/// Opaque identifier for portal users (agency staff or requesters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Agency responsible for answering a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agency {
    pub code: String,
    pub name: String,
}

impl Agency {
    pub fn is_valid(&self) -> bool {
        self.code.len() == 3
            && self.code.chars().all(|c| c.is_ascii_digit())
            && !self.name.trim().is_empty()
    }
}

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    Agency(UserId),
    Requester(UserId),
}

impl Actor {
    pub fn user_id(&self) -> &UserId {
        match self {
            Actor::Agency(id) | Actor::Requester(id) => id,
        }
    }

    pub fn is_agency(&self) -> bool {
        matches!(self, Actor::Agency(_))
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Acknowledged,
    /// Only exists while an extension is being applied; never stored.
    ExtensionRequested,
    Closed,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::Open => "open",
            RequestStatus::Acknowledged => "acknowledged",
            RequestStatus::ExtensionRequested => "extension_requested",
            RequestStatus::Closed => "closed",
        }
    }

    pub const fn is_persistable(self) -> bool {
        !matches!(self, RequestStatus::ExtensionRequested)
    }
}

/// Who can see a released record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPrivacy {
    Private,
    ReleasedAndPrivate,
    ReleasedAndPublic,
}

impl RecordPrivacy {
    /// Whether the requester receives the file.
    pub const fn is_released(self) -> bool {
        !matches!(self, RecordPrivacy::Private)
    }

    /// Whether closing the request requires an agency description.
    pub const fn needs_agency_description(self) -> bool {
        !matches!(self, RecordPrivacy::ReleasedAndPublic)
    }
}

/// Metadata for a file attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAttachment {
    pub file_name: String,
    pub title: String,
    pub privacy: RecordPrivacy,
}

/// Audience of an event in the request timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    AgencyInternal,
}

/// Reason codes accepted when closing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClosureReason {
    Completed,
    FulfilledInPart,
    DeliveredByEmail,
    DeliveredByMail,
    AvailableForPickup,
    Refer311,
    ReferOpenData,
    ReferOtherAgency,
    PubliclyAvailable,
    Denied,
}

/// New due date requested by an agency user.
///
/// Replaces the legacy day-count field where `-1` meant "read the date field instead".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueDateRequest {
    Days(u32),
    ExactDate(NaiveDate),
}

impl DueDateRequest {
    /// Resolve against `now`. Explicit dates cover the whole day. `None` when the day
    /// count runs past the representable calendar.
    pub fn resolve(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            DueDateRequest::Days(days) => add_days(now, days),
            DueDateRequest::ExactDate(date) => Some(end_of_day(date)),
        }
    }
}

/// `at` plus whole days, or `None` on calendar overflow.
pub fn add_days(at: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    at.checked_add_signed(Duration::days(i64::from(days)))
}

/// Last representable second of `date` in UTC.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    date.and_time(last_second).and_utc()
}

/// Legacy form payload: a day count plus an optional date used when the count is `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DayCountForm {
    pub days: i64,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

/// Day-count sentinel selecting the explicit date field.
pub const EXPLICIT_DATE_SENTINEL: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DayCountError {
    #[error("an explicit due date is required when days is -1")]
    MissingDate,
    #[error("day count must be zero or more (got {0})")]
    Negative(i64),
    #[error("day count {0} is out of range")]
    OutOfRange(i64),
}

impl TryFrom<DayCountForm> for DueDateRequest {
    type Error = DayCountError;

    fn try_from(form: DayCountForm) -> Result<Self, Self::Error> {
        if form.days == EXPLICIT_DATE_SENTINEL {
            return form
                .due_date
                .map(DueDateRequest::ExactDate)
                .ok_or(DayCountError::MissingDate);
        }
        if form.days < 0 {
            return Err(DayCountError::Negative(form.days));
        }
        u32::try_from(form.days)
            .map(DueDateRequest::Days)
            .map_err(|_| DayCountError::OutOfRange(form.days))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DueInput {
    Structured(DueDateRequest),
    DayCount(DayCountForm),
}

/// Accept either `{"days": 5}` / `{"exact_date": "..."}` or the legacy day-count form.
pub fn deserialize_due<'de, D>(deserializer: D) -> Result<DueDateRequest, D::Error>
where
    D: Deserializer<'de>,
{
    match DueInput::deserialize(deserializer)? {
        DueInput::Structured(request) => Ok(request),
        DueInput::DayCount(form) => {
            DueDateRequest::try_from(form).map_err(serde::de::Error::custom)
        }
    }
}

/// Public-records request as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub agency: Agency,
    pub assigned_users: Vec<UserId>,
    pub title: String,
    pub description: String,
    pub agency_description: Option<String>,
    pub agency_description_release: Option<DateTime<Utc>>,
    /// First acknowledgment; survives closure and reopening.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub records: Vec<RecordAttachment>,
    pub events: Vec<EventId>,
    pub revision: u64,
}

impl Request {
    pub fn has_agency_description(&self) -> bool {
        self.agency_description
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }

    pub fn was_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    /// Agency description is withheld from the public until its release date passes.
    pub fn view(&self, now: DateTime<Utc>) -> RequestView {
        let description_released = self
            .agency_description_release
            .is_some_and(|release| release <= now);

        RequestView {
            request_id: self.id.clone(),
            status: self.status,
            status_label: self.status.label(),
            created_at: self.created_at,
            due_date: self.due_date,
            agency: self.agency.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            agency_description: if description_released {
                self.agency_description.clone()
            } else {
                None
            },
            agency_description_release: self.agency_description_release,
            records: self
                .records
                .iter()
                .filter(|record| record.privacy == RecordPrivacy::ReleasedAndPublic)
                .cloned()
                .collect(),
            event_count: self.events.len(),
            revision: self.revision,
        }
    }
}

/// Public projection of a request returned over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestView {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub status_label: &'static str,
    pub created_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub agency: Agency,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency_description_release: Option<DateTime<Utc>>,
    pub records: Vec<RecordAttachment>,
    pub event_count: usize,
    pub revision: u64,
}

/// Submission payload for a new request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub agency: Agency,
    #[serde(default)]
    pub assigned_users: Vec<UserId>,
    #[serde(default)]
    pub attachments: Vec<RecordAttachment>,
}

/// Immutable entry in a request's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub request_id: RequestId,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    pub visibility: Visibility,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Event contents before the log assigns an id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub request_id: RequestId,
    pub actor: Actor,
    pub visibility: Visibility,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Note,
    Extension,
    Acknowledgement,
    Closure,
    RecordRelease,
    DescriptionEdit,
    HelperAdded,
    Reopened,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Note {
        text: String,
    },
    Extension {
        previous_due: DateTime<Utc>,
        due_date: DateTime<Utc>,
        reason: Option<String>,
    },
    Acknowledgement {
        due_date: DateTime<Utc>,
        info: Option<String>,
    },
    Closure {
        reasons: Vec<ClosureReason>,
        explanation: Option<String>,
    },
    RecordRelease {
        records: Vec<RecordAttachment>,
    },
    DescriptionEdit {
        previous: Option<String>,
        description: String,
    },
    HelperAdded {
        user_id: UserId,
        reason: String,
    },
    Reopened {
        due_date: DateTime<Utc>,
        reason: String,
    },
}

impl EventPayload {
    pub const fn kind(&self) -> EventKind {
        match self {
            EventPayload::Note { .. } => EventKind::Note,
            EventPayload::Extension { .. } => EventKind::Extension,
            EventPayload::Acknowledgement { .. } => EventKind::Acknowledgement,
            EventPayload::Closure { .. } => EventKind::Closure,
            EventPayload::RecordRelease { .. } => EventKind::RecordRelease,
            EventPayload::DescriptionEdit { .. } => EventKind::DescriptionEdit,
            EventPayload::HelperAdded { .. } => EventKind::HelperAdded,
            EventPayload::Reopened { .. } => EventKind::Reopened,
        }
    }
}

/// Due-date change carried by acknowledge, extend, and reopen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueChange {
    #[serde(deserialize_with = "deserialize_due")]
    pub due: DueDateRequest,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosurePayload {
    pub reasons: Vec<ClosureReason>,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePayload {
    pub text: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePayload {
    pub records: Vec<RecordAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionPayload {
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPayload {
    pub user_id: UserId,
    pub reason: String,
}

/// Action submitted against a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", content = "payload", rename_all = "snake_case")]
pub enum Action {
    Acknowledge(DueChange),
    Extend(DueChange),
    Close(ClosurePayload),
    Note(NotePayload),
    ReleaseRecord(ReleasePayload),
    EditDescription(DescriptionPayload),
    Notify(NotifyPayload),
    Reopen(DueChange),
}

impl Action {
    pub const fn name(&self) -> &'static str {
        match self {
            Action::Acknowledge(_) => "acknowledge",
            Action::Extend(_) => "extend",
            Action::Close(_) => "close",
            Action::Note(_) => "note",
            Action::ReleaseRecord(_) => "release_record",
            Action::EditDescription(_) => "edit_description",
            Action::Notify(_) => "notify",
            Action::Reopen(_) => "reopen",
        }
    }
}

/// Structured command forwarded by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCommand {
    pub request_id: RequestId,
    pub actor: Actor,
    #[serde(default)]
    pub expected_revision: Option<u64>,
    pub action: Action,
}
