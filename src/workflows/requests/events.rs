use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Event, EventId, NewEvent, RequestId, Visibility};
use super::store::StoreError;

/// Append-only audit trail of request events.
pub trait EventLog: Send + Sync {
    /// Append a single event. The log assigns the id and a timestamp no earlier than `at`.
    fn append(&self, event: NewEvent, at: DateTime<Utc>) -> Result<Event, StoreError>;
    fn list(&self, request_id: &RequestId, query: &EventQuery) -> Result<EventPage, StoreError>;
}

/// Who is reading the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    #[default]
    Public,
    Agency,
}

impl Audience {
    pub fn can_see(self, visibility: Visibility) -> bool {
        match self {
            Audience::Agency => true,
            Audience::Public => visibility == Visibility::Public,
        }
    }
}

/// Cursor-based page request over a request's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    pub after: Option<EventId>,
    pub limit: usize,
    pub audience: Audience,
}

impl EventQuery {
    pub fn first_page(limit: usize, audience: Audience) -> Self {
        Self {
            after: None,
            limit,
            audience,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPage {
    pub events: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<EventId>,
}

/// Slice one page out of an ordered timeline.
pub(crate) fn page_of(timeline: &[Event], query: &EventQuery) -> EventPage {
    let limit = query.limit.max(1);
    let mut visible = timeline
        .iter()
        .filter(|event| query.after.map_or(true, |cursor| event.id > cursor))
        .filter(|event| query.audience.can_see(event.visibility));

    let events: Vec<Event> = visible.by_ref().take(limit).cloned().collect();
    let next_cursor = match (events.last(), visible.next()) {
        (Some(last), Some(_)) => Some(last.id),
        _ => None,
    };

    EventPage {
        events,
        next_cursor,
    }
}

/// Lazily walks every page of a request's timeline, fetching the next page on demand.
pub struct EventPages<'a, L: EventLog + ?Sized> {
    log: &'a L,
    request_id: RequestId,
    query: EventQuery,
    buffer: std::vec::IntoIter<Event>,
    exhausted: bool,
}

impl<'a, L: EventLog + ?Sized> EventPages<'a, L> {
    pub fn new(log: &'a L, request_id: RequestId, page_size: usize, audience: Audience) -> Self {
        Self {
            log,
            request_id,
            query: EventQuery::first_page(page_size, audience),
            buffer: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    /// Resume after a cursor returned by an earlier page.
    pub fn resume(mut self, after: EventId) -> Self {
        self.query.after = Some(after);
        self
    }
}

impl<L: EventLog + ?Sized> Iterator for EventPages<'_, L> {
    type Item = Result<Event, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.buffer.next() {
                return Some(Ok(event));
            }
            if self.exhausted {
                return None;
            }

            match self.log.list(&self.request_id, &self.query) {
                Ok(page) => {
                    match page.next_cursor {
                        Some(cursor) => self.query.after = Some(cursor),
                        None => self.exhausted = true,
                    }
                    self.buffer = page.events.into_iter();
                }
                Err(err) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
