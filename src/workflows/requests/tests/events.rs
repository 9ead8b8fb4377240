use super::common::*;

use crate::workflows::requests::domain::{
    Action, EventId, EventPayload, NewEvent, NotePayload, RequestId, Visibility,
};
use crate::workflows::requests::events::{Audience, EventLog, EventPages, EventQuery};
use crate::workflows::requests::store::{InMemoryRequestStore, RequestStore, StoreError};
use crate::workflows::requests::RequestDraft;
use chrono::Duration;

fn store_with_request() -> (InMemoryRequestStore, RequestId) {
    let store = InMemoryRequestStore::default();
    let request = store
        .create(RequestDraft {
            created_at: start(),
            due_date: start() + Duration::days(5),
            agency: agency(),
            assigned_users: Vec::new(),
            title: "Inspection reports".to_string(),
            description: String::new(),
            records: Vec::new(),
        })
        .expect("request stored");
    (store, request.id)
}

fn note(request_id: &RequestId, index: usize, visibility: Visibility) -> NewEvent {
    NewEvent {
        request_id: request_id.clone(),
        actor: staff(),
        visibility,
        payload: EventPayload::Note {
            text: format!("note {index}"),
        },
    }
}

#[test]
fn pages_preserve_order_for_any_page_size() {
    let (store, id) = store_with_request();
    for index in 0..7 {
        // Same wall-clock instant for every append; the log still orders them.
        store
            .append(note(&id, index, Visibility::Public), start())
            .expect("event appended");
    }

    for page_size in 1..=8 {
        let events: Vec<_> = EventPages::new(&store, id.clone(), page_size, Audience::Agency)
            .collect::<Result<_, _>>()
            .expect("pages readable");

        assert_eq!(events.len(), 7, "page size {page_size}");
        for pair in events.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
            assert!(pair[0].id < pair[1].id);
        }
        assert_eq!(events[0].id, EventId(1));
    }
}

#[test]
fn next_cursor_is_only_set_when_more_events_exist() {
    let (store, id) = store_with_request();
    for index in 0..3 {
        store
            .append(note(&id, index, Visibility::Public), start())
            .expect("event appended");
    }

    let first = store
        .list(&id, &EventQuery::first_page(2, Audience::Public))
        .expect("first page");
    assert_eq!(first.events.len(), 2);
    assert_eq!(first.next_cursor, Some(EventId(2)));

    let second = store
        .list(
            &id,
            &EventQuery {
                after: first.next_cursor,
                limit: 2,
                audience: Audience::Public,
            },
        )
        .expect("second page");
    assert_eq!(second.events.len(), 1);
    assert_eq!(second.events[0].id, EventId(3));
    assert!(second.next_cursor.is_none());
}

#[test]
fn public_audience_skips_internal_events() {
    let (store, id) = store_with_request();
    store
        .append(note(&id, 1, Visibility::Public), start())
        .expect("appended");
    store
        .append(note(&id, 2, Visibility::AgencyInternal), start())
        .expect("appended");
    store
        .append(note(&id, 3, Visibility::Public), start())
        .expect("appended");

    let public: Vec<_> = EventPages::new(&store, id.clone(), 1, Audience::Public)
        .map(|event| event.expect("readable").id)
        .collect();
    assert_eq!(public, vec![EventId(1), EventId(3)]);

    let agency: Vec<_> = EventPages::new(&store, id, 10, Audience::Agency)
        .map(|event| event.expect("readable").id)
        .collect();
    assert_eq!(agency.len(), 3);
}

#[test]
fn timeline_resumes_after_cursor() {
    let (store, id) = store_with_request();
    for index in 0..4 {
        store
            .append(note(&id, index, Visibility::Public), start())
            .expect("appended");
    }

    let resumed: Vec<_> = EventPages::new(&store, id, 3, Audience::Public)
        .resume(EventId(2))
        .map(|event| event.expect("readable").id)
        .collect();

    assert_eq!(resumed, vec![EventId(3), EventId(4)]);
}

#[test]
fn unknown_requests_have_no_timeline() {
    let (store, _) = store_with_request();
    let missing = RequestId("FOIL-2023-860-04040".to_string());

    assert_eq!(
        store.append(note(&missing, 1, Visibility::Public), start()),
        Err(StoreError::NotFound)
    );
    assert_eq!(
        store
            .list(&missing, &EventQuery::first_page(10, Audience::Agency))
            .map(|page| page.events.len()),
        Err(StoreError::NotFound)
    );

    let mut pages = EventPages::new(&store, missing, 10, Audience::Agency);
    assert!(matches!(pages.next(), Some(Err(StoreError::NotFound))));
    assert!(pages.next().is_none());
}

#[test]
fn appended_events_are_linked_to_their_request() {
    let (store, id) = store_with_request();
    let event = store
        .append(note(&id, 1, Visibility::Public), start())
        .expect("appended");

    let request = store.get(&id).expect("request stored");
    assert_eq!(request.events, vec![event.id]);
    assert_eq!(event.timestamp, start());
}

#[test]
fn engine_clamps_page_size() {
    let (engine, _, _) = build_engine();
    let request = submitted(&engine);
    for index in 0..12 {
        engine
            .apply(command(
                &request.id,
                staff(),
                Action::Note(NotePayload {
                    text: format!("status call {index}"),
                    visibility: Visibility::Public,
                }),
            ))
            .expect("note added");
    }

    let default_page = engine
        .events(&request.id, None, None, Audience::Public)
        .expect("page");
    assert_eq!(default_page.events.len(), 10);
    assert_eq!(default_page.next_cursor, Some(EventId(10)));

    let zero = engine
        .events(&request.id, None, Some(0), Audience::Public)
        .expect("page");
    assert_eq!(zero.events.len(), 1);

    let huge = engine
        .events(&request.id, Some(EventId(2)), Some(10_000), Audience::Public)
        .expect("page");
    assert_eq!(huge.events.len(), 10);
    assert!(huge.next_cursor.is_none());
}
