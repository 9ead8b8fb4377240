use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use crate::workflows::requests::domain::{
    add_days, end_of_day, Action, ActionCommand, Actor, DayCountError, DayCountForm, DueChange,
    DueDateRequest, RequestId, UserId,
};

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

#[test]
fn day_count_sentinel_selects_explicit_date() {
    let explicit = DueDateRequest::try_from(DayCountForm {
        days: -1,
        due_date: Some(date(2024, 1, 1)),
    });
    assert_eq!(explicit, Ok(DueDateRequest::ExactDate(date(2024, 1, 1))));

    let counted = DueDateRequest::try_from(DayCountForm {
        days: 20,
        due_date: Some(date(2024, 1, 1)),
    });
    assert_eq!(counted, Ok(DueDateRequest::Days(20)));
}

#[test]
fn day_count_rejects_bad_forms() {
    assert_eq!(
        DueDateRequest::try_from(DayCountForm {
            days: -1,
            due_date: None
        }),
        Err(DayCountError::MissingDate)
    );
    assert_eq!(
        DueDateRequest::try_from(DayCountForm {
            days: -3,
            due_date: None
        }),
        Err(DayCountError::Negative(-3))
    );
    assert_eq!(
        DueDateRequest::try_from(DayCountForm {
            days: i64::from(u32::MAX) + 1,
            due_date: None
        }),
        Err(DayCountError::OutOfRange(i64::from(u32::MAX) + 1))
    );
}

#[test]
fn exact_dates_cover_the_whole_day() {
    let now = Utc
        .with_ymd_and_hms(2023, 12, 20, 9, 30, 0)
        .single()
        .expect("valid");
    let due = DueDateRequest::ExactDate(date(2024, 1, 1))
        .resolve(now)
        .expect("in range");

    assert_eq!(due, end_of_day(date(2024, 1, 1)));
    assert_eq!(due.to_rfc3339(), "2024-01-01T23:59:59+00:00");
    assert_eq!(
        DueDateRequest::Days(5).resolve(now),
        Some(now + chrono::Duration::days(5))
    );
}

#[test]
fn huge_day_counts_do_not_resolve() {
    let now = Utc
        .with_ymd_and_hms(2023, 12, 20, 9, 30, 0)
        .single()
        .expect("valid");

    assert_eq!(DueDateRequest::Days(u32::MAX).resolve(now), None);
    assert_eq!(add_days(now, u32::MAX), None);
    assert!(add_days(now, 3_650).is_some());
}

#[test]
fn due_change_accepts_structured_and_legacy_forms() {
    let structured: DueChange =
        serde_json::from_value(json!({ "due": { "days": 5 } })).expect("structured form");
    assert_eq!(structured.due, DueDateRequest::Days(5));

    let exact: DueChange = serde_json::from_value(json!({
        "due": { "exact_date": "2024-01-01" },
        "reason": "Archive retrieval"
    }))
    .expect("exact form");
    assert_eq!(exact.due, DueDateRequest::ExactDate(date(2024, 1, 1)));
    assert_eq!(exact.reason.as_deref(), Some("Archive retrieval"));

    let legacy: DueChange =
        serde_json::from_value(json!({ "due": { "days": -1, "due_date": "2024-02-15" } }))
            .expect("legacy form");
    assert_eq!(legacy.due, DueDateRequest::ExactDate(date(2024, 2, 15)));

    let missing = serde_json::from_value::<DueChange>(json!({ "due": { "days": -1 } }));
    assert!(missing.is_err());
}

#[test]
fn action_commands_use_tagged_wire_format() {
    let command: ActionCommand = serde_json::from_value(json!({
        "request_id": "FOIL-2023-860-00001",
        "actor": { "role": "agency", "user_id": "records-officer" },
        "action": {
            "action_type": "close",
            "payload": { "reasons": ["Denied"], "explanation": "Exempt" }
        }
    }))
    .expect("command parses");

    assert_eq!(command.request_id, RequestId("FOIL-2023-860-00001".to_string()));
    assert_eq!(
        command.actor,
        Actor::Agency(UserId("records-officer".to_string()))
    );
    assert!(command.expected_revision.is_none());
    assert_eq!(command.action.name(), "close");
    assert!(matches!(command.action, Action::Close(_)));
}
