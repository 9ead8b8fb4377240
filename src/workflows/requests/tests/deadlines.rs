use super::common::*;
use chrono::Duration;

use crate::config::LifecycleConfig;
use crate::workflows::requests::deadlines::{DeadlineMonitor, DueState, CSV_HEADER};
use crate::workflows::requests::domain::RequestStatus;

fn monitor() -> DeadlineMonitor {
    DeadlineMonitor::from_config(&LifecycleConfig::default())
}

#[test]
fn classify_buckets_by_due_date() {
    let monitor = monitor();
    let now = start();

    let overdue = stored_request(1, agency(), RequestStatus::Open, Duration::hours(-1));
    let soon = stored_request(2, agency(), RequestStatus::Acknowledged, Duration::days(1));
    // Two days ahead but still before the end of that day.
    let edge = stored_request(
        3,
        agency(),
        RequestStatus::Open,
        Duration::days(2) + Duration::hours(5),
    );
    let later = stored_request(4, agency(), RequestStatus::Open, Duration::days(3));
    let closed = stored_request(5, agency(), RequestStatus::Closed, Duration::days(-3));

    assert_eq!(monitor.classify(&overdue, now), Some(DueState::Overdue));
    assert_eq!(monitor.classify(&soon, now), Some(DueState::DueSoon));
    assert_eq!(monitor.classify(&edge, now), Some(DueState::DueSoon));
    assert_eq!(monitor.classify(&later, now), Some(DueState::OnTrack));
    assert_eq!(monitor.classify(&closed, now), None);
}

#[test]
fn sweep_groups_by_agency_and_acknowledgment() {
    let requests = vec![
        stored_request(1, agency(), RequestStatus::Open, Duration::days(-2)),
        stored_request(2, agency(), RequestStatus::Acknowledged, Duration::days(-1)),
        stored_request(3, agency(), RequestStatus::Acknowledged, Duration::hours(10)),
        stored_request(4, agency(), RequestStatus::Open, Duration::hours(3)),
        stored_request(5, agency(), RequestStatus::Acknowledged, Duration::hours(2)),
        stored_request(6, other_agency(), RequestStatus::Open, Duration::days(-4)),
        stored_request(7, other_agency(), RequestStatus::Open, Duration::days(20)),
        stored_request(8, other_agency(), RequestStatus::Closed, Duration::days(-9)),
    ];

    let report = monitor().sweep(&requests, start());

    let codes: Vec<_> = report.agencies.keys().cloned().collect();
    assert_eq!(codes, vec!["057".to_string(), "860".to_string()]);

    let records = &report.agencies["860"];
    assert_eq!(records.acknowledgments_overdue.len(), 1);
    assert_eq!(records.requests_overdue.len(), 1);
    assert_eq!(records.acknowledgments_due_soon.len(), 1);
    let due_soon: Vec<_> = records
        .requests_due_soon
        .iter()
        .map(|entry| entry.request_id.0.as_str())
        .collect();
    assert_eq!(due_soon, vec!["FOIL-2023-860-00005", "FOIL-2023-860-00003"]);

    let finance = &report.agencies["057"];
    assert_eq!(finance.acknowledgments_overdue.len(), 1);
    assert!(finance.requests_due_soon.is_empty());
    assert_eq!(finance.entries().count(), 1);

    assert_eq!(report.count(DueState::Overdue), 3);
    assert_eq!(report.count(DueState::DueSoon), 3);

    let summary = report.summary();
    assert_eq!(summary.overdue, 3);
    assert_eq!(summary.agencies[0].agency_code, "057");
    assert_eq!(
        summary.agencies[1].requests_overdue[0].deadline_label,
        "Overdue"
    );
}

#[test]
fn csv_export_lists_every_flagged_request() {
    let requests = vec![
        stored_request(1, agency(), RequestStatus::Open, Duration::days(-1)),
        stored_request(2, agency(), RequestStatus::Acknowledged, Duration::days(1)),
    ];
    let report = monitor().sweep(&requests, start());

    let csv = report.to_csv_string().expect("csv renders");
    let lines: Vec<_> = csv.lines().collect();

    assert_eq!(lines[0], CSV_HEADER.join(","));
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("860,FOIL-2023-860-00001,Request 1,open,"));
    assert!(lines[1].ends_with(",overdue"));
    assert!(lines[2].ends_with(",due_soon"));
}

#[test]
fn empty_sweep_still_writes_header() {
    let report = monitor().sweep(&[], start());

    assert!(report.is_empty());
    let csv = report.to_csv_string().expect("csv renders");
    assert_eq!(csv.trim_end(), "agency_code,request_id,title,status,due_date,deadline");
}

#[test]
fn engine_sweeps_stored_requests() {
    let (engine, clock, _) = build_engine();
    submitted(&engine);
    clock.advance(Duration::days(4));

    let report = engine.deadlines().expect("sweep succeeds");
    assert_eq!(report.count(DueState::DueSoon), 1);

    clock.advance(Duration::days(2));
    let report = engine.deadlines().expect("sweep succeeds");
    assert_eq!(report.agencies["860"].acknowledgments_overdue.len(), 1);
}

#[test]
fn huge_due_soon_window_flags_every_open_deadline() {
    let monitor = DeadlineMonitor::new(u32::MAX);
    let later = stored_request(1, agency(), RequestStatus::Open, Duration::days(400));

    assert_eq!(monitor.classify(&later, start()), Some(DueState::DueSoon));
}

#[test]
fn reopened_requests_stay_in_the_request_buckets() {
    let (engine, clock, _) = build_engine();
    let request = submitted(&engine);
    engine
        .apply(command(
            &request.id,
            staff(),
            crate::workflows::requests::Action::Acknowledge(days(10)),
        ))
        .expect("acknowledged");
    engine
        .apply(command(&request.id, staff(), denial(Some("Exempt"))))
        .expect("closed");
    let reopened = engine
        .apply(command(
            &request.id,
            staff(),
            crate::workflows::requests::Action::Reopen(crate::workflows::requests::DueChange {
                due: crate::workflows::requests::DueDateRequest::Days(3),
                reason: Some("Appeal granted".to_string()),
            }),
        ))
        .expect("reopened");
    assert_eq!(reopened.request.status, RequestStatus::Open);
    assert!(reopened.request.was_acknowledged());

    clock.advance(Duration::days(5));
    let report = engine.deadlines().expect("sweep succeeds");
    let digest = &report.agencies["860"];
    assert!(digest.acknowledgments_overdue.is_empty());
    assert_eq!(digest.requests_overdue.len(), 1);

    let fresh = stored_request(9, agency(), RequestStatus::Open, Duration::days(-1));
    assert!(!fresh.was_acknowledged());
}
