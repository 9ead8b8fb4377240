use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::domain::{add_days, end_of_day, Agency, Request, RequestId, RequestStatus};
use crate::config::LifecycleConfig;

/// Where a request stands relative to its due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DueState {
    OnTrack,
    DueSoon,
    Overdue,
}

impl DueState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::OnTrack => "On Track",
            Self::DueSoon => "Due Soon",
            Self::Overdue => "Overdue",
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::OnTrack => "on_track",
            Self::DueSoon => "due_soon",
            Self::Overdue => "overdue",
        }
    }
}

/// Classifies open requests against their due dates and groups them per agency.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineMonitor {
    due_soon_days: u32,
}

impl DeadlineMonitor {
    pub fn new(due_soon_days: u32) -> Self {
        Self { due_soon_days }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(config.due_soon_days)
    }

    /// `None` for closed requests; they no longer have a deadline.
    pub fn classify(&self, request: &Request, now: DateTime<Utc>) -> Option<DueState> {
        if request.status == RequestStatus::Closed {
            return None;
        }
        if request.due_date < now {
            return Some(DueState::Overdue);
        }

        // A window past the end of the calendar covers every future due date.
        let within_window = add_days(now, self.due_soon_days)
            .map_or(true, |horizon| request.due_date <= end_of_day(horizon.date_naive()));
        if request.due_date > now && within_window {
            Some(DueState::DueSoon)
        } else {
            Some(DueState::OnTrack)
        }
    }

    pub fn sweep(&self, requests: &[Request], now: DateTime<Utc>) -> DeadlineReport {
        let mut report = DeadlineReport {
            generated_at: now,
            agencies: BTreeMap::new(),
        };

        for request in requests {
            let state = match self.classify(request, now) {
                Some(state @ (DueState::Overdue | DueState::DueSoon)) => state,
                _ => continue,
            };

            let digest = report
                .agencies
                .entry(request.agency.code.clone())
                .or_insert_with(|| AgencyDigest::new(&request.agency));
            let entry = DeadlineEntry::from_request(request, state);
            match (state, request.was_acknowledged()) {
                (DueState::Overdue, false) => digest.acknowledgments_overdue.push(entry),
                (DueState::Overdue, true) => digest.requests_overdue.push(entry),
                (_, false) => digest.acknowledgments_due_soon.push(entry),
                (_, true) => digest.requests_due_soon.push(entry),
            }
        }

        for digest in report.agencies.values_mut() {
            digest.sort();
        }

        debug!(
            agencies = report.agencies.len(),
            overdue = report.count(DueState::Overdue),
            due_soon = report.count(DueState::DueSoon),
            "deadline sweep complete"
        );
        report
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineEntry {
    pub request_id: RequestId,
    pub title: String,
    pub status: RequestStatus,
    pub due_date: DateTime<Utc>,
    pub state: DueState,
}

impl DeadlineEntry {
    fn from_request(request: &Request, state: DueState) -> Self {
        Self {
            request_id: request.id.clone(),
            title: request.title.clone(),
            status: request.status,
            due_date: request.due_date,
            state,
        }
    }

    pub fn to_view(&self) -> DeadlineEntryView {
        DeadlineEntryView {
            request_id: self.request_id.clone(),
            title: self.title.clone(),
            status: self.status,
            status_label: self.status.label(),
            due_date: self.due_date,
            deadline: self.state,
            deadline_label: self.state.label(),
        }
    }
}

/// Requests needing attention at one agency, split the way the nightly reminder emails are.
#[derive(Debug, Clone, PartialEq)]
pub struct AgencyDigest {
    pub agency: Agency,
    /// Still `Open`: the acknowledgment itself is late.
    pub acknowledgments_overdue: Vec<DeadlineEntry>,
    pub requests_overdue: Vec<DeadlineEntry>,
    pub acknowledgments_due_soon: Vec<DeadlineEntry>,
    pub requests_due_soon: Vec<DeadlineEntry>,
}

impl AgencyDigest {
    fn new(agency: &Agency) -> Self {
        Self {
            agency: agency.clone(),
            acknowledgments_overdue: Vec::new(),
            requests_overdue: Vec::new(),
            acknowledgments_due_soon: Vec::new(),
            requests_due_soon: Vec::new(),
        }
    }

    fn sort(&mut self) {
        for bucket in [
            &mut self.acknowledgments_overdue,
            &mut self.requests_overdue,
            &mut self.acknowledgments_due_soon,
            &mut self.requests_due_soon,
        ] {
            bucket.sort_by(|a, b| {
                a.due_date
                    .cmp(&b.due_date)
                    .then_with(|| a.request_id.cmp(&b.request_id))
            });
        }
    }

    /// Every entry, overdue buckets first.
    pub fn entries(&self) -> impl Iterator<Item = &DeadlineEntry> {
        self.acknowledgments_overdue
            .iter()
            .chain(&self.requests_overdue)
            .chain(&self.acknowledgments_due_soon)
            .chain(&self.requests_due_soon)
    }

    fn to_view(&self) -> AgencyDigestView {
        let views = |bucket: &[DeadlineEntry]| -> Vec<DeadlineEntryView> {
            bucket.iter().map(DeadlineEntry::to_view).collect()
        };
        AgencyDigestView {
            agency_code: self.agency.code.clone(),
            agency_name: self.agency.name.clone(),
            acknowledgments_overdue: views(&self.acknowledgments_overdue),
            requests_overdue: views(&self.requests_overdue),
            acknowledgments_due_soon: views(&self.acknowledgments_due_soon),
            requests_due_soon: views(&self.requests_due_soon),
        }
    }
}

/// Result of one sweep, keyed by agency code.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineReport {
    pub generated_at: DateTime<Utc>,
    pub agencies: BTreeMap<String, AgencyDigest>,
}

impl DeadlineReport {
    pub fn is_empty(&self) -> bool {
        self.agencies.is_empty()
    }

    pub fn count(&self, state: DueState) -> usize {
        self.agencies
            .values()
            .flat_map(AgencyDigest::entries)
            .filter(|entry| entry.state == state)
            .count()
    }

    pub fn summary(&self) -> DeadlineReportSummary {
        DeadlineReportSummary {
            generated_at: self.generated_at,
            overdue: self.count(DueState::Overdue),
            due_soon: self.count(DueState::DueSoon),
            agencies: self.agencies.values().map(AgencyDigest::to_view).collect(),
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for digest in self.agencies.values() {
            for entry in digest.entries() {
                csv_writer.serialize(CsvRow {
                    agency_code: &digest.agency.code,
                    request_id: &entry.request_id.0,
                    title: &entry.title,
                    status: entry.status.label(),
                    due_date: entry.due_date.to_rfc3339(),
                    deadline: entry.state.code(),
                })?;
            }
        }
        // The header comes from the first serialized row, so an empty report writes it by hand.
        if self.is_empty() {
            csv_writer.write_record(CSV_HEADER)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, csv::Error> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

pub const CSV_HEADER: [&str; 6] = [
    "agency_code",
    "request_id",
    "title",
    "status",
    "due_date",
    "deadline",
];

#[derive(Serialize)]
struct CsvRow<'a> {
    agency_code: &'a str,
    request_id: &'a str,
    title: &'a str,
    status: &'static str,
    due_date: String,
    deadline: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadlineEntryView {
    pub request_id: RequestId,
    pub title: String,
    pub status: RequestStatus,
    pub status_label: &'static str,
    pub due_date: DateTime<Utc>,
    pub deadline: DueState,
    pub deadline_label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgencyDigestView {
    pub agency_code: String,
    pub agency_name: String,
    pub acknowledgments_overdue: Vec<DeadlineEntryView>,
    pub requests_overdue: Vec<DeadlineEntryView>,
    pub acknowledgments_due_soon: Vec<DeadlineEntryView>,
    pub requests_due_soon: Vec<DeadlineEntryView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadlineReportSummary {
    pub generated_at: DateTime<Utc>,
    pub overdue: usize,
    pub due_soon: usize,
    pub agencies: Vec<AgencyDigestView>,
}
