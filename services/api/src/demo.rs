use crate::infra::{log_notification, midday};
use chrono::{Duration, Local, NaiveDate};
use clap::{Args, ValueEnum};
use foil_portal::config::LifecycleConfig;
use foil_portal::error::AppError;
use foil_portal::workflows::requests::{
    Action, ActionCommand, Actor, Agency, Audience, ChannelDispatcher, ClosurePayload,
    ClosureReason, DeadlineMonitor, DeadlineReport, DescriptionPayload, DueChange, DueDateRequest,
    EventPayload, FixedClock, InMemoryRequestStore, LifecycleEngine, LifecycleError, NewRequest,
    NotePayload, RecordAttachment, RecordPrivacy, ReleasePayload, Request, RequestId,
    RequestStore, UserId, Visibility,
};
use std::path::PathBuf;
use std::sync::Arc;

type DemoEngine = LifecycleEngine<InMemoryRequestStore, ChannelDispatcher>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Submission date for the sample request (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) start: Option<NaiveDate>,
    /// Print the agency-internal timeline instead of the public one.
    #[arg(long)]
    pub(crate) internal: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Args, Debug)]
pub(crate) struct DeadlinesArgs {
    /// JSON array of stored requests to sweep. Defaults to a seeded sample portfolio.
    #[arg(long)]
    pub(crate) input: Option<PathBuf>,
    /// Evaluation date for the sweep (defaults to today)
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Output format for the digest
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub(crate) format: OutputFormat,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { start, internal } = args;
    let start = start.unwrap_or_else(|| Local::now().date_naive());
    let clock = Arc::new(FixedClock::new(midday(start)));
    let (dispatcher, mut queue) = ChannelDispatcher::new(64);
    let engine = LifecycleEngine::with_clock(
        Arc::new(InMemoryRequestStore::default()),
        Arc::new(dispatcher),
        LifecycleConfig::default(),
        clock.clone(),
    );

    println!("FOIL request lifecycle demo");
    let request = engine.submit(NewRequest {
        title: "Restaurant inspection reports".to_string(),
        description: "Inspection results for Lower Manhattan restaurants, 2023".to_string(),
        agency: health_agency(),
        assigned_users: vec![UserId("records-officer".to_string())],
        attachments: Vec::new(),
    })?;
    println!(
        "- Submitted {} on {} (acknowledge by {})",
        request.id,
        request.created_at.date_naive(),
        request.due_date.date_naive()
    );

    let staff = Actor::Agency(UserId("records-officer".to_string()));
    let steps = vec![
        Action::Acknowledge(DueChange {
            due: DueDateRequest::Days(20),
            reason: Some("Searching the inspection archive".to_string()),
        }),
        Action::Note(NotePayload {
            text: "Archive search assigned to field office".to_string(),
            visibility: Visibility::AgencyInternal,
        }),
        Action::Extend(DueChange {
            due: DueDateRequest::ExactDate(start + Duration::days(45)),
            reason: Some("Records span multiple boroughs".to_string()),
        }),
        Action::ReleaseRecord(ReleasePayload {
            records: vec![
                RecordAttachment {
                    file_name: "inspections-2023.csv".to_string(),
                    title: "Inspection results 2023".to_string(),
                    privacy: RecordPrivacy::ReleasedAndPublic,
                },
                RecordAttachment {
                    file_name: "complaints.pdf".to_string(),
                    title: "Complainant correspondence".to_string(),
                    privacy: RecordPrivacy::Private,
                },
            ],
        }),
        Action::EditDescription(DescriptionPayload {
            description: "Restaurant inspection results with complainant details withheld"
                .to_string(),
        }),
        Action::Close(ClosurePayload {
            reasons: vec![ClosureReason::FulfilledInPart, ClosureReason::Denied],
            explanation: Some("Complainant identities are exempt from disclosure".to_string()),
        }),
    ];

    for action in steps {
        clock.advance(Duration::days(3));
        let name = action.name();
        match engine.apply(ActionCommand {
            request_id: request.id.clone(),
            actor: staff.clone(),
            expected_revision: None,
            action,
        }) {
            Ok(outcome) => println!(
                "- {} -> status {} | due {} | revision {}",
                name,
                outcome.request.status.label(),
                outcome.request.due_date.date_naive(),
                outcome.request.revision
            ),
            Err(err) => println!("- {} rejected: {}", name, err),
        }
    }

    let rejected = engine.apply(ActionCommand {
        request_id: request.id.clone(),
        actor: staff,
        expected_revision: None,
        action: Action::Extend(DueChange {
            due: DueDateRequest::Days(5),
            reason: None,
        }),
    });
    if let Err(err) = rejected {
        println!("- extend after closing rejected: {}", err);
    }

    let audience = if internal {
        Audience::Agency
    } else {
        Audience::Public
    };
    println!("\nTimeline ({:?} view)", audience);
    for event in engine.timeline(&request.id, audience) {
        let event = event.map_err(|err| LifecycleError::from_store(err, &request.id))?;
        println!(
            "  #{} {} {:?} {}",
            event.id.0,
            event.timestamp.format("%Y-%m-%d %H:%M"),
            event.kind(),
            describe(&event.payload)
        );
    }

    println!("\nNotifications queued:");
    let mut delivered = 0;
    while let Ok(notification) = queue.try_recv() {
        log_notification(&notification);
        println!(
            "  - {} for event #{}",
            notification.template.name(),
            notification.event_id.0
        );
        delivered += 1;
    }
    if delivered == 0 {
        println!("  none");
    }

    let view = engine.get(&request.id)?.view(engine.now());
    match serde_json::to_string_pretty(&view) {
        Ok(json) => println!("\nPublic request view:\n{}", json),
        Err(err) => println!("\nPublic request view unavailable: {}", err),
    }

    Ok(())
}

pub(crate) fn run_deadlines(args: DeadlinesArgs) -> Result<(), AppError> {
    let DeadlinesArgs {
        input,
        today,
        format,
    } = args;
    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let now = midday(today);

    let requests = match input {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            serde_json::from_reader::<_, Vec<Request>>(file).map_err(std::io::Error::from)?
        }
        None => sample_portfolio(today)?,
    };

    let config = LifecycleConfig::default();
    let report = DeadlineMonitor::from_config(&config).sweep(&requests, now);
    match format {
        OutputFormat::Text => render_deadlines(&report, today),
        OutputFormat::Json => match serde_json::to_string_pretty(&report.summary()) {
            Ok(json) => println!("{}", json),
            Err(err) => return Err(AppError::Io(err.into())),
        },
        OutputFormat::Csv => report.write_csv(std::io::stdout())?,
    }
    Ok(())
}

fn render_deadlines(report: &DeadlineReport, today: NaiveDate) {
    println!("Deadline digest for {}", today);
    if report.is_empty() {
        println!("No overdue or due-soon requests.");
        return;
    }

    for digest in report.agencies.values() {
        println!("\n{} ({})", digest.agency.name, digest.agency.code);
        let buckets = [
            ("Acknowledgments overdue", &digest.acknowledgments_overdue),
            ("Requests overdue", &digest.requests_overdue),
            ("Acknowledgments due soon", &digest.acknowledgments_due_soon),
            ("Requests due soon", &digest.requests_due_soon),
        ];
        for (heading, entries) in buckets {
            if entries.is_empty() {
                continue;
            }
            println!("  {}:", heading);
            for entry in entries {
                println!(
                    "    - {} | {} | due {} | {}",
                    entry.request_id,
                    entry.title,
                    entry.due_date.date_naive(),
                    entry.status.label()
                );
            }
        }
    }
}

/// A handful of requests in different states, evaluated relative to `today`.
fn sample_portfolio(today: NaiveDate) -> Result<Vec<Request>, AppError> {
    let clock = Arc::new(FixedClock::new(midday(today - Duration::days(12))));
    let (dispatcher, _queue) = ChannelDispatcher::new(64);
    let engine: DemoEngine = LifecycleEngine::with_clock(
        Arc::new(InMemoryRequestStore::default()),
        Arc::new(dispatcher),
        LifecycleConfig::default(),
        clock.clone(),
    );
    let staff = Actor::Agency(UserId("records-officer".to_string()));

    let titles = [
        ("Sidewalk repair permits", health_agency()),
        ("Noise complaint logs", health_agency()),
        ("Tree removal work orders", parks_agency()),
        ("Pool inspection schedules", parks_agency()),
    ];
    let mut ids: Vec<RequestId> = Vec::new();
    for (title, agency) in titles {
        let request = engine.submit(NewRequest {
            title: title.to_string(),
            description: String::new(),
            agency,
            assigned_users: Vec::new(),
            attachments: Vec::new(),
        })?;
        ids.push(request.id);
    }

    // Second request: acknowledged and due tomorrow.
    engine.apply(ActionCommand {
        request_id: ids[1].clone(),
        actor: staff.clone(),
        expected_revision: None,
        action: Action::Acknowledge(DueChange {
            due: DueDateRequest::Days(13),
            reason: None,
        }),
    })?;
    // Fourth request: acknowledged far out, so the sweep leaves it alone.
    engine.apply(ActionCommand {
        request_id: ids[3].clone(),
        actor: staff,
        expected_revision: None,
        action: Action::Acknowledge(DueChange {
            due: DueDateRequest::Days(30),
            reason: None,
        }),
    })?;

    engine
        .repository()
        .all()
        .map_err(|err| AppError::Lifecycle(LifecycleError::Store(err)))
}

fn health_agency() -> Agency {
    Agency {
        code: "816".to_string(),
        name: "Department of Health and Mental Hygiene".to_string(),
    }
}

fn parks_agency() -> Agency {
    Agency {
        code: "846".to_string(),
        name: "Department of Parks and Recreation".to_string(),
    }
}

fn describe(payload: &EventPayload) -> String {
    match payload {
        EventPayload::Note { text } => text.clone(),
        EventPayload::Extension { due_date, reason, .. } => format!(
            "due {}{}",
            due_date.date_naive(),
            reason
                .as_deref()
                .map(|reason| format!(" ({reason})"))
                .unwrap_or_default()
        ),
        EventPayload::Acknowledgement { due_date, .. } => format!("due {}", due_date.date_naive()),
        EventPayload::Closure { reasons, .. } => format!("reasons {:?}", reasons),
        EventPayload::RecordRelease { records } => format!("{} file(s)", records.len()),
        EventPayload::DescriptionEdit { .. } => "agency description updated".to_string(),
        EventPayload::HelperAdded { user_id, .. } => format!("added {}", user_id.0),
        EventPayload::Reopened { reason, .. } => reason.clone(),
    }
}
