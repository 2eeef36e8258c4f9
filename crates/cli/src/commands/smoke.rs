use std::sync::Arc;
use std::time::Instant;

use campusflow_core::audit::InMemoryAuditSink;
use campusflow_core::config::{AppConfig, LoadOptions};
use campusflow_core::domain::history::ReviewDecision;
use campusflow_core::domain::request::{OutpassPayload, RequestPayload, Stage};
use campusflow_core::notify::{InMemoryNotifier, NoticeOutcome};
use campusflow_core::roles::{Actor, RoleResolver};
use campusflow_core::validation::SubmissionValidator;
use campusflow_db::repositories::{IdentityRepository, SqlIdentityRepository, SqlRequestRepository};
use campusflow_db::{
    connect_with_settings, migrations, AttachmentPolicy, DbPool, FsAttachmentStore,
    LifecycleService, RequestContext, SeedDataset,
};
use chrono::{Duration, NaiveTime, Utc};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("outpass_walkthrough"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("outpass_walkthrough"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async {
        connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
    });

    let pool = match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_since(db_started),
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_since(db_started),
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("outpass_walkthrough"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let migration_started = Instant::now();
    match runtime.block_on(async { migrations::run_pending(&pool).await }) {
        Ok(()) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: elapsed_since(migration_started),
            message: "migrations are visible and executable".to_string(),
        }),
        Err(error) => {
            checks.push(SmokeCheck {
                name: "migration_visibility",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_since(migration_started),
                message: format!("migration execution failed: {error}"),
            });
            checks.push(skipped("outpass_walkthrough"));
            runtime.block_on(async { pool.close().await });
            return finalize_report(checks, elapsed_since(started));
        }
    }

    let walkthrough_started = Instant::now();
    let walkthrough = runtime.block_on(outpass_walkthrough(&config, &pool));
    runtime.block_on(async { pool.close().await });
    checks.push(SmokeCheck {
        name: "outpass_walkthrough",
        status: if walkthrough.is_ok() { SmokeStatus::Pass } else { SmokeStatus::Fail },
        elapsed_ms: elapsed_since(walkthrough_started),
        message: walkthrough.unwrap_or_else(|error| error),
    });

    finalize_report(checks, elapsed_since(started))
}

/// Hosteler outpass: advisor and HOD approve, warden rejects. Ending rejected
/// keeps the request out of later overlap checks, so the walk can be repeated.
async fn outpass_walkthrough(config: &AppConfig, pool: &DbPool) -> Result<String, String> {
    let identities = SqlIdentityRepository::new(pool.clone());
    SeedDataset::load(&identities).await.map_err(|error| format!("seeding identities: {error}"))?;

    let resolver = RoleResolver::new(config.auth.allowed_email_domain.clone());
    let student = resolve(&identities, &resolver, SeedDataset::HOSTELER).await?;
    let advisor = resolve(&identities, &resolver, SeedDataset::ADVISOR).await?;
    let hod = resolve(&identities, &resolver, SeedDataset::HOD).await?;
    let warden = resolve(&identities, &resolver, SeedDataset::WARDEN).await?;

    let audit = Arc::new(InMemoryAuditSink::default());
    let notices = InMemoryNotifier::default();
    let lifecycle = LifecycleService::new(
        Arc::new(SqlRequestRepository::new(pool.clone())),
        Arc::new(FsAttachmentStore::new(
            pool.clone(),
            config.attachments.directory.clone(),
            AttachmentPolicy::from_config(&config.attachments),
        )),
        SubmissionValidator::new(config.eligibility.clone()),
        audit.clone(),
    )
    .with_notifier(Arc::new(notices.clone()));

    let ctx = RequestContext::new(format!("smoke-{}", Utc::now().timestamp_millis()));
    let submission = lifecycle
        .submit(&student, smoke_outpass(ctx.today), &ctx)
        .await
        .map_err(|error| format!("submit: {error}"))?;
    let request_id = submission.request.id.clone();

    for (reviewer, decision) in [
        (&advisor, ReviewDecision::Approve),
        (&hod, ReviewDecision::Approve),
        (&warden, ReviewDecision::Reject),
    ] {
        lifecycle
            .transition(&request_id, reviewer, decision, Some("smoke check"), &ctx)
            .await
            .map_err(|error| format!("{} {}: {error}", reviewer.role(), decision_label(decision)))?;
    }

    let stored = lifecycle.get(&request_id, &student).await.map_err(|error| error.to_string())?;
    if stored.stage() != Stage::Rejected || stored.history().len() != 3 {
        return Err(format!(
            "request {request_id} ended at {} with {} history records",
            stored.stage(),
            stored.history().len()
        ));
    }

    let notified = notices.notices();
    if notified.len() != 1 || notified[0].outcome != NoticeOutcome::Rejected {
        return Err(format!(
            "request {request_id} produced {} decision notices, expected one rejection",
            notified.len()
        ));
    }

    Ok(format!(
        "request {request_id} walked advisor -> hod -> warden and ended rejected ({} audit events, 1 notice)",
        audit.events().len()
    ))
}

async fn resolve(
    identities: &SqlIdentityRepository,
    resolver: &RoleResolver,
    actor_id: &str,
) -> Result<Actor, String> {
    let identity = identities
        .find_by_actor_id(actor_id)
        .await
        .map_err(|error| format!("loading `{actor_id}`: {error}"))?
        .ok_or_else(|| format!("seed identity `{actor_id}` missing"))?;
    resolver.resolve(&identity).map_err(|error| error.to_string())
}

fn smoke_outpass(today: chrono::NaiveDate) -> RequestPayload {
    RequestPayload::Outpass(OutpassPayload {
        out_date: today + Duration::days(1),
        out_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        purpose: "smoke check home visit".to_string(),
        contact_number: "9876543210".to_string(),
        parent_mobile: "9123456780".to_string(),
        in_date: Some(today + Duration::days(2)),
        in_time: NaiveTime::from_hms_opt(19, 0, 0),
        hostel_id: Some(1),
        floor_id: Some(1),
        room_no: Some("101".to_string()),
    })
}

fn decision_label(decision: ReviewDecision) -> &'static str {
    match decision {
        ReviewDecision::Approve => "approve",
        ReviewDecision::Reject => "reject",
    }
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
