use std::path::Path;

use campusflow_core::config::{AppConfig, LoadOptions};
use campusflow_db::{connect_with_settings, is_in_memory};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_attachment_directory(&config.attachments.directory));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["attachment_directory", "database_connectivity", "schema_applied"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// The store creates the directory lazily, so a missing one is fine as long
/// as the path is not occupied by a file.
fn check_attachment_directory(directory: &Path) -> DoctorCheck {
    let (status, details) = if directory.is_dir() {
        (CheckStatus::Pass, format!("`{}` exists", directory.display()))
    } else if directory.exists() {
        (CheckStatus::Fail, format!("`{}` exists but is not a directory", directory.display()))
    } else {
        (CheckStatus::Pass, format!("`{}` will be created on first upload", directory.display()))
    };
    DoctorCheck { name: "attachment_directory", status, details }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped_schema("skipped because the runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped_schema("skipped because the database is unreachable"),
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };

        let schema = if is_in_memory(&config.database.url) {
            DoctorCheck {
                name: "schema_applied",
                status: CheckStatus::Pass,
                details: "in-memory database is migrated at startup".to_string(),
            }
        } else {
            let found: Result<i64, _> = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
                 AND name IN ('identity', 'request', 'request_audit', 'attachment')",
            )
            .fetch_one(&pool)
            .await;
            match found {
                Ok(4) => DoctorCheck {
                    name: "schema_applied",
                    status: CheckStatus::Pass,
                    details: "lifecycle tables present".to_string(),
                },
                Ok(count) => DoctorCheck {
                    name: "schema_applied",
                    status: CheckStatus::Fail,
                    details: format!("{count}/4 lifecycle tables present; run `campusflow migrate`"),
                },
                Err(error) => DoctorCheck {
                    name: "schema_applied",
                    status: CheckStatus::Fail,
                    details: format!("schema lookup failed: {error}"),
                },
            }
        };

        pool.close().await;
        vec![connectivity, schema]
    })
}

fn skipped_schema(details: &str) -> DoctorCheck {
    DoctorCheck { name: "schema_applied", status: CheckStatus::Skipped, details: details.to_string() }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
