use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::Stage;
use crate::roles::Role;

/// Reviewer input to a chain transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Decision as recorded in request history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    StartProgress,
    Resolve,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::StartProgress => "start_progress",
            Self::Resolve => "resolve",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "start_progress" => Some(Self::StartProgress),
            "resolve" => Some(Self::Resolve),
            _ => None,
        }
    }
}

impl From<ReviewDecision> for Decision {
    fn from(value: ReviewDecision) -> Self {
        match value {
            ReviewDecision::Approve => Self::Approve,
            ReviewDecision::Reject => Self::Reject,
        }
    }
}

/// One entry of a request's append-only history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u32,
    pub actor_role: Role,
    pub actor_id: String,
    pub decision: Decision,
    pub remark: Option<String>,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub occurred_at: DateTime<Utc>,
}

/// Trims a reviewer remark, dropping it entirely when blank.
pub fn normalize_remark(remark: Option<&str>) -> Option<String> {
    remark.map(str::trim).filter(|value| !value.is_empty()).map(str::to_owned)
}
