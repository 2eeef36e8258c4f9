//! Requester notices for final decisions on chained requests.
//!
//! A notice goes out once per request, after the commit that moved it to
//! `approved` or `rejected`. Approvals carry a printable slip.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::domain::history::{AuditRecord, Decision};
use crate::domain::request::{Request, RequestId, RequestKind, RequestPayload, Stage};
use crate::roles::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeOutcome {
    Approved,
    Rejected,
}

impl NoticeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Text document attached to an approval notice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionDocument {
    pub file_name: String,
    pub body: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionNotice {
    pub request_id: RequestId,
    pub requester_id: String,
    pub kind: RequestKind,
    pub outcome: NoticeOutcome,
    pub decided_by: Role,
    pub remark: Option<String>,
    pub correlation_id: String,
    pub document: Option<DecisionDocument>,
}

impl DecisionNotice {
    /// Builds the notice for a committed record, or `None` when the record did
    /// not finish a chained request.
    pub fn for_transition(
        request: &Request,
        record: &AuditRecord,
        correlation_id: &str,
    ) -> Option<Self> {
        if !request.kind.is_chained() {
            return None;
        }
        let outcome = match (record.decision, record.to_stage) {
            (Decision::Approve, Stage::Approved) => NoticeOutcome::Approved,
            (Decision::Reject, Stage::Rejected) => NoticeOutcome::Rejected,
            _ => return None,
        };

        Some(Self {
            request_id: request.id.clone(),
            requester_id: request.requester.actor_id.clone(),
            kind: request.kind,
            outcome,
            decided_by: record.actor_role,
            remark: record.remark.clone(),
            correlation_id: correlation_id.to_owned(),
            document: (outcome == NoticeOutcome::Approved).then(|| approval_slip(request)),
        })
    }
}

/// Renders the slip a student shows at the gate or office.
pub fn approval_slip(request: &Request) -> DecisionDocument {
    let requester = &request.requester;
    let mut body = String::new();
    let _ = writeln!(body, "{} APPROVAL", request.kind.as_str().to_ascii_uppercase());
    let _ = writeln!(body, "Request: {}", request.id);
    let _ = writeln!(body, "Student: {} ({})", requester.reg_no, requester.department);
    let _ = writeln!(body, "Year: {}", requester.year_of_study);

    match &request.payload {
        RequestPayload::Leave(leave) => {
            let _ = writeln!(body, "Leave: {} to {}", leave.start_date, leave.end_date);
            let _ = writeln!(body, "Reason: {}", leave.reason);
        }
        RequestPayload::Bonafide(bonafide) => {
            let _ = writeln!(body, "Purpose: {}", bonafide.purpose);
        }
        RequestPayload::Outpass(outpass) => {
            let _ = writeln!(body, "Out: {} {}", outpass.out_date, outpass.out_time);
            if let Some(in_date) = outpass.in_date {
                let in_time = outpass.in_time.map(|time| time.to_string()).unwrap_or_default();
                let _ = writeln!(body, "Return: {in_date} {in_time}");
            }
            let _ = writeln!(body, "Purpose: {}", outpass.purpose);
        }
        RequestPayload::Od(od) => {
            let _ = writeln!(body, "On duty: {} to {}", od.from_date, od.to_date);
            if let Some(place) = &od.place {
                let _ = writeln!(body, "Place: {place}");
            }
            let _ = writeln!(body, "Purpose: {}", od.purpose);
        }
        RequestPayload::Complaint(_) => {}
    }

    for record in request.history() {
        let _ = writeln!(
            body,
            "Approved by {} ({}) at {}",
            record.actor_role,
            record.actor_id,
            record.occurred_at.format("%Y-%m-%d %H:%M UTC")
        );
    }

    DecisionDocument { file_name: format!("{}-{}.txt", request.kind.as_str(), request.id), body }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: DecisionNotice);
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    notices: Arc<Mutex<Vec<DecisionNotice>>>,
}

impl InMemoryNotifier {
    pub fn notices(&self) -> Vec<DecisionNotice> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, notice: DecisionNotice) {
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
    }
}

/// Logs notices; stands in until a mail transport is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: DecisionNotice) {
        tracing::info!(
            event_name = "notify.decision.sent",
            correlation_id = %notice.correlation_id,
            request_id = %notice.request_id,
            requester = %notice.requester_id,
            kind = %notice.kind,
            outcome = notice.outcome.as_str(),
            decided_by = %notice.decided_by,
            document = notice.document.as_ref().map(|document| document.file_name.as_str()).unwrap_or("none"),
            "decision notice"
        );
    }
}
