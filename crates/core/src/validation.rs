use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::request::{
    BonafideCategory, BonafidePayload, ComplaintPayload, LeaveCategory, LeavePayload, OdPayload,
    OutpassPayload, Request, RequestKind, RequestPayload, RequestStatus, Requester,
    ResidenceType,
};
use crate::errors::ValidationError;

pub const MAX_LEAVE_DAYS: i64 = 30;
pub const MAX_SHORT_LEAVE_DAYS: i64 = 2;
pub const MAX_COMPLAINT_ATTACHMENTS: usize = 1;

/// Which students may submit at all. Empty department list means any department.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityPolicy {
    pub departments: Vec<String>,
    pub years_of_study: Vec<u8>,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self { departments: Vec::new(), years_of_study: vec![2, 3, 4] }
    }
}

impl EligibilityPolicy {
    pub fn admits(&self, requester: &Requester) -> bool {
        let department_ok = self.departments.is_empty()
            || self
                .departments
                .iter()
                .any(|department| department.eq_ignore_ascii_case(requester.department.trim()));
        let year_ok = self.years_of_study.is_empty()
            || self.years_of_study.contains(&requester.year_of_study);
        department_ok && year_ok
    }
}

/// Facts derived while validating, returned to the submitter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSummary {
    pub days: Option<i64>,
    pub leave_required: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SubmissionValidator {
    eligibility: EligibilityPolicy,
}

impl SubmissionValidator {
    pub fn new(eligibility: EligibilityPolicy) -> Self {
        Self { eligibility }
    }

    /// Checks a payload against type rules and the requester's own active
    /// requests. `today` is supplied by the caller.
    pub fn validate(
        &self,
        requester: &Requester,
        payload: &RequestPayload,
        existing: &[Request],
        today: NaiveDate,
    ) -> Result<SubmissionSummary, ValidationError> {
        let mut errors = ValidationError::default();
        if payload.kind().is_chained() && !self.eligibility.admits(requester) {
            errors.push(
                "requester",
                format!(
                    "{} year {} students are not eligible to submit requests",
                    requester.department, requester.year_of_study
                ),
            );
        }

        let summary = match payload {
            RequestPayload::Leave(leave) => {
                check_leave(leave, existing, today, &mut errors);
                SubmissionSummary {
                    days: Some((leave.end_date - leave.start_date).num_days() + 1),
                    leave_required: false,
                }
            }
            RequestPayload::Bonafide(bonafide) => {
                check_bonafide(bonafide, &mut errors);
                SubmissionSummary::default()
            }
            RequestPayload::Outpass(outpass) => {
                check_outpass(outpass, requester.residence_type, existing, &mut errors);
                let days = outpass.days();
                SubmissionSummary {
                    days: Some(days),
                    leave_required: requester.residence_type == ResidenceType::Hosteler && days > 1,
                }
            }
            RequestPayload::Od(od) => {
                check_od(od, &mut errors);
                SubmissionSummary {
                    days: Some((od.to_date - od.from_date).num_days() + 1),
                    leave_required: false,
                }
            }
            RequestPayload::Complaint(complaint) => {
                check_complaint(complaint, &mut errors);
                SubmissionSummary::default()
            }
        };

        errors.into_result().map(|()| summary)
    }
}

fn require_text(field: &str, value: &str, errors: &mut ValidationError) {
    if value.trim().is_empty() {
        errors.push(field, "is required");
    }
}

fn ranges_overlap(a: (NaiveDate, NaiveDate), b: (NaiveDate, NaiveDate)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

fn is_active(request: &Request) -> bool {
    matches!(request.status(), RequestStatus::Pending | RequestStatus::Approved)
}

fn check_leave(
    leave: &LeavePayload,
    existing: &[Request],
    today: NaiveDate,
    errors: &mut ValidationError,
) {
    require_text("reason", &leave.reason, errors);

    if leave.end_date < leave.start_date {
        errors.push("end_date", "must not be before start_date");
        return;
    }

    let days = (leave.end_date - leave.start_date).num_days() + 1;
    if days > MAX_LEAVE_DAYS {
        errors.push("end_date", format!("leave cannot exceed {MAX_LEAVE_DAYS} days"));
    }
    match leave.category {
        LeaveCategory::Short if days > MAX_SHORT_LEAVE_DAYS => {
            errors.push("category", format!("short leave cannot exceed {MAX_SHORT_LEAVE_DAYS} days"));
        }
        LeaveCategory::Long if leave.start_date <= today => {
            errors.push("start_date", "long leave must start after today");
        }
        LeaveCategory::Emergency if leave.start_date != today => {
            errors.push("start_date", "emergency leave must start today");
        }
        _ => {}
    }

    let requested = (leave.start_date, leave.end_date);
    let clashes = existing.iter().filter(|request| is_active(request)).any(|request| {
        match &request.payload {
            RequestPayload::Leave(other) => {
                ranges_overlap(requested, (other.start_date, other.end_date))
            }
            _ => false,
        }
    });
    if clashes {
        errors.push("dates", "overlaps an existing pending or approved leave");
    }
}

fn check_bonafide(bonafide: &BonafidePayload, errors: &mut ValidationError) {
    require_text("purpose", &bonafide.purpose, errors);

    if bonafide.category == BonafideCategory::Internship {
        match (bonafide.internship_start, bonafide.internship_end) {
            (Some(start), Some(end)) if end < start => {
                errors.push("internship_end", "must not be before internship_start");
            }
            (Some(_), Some(_)) => {}
            (start, end) => {
                if start.is_none() {
                    errors.push("internship_start", "is required for internship certificates");
                }
                if end.is_none() {
                    errors.push("internship_end", "is required for internship certificates");
                }
            }
        }
    }
}

fn is_mobile_number(value: &str) -> bool {
    value.len() == 10 && value.chars().all(|ch| ch.is_ascii_digit())
}

fn check_outpass(
    outpass: &OutpassPayload,
    residence: ResidenceType,
    existing: &[Request],
    errors: &mut ValidationError,
) {
    require_text("purpose", &outpass.purpose, errors);
    require_text("contact_number", &outpass.contact_number, errors);
    if !is_mobile_number(outpass.parent_mobile.trim()) {
        errors.push("parent_mobile", "must be exactly 10 digits");
    }

    let room_missing = outpass.room_no.as_deref().map(str::trim).map_or(true, str::is_empty);
    match residence {
        ResidenceType::Hosteler => {
            if outpass.in_date.is_none() {
                errors.push("in_date", "is required for hostelers");
            }
            if outpass.in_time.is_none() {
                errors.push("in_time", "is required for hostelers");
            }
            if outpass.hostel_id.is_none() {
                errors.push("hostel_id", "is required for hostelers");
            }
            if outpass.floor_id.is_none() {
                errors.push("floor_id", "is required for hostelers");
            }
            if room_missing {
                errors.push("room_no", "is required for hostelers");
            }
        }
        ResidenceType::DayScholar => {
            let sent_hostel_fields = outpass.in_date.is_some()
                || outpass.in_time.is_some()
                || outpass.hostel_id.is_some()
                || outpass.floor_id.is_some()
                || !room_missing;
            if sent_hostel_fields {
                errors.push("hostel", "day scholars must not send hostel return details");
            }
        }
    }

    if let Some(in_date) = outpass.in_date {
        if in_date < outpass.out_date {
            errors.push("in_date", "must not be before out_date");
            return;
        }
    }

    let requested = (outpass.out_date, outpass.in_date.unwrap_or(outpass.out_date));
    let clashes = existing.iter().filter(|request| is_active(request)).any(|request| {
        match &request.payload {
            RequestPayload::Outpass(other) => ranges_overlap(
                requested,
                (other.out_date, other.in_date.unwrap_or(other.out_date)),
            ),
            _ => false,
        }
    });
    if clashes {
        errors.push("dates", "overlaps an existing pending or approved outpass");
    }
}

fn check_od(od: &OdPayload, errors: &mut ValidationError) {
    require_text("purpose", &od.purpose, errors);

    if od.to_date < od.from_date {
        errors.push("to_date", "must not be before from_date");
    }
    if let (Some(start), Some(end)) = (od.start_time, od.end_time) {
        if start >= end {
            errors.push("end_time", "must be after start_time");
        }
    }
    if od.proof_attachments.len() != 1 {
        errors.push(
            "proof_attachments",
            format!("exactly one proof document is required, got {}", od.proof_attachments.len()),
        );
    }
}

fn check_complaint(complaint: &ComplaintPayload, errors: &mut ValidationError) {
    require_text("text", &complaint.text, errors);
    if complaint.attachments.len() > MAX_COMPLAINT_ATTACHMENTS {
        errors.push(
            "attachments",
            format!("at most {MAX_COMPLAINT_ATTACHMENTS} attachment may accompany a complaint"),
        );
    }
}

/// Kinds whose active requests feed overlap checks.
pub fn overlap_checked(kind: RequestKind) -> bool {
    matches!(kind, RequestKind::Leave | RequestKind::Outpass)
}
