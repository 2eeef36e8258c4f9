use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::complaints::ComplaintCategory;
use crate::domain::history::AuditRecord;
use crate::roles::{ReviewerRole, Role};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("REQ-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Leave,
    Bonafide,
    Outpass,
    Od,
    Complaint,
}

impl RequestKind {
    pub const ALL: [RequestKind; 5] =
        [Self::Leave, Self::Bonafide, Self::Outpass, Self::Od, Self::Complaint];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leave => "leave",
            Self::Bonafide => "bonafide",
            Self::Outpass => "outpass",
            Self::Od => "od",
            Self::Complaint => "complaint",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "leave" => Some(Self::Leave),
            "bonafide" => Some(Self::Bonafide),
            "outpass" => Some(Self::Outpass),
            "od" => Some(Self::Od),
            "complaint" => Some(Self::Complaint),
            _ => None,
        }
    }

    /// Complaints follow their own open/in-progress/resolved lifecycle.
    pub fn is_chained(&self) -> bool {
        !matches!(self, Self::Complaint)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidenceType {
    Hosteler,
    DayScholar,
}

impl ResidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hosteler => "hosteler",
            Self::DayScholar => "day_scholar",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "hosteler" | "hosteller" | "hostel" => Some(Self::Hosteler),
            "day_scholar" | "dayscholar" => Some(Self::DayScholar),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PendingAdvisor,
    PendingHod,
    PendingWarden,
    Approved,
    Rejected,
    Open,
    InProgress,
    Resolved,
}

impl Stage {
    pub fn awaiting(role: ReviewerRole) -> Self {
        match role {
            ReviewerRole::Advisor => Self::PendingAdvisor,
            ReviewerRole::Hod => Self::PendingHod,
            ReviewerRole::Warden => Self::PendingWarden,
        }
    }

    pub fn awaited_reviewer(&self) -> Option<ReviewerRole> {
        match self {
            Self::PendingAdvisor => Some(ReviewerRole::Advisor),
            Self::PendingHod => Some(ReviewerRole::Hod),
            Self::PendingWarden => Some(ReviewerRole::Warden),
            _ => None,
        }
    }

    /// The role that must act next, `None` once the request is terminal.
    pub fn required_role(&self) -> Option<Role> {
        match self {
            Self::Open | Self::InProgress => Some(Role::DeptIncharge),
            other => other.awaited_reviewer().map(Role::from),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Resolved)
    }

    pub fn status(&self) -> RequestStatus {
        match self {
            Self::PendingAdvisor | Self::PendingHod | Self::PendingWarden => RequestStatus::Pending,
            Self::Approved => RequestStatus::Approved,
            Self::Rejected => RequestStatus::Rejected,
            Self::Open => RequestStatus::Open,
            Self::InProgress => RequestStatus::InProgress,
            Self::Resolved => RequestStatus::Resolved,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingAdvisor => "pending_advisor",
            Self::PendingHod => "pending_hod",
            Self::PendingWarden => "pending_warden",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_advisor" => Some(Self::PendingAdvisor),
            "pending_hod" => Some(Self::PendingHod),
            "pending_warden" => Some(Self::PendingWarden),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display value derived from [`Stage`]; never stored on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Open,
    InProgress,
    Resolved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Open,
    InProgress,
    Resolved,
}

impl ComplaintStatus {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Open => Stage::Open,
            Self::InProgress => Stage::InProgress,
            Self::Resolved => Stage::Resolved,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub actor_id: String,
    pub reg_no: String,
    pub department: String,
    #[serde(default)]
    pub section: Option<String>,
    pub year_of_study: u8,
    pub residence_type: ResidenceType,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentRef(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveCategory {
    Short,
    Long,
    Emergency,
    Others,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavePayload {
    pub category: LeaveCategory,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BonafideCategory {
    Internship,
    General,
    EducationalLoan,
    Scholarship,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonafidePayload {
    pub category: BonafideCategory,
    pub purpose: String,
    #[serde(default)]
    pub internship_start: Option<NaiveDate>,
    #[serde(default)]
    pub internship_end: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutpassPayload {
    pub out_date: NaiveDate,
    pub out_time: NaiveTime,
    pub purpose: String,
    pub contact_number: String,
    pub parent_mobile: String,
    #[serde(default)]
    pub in_date: Option<NaiveDate>,
    #[serde(default)]
    pub in_time: Option<NaiveTime>,
    #[serde(default)]
    pub hostel_id: Option<u32>,
    #[serde(default)]
    pub floor_id: Option<u32>,
    #[serde(default)]
    pub room_no: Option<String>,
}

impl OutpassPayload {
    /// Inclusive day span; a same-day outpass counts as one day.
    pub fn days(&self) -> i64 {
        match self.in_date {
            Some(in_date) => (in_date - self.out_date).num_days() + 1,
            None => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdPayload {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    pub purpose: String,
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub proof_attachments: Vec<AttachmentRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplaintPayload {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestPayload {
    Leave(LeavePayload),
    Bonafide(BonafidePayload),
    Outpass(OutpassPayload),
    Od(OdPayload),
    Complaint(ComplaintPayload),
}

impl RequestPayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Leave(_) => RequestKind::Leave,
            Self::Bonafide(_) => RequestKind::Bonafide,
            Self::Outpass(_) => RequestKind::Outpass,
            Self::Od(_) => RequestKind::Od,
            Self::Complaint(_) => RequestKind::Complaint,
        }
    }

    pub fn attachments(&self) -> &[AttachmentRef] {
        match self {
            Self::Od(od) => &od.proof_attachments,
            Self::Complaint(complaint) => &complaint.attachments,
            _ => &[],
        }
    }

    /// Hostel floor a hosteler outpass leaves from.
    pub fn hostel_floor(&self) -> Option<u32> {
        match self {
            Self::Outpass(outpass) => outpass.floor_id,
            _ => None,
        }
    }
}

/// Canonical request shape emitted at the engine boundary.
///
/// `stage`, `history` and `version` are only mutated by
/// [`crate::chain::ApprovalEngine`]; storage adapters rebuild requests through
/// [`Request::rehydrate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Request {
    pub id: RequestId,
    pub kind: RequestKind,
    pub requester: Requester,
    pub payload: RequestPayload,
    pub chain: Vec<ReviewerRole>,
    pub complaint_category: Option<ComplaintCategory>,
    stage: Stage,
    status: RequestStatus,
    history: Vec<AuditRecord>,
    version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field-by-field image of a persisted request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRequest {
    pub id: RequestId,
    pub requester: Requester,
    pub payload: RequestPayload,
    pub chain: Vec<ReviewerRole>,
    pub complaint_category: Option<ComplaintCategory>,
    pub stage: Stage,
    pub history: Vec<AuditRecord>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub(crate) fn open(
        id: RequestId,
        requester: Requester,
        payload: RequestPayload,
        chain: Vec<ReviewerRole>,
        complaint_category: Option<ComplaintCategory>,
        stage: Stage,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind: payload.kind(),
            requester,
            payload,
            chain,
            complaint_category,
            stage,
            status: stage.status(),
            history: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn rehydrate(stored: StoredRequest) -> Self {
        let mut history = stored.history;
        history.sort_by_key(|record| record.sequence);
        Self {
            id: stored.id,
            kind: stored.payload.kind(),
            requester: stored.requester,
            payload: stored.payload,
            chain: stored.chain,
            complaint_category: stored.complaint_category,
            stage: stored.stage,
            status: stored.stage.status(),
            history,
            version: stored.version,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }

    pub(crate) fn apply(&mut self, record: AuditRecord) {
        self.stage = record.to_stage;
        self.status = record.to_stage.status();
        self.updated_at = record.occurred_at;
        self.version = self.version.saturating_add(1);
        self.history.push(record);
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn history(&self) -> &[AuditRecord] {
        &self.history
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn required_role(&self) -> Option<Role> {
        self.stage.required_role()
    }

    pub fn next_sequence(&self) -> u32 {
        self.history.last().map(|record| record.sequence + 1).unwrap_or(1)
    }

    pub fn last_action_by(&self, actor_id: &str) -> Option<DateTime<Utc>> {
        self.history
            .iter()
            .filter(|record| record.actor_id == actor_id)
            .map(|record| record.occurred_at)
            .max()
    }

    pub fn involves(&self, role: Role) -> bool {
        match role {
            Role::Student => true,
            Role::DeptIncharge => self.kind == RequestKind::Complaint,
            reviewer => self.chain.iter().any(|stage_role| Role::from(*stage_role) == reviewer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RequestKind, ResidenceType, Stage};
    use crate::roles::{ReviewerRole, Role};

    #[test]
    fn stage_round_trips_from_storage_encoding() {
        let stages = [
            Stage::PendingAdvisor,
            Stage::PendingHod,
            Stage::PendingWarden,
            Stage::Approved,
            Stage::Rejected,
            Stage::Open,
            Stage::InProgress,
            Stage::Resolved,
        ];

        for stage in stages {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn required_role_follows_stage() {
        assert_eq!(Stage::PendingHod.required_role(), Some(Role::Hod));
        assert_eq!(Stage::InProgress.required_role(), Some(Role::DeptIncharge));
        assert_eq!(Stage::Approved.required_role(), None);
        assert_eq!(Stage::awaiting(ReviewerRole::Warden), Stage::PendingWarden);
    }

    #[test]
    fn residence_parser_accepts_legacy_spellings() {
        assert_eq!(ResidenceType::parse("HOSTEL"), Some(ResidenceType::Hosteler));
        assert_eq!(ResidenceType::parse("DAY_SCHOLAR"), Some(ResidenceType::DayScholar));
        assert_eq!(ResidenceType::parse("day-scholar"), Some(ResidenceType::DayScholar));
        assert_eq!(ResidenceType::parse("commuter"), None);
    }

    #[test]
    fn only_complaints_are_unchained() {
        let unchained: Vec<_> = RequestKind::ALL.iter().filter(|kind| !kind.is_chained()).collect();
        assert_eq!(unchained, vec![&RequestKind::Complaint]);
    }
}
