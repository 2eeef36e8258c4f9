use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::request::{RequestKind, RequestStatus, Stage};
use crate::roles::Role;

/// Number of requests of one kind sitting at one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageCount {
    pub kind: RequestKind,
    pub stage: Stage,
    pub count: u64,
}

impl StageCount {
    pub fn new(kind: RequestKind, stage: Stage, count: u64) -> Self {
        Self { kind, stage, count }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total: u64,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub resolved: u64,
    /// Pending requests split by kind. Kinds with nothing pending are omitted.
    #[serde(default)]
    pub pending_by_kind: BTreeMap<RequestKind, u64>,
}

impl DashboardStats {
    /// Folds per-stage counts into dashboard totals.
    ///
    /// With `pending_role` set, only stages awaiting that role count as pending;
    /// otherwise every non-terminal stage does.
    pub fn from_stage_counts(counts: &[StageCount], pending_role: Option<Role>) -> Self {
        let mut stats = Self::default();
        for StageCount { kind, stage, count } in counts.iter().copied() {
            stats.total += count;
            match stage.status() {
                RequestStatus::Approved => stats.approved += count,
                RequestStatus::Rejected => stats.rejected += count,
                RequestStatus::Resolved => stats.resolved += count,
                RequestStatus::Pending | RequestStatus::Open | RequestStatus::InProgress => {
                    let counts_as_pending = match pending_role {
                        Some(role) => stage.required_role() == Some(role),
                        None => true,
                    };
                    if counts_as_pending && count > 0 {
                        stats.pending += count;
                        *stats.pending_by_kind.entry(kind).or_default() += count;
                    }
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{DashboardStats, StageCount};
    use crate::domain::request::{RequestKind, Stage};
    use crate::roles::Role;

    #[test]
    fn pending_counts_only_stages_awaiting_the_role() {
        let counts = [
            StageCount::new(RequestKind::Leave, Stage::PendingAdvisor, 2),
            StageCount::new(RequestKind::Bonafide, Stage::PendingHod, 1),
            StageCount::new(RequestKind::Outpass, Stage::PendingHod, 2),
            StageCount::new(RequestKind::Bonafide, Stage::Approved, 4),
            StageCount::new(RequestKind::Outpass, Stage::Rejected, 1),
        ];

        let stats = DashboardStats::from_stage_counts(&counts, Some(Role::Hod));

        assert_eq!(stats.total, 10);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.approved, 4);
        assert_eq!(stats.rejected, 1);
        assert_eq!(
            stats.pending_by_kind,
            BTreeMap::from([(RequestKind::Bonafide, 1), (RequestKind::Outpass, 2)])
        );
    }

    #[test]
    fn student_view_counts_every_open_stage_as_pending() {
        let counts = [
            StageCount::new(RequestKind::Leave, Stage::PendingAdvisor, 1),
            StageCount::new(RequestKind::Complaint, Stage::InProgress, 1),
            StageCount::new(RequestKind::Complaint, Stage::Resolved, 2),
        ];

        let stats = DashboardStats::from_stage_counts(&counts, None);

        assert_eq!(stats.pending, 2);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.pending_by_kind.get(&RequestKind::Complaint), Some(&1));
    }

    #[test]
    fn breakdown_serializes_with_kind_names() {
        let stats = DashboardStats::from_stage_counts(
            &[StageCount::new(RequestKind::Od, Stage::PendingAdvisor, 3)],
            Some(Role::Advisor),
        );

        let json = serde_json::to_value(&stats).expect("stats serialize");
        assert_eq!(json["pending_by_kind"]["od"], 3);
    }
}
