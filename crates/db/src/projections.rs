//! Role-scoped read models. Every call reads committed state; nothing is cached.

use std::sync::Arc;

use campusflow_core::domain::request::{Request, ResidenceType};
use campusflow_core::domain::stats::DashboardStats;
use campusflow_core::errors::{ApplicationError, LifecycleError};
use campusflow_core::roles::{Actor, Role};

use crate::repositories::{PendingFilter, RequestRepository, RequestScope};

pub struct QueryService {
    requests: Arc<dyn RequestRepository>,
}

impl QueryService {
    pub fn new(requests: Arc<dyn RequestRepository>) -> Self {
        Self { requests }
    }

    /// Requests waiting on the caller, oldest first. Incharges see open
    /// complaints of their own department.
    pub async fn pending_for(
        &self,
        actor: &Actor,
        residence: Option<ResidenceType>,
    ) -> Result<Vec<Request>, ApplicationError> {
        let filter = match actor {
            Actor::Reviewer(reviewer) => PendingFilter {
                residence,
                jurisdiction: Some(reviewer.jurisdiction.clone()),
                ..PendingFilter::for_role(reviewer.role.into())
            },
            Actor::DeptIncharge(incharge) => PendingFilter {
                residence,
                complaint_category: Some(incharge.department),
                ..PendingFilter::for_role(Role::DeptIncharge)
            },
            Actor::Student(_) => {
                return Err(LifecycleError::NotPermitted {
                    role: Role::Student,
                    action: "view a review queue".to_owned(),
                }
                .into())
            }
        };
        Ok(self.requests.list_pending(&filter).await?)
    }

    /// Requests the caller has acted on, most recent action first.
    pub async fn history_for(&self, actor: &Actor) -> Result<Vec<Request>, ApplicationError> {
        if !actor.is_staff() {
            return Err(LifecycleError::NotPermitted {
                role: actor.role(),
                action: "view review history".to_owned(),
            }
            .into());
        }
        Ok(self.requests.list_acted_by(actor.actor_id()).await?)
    }

    /// Totals over every request the caller can ever see, with the pending
    /// share split by request kind.
    pub async fn dashboard_stats(&self, actor: &Actor) -> Result<DashboardStats, ApplicationError> {
        match actor {
            Actor::Reviewer(reviewer) => {
                let scope = RequestScope::Chain {
                    role: reviewer.role,
                    jurisdiction: Some(reviewer.jurisdiction.clone()),
                };
                let counts = self.requests.stage_counts(&scope).await?;
                Ok(DashboardStats::from_stage_counts(&counts, Some(reviewer.role.into())))
            }
            Actor::DeptIncharge(incharge) => {
                let counts =
                    self.requests.stage_counts(&RequestScope::Complaints(incharge.department)).await?;
                Ok(DashboardStats::from_stage_counts(&counts, Some(Role::DeptIncharge)))
            }
            Actor::Student(student) => self.student_stats(&student.actor_id).await,
        }
    }

    pub async fn requests_for_student(
        &self,
        requester_id: &str,
    ) -> Result<Vec<Request>, ApplicationError> {
        Ok(self.requests.list_for_requester(requester_id).await?)
    }

    pub async fn student_stats(&self, requester_id: &str) -> Result<DashboardStats, ApplicationError> {
        let counts =
            self.requests.stage_counts(&RequestScope::Requester(requester_id.to_owned())).await?;
        Ok(DashboardStats::from_stage_counts(&counts, None))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use campusflow_core::chain::ApprovalEngine;
    use campusflow_core::complaints::ComplaintCategory;
    use campusflow_core::domain::history::ReviewDecision;
    use campusflow_core::domain::request::{
        BonafideCategory, BonafidePayload, ComplaintPayload, LeaveCategory, LeavePayload, Request,
        RequestId, RequestKind, RequestPayload, Requester, ResidenceType,
    };
    use campusflow_core::domain::stats::DashboardStats;
    use campusflow_core::errors::{ApplicationError, LifecycleError};
    use campusflow_core::roles::{
        Actor, InchargeActor, Jurisdiction, ReviewerActor, ReviewerRole, StudentActor,
    };

    use super::QueryService;
    use crate::repositories::{InMemoryRequestRepository, RequestRepository};

    fn requester(actor_id: &str) -> Requester {
        Requester {
            actor_id: actor_id.to_owned(),
            reg_no: format!("REG-{actor_id}"),
            department: "CSE".to_owned(),
            section: Some("A".to_owned()),
            year_of_study: 2,
            residence_type: ResidenceType::DayScholar,
        }
    }

    fn advisor() -> Actor {
        Actor::Reviewer(ReviewerActor {
            actor_id: "adv-1".to_owned(),
            email: "adv@college.edu".to_owned(),
            role: ReviewerRole::Advisor,
            jurisdiction: Jurisdiction::Class {
                department: "CSE".to_owned(),
                year_of_study: Some(2),
                section: Some("A".to_owned()),
            },
        })
    }

    fn leave(id: &str, student: &str, minute: i64) -> Request {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp")
            + Duration::minutes(minute);
        ApprovalEngine::default()
            .open(
                RequestId(id.to_owned()),
                requester(student),
                RequestPayload::Leave(LeavePayload {
                    category: LeaveCategory::Others,
                    start_date: at.date_naive(),
                    end_date: at.date_naive(),
                    reason: "family function".to_owned(),
                }),
                at,
            )
            .expect("open leave")
    }

    async fn seeded() -> (Arc<InMemoryRequestRepository>, QueryService) {
        let repo = Arc::new(InMemoryRequestRepository::default());
        let engine = ApprovalEngine::default();

        let approved = leave("REQ-1", "stu-1", 0);
        let rejected = leave("REQ-2", "stu-1", 5);
        let pending = leave("REQ-3", "stu-2", 10);
        for request in [&approved, &rejected, &pending] {
            repo.insert(request).await.expect("insert");
        }
        for (request, decision, minute) in
            [(&approved, ReviewDecision::Approve, 30), (&rejected, ReviewDecision::Reject, 20)]
        {
            let at = request.created_at + Duration::minutes(minute);
            let outcome = engine.decide(request, &advisor(), decision, None, at).expect("decide");
            repo.commit_transition(&outcome.request, &outcome.record, outcome.previous_version)
                .await
                .expect("commit");
        }

        let complaint = engine
            .open(
                RequestId("REQ-4".to_owned()),
                requester("stu-2"),
                RequestPayload::Complaint(ComplaintPayload {
                    text: "Mess food is cold".to_owned(),
                    attachments: Vec::new(),
                }),
                approved.created_at,
            )
            .expect("open complaint");
        repo.insert(&complaint).await.expect("insert complaint");

        let queries = QueryService::new(repo.clone());
        (repo, queries)
    }

    #[tokio::test]
    async fn advisor_projections_cover_queue_history_and_totals() {
        let (_repo, queries) = seeded().await;

        let pending = queries.pending_for(&advisor(), None).await.expect("pending");
        assert_eq!(pending.iter().map(|request| request.id.0.as_str()).collect::<Vec<_>>(), vec!["REQ-3"]);

        let history = queries.history_for(&advisor()).await.expect("history");
        assert_eq!(
            history.iter().map(|request| request.id.0.as_str()).collect::<Vec<_>>(),
            vec!["REQ-1", "REQ-2"]
        );

        let stats = queries.dashboard_stats(&advisor()).await.expect("stats");
        assert_eq!(
            stats,
            DashboardStats {
                total: 3,
                pending: 1,
                approved: 1,
                rejected: 1,
                resolved: 0,
                pending_by_kind: BTreeMap::from([(RequestKind::Leave, 1)]),
            }
        );
    }

    #[tokio::test]
    async fn advisor_totals_split_pending_by_kind_within_jurisdiction() {
        let (repo, queries) = seeded().await;
        let bonafide = ApprovalEngine::default()
            .open(
                RequestId("REQ-5".to_owned()),
                requester("stu-3"),
                RequestPayload::Bonafide(BonafidePayload {
                    category: BonafideCategory::General,
                    purpose: "bank account".to_owned(),
                    internship_start: None,
                    internship_end: None,
                }),
                Utc.with_ymd_and_hms(2026, 3, 2, 11, 0, 0).single().expect("valid timestamp"),
            )
            .expect("open bonafide");
        repo.insert(&bonafide).await.expect("insert bonafide");

        let stats = queries.dashboard_stats(&advisor()).await.expect("stats");
        assert_eq!(stats.pending, 2);
        assert_eq!(
            stats.pending_by_kind,
            BTreeMap::from([(RequestKind::Leave, 1), (RequestKind::Bonafide, 1)])
        );

        let other_class = Actor::Reviewer(ReviewerActor {
            actor_id: "adv-2".to_owned(),
            email: "adv2@college.edu".to_owned(),
            role: ReviewerRole::Advisor,
            jurisdiction: Jurisdiction::Class {
                department: "CSE".to_owned(),
                year_of_study: Some(4),
                section: None,
            },
        });
        assert_eq!(queries.dashboard_stats(&other_class).await.expect("stats"), DashboardStats::default());
        assert!(queries.pending_for(&other_class, None).await.expect("queue").is_empty());
    }

    #[tokio::test]
    async fn incharge_sees_only_their_department() {
        let (_repo, queries) = seeded().await;
        let hostel = Actor::DeptIncharge(InchargeActor {
            actor_id: "incharge-hostel".to_owned(),
            email: "hostel@college.edu".to_owned(),
            department: ComplaintCategory::Hostel,
        });
        let water = Actor::DeptIncharge(InchargeActor {
            actor_id: "incharge-water".to_owned(),
            email: "water@college.edu".to_owned(),
            department: ComplaintCategory::Water,
        });

        assert_eq!(queries.pending_for(&hostel, None).await.expect("hostel queue").len(), 1);
        assert!(queries.pending_for(&water, None).await.expect("water queue").is_empty());
        assert_eq!(queries.dashboard_stats(&hostel).await.expect("stats").pending, 1);
    }

    #[tokio::test]
    async fn students_get_their_own_requests_and_stats() {
        let (_repo, queries) = seeded().await;
        let student = Actor::Student(StudentActor {
            actor_id: "stu-1".to_owned(),
            email: "stu1@college.edu".to_owned(),
            requester: requester("stu-1"),
        });

        let own = queries.requests_for_student("stu-1").await.expect("own requests");
        assert_eq!(own.iter().map(|request| request.id.0.as_str()).collect::<Vec<_>>(), vec!["REQ-2", "REQ-1"]);

        let stats = queries.dashboard_stats(&student).await.expect("student stats");
        assert_eq!(
            stats,
            DashboardStats {
                total: 2,
                pending: 0,
                approved: 1,
                rejected: 1,
                resolved: 0,
                pending_by_kind: BTreeMap::new(),
            }
        );

        let error = queries.pending_for(&student, None).await.expect_err("students have no queue");
        assert!(matches!(error, ApplicationError::Domain(LifecycleError::NotPermitted { .. })));
    }
}
