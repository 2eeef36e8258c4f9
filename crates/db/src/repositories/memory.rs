use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use campusflow_core::domain::history::AuditRecord;
use campusflow_core::domain::identity::IdentityRecord;
use campusflow_core::domain::request::{Request, RequestId, RequestKind};
use campusflow_core::domain::stats::StageCount;

use super::{
    Admission, IdentityRepository, PendingFilter, RepositoryError, RequestRepository,
    RequestScope,
};

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<String, Request>>,
}

impl InMemoryRequestRepository {
    fn in_scope(request: &Request, scope: &RequestScope) -> bool {
        match scope {
            RequestScope::Chain { role, jurisdiction } => {
                request.chain.contains(role)
                    && jurisdiction.as_ref().map_or(true, |scope| scope.covers(request))
            }
            RequestScope::Complaints(category) => {
                request.kind == RequestKind::Complaint
                    && request.complaint_category == Some(*category)
            }
            RequestScope::Requester(requester_id) => &request.requester.actor_id == requester_id,
        }
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn insert(&self, request: &Request) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(RepositoryError::Duplicate(format!("request {}", request.id)));
        }
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn insert_admitted(
        &self,
        request: &Request,
        admit: Admission<'_>,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(RepositoryError::Duplicate(format!("request {}", request.id)));
        }
        let mut existing: Vec<Request> = requests
            .values()
            .filter(|stored| stored.requester.actor_id == request.requester.actor_id)
            .cloned()
            .collect();
        existing.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.cmp(&left.id))
        });
        admit(&existing).map_err(RepositoryError::Refused)?;

        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn commit_transition(
        &self,
        request: &Request,
        _record: &AuditRecord,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        let stored = requests
            .get_mut(&request.id.0)
            .filter(|stored| stored.version() == expected_version)
            .ok_or_else(|| RepositoryError::VersionConflict {
                request_id: request.id.clone(),
                expected: expected_version,
            })?;
        *stored = request.clone();
        Ok(())
    }

    async fn list_for_requester(&self, requester_id: &str) -> Result<Vec<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut owned: Vec<Request> = requests
            .values()
            .filter(|request| request.requester.actor_id == requester_id)
            .cloned()
            .collect();
        owned.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.cmp(&left.id))
        });
        Ok(owned)
    }

    async fn list_pending(&self, filter: &PendingFilter) -> Result<Vec<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut pending: Vec<Request> = requests
            .values()
            .filter(|request| request.required_role() == Some(filter.role))
            .filter(|request| {
                filter.residence.map_or(true, |residence| request.requester.residence_type == residence)
            })
            .filter(|request| {
                filter
                    .complaint_category
                    .map_or(true, |category| request.complaint_category == Some(category))
            })
            .filter(|request| {
                filter.jurisdiction.as_ref().map_or(true, |scope| scope.covers(request))
            })
            .cloned()
            .collect();
        pending.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(pending)
    }

    async fn list_acted_by(&self, actor_id: &str) -> Result<Vec<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut acted: Vec<_> = requests
            .values()
            .filter_map(|request| request.last_action_by(actor_id).map(|at| (at, request.clone())))
            .collect();
        acted.sort_by(|(left_at, left), (right_at, right)| {
            right_at.cmp(left_at).then_with(|| right.id.cmp(&left.id))
        });
        Ok(acted.into_iter().map(|(_, request)| request).collect())
    }

    async fn stage_counts(&self, scope: &RequestScope) -> Result<Vec<StageCount>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut counts: BTreeMap<(RequestKind, &'static str), StageCount> = BTreeMap::new();
        for request in requests.values().filter(|request| Self::in_scope(request, scope)) {
            let stage = request.stage();
            counts
                .entry((request.kind, stage.as_str()))
                .or_insert(StageCount::new(request.kind, stage, 0))
                .count += 1;
        }
        Ok(counts.into_values().collect())
    }
}

#[derive(Default)]
pub struct InMemoryIdentityRepository {
    identities: RwLock<HashMap<String, IdentityRecord>>,
}

#[async_trait::async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn find_by_actor_id(
        &self,
        actor_id: &str,
    ) -> Result<Option<IdentityRecord>, RepositoryError> {
        let identities = self.identities.read().await;
        Ok(identities.get(actor_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, RepositoryError> {
        let identities = self.identities.read().await;
        let email = email.trim();
        Ok(identities.values().find(|identity| identity.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn save(&self, identity: IdentityRecord) -> Result<(), RepositoryError> {
        let mut identities = self.identities.write().await;
        let taken = identities.values().any(|existing| {
            existing.actor_id != identity.actor_id && existing.email.eq_ignore_ascii_case(&identity.email)
        });
        if taken {
            return Err(RepositoryError::Duplicate(format!(
                "email {} already belongs to another identity",
                identity.email
            )));
        }
        identities.insert(identity.actor_id.clone(), identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use campusflow_core::chain::ApprovalEngine;
    use campusflow_core::domain::history::ReviewDecision;
    use campusflow_core::domain::identity::IdentityRecord;
    use campusflow_core::domain::request::{
        BonafideCategory, BonafidePayload, Request, RequestId, RequestKind, RequestPayload,
        Requester, ResidenceType, Stage,
    };
    use campusflow_core::domain::stats::StageCount;
    use campusflow_core::errors::ValidationError;
    use campusflow_core::roles::{Actor, Jurisdiction, ReviewerActor, ReviewerRole, Role};

    use crate::repositories::{
        IdentityRepository, InMemoryIdentityRepository, InMemoryRequestRepository, PendingFilter,
        RepositoryError, RequestRepository, RequestScope,
    };

    fn bonafide(id: &str) -> Request {
        ApprovalEngine::default()
            .open(
                RequestId(id.to_owned()),
                Requester {
                    actor_id: "stu-1".to_owned(),
                    reg_no: "21CS001".to_owned(),
                    department: "CSE".to_owned(),
                    section: Some("B".to_owned()),
                    year_of_study: 3,
                    residence_type: ResidenceType::DayScholar,
                },
                RequestPayload::Bonafide(BonafidePayload {
                    category: BonafideCategory::General,
                    purpose: "passport".to_owned(),
                    internship_start: None,
                    internship_end: None,
                }),
                Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp"),
            )
            .expect("open bonafide")
    }

    fn advisor() -> Actor {
        Actor::Reviewer(ReviewerActor {
            actor_id: "adv-1".to_owned(),
            email: "adv@college.edu".to_owned(),
            role: ReviewerRole::Advisor,
            jurisdiction: Jurisdiction::Class {
                department: "CSE".to_owned(),
                year_of_study: Some(3),
                section: Some("B".to_owned()),
            },
        })
    }

    #[tokio::test]
    async fn in_memory_request_repo_enforces_versions() {
        let repo = InMemoryRequestRepository::default();
        let request = bonafide("REQ-1");
        repo.insert(&request).await.expect("insert");
        assert!(matches!(repo.insert(&request).await, Err(RepositoryError::Duplicate(_))));

        let now = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).single().expect("valid timestamp");
        let engine = ApprovalEngine::default();
        let first = engine.decide(&request, &advisor(), ReviewDecision::Approve, None, now).expect("first");
        let stale = engine.decide(&request, &advisor(), ReviewDecision::Reject, None, now).expect("stale");

        repo.commit_transition(&first.request, &first.record, first.previous_version)
            .await
            .expect("commit");
        assert!(matches!(
            repo.commit_transition(&stale.request, &stale.record, stale.previous_version).await,
            Err(RepositoryError::VersionConflict { .. })
        ));

        let stored = repo.find_by_id(&request.id).await.expect("find").expect("exists");
        assert_eq!(stored.stage(), Stage::PendingHod);

        let hod_queue = repo
            .list_pending(&PendingFilter::for_role(Role::Hod))
            .await
            .expect("queue");
        assert_eq!(hod_queue.len(), 1);
        let other_department = repo
            .list_pending(&PendingFilter {
                jurisdiction: Some(Jurisdiction::Department("ECE".to_owned())),
                ..PendingFilter::for_role(Role::Hod)
            })
            .await
            .expect("other queue");
        assert!(other_department.is_empty());
        assert_eq!(repo.list_acted_by("adv-1").await.expect("history").len(), 1);
        assert_eq!(
            repo.stage_counts(&RequestScope::Chain { role: ReviewerRole::Hod, jurisdiction: None })
                .await
                .expect("counts"),
            vec![StageCount::new(RequestKind::Bonafide, Stage::PendingHod, 1)]
        );
    }

    #[tokio::test]
    async fn refused_admission_inserts_nothing() {
        let repo = InMemoryRequestRepository::default();
        let first = bonafide("REQ-1");
        let one_at_a_time = |existing: &[Request]| {
            let mut violations = ValidationError::default();
            if !existing.is_empty() {
                violations.push("purpose", "already requested");
            }
            violations.into_result()
        };
        repo.insert_admitted(&first, &one_at_a_time).await.expect("first admitted");

        let second = bonafide("REQ-2");
        assert!(matches!(
            repo.insert_admitted(&second, &one_at_a_time).await,
            Err(RepositoryError::Refused(_))
        ));
        assert!(repo.find_by_id(&second.id).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn in_memory_identity_repo_round_trip() {
        let repo = InMemoryIdentityRepository::default();
        let identity = IdentityRecord {
            actor_id: "warden-1".to_owned(),
            email: "warden@college.edu".to_owned(),
            display_name: "Mr. Das".to_owned(),
            role: "warden".to_owned(),
            department: "HOSTEL".to_owned(),
            student: None,
            assignment: None,
        };
        repo.save(identity.clone()).await.expect("save");

        assert_eq!(repo.find_by_email("Warden@College.edu").await.expect("by email"), Some(identity));
        assert!(repo.find_by_actor_id("missing").await.expect("lookup").is_none());
    }
}
