use chrono::{DateTime, Utc};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::chain::{ChainDefinition, ChainTable};
use crate::complaints::ComplaintCategory;
use crate::domain::history::{normalize_remark, AuditRecord, Decision, ReviewDecision};
use crate::domain::request::{
    ComplaintStatus, Request, RequestId, RequestKind, RequestPayload, Requester, Stage,
};
use crate::errors::{LifecycleError, ValidationError};
use crate::roles::{Actor, Role};

/// Result of a successful transition: the advanced request plus the single
/// history record that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub request: Request,
    pub record: AuditRecord,
    pub previous_version: u32,
}

/// Pure state machine over [`Request`]s. Performs no I/O; persistence and
/// serialization are the caller's concern.
#[derive(Clone, Debug)]
pub struct ApprovalEngine<C = ChainTable> {
    chains: C,
}

impl Default for ApprovalEngine<ChainTable> {
    fn default() -> Self {
        Self::new(ChainTable::default())
    }
}

impl<C> ApprovalEngine<C>
where
    C: ChainDefinition,
{
    pub fn new(chains: C) -> Self {
        Self { chains }
    }

    /// Builds a request in its initial stage. Payload validation happens
    /// before this point.
    pub fn open(
        &self,
        id: RequestId,
        requester: Requester,
        payload: RequestPayload,
        now: DateTime<Utc>,
    ) -> Result<Request, LifecycleError> {
        let kind = payload.kind();
        if kind == RequestKind::Complaint {
            let category = match &payload {
                RequestPayload::Complaint(complaint) => ComplaintCategory::classify(&complaint.text),
                _ => ComplaintCategory::General,
            };
            return Ok(Request::open(id, requester, payload, Vec::new(), Some(category), Stage::Open, now));
        }

        let chain = self.chains.chain_for(kind, requester.residence_type).ok_or_else(|| {
            LifecycleError::InvariantViolation(format!(
                "no approval chain configured for {kind} ({})",
                requester.residence_type.as_str()
            ))
        })?;
        let first = chain.first().copied().ok_or_else(|| {
            LifecycleError::InvariantViolation(format!("approval chain for {kind} is empty"))
        })?;

        Ok(Request::open(id, requester, payload, chain, None, Stage::awaiting(first), now))
    }

    /// Applies a reviewer decision to the current stage.
    ///
    /// The chain snapshot stored on the request is authoritative, so later
    /// table changes never reroute requests already in flight.
    pub fn decide(
        &self,
        request: &Request,
        actor: &Actor,
        decision: ReviewDecision,
        remark: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let stage = request.stage();
        if stage.is_terminal() {
            return Err(LifecycleError::TerminalState { request_id: request.id.clone(), stage });
        }
        if !request.kind.is_chained() {
            return Err(ValidationError::single(
                "decision",
                "complaints are updated through complaint status changes",
            )
            .into());
        }

        let awaited = stage.awaited_reviewer().ok_or_else(|| {
            LifecycleError::InvariantViolation(format!(
                "chained request {} is at non-chain stage {stage}",
                request.id
            ))
        })?;
        let reviewer = match actor {
            Actor::Reviewer(reviewer) if reviewer.role == awaited => reviewer,
            other => {
                return Err(LifecycleError::WrongRole {
                    request_id: request.id.clone(),
                    stage,
                    required: Some(awaited.into()),
                    actual: other.role(),
                })
            }
        };
        if !reviewer.jurisdiction.covers(request) {
            return Err(LifecycleError::OutsideJurisdiction {
                request_id: request.id.clone(),
                actor_id: reviewer.actor_id.clone(),
            });
        }

        let to_stage = match decision {
            ReviewDecision::Reject => Stage::Rejected,
            ReviewDecision::Approve => {
                let position = request.chain.iter().position(|role| *role == awaited).ok_or_else(
                    || {
                        LifecycleError::InvariantViolation(format!(
                            "stage {stage} of request {} is missing from its chain",
                            request.id
                        ))
                    },
                )?;
                request
                    .chain
                    .get(position + 1)
                    .map(|next| Stage::awaiting(*next))
                    .unwrap_or(Stage::Approved)
            }
        };

        Ok(self.record(request, actor, decision.into(), remark, to_stage, now))
    }

    /// Moves a complaint forward. Only the incharge of the complaint's
    /// category may act, and status never moves backwards.
    pub fn advance_complaint(
        &self,
        request: &Request,
        actor: &Actor,
        target: ComplaintStatus,
        remark: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, LifecycleError> {
        let stage = request.stage();
        if stage.is_terminal() {
            return Err(LifecycleError::TerminalState { request_id: request.id.clone(), stage });
        }
        if request.kind != RequestKind::Complaint {
            return Err(ValidationError::single(
                "status",
                "only complaints carry a complaint status",
            )
            .into());
        }

        let incharge = match actor {
            Actor::DeptIncharge(incharge) => incharge,
            other => {
                return Err(LifecycleError::WrongRole {
                    request_id: request.id.clone(),
                    stage,
                    required: Some(Role::DeptIncharge),
                    actual: other.role(),
                })
            }
        };
        if request.complaint_category != Some(incharge.department) {
            return Err(LifecycleError::OutsideJurisdiction {
                request_id: request.id.clone(),
                actor_id: incharge.actor_id.clone(),
            });
        }

        let decision = match (stage, target) {
            (Stage::Open, ComplaintStatus::InProgress) => Decision::StartProgress,
            (Stage::Open | Stage::InProgress, ComplaintStatus::Resolved) => Decision::Resolve,
            _ => {
                return Err(ValidationError::single(
                    "status",
                    format!("complaint cannot move from {stage} to {}", target.stage()),
                )
                .into())
            }
        };

        Ok(self.record(request, actor, decision, remark, target.stage(), now))
    }

    fn record(
        &self,
        request: &Request,
        actor: &Actor,
        decision: Decision,
        remark: Option<&str>,
        to_stage: Stage,
        now: DateTime<Utc>,
    ) -> TransitionOutcome {
        let record = AuditRecord {
            sequence: request.next_sequence(),
            actor_role: actor.role(),
            actor_id: actor.actor_id().to_owned(),
            decision,
            remark: normalize_remark(remark),
            from_stage: request.stage(),
            to_stage,
            occurred_at: now,
        };
        let mut advanced = request.clone();
        advanced.apply(record.clone());
        TransitionOutcome { request: advanced, record, previous_version: request.version() }
    }
}

/// Reports a transition attempt to an audit sink. Callers that persist the
/// outcome emit only after the commit settles.
pub fn audit_transition<S>(
    sink: &S,
    audit: &AuditContext,
    result: &Result<TransitionOutcome, LifecycleError>,
) where
    S: AuditSink + ?Sized,
{
    match result {
        Ok(outcome) => sink.emit(
            AuditEvent::new(
                audit,
                "lifecycle.transition.applied",
                AuditCategory::Transition,
                AuditOutcome::Success,
            )
            .with_metadata("from", outcome.record.from_stage.as_str())
            .with_metadata("to", outcome.record.to_stage.as_str())
            .with_metadata("decision", outcome.record.decision.as_str()),
        ),
        Err(error) => sink.emit(
            AuditEvent::new(
                audit,
                "lifecycle.transition.rejected",
                AuditCategory::Transition,
                AuditOutcome::Rejected,
            )
            .with_metadata("error", error.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{audit_transition, ApprovalEngine};
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::complaints::ComplaintCategory;
    use crate::domain::history::{Decision, ReviewDecision};
    use crate::domain::request::{
        BonafideCategory, BonafidePayload, ComplaintPayload, ComplaintStatus, LeaveCategory,
        LeavePayload, OutpassPayload, Request, RequestId, RequestPayload, RequestStatus,
        Requester, ResidenceType, Stage,
    };
    use crate::errors::LifecycleError;
    use crate::roles::{Actor, InchargeActor, Jurisdiction, ReviewerActor, ReviewerRole, Role};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp")
    }

    fn requester(residence_type: ResidenceType) -> Requester {
        Requester {
            actor_id: "stu-1".to_owned(),
            reg_no: "CSE22014".to_owned(),
            department: "CSE".to_owned(),
            section: Some("A".to_owned()),
            year_of_study: 3,
            residence_type,
        }
    }

    fn reviewer(role: ReviewerRole) -> Actor {
        let jurisdiction = match role {
            ReviewerRole::Advisor => Jurisdiction::Class {
                department: "CSE".to_owned(),
                year_of_study: Some(3),
                section: Some("A".to_owned()),
            },
            ReviewerRole::Hod => Jurisdiction::Department("CSE".to_owned()),
            ReviewerRole::Warden => Jurisdiction::Floors(vec![2]),
        };
        scoped_reviewer(role, jurisdiction)
    }

    fn scoped_reviewer(role: ReviewerRole, jurisdiction: Jurisdiction) -> Actor {
        Actor::Reviewer(ReviewerActor {
            actor_id: format!("{}-1", role.as_str()),
            email: format!("{}@college.edu", role.as_str()),
            role,
            jurisdiction,
        })
    }

    fn incharge(department: ComplaintCategory) -> Actor {
        Actor::DeptIncharge(InchargeActor {
            actor_id: "incharge-1".to_owned(),
            email: "incharge@college.edu".to_owned(),
            department,
        })
    }

    fn leave() -> RequestPayload {
        let day = now().date_naive();
        RequestPayload::Leave(LeavePayload {
            category: LeaveCategory::Emergency,
            start_date: day,
            end_date: day,
            reason: "family emergency".to_owned(),
        })
    }

    fn bonafide() -> RequestPayload {
        RequestPayload::Bonafide(BonafidePayload {
            category: BonafideCategory::General,
            purpose: "bank account".to_owned(),
            internship_start: None,
            internship_end: None,
        })
    }

    fn outpass() -> RequestPayload {
        let day = now().date_naive();
        RequestPayload::Outpass(OutpassPayload {
            out_date: day,
            out_time: chrono::NaiveTime::from_hms_opt(10, 0, 0).expect("valid time"),
            purpose: "home visit".to_owned(),
            contact_number: "9876543210".to_owned(),
            parent_mobile: "9123456780".to_owned(),
            in_date: Some(day),
            in_time: chrono::NaiveTime::from_hms_opt(18, 0, 0),
            hostel_id: Some(1),
            floor_id: Some(2),
            room_no: Some("214".to_owned()),
        })
    }

    fn open(payload: RequestPayload, residence: ResidenceType) -> Request {
        ApprovalEngine::default()
            .open(RequestId("REQ-1".to_owned()), requester(residence), payload, now())
            .expect("request opens")
    }

    #[test]
    fn fresh_requests_start_at_initial_stage_with_empty_history() {
        let leave = open(leave(), ResidenceType::DayScholar);
        assert_eq!(leave.stage(), Stage::PendingAdvisor);
        assert_eq!(leave.status(), RequestStatus::Pending);
        assert!(leave.history().is_empty());
        assert_eq!(leave.version(), 1);

        let complaint = open(
            RequestPayload::Complaint(ComplaintPayload {
                text: "Bus was late".to_owned(),
                attachments: Vec::new(),
            }),
            ResidenceType::DayScholar,
        );
        assert_eq!(complaint.stage(), Stage::Open);
        assert_eq!(complaint.complaint_category, Some(ComplaintCategory::Transport));
        assert!(complaint.chain.is_empty());
    }

    #[test]
    fn advisor_approval_completes_leave_with_one_record() {
        let engine = ApprovalEngine::default();
        let request = open(leave(), ResidenceType::Hosteler);

        let outcome = engine
            .decide(&request, &reviewer(ReviewerRole::Advisor), ReviewDecision::Approve, Some("ok"), now())
            .expect("advisor approves");

        assert_eq!(outcome.request.stage(), Stage::Approved);
        assert_eq!(outcome.request.history().len(), 1);
        let record = &outcome.request.history()[0];
        assert_eq!(record.actor_role, Role::Advisor);
        assert_eq!(record.decision, Decision::Approve);
        assert_eq!(record.remark.as_deref(), Some("ok"));
        assert_eq!(outcome.previous_version, 1);
        assert_eq!(outcome.request.version(), 2);
    }

    #[test]
    fn hosteler_outpass_rejected_by_warden_after_two_approvals() {
        let engine = ApprovalEngine::default();
        let request = open(outpass(), ResidenceType::Hosteler);

        let after_advisor = engine
            .decide(&request, &reviewer(ReviewerRole::Advisor), ReviewDecision::Approve, None, now())
            .expect("advisor approves")
            .request;
        assert_eq!(after_advisor.stage(), Stage::PendingHod);

        let after_hod = engine
            .decide(&after_advisor, &reviewer(ReviewerRole::Hod), ReviewDecision::Approve, None, now())
            .expect("hod approves")
            .request;
        assert_eq!(after_hod.stage(), Stage::PendingWarden);

        let rejected = engine
            .decide(
                &after_hod,
                &reviewer(ReviewerRole::Warden),
                ReviewDecision::Reject,
                Some("exam week"),
                now(),
            )
            .expect("warden rejects")
            .request;

        assert_eq!(rejected.stage(), Stage::Rejected);
        assert_eq!(rejected.history().len(), 3);
        let third = &rejected.history()[2];
        assert_eq!(third.actor_role, Role::Warden);
        assert_eq!(third.decision, Decision::Reject);
        assert_eq!(third.sequence, 3);
    }

    #[test]
    fn day_scholar_outpass_never_reaches_warden() {
        let engine = ApprovalEngine::default();
        let mut request = open(outpass(), ResidenceType::DayScholar);
        let mut visited = vec![request.stage()];

        for role in [ReviewerRole::Advisor, ReviewerRole::Hod] {
            request = engine
                .decide(&request, &reviewer(role), ReviewDecision::Approve, None, now())
                .expect("approval advances")
                .request;
            visited.push(request.stage());
        }

        assert_eq!(visited, vec![Stage::PendingAdvisor, Stage::PendingHod, Stage::Approved]);
    }

    #[test]
    fn hod_acting_on_fresh_bonafide_is_wrong_role() {
        let engine = ApprovalEngine::default();
        let request = open(bonafide(), ResidenceType::DayScholar);

        let error = engine
            .decide(&request, &reviewer(ReviewerRole::Hod), ReviewDecision::Approve, None, now())
            .expect_err("hod cannot act first");

        assert!(matches!(
            error,
            LifecycleError::WrongRole { required: Some(Role::Advisor), actual: Role::Hod, .. }
        ));
    }

    #[test]
    fn reviewers_outside_the_students_class_or_floor_cannot_decide() {
        let engine = ApprovalEngine::default();
        let request = open(outpass(), ResidenceType::Hosteler);

        let other_section = scoped_reviewer(
            ReviewerRole::Advisor,
            Jurisdiction::Class {
                department: "CSE".to_owned(),
                year_of_study: Some(3),
                section: Some("B".to_owned()),
            },
        );
        let error = engine
            .decide(&request, &other_section, ReviewDecision::Approve, None, now())
            .expect_err("section B advisor");
        assert!(matches!(error, LifecycleError::OutsideJurisdiction { .. }));

        let after_hod = [ReviewerRole::Advisor, ReviewerRole::Hod].into_iter().fold(request, |current, role| {
            engine
                .decide(&current, &reviewer(role), ReviewDecision::Approve, None, now())
                .expect("in-scope approval")
                .request
        });
        assert_eq!(after_hod.stage(), Stage::PendingWarden);

        let other_floor = scoped_reviewer(ReviewerRole::Warden, Jurisdiction::Floors(vec![5, 6]));
        let error = engine
            .decide(&after_hod, &other_floor, ReviewDecision::Reject, None, now())
            .expect_err("warden of other floors");
        assert!(matches!(error, LifecycleError::OutsideJurisdiction { .. }));

        let mech_hod = scoped_reviewer(ReviewerRole::Hod, Jurisdiction::Department("MECH".to_owned()));
        let fresh = open(bonafide(), ResidenceType::DayScholar);
        let advised = engine
            .decide(&fresh, &reviewer(ReviewerRole::Advisor), ReviewDecision::Approve, None, now())
            .expect("advisor approves")
            .request;
        assert!(matches!(
            engine.decide(&advised, &mech_hod, ReviewDecision::Approve, None, now()),
            Err(LifecycleError::OutsideJurisdiction { .. })
        ));
    }

    #[test]
    fn reject_is_immediate_from_any_stage() {
        let engine = ApprovalEngine::default();
        let request = open(bonafide(), ResidenceType::DayScholar);

        let rejected = engine
            .decide(&request, &reviewer(ReviewerRole::Advisor), ReviewDecision::Reject, None, now())
            .expect("advisor rejects")
            .request;

        assert_eq!(rejected.stage(), Stage::Rejected);
        assert_eq!(rejected.status(), RequestStatus::Rejected);
    }

    #[test]
    fn terminal_requests_refuse_every_actor() {
        let engine = ApprovalEngine::default();
        let request = open(leave(), ResidenceType::DayScholar);
        let approved = engine
            .decide(&request, &reviewer(ReviewerRole::Advisor), ReviewDecision::Approve, None, now())
            .expect("advisor approves")
            .request;

        for role in [ReviewerRole::Advisor, ReviewerRole::Hod, ReviewerRole::Warden] {
            for decision in [ReviewDecision::Approve, ReviewDecision::Reject] {
                let error = engine
                    .decide(&approved, &reviewer(role), decision, None, now())
                    .expect_err("terminal request");
                assert!(matches!(error, LifecycleError::TerminalState { stage: Stage::Approved, .. }));
            }
        }
    }

    #[test]
    fn blank_remark_is_not_recorded() {
        let engine = ApprovalEngine::default();
        let request = open(leave(), ResidenceType::DayScholar);

        let outcome = engine
            .decide(&request, &reviewer(ReviewerRole::Advisor), ReviewDecision::Approve, Some("  "), now())
            .expect("advisor approves");

        assert_eq!(outcome.record.remark, None);
    }

    #[test]
    fn complaint_moves_forward_for_matching_incharge_only() {
        let engine = ApprovalEngine::default();
        let complaint = open(
            RequestPayload::Complaint(ComplaintPayload {
                text: "Garbage not cleared near block C canteen".to_owned(),
                attachments: Vec::new(),
            }),
            ResidenceType::DayScholar,
        );
        let category = complaint.complaint_category.expect("classified");

        let outsider = engine
            .advance_complaint(
                &complaint,
                &incharge(ComplaintCategory::Water),
                ComplaintStatus::InProgress,
                None,
                now(),
            )
            .expect_err("wrong department");
        assert!(matches!(outsider, LifecycleError::OutsideJurisdiction { .. }));

        let in_progress = engine
            .advance_complaint(&complaint, &incharge(category), ComplaintStatus::InProgress, None, now())
            .expect("incharge starts work")
            .request;
        assert_eq!(in_progress.stage(), Stage::InProgress);
        assert_eq!(in_progress.history()[0].decision, Decision::StartProgress);

        let backwards = engine
            .advance_complaint(&in_progress, &incharge(category), ComplaintStatus::Open, None, now())
            .expect_err("no reopening");
        assert!(matches!(backwards, LifecycleError::Validation(_)));

        let resolved = engine
            .advance_complaint(
                &in_progress,
                &incharge(category),
                ComplaintStatus::Resolved,
                Some("cleared"),
                now(),
            )
            .expect("incharge resolves")
            .request;
        assert_eq!(resolved.status(), RequestStatus::Resolved);
        assert_eq!(resolved.history().len(), 2);
    }

    #[test]
    fn reviewers_cannot_decide_complaints() {
        let engine = ApprovalEngine::default();
        let complaint = open(
            RequestPayload::Complaint(ComplaintPayload {
                text: "Lecture hall projector broken".to_owned(),
                attachments: Vec::new(),
            }),
            ResidenceType::DayScholar,
        );

        let decision = engine
            .decide(&complaint, &reviewer(ReviewerRole::Advisor), ReviewDecision::Approve, None, now())
            .expect_err("complaints are not chained");
        assert!(matches!(decision, LifecycleError::Validation(_)));

        let status = engine
            .advance_complaint(
                &complaint,
                &reviewer(ReviewerRole::Hod),
                ComplaintStatus::Resolved,
                None,
                now(),
            )
            .expect_err("hod is not an incharge");
        assert!(matches!(status, LifecycleError::WrongRole { required: Some(Role::DeptIncharge), .. }));
    }

    #[test]
    fn audited_decisions_emit_applied_and_rejected_events() {
        let engine = ApprovalEngine::default();
        let sink = InMemoryAuditSink::default();
        let request = open(bonafide(), ResidenceType::DayScholar);
        let audit = AuditContext::new(Some(request.id.clone()), "corr-1", "hod-1");

        let wrong = engine.decide(
            &request,
            &reviewer(ReviewerRole::Hod),
            ReviewDecision::Approve,
            None,
            now(),
        );
        audit_transition(&sink, &audit, &wrong);
        let applied = engine.decide(
            &request,
            &reviewer(ReviewerRole::Advisor),
            ReviewDecision::Approve,
            None,
            now(),
        );
        audit_transition(&sink, &audit, &applied);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, AuditOutcome::Rejected);
        assert_eq!(events[0].event_type, "lifecycle.transition.rejected");
        assert_eq!(events[1].outcome, AuditOutcome::Success);
        assert_eq!(events[1].metadata.get("to").map(String::as_str), Some("pending_hod"));
    }
}
