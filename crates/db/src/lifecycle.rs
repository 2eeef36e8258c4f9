//! Orchestrates submissions and transitions: load, run the engine, commit
//! with an optimistic version check, emit audit events and decision notices.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use campusflow_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use campusflow_core::chain::{audit_transition, ApprovalEngine};
use campusflow_core::domain::history::ReviewDecision;
use campusflow_core::domain::request::{ComplaintStatus, Request, RequestId, RequestPayload};
use campusflow_core::errors::{ApplicationError, LifecycleError, ValidationError};
use campusflow_core::notify::{DecisionNotice, Notifier, TracingNotifier};
use campusflow_core::roles::Actor;
use campusflow_core::validation::{overlap_checked, SubmissionSummary, SubmissionValidator};

use crate::attachments::AttachmentStore;
use crate::repositories::{RepositoryError, RequestRepository};

/// Attempts made when a concurrent writer bumps the version between our read
/// and our commit.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Per-call ambient values. `today` drives date rules; `now` stamps records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: String,
    pub now: DateTime<Utc>,
    pub today: NaiveDate,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self::at(correlation_id, Utc::now())
    }

    pub fn at(correlation_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { correlation_id: correlation_id.into(), now, today: now.date_naive() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub request: Request,
    pub summary: SubmissionSummary,
}

#[derive(Clone, Copy)]
enum Change {
    Review(ReviewDecision),
    Complaint(ComplaintStatus),
}

pub struct LifecycleService {
    requests: Arc<dyn RequestRepository>,
    attachments: Arc<dyn AttachmentStore>,
    engine: ApprovalEngine,
    validator: SubmissionValidator,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
}

impl LifecycleService {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        attachments: Arc<dyn AttachmentStore>,
        validator: SubmissionValidator,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            requests,
            attachments,
            engine: ApprovalEngine::default(),
            validator,
            audit,
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn with_engine(mut self, engine: ApprovalEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Where requesters are told about final approvals and rejections.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Creates a request in its initial stage on behalf of a student.
    pub async fn submit(
        &self,
        actor: &Actor,
        payload: RequestPayload,
        ctx: &RequestContext,
    ) -> Result<Submission, ApplicationError> {
        let student = match actor {
            Actor::Student(student) => student,
            other => {
                return Err(LifecycleError::NotPermitted {
                    role: other.role(),
                    action: "submit requests".to_owned(),
                }
                .into())
            }
        };

        self.check_attachments(&payload, &student.actor_id).await?;

        let overlap = overlap_checked(payload.kind());
        let existing = if overlap {
            self.requests.list_for_requester(&student.actor_id).await?
        } else {
            Vec::new()
        };

        let summary = match self.validator.validate(&student.requester, &payload, &existing, ctx.today) {
            Ok(summary) => summary,
            Err(violations) => {
                self.emit_submission(ctx, actor, None, AuditOutcome::Rejected, Some(&violations));
                return Err(violations.into());
            }
        };

        let request =
            self.engine.open(RequestId::generate(), student.requester.clone(), payload, ctx.now)?;
        let stored = if overlap {
            // Re-checked under the store's write lock against what is
            // committed by then; a concurrent submission may have landed.
            let admit = |existing: &[Request]| {
                self.validator
                    .validate(&student.requester, &request.payload, existing, ctx.today)
                    .map(|_| ())
            };
            self.requests.insert_admitted(&request, &admit).await
        } else {
            self.requests.insert(&request).await
        };
        match stored {
            Ok(()) => {}
            Err(RepositoryError::Refused(violations)) => {
                self.emit_submission(ctx, actor, None, AuditOutcome::Rejected, Some(&violations));
                return Err(violations.into());
            }
            Err(error) => return Err(error.into()),
        }

        tracing::info!(
            event_name = "lifecycle.submit.accepted",
            correlation_id = %ctx.correlation_id,
            request_id = %request.id,
            kind = %request.kind,
            stage = %request.stage(),
            requester = %student.actor_id,
            "request submitted"
        );
        self.emit_submission(ctx, actor, Some(&request), AuditOutcome::Success, None);

        Ok(Submission { request, summary })
    }

    /// Applies an approve/reject decision to a chained request.
    pub async fn transition(
        &self,
        request_id: &RequestId,
        actor: &Actor,
        decision: ReviewDecision,
        remark: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Request, ApplicationError> {
        self.commit_change(request_id, actor, Change::Review(decision), remark, ctx).await
    }

    /// Moves a complaint forward on behalf of its department incharge.
    pub async fn update_complaint(
        &self,
        request_id: &RequestId,
        actor: &Actor,
        status: ComplaintStatus,
        remark: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Request, ApplicationError> {
        self.commit_change(request_id, actor, Change::Complaint(status), remark, ctx).await
    }

    /// Loads a request with its full history. Students only see their own;
    /// anyone else's request reads as missing.
    pub async fn get(
        &self,
        request_id: &RequestId,
        viewer: &Actor,
    ) -> Result<Request, ApplicationError> {
        let request = self.load(request_id).await?;
        match viewer {
            Actor::Student(student) if request.requester.actor_id != student.actor_id => {
                Err(LifecycleError::NotFound(request_id.clone()).into())
            }
            _ => Ok(request),
        }
    }

    async fn load(&self, request_id: &RequestId) -> Result<Request, ApplicationError> {
        self.requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(request_id.clone()).into())
    }

    async fn commit_change(
        &self,
        request_id: &RequestId,
        actor: &Actor,
        change: Change,
        remark: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Request, ApplicationError> {
        let audit = AuditContext::new(Some(request_id.clone()), &ctx.correlation_id, actor.actor_id());

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let current = self.load(request_id).await?;
            let attempted = match change {
                Change::Review(decision) => {
                    self.engine.decide(&current, actor, decision, remark, ctx.now)
                }
                Change::Complaint(status) => {
                    self.engine.advance_complaint(&current, actor, status, remark, ctx.now)
                }
            };
            let outcome = match attempted {
                Ok(outcome) => outcome,
                Err(error) => {
                    audit_transition(self.audit.as_ref(), &audit, &Err(error.clone()));
                    return Err(error.into());
                }
            };

            match self
                .requests
                .commit_transition(&outcome.request, &outcome.record, outcome.previous_version)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        event_name = "lifecycle.transition.committed",
                        correlation_id = %ctx.correlation_id,
                        request_id = %request_id,
                        actor = %actor.actor_id(),
                        decision = outcome.record.decision.as_str(),
                        from = %outcome.record.from_stage,
                        to = %outcome.record.to_stage,
                        "transition committed"
                    );
                    let request = outcome.request.clone();
                    let notice = DecisionNotice::for_transition(
                        &outcome.request,
                        &outcome.record,
                        &ctx.correlation_id,
                    );
                    audit_transition(self.audit.as_ref(), &audit, &Ok(outcome));
                    if let Some(notice) = notice {
                        self.notifier.notify(notice);
                    }
                    return Ok(request);
                }
                Err(RepositoryError::VersionConflict { expected, .. }) => {
                    // Re-run against fresh state: the loser then sees the
                    // winner's stage and fails with a domain error.
                    tracing::warn!(
                        event_name = "lifecycle.transition.conflict",
                        correlation_id = %ctx.correlation_id,
                        request_id = %request_id,
                        expected_version = expected,
                        attempt,
                        "request changed concurrently, re-reading"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(ApplicationError::Transient(format!(
            "request {request_id} kept changing concurrently; retry later"
        )))
    }

    /// Every cited attachment must exist and have been uploaded by the
    /// submitting student.
    async fn check_attachments(
        &self,
        payload: &RequestPayload,
        student_id: &str,
    ) -> Result<(), ApplicationError> {
        let mut violations = ValidationError::default();
        for reference in payload.attachments() {
            match self.attachments.uploader(reference).await? {
                None => {
                    violations.push("attachments", format!("unknown attachment `{}`", reference.0))
                }
                Some(uploader) if uploader != student_id => violations.push(
                    "attachments",
                    format!("attachment `{}` belongs to another user", reference.0),
                ),
                Some(_) => {}
            }
        }
        violations.into_result().map_err(ApplicationError::from)
    }

    fn emit_submission(
        &self,
        ctx: &RequestContext,
        actor: &Actor,
        request: Option<&Request>,
        outcome: AuditOutcome,
        violations: Option<&ValidationError>,
    ) {
        let audit = AuditContext::new(
            request.map(|request| request.id.clone()),
            &ctx.correlation_id,
            actor.actor_id(),
        );
        let event_type = match outcome {
            AuditOutcome::Success => "lifecycle.submit.accepted",
            _ => "lifecycle.submit.rejected",
        };
        let mut event = AuditEvent::new(&audit, event_type, AuditCategory::Submission, outcome);
        if let Some(request) = request {
            event = event
                .with_metadata("kind", request.kind.as_str())
                .with_metadata("stage", request.stage().as_str());
        }
        if let Some(violations) = violations {
            event = event.with_metadata("violations", violations.to_string());
        }
        self.audit.emit(event);
    }
}
