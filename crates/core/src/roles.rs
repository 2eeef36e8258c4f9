use std::fmt;

use serde::{Deserialize, Serialize};

use crate::complaints::ComplaintCategory;
use crate::domain::identity::IdentityRecord;
use crate::domain::request::{Request, Requester};
use crate::errors::LifecycleError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Advisor,
    Hod,
    Warden,
    DeptIncharge,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Advisor => "advisor",
            Self::Hod => "hod",
            Self::Warden => "warden",
            Self::DeptIncharge => "dept_incharge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Self::Student),
            "advisor" => Some(Self::Advisor),
            "hod" => Some(Self::Hod),
            "warden" => Some(Self::Warden),
            "dept_incharge" | "dept-incharge" | "incharge" => Some(Self::DeptIncharge),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles that occupy a stage of an approval chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerRole {
    Advisor,
    Hod,
    Warden,
}

impl ReviewerRole {
    pub fn as_str(&self) -> &'static str {
        Role::from(*self).as_str()
    }

    pub fn parse(value: &str) -> Option<Self> {
        match Role::parse(value)? {
            Role::Advisor => Some(Self::Advisor),
            Role::Hod => Some(Self::Hod),
            Role::Warden => Some(Self::Warden),
            Role::Student | Role::DeptIncharge => None,
        }
    }
}

impl From<ReviewerRole> for Role {
    fn from(value: ReviewerRole) -> Self {
        match value {
            ReviewerRole::Advisor => Self::Advisor,
            ReviewerRole::Hod => Self::Hod,
            ReviewerRole::Warden => Self::Warden,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StudentActor {
    pub actor_id: String,
    pub email: String,
    pub requester: Requester,
}

/// The students a reviewer may see and decide for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Jurisdiction {
    /// Class advisor. Unset year or section matches any.
    Class { department: String, year_of_study: Option<u8>, section: Option<String> },
    /// Head of a department.
    Department(String),
    /// Warden of these hostel floors. No floors means no outpasses.
    Floors(Vec<u32>),
}

impl Jurisdiction {
    pub fn covers(&self, request: &Request) -> bool {
        let requester = &request.requester;
        match self {
            Self::Class { department, year_of_study, section } => {
                same_department(department, &requester.department)
                    && year_of_study.map_or(true, |year| year == requester.year_of_study)
                    && section.as_deref().map_or(true, |section| {
                        requester
                            .section
                            .as_deref()
                            .is_some_and(|own| own.trim().eq_ignore_ascii_case(section.trim()))
                    })
            }
            Self::Department(department) => same_department(department, &requester.department),
            Self::Floors(floors) => {
                request.payload.hostel_floor().is_some_and(|floor| floors.contains(&floor))
            }
        }
    }
}

fn same_department(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewerActor {
    pub actor_id: String,
    pub email: String,
    pub role: ReviewerRole,
    pub jurisdiction: Jurisdiction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InchargeActor {
    pub actor_id: String,
    pub email: String,
    pub department: ComplaintCategory,
}

/// Resolved caller. Each variant carries only what its operations need.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Actor {
    Student(StudentActor),
    Reviewer(ReviewerActor),
    DeptIncharge(InchargeActor),
}

impl Actor {
    pub fn role(&self) -> Role {
        match self {
            Self::Student(_) => Role::Student,
            Self::Reviewer(reviewer) => reviewer.role.into(),
            Self::DeptIncharge(_) => Role::DeptIncharge,
        }
    }

    pub fn actor_id(&self) -> &str {
        match self {
            Self::Student(student) => &student.actor_id,
            Self::Reviewer(reviewer) => &reviewer.actor_id,
            Self::DeptIncharge(incharge) => &incharge.actor_id,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Self::Student(student) => &student.email,
            Self::Reviewer(reviewer) => &reviewer.email,
            Self::DeptIncharge(incharge) => &incharge.email,
        }
    }

    pub fn is_staff(&self) -> bool {
        !matches!(self, Self::Student(_))
    }
}

/// Maps provider identities onto [`Actor`]s. Pure lookup, no I/O.
#[derive(Clone, Debug, Default)]
pub struct RoleResolver {
    allowed_email_domain: Option<String>,
}

impl RoleResolver {
    pub fn new(allowed_email_domain: Option<String>) -> Self {
        let allowed_email_domain = allowed_email_domain
            .map(|domain| domain.trim().trim_start_matches('@').to_ascii_lowercase())
            .filter(|domain| !domain.is_empty());
        Self { allowed_email_domain }
    }

    pub fn resolve(&self, identity: &IdentityRecord) -> Result<Actor, LifecycleError> {
        let unknown = |reason: String| LifecycleError::UnknownRole {
            identity: identity.email.clone(),
            reason,
        };

        if let Some(domain) = &self.allowed_email_domain {
            let email = identity.email.to_ascii_lowercase();
            let in_domain = email
                .rsplit_once('@')
                .map(|(_, email_domain)| email_domain == domain)
                .unwrap_or(false);
            if !in_domain {
                return Err(unknown(format!("email is outside the `{domain}` domain")));
            }
        }

        let role = Role::parse(&identity.role)
            .ok_or_else(|| unknown(format!("role `{}` is not recognized", identity.role)))?;

        let actor = match role {
            Role::Student => {
                let profile = identity
                    .student
                    .as_ref()
                    .ok_or_else(|| unknown("student identity has no student profile".to_owned()))?;
                Actor::Student(StudentActor {
                    actor_id: identity.actor_id.clone(),
                    email: identity.email.clone(),
                    requester: Requester {
                        actor_id: identity.actor_id.clone(),
                        reg_no: profile.reg_no.clone(),
                        department: identity.department.clone(),
                        section: profile.section.clone(),
                        year_of_study: profile.year_of_study,
                        residence_type: profile.residence_type,
                    },
                })
            }
            Role::Advisor | Role::Hod | Role::Warden => {
                let assignment = identity.assignment.clone().unwrap_or_default();
                let (reviewer, jurisdiction) = match role {
                    Role::Advisor => (
                        ReviewerRole::Advisor,
                        Jurisdiction::Class {
                            department: identity.department.clone(),
                            year_of_study: assignment.year_of_study,
                            section: assignment.section,
                        },
                    ),
                    Role::Hod => {
                        (ReviewerRole::Hod, Jurisdiction::Department(identity.department.clone()))
                    }
                    _ => (ReviewerRole::Warden, Jurisdiction::Floors(assignment.floor_ids)),
                };
                Actor::Reviewer(ReviewerActor {
                    actor_id: identity.actor_id.clone(),
                    email: identity.email.clone(),
                    role: reviewer,
                    jurisdiction,
                })
            }
            Role::DeptIncharge => {
                let department = ComplaintCategory::parse(&identity.department).ok_or_else(|| {
                    unknown(format!(
                        "incharge department `{}` is not a complaint category",
                        identity.department
                    ))
                })?;
                Actor::DeptIncharge(InchargeActor {
                    actor_id: identity.actor_id.clone(),
                    email: identity.email.clone(),
                    department,
                })
            }
        };

        Ok(actor)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    use super::{Actor, Jurisdiction, ReviewerRole, Role, RoleResolver};
    use crate::chain::ApprovalEngine;
    use crate::complaints::ComplaintCategory;
    use crate::domain::identity::{IdentityRecord, ReviewerAssignment, StudentProfile};
    use crate::domain::request::{
        OutpassPayload, Request, RequestId, RequestPayload, Requester, ResidenceType,
    };
    use crate::errors::LifecycleError;

    fn identity(role: &str, email: &str) -> IdentityRecord {
        IdentityRecord {
            actor_id: "actor-1".to_owned(),
            email: email.to_owned(),
            display_name: "Test Person".to_owned(),
            role: role.to_owned(),
            department: "CSE".to_owned(),
            student: None,
            assignment: None,
        }
    }

    fn outpass_from(department: &str, section: Option<&str>, year: u8, floor: u32) -> Request {
        let day = NaiveDate::from_ymd_opt(2026, 3, 4).expect("valid date");
        ApprovalEngine::default()
            .open(
                RequestId("REQ-J".to_owned()),
                Requester {
                    actor_id: "stu-1".to_owned(),
                    reg_no: "CSE22014".to_owned(),
                    department: department.to_owned(),
                    section: section.map(str::to_owned),
                    year_of_study: year,
                    residence_type: ResidenceType::Hosteler,
                },
                RequestPayload::Outpass(OutpassPayload {
                    out_date: day,
                    out_time: NaiveTime::from_hms_opt(10, 0, 0).expect("valid time"),
                    purpose: "home visit".to_owned(),
                    contact_number: "9876543210".to_owned(),
                    parent_mobile: "9123456780".to_owned(),
                    in_date: Some(day),
                    in_time: NaiveTime::from_hms_opt(18, 0, 0),
                    hostel_id: Some(1),
                    floor_id: Some(floor),
                    room_no: Some("214".to_owned()),
                }),
                Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp"),
            )
            .expect("outpass opens")
    }

    #[test]
    fn resolves_student_with_residence_type() {
        let mut record = identity("STUDENT", "asha@college.edu");
        record.student = Some(StudentProfile {
            reg_no: "CSE21001".to_owned(),
            section: Some("A".to_owned()),
            year_of_study: 3,
            residence_type: ResidenceType::Hosteler,
        });

        let actor = RoleResolver::default().resolve(&record).expect("student resolves");

        match actor {
            Actor::Student(student) => {
                assert_eq!(student.requester.residence_type, ResidenceType::Hosteler);
                assert_eq!(student.requester.department, "CSE");
            }
            other => panic!("expected student actor, got {other:?}"),
        }
    }

    #[test]
    fn student_without_profile_is_unknown_role() {
        let error = RoleResolver::default()
            .resolve(&identity("student", "asha@college.edu"))
            .expect_err("profile is required");

        assert!(matches!(error, LifecycleError::UnknownRole { .. }));
    }

    #[test]
    fn reviewer_and_incharge_spellings_resolve() {
        let resolver = RoleResolver::default();

        let hod = resolver.resolve(&identity("HOD", "hod@college.edu")).expect("hod resolves");
        assert_eq!(hod.role(), Role::Hod);

        let mut incharge = identity("dept-incharge", "water@college.edu");
        incharge.department = "water".to_owned();
        let actor = resolver.resolve(&incharge).expect("incharge resolves");
        assert!(matches!(
            actor,
            Actor::DeptIncharge(ref inner) if inner.department == ComplaintCategory::Water
        ));
    }

    #[test]
    fn unrecognized_role_is_rejected() {
        let error = RoleResolver::default()
            .resolve(&identity("janitor", "someone@college.edu"))
            .expect_err("unknown role");

        assert!(matches!(error, LifecycleError::UnknownRole { ref reason, .. } if reason.contains("janitor")));
    }

    #[test]
    fn email_outside_allowed_domain_is_rejected() {
        let resolver = RoleResolver::new(Some("@College.edu".to_owned()));

        assert!(resolver.resolve(&identity("advisor", "ravi@college.edu")).is_ok());
        assert!(matches!(
            resolver.resolve(&identity("advisor", "ravi@gmail.com")),
            Err(LifecycleError::UnknownRole { .. })
        ));
    }

    #[test]
    fn reviewers_carry_jurisdiction_from_their_assignment() {
        let resolver = RoleResolver::default();

        let mut advisor = identity("advisor", "adv@college.edu");
        advisor.assignment = Some(ReviewerAssignment {
            section: Some("B".to_owned()),
            year_of_study: Some(3),
            floor_ids: Vec::new(),
        });
        let mut warden = identity("warden", "warden@college.edu");
        warden.department = "HOSTEL".to_owned();
        warden.assignment =
            Some(ReviewerAssignment { section: None, year_of_study: None, floor_ids: vec![1, 2] });

        let jurisdiction = |actor: Actor| match actor {
            Actor::Reviewer(reviewer) => reviewer.jurisdiction,
            other => panic!("expected reviewer, got {other:?}"),
        };

        assert_eq!(
            jurisdiction(resolver.resolve(&advisor).expect("advisor resolves")),
            Jurisdiction::Class {
                department: "CSE".to_owned(),
                year_of_study: Some(3),
                section: Some("B".to_owned()),
            }
        );
        assert_eq!(
            jurisdiction(resolver.resolve(&identity("hod", "hod@college.edu")).expect("hod resolves")),
            Jurisdiction::Department("CSE".to_owned())
        );
        assert_eq!(
            jurisdiction(resolver.resolve(&warden).expect("warden resolves")),
            Jurisdiction::Floors(vec![1, 2])
        );
    }

    #[test]
    fn jurisdiction_matches_class_department_and_floor() {
        let class = Jurisdiction::Class {
            department: "cse".to_owned(),
            year_of_study: Some(3),
            section: Some("a".to_owned()),
        };
        assert!(class.covers(&outpass_from("CSE", Some("A"), 3, 1)));
        assert!(!class.covers(&outpass_from("CSE", Some("B"), 3, 1)));
        assert!(!class.covers(&outpass_from("CSE", Some("A"), 2, 1)));
        assert!(!class.covers(&outpass_from("ECE", Some("A"), 3, 1)));
        assert!(!class.covers(&outpass_from("CSE", None, 3, 1)));

        let whole_department =
            Jurisdiction::Class { department: "CSE".to_owned(), year_of_study: None, section: None };
        assert!(whole_department.covers(&outpass_from("CSE", None, 4, 1)));

        let hod = Jurisdiction::Department("CSE".to_owned());
        assert!(hod.covers(&outpass_from("CSE", Some("B"), 2, 1)));
        assert!(!hod.covers(&outpass_from("MECH", Some("B"), 2, 1)));

        let warden = Jurisdiction::Floors(vec![2, 3]);
        assert!(warden.covers(&outpass_from("CSE", None, 3, 3)));
        assert!(!warden.covers(&outpass_from("CSE", None, 3, 1)));
        assert!(!Jurisdiction::Floors(Vec::new()).covers(&outpass_from("CSE", None, 3, 1)));
    }

    #[test]
    fn reviewer_role_parse_rejects_non_chain_roles() {
        assert_eq!(ReviewerRole::parse("warden"), Some(ReviewerRole::Warden));
        assert_eq!(ReviewerRole::parse("student"), None);
    }
}
