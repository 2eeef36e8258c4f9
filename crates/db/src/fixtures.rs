use campusflow_core::domain::identity::{IdentityRecord, ReviewerAssignment, StudentProfile};
use campusflow_core::domain::request::ResidenceType;

use crate::repositories::{IdentityRepository, RepositoryError};

/// Deterministic identity directory for local runs and smoke checks.
///
/// Covers one student of each residence type plus every reviewer role and a
/// hostel incharge, so each approval chain can be walked end to end.
pub struct SeedDataset;

struct SeedIdentity {
    actor_id: &'static str,
    email: &'static str,
    display_name: &'static str,
    role: &'static str,
    department: &'static str,
    student: Option<(&'static str, u8, ResidenceType)>,
    /// Section and year an advisor answers for.
    advises: Option<(&'static str, u8)>,
    /// Hostel floors a warden answers for.
    floors: &'static [u32],
}

const SEED_IDENTITIES: &[SeedIdentity] = &[
    SeedIdentity {
        actor_id: "stu-hosteler",
        email: "hosteler.student@college.edu",
        display_name: "Anitha R",
        role: "student",
        department: "CSE",
        student: Some(("22CS041", 3, ResidenceType::Hosteler)),
        advises: None,
        floors: &[],
    },
    SeedIdentity {
        actor_id: "stu-dayscholar",
        email: "dayscholar.student@college.edu",
        display_name: "Karthik S",
        role: "student",
        department: "CSE",
        student: Some(("22CS057", 3, ResidenceType::DayScholar)),
        advises: None,
        floors: &[],
    },
    SeedIdentity {
        actor_id: "adv-1",
        email: "advisor.cse@college.edu",
        display_name: "Meena V",
        role: "advisor",
        department: "CSE",
        student: None,
        advises: Some(("A", 3)),
        floors: &[],
    },
    SeedIdentity {
        actor_id: "hod-1",
        email: "hod.cse@college.edu",
        display_name: "Dr. Prakash N",
        role: "hod",
        department: "CSE",
        student: None,
        advises: None,
        floors: &[],
    },
    SeedIdentity {
        actor_id: "warden-1",
        email: "warden@college.edu",
        display_name: "Suresh K",
        role: "warden",
        department: "HOSTEL",
        student: None,
        advises: None,
        floors: &[1, 2, 3, 4],
    },
    SeedIdentity {
        actor_id: "incharge-hostel",
        email: "hostel.incharge@college.edu",
        display_name: "Lakshmi P",
        role: "dept_incharge",
        department: "HOSTEL",
        student: None,
        advises: None,
        floors: &[],
    },
];

impl SeedIdentity {
    fn record(&self) -> IdentityRecord {
        IdentityRecord {
            actor_id: self.actor_id.to_owned(),
            email: self.email.to_owned(),
            display_name: self.display_name.to_owned(),
            role: self.role.to_owned(),
            department: self.department.to_owned(),
            student: self.student.map(|(reg_no, year_of_study, residence_type)| StudentProfile {
                reg_no: reg_no.to_owned(),
                section: Some("A".to_owned()),
                year_of_study,
                residence_type,
            }),
            assignment: self.assignment(),
        }
    }

    fn assignment(&self) -> Option<ReviewerAssignment> {
        if self.advises.is_none() && self.floors.is_empty() {
            return None;
        }
        Some(ReviewerAssignment {
            section: self.advises.map(|(section, _)| section.to_owned()),
            year_of_study: self.advises.map(|(_, year)| year),
            floor_ids: self.floors.to_vec(),
        })
    }
}

impl SeedDataset {
    pub const HOSTELER: &'static str = "stu-hosteler";
    pub const DAY_SCHOLAR: &'static str = "stu-dayscholar";
    pub const ADVISOR: &'static str = "adv-1";
    pub const HOD: &'static str = "hod-1";
    pub const WARDEN: &'static str = "warden-1";
    pub const HOSTEL_INCHARGE: &'static str = "incharge-hostel";

    /// Upserts every seed identity. Safe to run repeatedly.
    pub async fn load(repo: &dyn IdentityRepository) -> Result<SeedResult, RepositoryError> {
        let mut identities_seeded = Vec::with_capacity(SEED_IDENTITIES.len());
        for seed in SEED_IDENTITIES {
            repo.save(seed.record()).await?;
            identities_seeded.push(SeededIdentity {
                actor_id: seed.actor_id,
                email: seed.email,
                role: seed.role,
            });
        }
        Ok(SeedResult { identities_seeded })
    }

    /// Checks each seed identity is present and unchanged.
    pub async fn verify(repo: &dyn IdentityRepository) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_IDENTITIES.len());
        for seed in SEED_IDENTITIES {
            let stored = repo.find_by_actor_id(seed.actor_id).await?;
            checks.push((seed.actor_id, stored.as_ref() == Some(&seed.record())));
        }
        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub identities_seeded: Vec<SeededIdentity>,
}

#[derive(Debug)]
pub struct SeededIdentity {
    pub actor_id: &'static str,
    pub email: &'static str,
    pub role: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
