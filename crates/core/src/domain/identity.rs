use serde::{Deserialize, Serialize};

use crate::domain::request::ResidenceType;

/// Identity as supplied by the authentication provider.
///
/// `role` is kept as the raw provider string; [`crate::roles::RoleResolver`]
/// is the only place it is interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub actor_id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub department: String,
    pub student: Option<StudentProfile>,
    #[serde(default)]
    pub assignment: Option<ReviewerAssignment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub reg_no: String,
    pub section: Option<String>,
    pub year_of_study: u8,
    pub residence_type: ResidenceType,
}

/// Which students a reviewer answers for beyond their department.
///
/// Advisors use `section` and `year_of_study` (unset means any); wardens use
/// `floor_ids`. HODs need nothing beyond the department.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerAssignment {
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub year_of_study: Option<u8>,
    #[serde(default)]
    pub floor_ids: Vec<u32>,
}
