use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use campusflow_core::domain::identity::{IdentityRecord, ReviewerAssignment, StudentProfile};
use campusflow_core::domain::request::ResidenceType;

use super::{IdentityRepository, RepositoryError};
use crate::DbPool;

const IDENTITY_COLUMNS: &str = "actor_id, email, display_name, role, department, reg_no, section,
    year_of_study, residence_type, advises_section, advises_year, warden_floor_ids";

pub struct SqlIdentityRepository {
    pool: DbPool,
}

impl SqlIdentityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IdentityRepository for SqlIdentityRepository {
    async fn find_by_actor_id(
        &self,
        actor_id: &str,
    ) -> Result<Option<IdentityRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {IDENTITY_COLUMNS} FROM identity WHERE actor_id = ?"))
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| identity_from_row(&row)).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identity WHERE lower(email) = lower(?)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| identity_from_row(&row)).transpose()
    }

    async fn save(&self, identity: IdentityRecord) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let student = identity.student.as_ref();
        let assignment = identity.assignment.as_ref();

        let result = sqlx::query(
            "INSERT INTO identity (actor_id, email, display_name, role, department, reg_no,
                                   section, year_of_study, residence_type, advises_section,
                                   advises_year, warden_floor_ids, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(actor_id) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                role = excluded.role,
                department = excluded.department,
                reg_no = excluded.reg_no,
                section = excluded.section,
                year_of_study = excluded.year_of_study,
                residence_type = excluded.residence_type,
                advises_section = excluded.advises_section,
                advises_year = excluded.advises_year,
                warden_floor_ids = excluded.warden_floor_ids,
                updated_at = excluded.updated_at",
        )
        .bind(&identity.actor_id)
        .bind(&identity.email)
        .bind(&identity.display_name)
        .bind(&identity.role)
        .bind(&identity.department)
        .bind(student.map(|profile| profile.reg_no.clone()))
        .bind(student.and_then(|profile| profile.section.clone()))
        .bind(student.map(|profile| i64::from(profile.year_of_study)))
        .bind(student.map(|profile| profile.residence_type.as_str()))
        .bind(assignment.and_then(|assigned| assigned.section.clone()))
        .bind(assignment.and_then(|assigned| assigned.year_of_study).map(i64::from))
        .bind(assignment.map(|assigned| encode_floors(&assigned.floor_ids)).unwrap_or_default())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => Err(
                RepositoryError::Duplicate(format!("email {} already belongs to another identity", identity.email)),
            ),
            Err(error) => Err(error.into()),
        }
    }
}

fn identity_from_row(row: &SqliteRow) -> Result<IdentityRecord, RepositoryError> {
    let reg_no: Option<String> = row.try_get("reg_no")?;
    let year_of_study: Option<i64> = row.try_get("year_of_study")?;
    let residence_type: Option<String> = row.try_get("residence_type")?;

    // A profile is only present when all of its required columns are.
    let student = match (reg_no, year_of_study, residence_type) {
        (Some(reg_no), Some(year), Some(residence)) => Some(StudentProfile {
            reg_no,
            section: row.try_get("section")?,
            year_of_study: u8::try_from(year)
                .map_err(|_| RepositoryError::Decode(format!("invalid year_of_study: {year}")))?,
            residence_type: ResidenceType::parse(&residence).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown residence type `{residence}`"))
            })?,
        }),
        _ => None,
    };

    let advises_year: Option<i64> = row.try_get("advises_year")?;
    let assignment = ReviewerAssignment {
        section: row.try_get("advises_section")?,
        year_of_study: advises_year
            .map(|year| {
                u8::try_from(year)
                    .map_err(|_| RepositoryError::Decode(format!("invalid advises_year: {year}")))
            })
            .transpose()?,
        floor_ids: decode_floors(&row.try_get::<String, _>("warden_floor_ids")?)?,
    };

    Ok(IdentityRecord {
        actor_id: row.try_get("actor_id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        role: row.try_get("role")?,
        department: row.try_get("department")?,
        student,
        // An all-empty assignment reads back as none.
        assignment: (assignment != ReviewerAssignment::default()).then_some(assignment),
    })
}

fn encode_floors(floors: &[u32]) -> String {
    floors.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

fn decode_floors(raw: &str) -> Result<Vec<u32>, RepositoryError> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            value
                .parse()
                .map_err(|_| RepositoryError::Decode(format!("invalid warden floor `{value}`")))
        })
        .collect()
}
