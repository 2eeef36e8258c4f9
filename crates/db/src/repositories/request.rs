use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use campusflow_core::complaints::ComplaintCategory;
use campusflow_core::domain::history::{AuditRecord, Decision};
use campusflow_core::domain::request::{
    Request, RequestId, RequestKind, RequestPayload, Requester, ResidenceType, Stage,
    StoredRequest,
};
use campusflow_core::domain::stats::StageCount;
use campusflow_core::roles::{Jurisdiction, ReviewerRole, Role};

use super::{Admission, PendingFilter, RepositoryError, RequestRepository, RequestScope};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, kind, requester_id, reg_no, department, section,
    year_of_study, residence_type, payload_json, chain, complaint_category, stage,
    state_version, created_at, updated_at";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn hydrate<'c, E>(executor: E, rows: Vec<SqliteRow>) -> Result<Vec<Request>, RepositoryError>
where
    E: Executor<'c, Database = Sqlite>,
{
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids = rows
        .iter()
        .map(|row| row.try_get::<String, _>("id"))
        .collect::<Result<Vec<_>, _>>()?;
    let mut histories = load_histories(executor, &ids).await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.try_get("id")?;
            let history = histories.remove(&id).unwrap_or_default();
            request_from_row(row, history)
        })
        .collect()
}

async fn load_histories<'c, E>(
    executor: E,
    ids: &[String],
) -> Result<HashMap<String, Vec<AuditRecord>>, RepositoryError>
where
    E: Executor<'c, Database = Sqlite>,
{
    let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
        "SELECT request_id, sequence, actor_role, actor_id, decision, remark,
                from_stage, to_stage, occurred_at
         FROM request_audit WHERE request_id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(") ORDER BY request_id, sequence ASC");

    let rows = builder.build().fetch_all(executor).await?;
    let mut histories: HashMap<String, Vec<AuditRecord>> = HashMap::new();
    for row in rows {
        let request_id: String = row.try_get("request_id")?;
        histories.entry(request_id).or_default().push(audit_from_row(&row)?);
    }
    Ok(histories)
}

async fn insert_row<'c, E>(executor: E, request: &Request) -> Result<(), RepositoryError>
where
    E: Executor<'c, Database = Sqlite>,
{
    let payload_json = serde_json::to_string(&request.payload)
        .map_err(|error| RepositoryError::Decode(format!("payload encode failed: {error}")))?;

    let result = sqlx::query(
        "INSERT INTO request (id, kind, requester_id, reg_no, department, section, year_of_study,
                              residence_type, floor_id, payload_json, chain, complaint_category,
                              stage, required_role, state_version, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(request.kind.as_str())
    .bind(&request.requester.actor_id)
    .bind(&request.requester.reg_no)
    .bind(&request.requester.department)
    .bind(&request.requester.section)
    .bind(i64::from(request.requester.year_of_study))
    .bind(request.requester.residence_type.as_str())
    .bind(request.payload.hostel_floor().map(i64::from))
    .bind(payload_json)
    .bind(encode_chain(&request.chain))
    .bind(request.complaint_category.map(|category| category.as_str()))
    .bind(request.stage().as_str())
    .bind(request.required_role().map(|role| role.as_str()))
    .bind(i64::from(request.version()))
    .bind(request.created_at.to_rfc3339())
    .bind(request.updated_at.to_rfc3339())
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
            Err(RepositoryError::Duplicate(format!("request {}", request.id)))
        }
        Err(error) => Err(error.into()),
    }
}

/// Appends ` AND ...` clauses limiting rows to the students a reviewer covers.
fn push_jurisdiction(builder: &mut QueryBuilder<'_, Sqlite>, jurisdiction: &Jurisdiction) {
    match jurisdiction {
        Jurisdiction::Class { department, year_of_study, section } => {
            push_department(builder, department);
            if let Some(year) = year_of_study {
                builder.push(" AND year_of_study = ").push_bind(i64::from(*year));
            }
            if let Some(section) = section {
                builder
                    .push(" AND lower(trim(section)) = lower(trim(")
                    .push_bind(section.clone())
                    .push("))");
            }
        }
        Jurisdiction::Department(department) => push_department(builder, department),
        Jurisdiction::Floors(floors) if floors.is_empty() => {
            builder.push(" AND 0");
        }
        Jurisdiction::Floors(floors) => {
            builder.push(" AND floor_id IN (");
            let mut separated = builder.separated(", ");
            for floor in floors {
                separated.push_bind(i64::from(*floor));
            }
            separated.push_unseparated(")");
        }
    }
}

fn push_department(builder: &mut QueryBuilder<'_, Sqlite>, department: &str) {
    builder
        .push(" AND lower(trim(department)) = lower(trim(")
        .push_bind(department.to_owned())
        .push("))");
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn insert(&self, request: &Request) -> Result<(), RepositoryError> {
        insert_row(&self.pool, request).await
    }

    async fn insert_admitted(
        &self,
        request: &Request,
        admit: Admission<'_>,
    ) -> Result<(), RepositoryError> {
        // IMMEDIATE takes the write lock up front; a second submitter waits
        // on busy_timeout and then reads our committed row.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM request
             WHERE requester_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(&request.requester.actor_id)
        .fetch_all(&mut *tx)
        .await?;
        let existing = hydrate(&mut *tx, rows).await?;

        if let Err(violations) = admit(&existing) {
            tx.rollback().await?;
            return Err(RepositoryError::Refused(violations));
        }

        insert_row(&mut *tx, request).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(hydrate(&self.pool, vec![row]).await?.into_iter().next()),
            None => Ok(None),
        }
    }

    async fn commit_transition(
        &self,
        request: &Request,
        record: &AuditRecord,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE request
             SET stage = ?, required_role = ?, state_version = ?, updated_at = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(request.stage().as_str())
        .bind(request.required_role().map(|role| role.as_str()))
        .bind(i64::from(request.version()))
        .bind(request.updated_at.to_rfc3339())
        .bind(&request.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::VersionConflict {
                request_id: request.id.clone(),
                expected: expected_version,
            });
        }

        sqlx::query(
            "INSERT INTO request_audit (id, request_id, sequence, actor_role, actor_id, decision,
                                        remark, from_stage, to_stage, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&request.id.0)
        .bind(i64::from(record.sequence))
        .bind(record.actor_role.as_str())
        .bind(&record.actor_id)
        .bind(record.decision.as_str())
        .bind(&record.remark)
        .bind(record.from_stage.as_str())
        .bind(record.to_stage.as_str())
        .bind(record.occurred_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_for_requester(&self, requester_id: &str) -> Result<Vec<Request>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM request
             WHERE requester_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await?;

        hydrate(&self.pool, rows).await
    }

    async fn list_pending(&self, filter: &PendingFilter) -> Result<Vec<Request>, RepositoryError> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM request WHERE required_role = "
        ));
        builder.push_bind(filter.role.as_str());
        if let Some(residence) = filter.residence {
            builder.push(" AND residence_type = ").push_bind(residence.as_str());
        }
        if let Some(category) = filter.complaint_category {
            builder.push(" AND complaint_category = ").push_bind(category.as_str());
        }
        if let Some(jurisdiction) = &filter.jurisdiction {
            push_jurisdiction(&mut builder, jurisdiction);
        }
        builder.push(" ORDER BY created_at ASC, id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        hydrate(&self.pool, rows).await
    }

    async fn list_acted_by(&self, actor_id: &str) -> Result<Vec<Request>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT r.id, r.kind, r.requester_id, r.reg_no, r.department, r.section,
                    r.year_of_study, r.residence_type, r.payload_json, r.chain,
                    r.complaint_category, r.stage, r.state_version, r.created_at, r.updated_at
             FROM request r
             JOIN (
                 SELECT request_id, MAX(occurred_at) AS last_action_at
                 FROM request_audit
                 WHERE actor_id = ?
                 GROUP BY request_id
             ) acted ON acted.request_id = r.id
             ORDER BY acted.last_action_at DESC, r.id DESC",
        )
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;

        hydrate(&self.pool, rows).await
    }

    async fn stage_counts(&self, scope: &RequestScope) -> Result<Vec<StageCount>, RepositoryError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT kind, stage, COUNT(*) AS count FROM request WHERE ");
        match scope {
            RequestScope::Chain { role, jurisdiction } => {
                builder.push("(',' || chain || ',') LIKE ").push_bind(format!("%,{},%", role.as_str()));
                if let Some(jurisdiction) = jurisdiction {
                    push_jurisdiction(&mut builder, jurisdiction);
                }
            }
            RequestScope::Complaints(category) => {
                builder
                    .push("kind = 'complaint' AND complaint_category = ")
                    .push_bind(category.as_str());
            }
            RequestScope::Requester(requester_id) => {
                builder.push("requester_id = ").push_bind(requester_id.clone());
            }
        }
        builder.push(" GROUP BY kind, stage ORDER BY kind, stage");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let kind_raw: String = row.try_get("kind")?;
                let kind = RequestKind::parse(&kind_raw).ok_or_else(|| {
                    RepositoryError::Decode(format!("unknown request kind `{kind_raw}`"))
                })?;
                let stage_raw: String = row.try_get("stage")?;
                let stage = Stage::parse(&stage_raw)
                    .ok_or_else(|| RepositoryError::Decode(format!("unknown stage `{stage_raw}`")))?;
                let count: i64 = row.try_get("count")?;
                Ok(StageCount::new(kind, stage, u64::try_from(count).unwrap_or_default()))
            })
            .collect()
    }
}

pub(crate) fn encode_chain(chain: &[ReviewerRole]) -> String {
    chain.iter().map(|role| role.as_str()).collect::<Vec<_>>().join(",")
}

pub(crate) fn decode_chain(raw: &str) -> Result<Vec<ReviewerRole>, RepositoryError> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            ReviewerRole::parse(value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown chain role `{value}`")))
        })
        .collect()
}

fn request_from_row(row: SqliteRow, history: Vec<AuditRecord>) -> Result<Request, RepositoryError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = RequestKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request kind `{kind_raw}`")))?;

    let payload_json: String = row.try_get("payload_json")?;
    let payload: RequestPayload = serde_json::from_str(&payload_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid payload_json: {error}")))?;
    if payload.kind() != kind {
        return Err(RepositoryError::Decode(format!(
            "payload kind `{}` does not match column kind `{kind}`",
            payload.kind()
        )));
    }

    let residence_raw: String = row.try_get("residence_type")?;
    let residence_type = ResidenceType::parse(&residence_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown residence type `{residence_raw}`"))
    })?;

    let stage_raw: String = row.try_get("stage")?;
    let stage = Stage::parse(&stage_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown stage `{stage_raw}`")))?;

    let complaint_category = row
        .try_get::<Option<String>, _>("complaint_category")?
        .map(|value| {
            ComplaintCategory::parse(&value).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown complaint category `{value}`"))
            })
        })
        .transpose()?;

    let year_of_study: i64 = row.try_get("year_of_study")?;
    let year_of_study = u8::try_from(year_of_study).map_err(|_| {
        RepositoryError::Decode(format!("invalid year_of_study: {year_of_study}"))
    })?;

    Ok(Request::rehydrate(StoredRequest {
        id: RequestId(row.try_get("id")?),
        requester: Requester {
            actor_id: row.try_get("requester_id")?,
            reg_no: row.try_get("reg_no")?,
            department: row.try_get("department")?,
            section: row.try_get("section")?,
            year_of_study,
            residence_type,
        },
        payload,
        chain: decode_chain(&row.try_get::<String, _>("chain")?)?,
        complaint_category,
        stage,
        history,
        version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    }))
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditRecord, RepositoryError> {
    let role_raw: String = row.try_get("actor_role")?;
    let actor_role = Role::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown actor_role `{role_raw}`")))?;
    let decision_raw: String = row.try_get("decision")?;
    let decision = Decision::parse(&decision_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown decision `{decision_raw}`")))?;
    let from_raw: String = row.try_get("from_stage")?;
    let from_stage = Stage::parse(&from_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown from_stage `{from_raw}`")))?;
    let to_raw: String = row.try_get("to_stage")?;
    let to_stage = Stage::parse(&to_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown to_stage `{to_raw}`")))?;

    Ok(AuditRecord {
        sequence: parse_u32("sequence", row.try_get("sequence")?)?,
        actor_role,
        actor_id: row.try_get("actor_id")?,
        decision,
        remark: row.try_get("remark")?,
        from_stage,
        to_stage,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
