use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AttentionLevel, Breakdown, CaseRecord, CaseStatus, CounselorComment, DeletionLogEntry,
    ImprovementRecord, NewObservation, ObservationRecord, Role, ScoreResult, ScoringRecord,
    Student, User,
};
use crate::risk;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    log::info!("schema migrations applied");
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    let users = vec![
        (
            Uuid::parse_str("8a6a3c3e-5d4b-4a51-9f0e-0f1c2b3a4d51")?,
            "rosa.diaz@school.example",
            "Rosa Diaz",
            Role::Teacher,
        ),
        (
            Uuid::parse_str("b1f2c3d4-6e7f-4a8b-9c0d-1e2f3a4b5c62")?,
            "marco.ruiz@school.example",
            "Marco Ruiz",
            Role::Counselor,
        ),
        (
            Uuid::parse_str("c4d5e6f7-8a9b-4c0d-8e1f-2a3b4c5d6e73")?,
            "admin@school.example",
            "School Admin",
            Role::Admin,
        ),
    ];

    for (id, email, name, role) in users {
        sqlx::query(
            r#"
            INSERT INTO behavior_early_warning.users (id, email, full_name, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET full_name = EXCLUDED.full_name, role = EXCLUDED.role
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(name)
        .bind(role.as_str())
        .execute(&mut *tx)
        .await?;
    }

    let teacher_id = find_user_by_email(&mut tx, "rosa.diaz@school.example").await?;

    let observations = vec![
        (
            "seed-001",
            "Avery Lee",
            "5A",
            "Left the classroom twice without permission",
            AttentionLevel::Low,
            2,
            1,
            2,
            NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?,
        ),
        (
            "seed-002",
            "Avery Lee",
            "5A",
            "Did not start the math worksheet",
            AttentionLevel::Medium,
            3,
            2,
            2,
            NaiveDate::from_ymd_opt(2026, 2, 4).context("invalid date")?,
        ),
        (
            "seed-003",
            "Jules Moreno",
            "5B",
            "Quiet in group work, finished tasks",
            AttentionLevel::Medium,
            3,
            4,
            4,
            NaiveDate::from_ymd_opt(2026, 1, 30).context("invalid date")?,
        ),
        (
            "seed-004",
            "Kiara Patel",
            "6A",
            "Helped peers and stayed on task",
            AttentionLevel::High,
            5,
            5,
            4,
            NaiveDate::from_ymd_opt(2026, 1, 28).context("invalid date")?,
        ),
    ];

    for (source_key, name, group, behavior, attention, social, following, concentration, observed_on) in
        observations
    {
        let student_id = upsert_student(&mut tx, name, group).await?.id;
        insert_observation(
            &mut tx,
            &NewObservation {
                student_id,
                teacher_id,
                behavior: behavior.to_string(),
                attention_level: attention,
                social_interaction: social,
                instruction_following: following,
                concentration,
                observed_on: Some(observed_on),
                source_key: Some(source_key.to_string()),
            },
        )
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn find_user_by_email(conn: &mut PgConnection, email: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query("SELECT id FROM behavior_early_warning.users WHERE email = $1")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await?
        .with_context(|| format!("no user with email {email}"))?;
    Ok(row.get("id"))
}

pub async fn insert_user(
    pool: &PgPool,
    email: &str,
    full_name: &str,
    role: Role,
) -> anyhow::Result<User> {
    let row = sqlx::query(
        r#"
        INSERT INTO behavior_early_warning.users (id, email, full_name, role)
        VALUES ($1, $2, $3, $4)
        RETURNING id, email, full_name, role, active, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email.trim())
    .bind(full_name.trim())
    .bind(role.as_str())
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to create user {email}"))?;

    let user = user_from_row(&row)?;
    log::info!("created {} account for {}", user.role, user.email);
    Ok(user)
}

/// Finds the student by name and group, creating them when missing.
/// A removed student is never reused.
pub async fn upsert_student(
    conn: &mut PgConnection,
    full_name: &str,
    group_name: &str,
) -> anyhow::Result<Student> {
    let row = sqlx::query(
        r#"
        INSERT INTO behavior_early_warning.students (id, full_name, group_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (full_name, group_name) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id, full_name, group_name, age, family_context, created_at, deleted_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(group_name)
    .fetch_one(&mut *conn)
    .await?;

    let student = student_from_row(&row);
    student.ensure_active()?;
    Ok(student)
}

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    student_name: String,
    group_name: String,
    teacher_email: String,
    behavior: String,
    attention_level: String,
    social_interaction: i32,
    instruction_following: i32,
    concentration: i32,
    observed_on: Option<NaiveDate>,
    source_key: Option<String>,
}

/// A CSV row that passed validation; student and teacher ids are resolved
/// against the database at insert time.
#[derive(Debug, Clone)]
struct ImportRow {
    line: usize,
    student_name: String,
    group_name: String,
    teacher_email: String,
    observation: NewObservation,
}

/// Rows without a source key get one derived from their content, so
/// importing the same file twice does not duplicate them.
fn content_key(row: &CsvRow) -> String {
    let content = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        row.student_name,
        row.group_name,
        row.teacher_email,
        row.behavior,
        row.attention_level.trim().to_ascii_lowercase(),
        row.social_interaction,
        row.instruction_following,
        row.concentration,
        row.observed_on.map(|date| date.to_string()).unwrap_or_default()
    );
    format!("import-{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()))
}

/// Reads and checks every row. Nothing is returned unless all rows are valid.
fn parse_import<R: std::io::Read>(mut reader: csv::Reader<R>) -> anyhow::Result<Vec<ImportRow>> {
    let mut rows = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("row {line}: malformed record"))?;
        let attention_level: AttentionLevel = row
            .attention_level
            .parse()
            .with_context(|| format!("row {line}: invalid observation"))?;
        risk::validate_observation(
            row.social_interaction,
            row.instruction_following,
            row.concentration,
        )
        .with_context(|| format!("row {line}: invalid observation"))?;

        let source_key = match row.source_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => content_key(&row),
        };

        rows.push(ImportRow {
            line,
            observation: NewObservation {
                student_id: Uuid::nil(),
                teacher_id: Uuid::nil(),
                behavior: row.behavior,
                attention_level,
                social_interaction: row.social_interaction,
                instruction_following: row.instruction_following,
                concentration: row.concentration,
                observed_on: row.observed_on,
                source_key: Some(source_key),
            },
            student_name: row.student_name,
            group_name: row.group_name,
            teacher_email: row.teacher_email,
        });
    }

    Ok(rows)
}

/// All or nothing: a bad row anywhere in the file leaves the database untouched.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = parse_import(reader)?;

    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for row in rows {
        let line = row.line;
        let teacher_id = find_user_by_email(&mut tx, &row.teacher_email)
            .await
            .with_context(|| format!("row {line}: unknown teacher"))?;
        let student = upsert_student(&mut tx, &row.student_name, &row.group_name)
            .await
            .with_context(|| format!("row {line}: cannot record observation"))?;

        let observation = NewObservation {
            student_id: student.id,
            teacher_id,
            ..row.observation
        };
        if insert_observation(&mut tx, &observation).await?.is_some() {
            inserted += 1;
        }
    }

    tx.commit().await?;
    log::info!("imported {inserted} observations from {}", csv_path.display());
    Ok(inserted)
}

pub async fn fetch_users(pool: &PgPool) -> anyhow::Result<Vec<User>> {
    let rows = sqlx::query(
        "SELECT id, email, full_name, role, active, created_at \
         FROM behavior_early_warning.users ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(user_from_row).collect()
}

fn user_from_row(row: &PgRow) -> anyhow::Result<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        role: role.parse()?,
        active: row.get("active"),
        created_at: row.get("created_at"),
    })
}

fn student_from_row(row: &PgRow) -> Student {
    Student {
        id: row.get("id"),
        full_name: row.get("full_name"),
        group_name: row.get("group_name"),
        age: row.get("age"),
        family_context: row.get("family_context"),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    }
}

/// All students, tombstoned ones included; aggregations filter them out.
pub async fn fetch_students(pool: &PgPool) -> anyhow::Result<Vec<Student>> {
    let rows = sqlx::query(
        "SELECT id, full_name, group_name, age, family_context, created_at, deleted_at \
         FROM behavior_early_warning.students ORDER BY full_name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(student_from_row).collect())
}

pub async fn find_student(pool: &PgPool, student_id: Uuid) -> anyhow::Result<Student> {
    let row = sqlx::query(
        "SELECT id, full_name, group_name, age, family_context, created_at, deleted_at \
         FROM behavior_early_warning.students WHERE id = $1",
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("student {student_id} not found"))?;

    Ok(student_from_row(&row))
}

fn observation_from_row(row: &PgRow) -> anyhow::Result<ObservationRecord> {
    let attention_level: String = row.get("attention_level");
    Ok(ObservationRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        teacher_id: row.get("teacher_id"),
        behavior: row.get("behavior"),
        attention_level: attention_level.parse()?,
        social_interaction: row.get("social_interaction"),
        instruction_following: row.get("instruction_following"),
        concentration: row.get("concentration"),
        observed_on: row.get("observed_on"),
        created_at: row.get("created_at"),
    })
}

pub async fn fetch_observations(
    pool: &PgPool,
    student_id: Option<Uuid>,
) -> anyhow::Result<Vec<ObservationRecord>> {
    let rows = sqlx::query(
        "SELECT id, student_id, teacher_id, behavior, attention_level, social_interaction, \
         instruction_following, concentration, observed_on, created_at \
         FROM behavior_early_warning.observations \
         WHERE ($1::uuid IS NULL OR student_id = $1) \
         ORDER BY created_at DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(observation_from_row).collect()
}

/// Returns the new id, or `None` when the source key was already imported.
pub async fn insert_observation(
    conn: &mut PgConnection,
    observation: &NewObservation,
) -> anyhow::Result<Option<Uuid>> {
    risk::validate_observation(
        observation.social_interaction,
        observation.instruction_following,
        observation.concentration,
    )?;

    let id = Uuid::new_v4();
    let result = sqlx::query(
        r#"
        INSERT INTO behavior_early_warning.observations
        (id, student_id, teacher_id, behavior, attention_level, social_interaction,
         instruction_following, concentration, observed_on, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(observation.student_id)
    .bind(observation.teacher_id)
    .bind(&observation.behavior)
    .bind(observation.attention_level.as_str())
    .bind(observation.social_interaction)
    .bind(observation.instruction_following)
    .bind(observation.concentration)
    .bind(observation.observed_on)
    .bind(observation.source_key.as_deref())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        log::warn!(
            "observation with source key {:?} already exists, skipped",
            observation.source_key
        );
        return Ok(None);
    }
    Ok(Some(id))
}

fn scoring_from_row(row: &PgRow) -> anyhow::Result<ScoringRecord> {
    let risk_level: String = row.get("risk_level");
    let breakdown: serde_json::Value = row.get("breakdown");
    Ok(ScoringRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        evaluator_id: row.get("evaluator_id"),
        risk_level: risk_level.parse()?,
        score: row.get("score"),
        breakdown: decode_breakdown(breakdown)?,
        created_at: row.get("created_at"),
    })
}

/// `{}` marks a scoring taken over no observations; anything else must parse.
fn decode_breakdown(value: serde_json::Value) -> anyhow::Result<Option<Breakdown>> {
    if value.as_object().is_some_and(|fields| fields.is_empty()) {
        return Ok(None);
    }
    let breakdown = serde_json::from_value(value).context("malformed scoring breakdown")?;
    Ok(Some(breakdown))
}

/// Appends a scoring; earlier scorings for the student stay as history.
pub async fn insert_scoring(
    pool: &PgPool,
    student_id: Uuid,
    evaluator_id: Uuid,
    result: &ScoreResult,
) -> anyhow::Result<ScoringRecord> {
    let breakdown = match &result.breakdown {
        Some(breakdown) => serde_json::to_value(breakdown)?,
        None => json!({}),
    };

    let row = sqlx::query(
        r#"
        INSERT INTO behavior_early_warning.scorings
        (id, student_id, evaluator_id, risk_level, score, breakdown)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, student_id, evaluator_id, risk_level, score, breakdown, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(evaluator_id)
    .bind(result.risk_level.as_str())
    .bind(result.score)
    .bind(breakdown)
    .fetch_one(pool)
    .await
    .context("failed to store scoring")?;

    let record = scoring_from_row(&row)?;
    log::info!(
        "stored scoring {} for student {}: {} ({:.1})",
        record.id,
        student_id,
        record.risk_level,
        record.score
    );
    Ok(record)
}

pub async fn fetch_scorings(
    pool: &PgPool,
    student_id: Option<Uuid>,
) -> anyhow::Result<Vec<ScoringRecord>> {
    let rows = sqlx::query(
        "SELECT id, student_id, evaluator_id, risk_level, score, breakdown, created_at \
         FROM behavior_early_warning.scorings \
         WHERE ($1::uuid IS NULL OR student_id = $1) \
         ORDER BY created_at DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(scoring_from_row).collect()
}

pub async fn fetch_improvements(
    pool: &PgPool,
    student_id: Option<Uuid>,
) -> anyhow::Result<Vec<ImprovementRecord>> {
    let rows = sqlx::query(
        "SELECT id, student_id, teacher_id, noted_on, note, created_at \
         FROM behavior_early_warning.improvements \
         WHERE ($1::uuid IS NULL OR student_id = $1) \
         ORDER BY created_at DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ImprovementRecord {
            id: row.get("id"),
            student_id: row.get("student_id"),
            teacher_id: row.get("teacher_id"),
            noted_on: row.get("noted_on"),
            note: row.get("note"),
            created_at: row.get("created_at"),
        })
        .collect())
}

pub async fn insert_improvement(
    pool: &PgPool,
    student_id: Uuid,
    teacher_id: Uuid,
    noted_on: NaiveDate,
    note: &str,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO behavior_early_warning.improvements (id, student_id, teacher_id, noted_on, note)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(student_id)
    .bind(teacher_id)
    .bind(noted_on)
    .bind(note)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn fetch_comments(
    pool: &PgPool,
    student_id: Option<Uuid>,
) -> anyhow::Result<Vec<CounselorComment>> {
    let rows = sqlx::query(
        "SELECT id, student_id, counselor_id, body, created_at \
         FROM behavior_early_warning.counselor_comments \
         WHERE ($1::uuid IS NULL OR student_id = $1) \
         ORDER BY created_at DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| CounselorComment {
            id: row.get("id"),
            student_id: row.get("student_id"),
            counselor_id: row.get("counselor_id"),
            body: row.get("body"),
            created_at: row.get("created_at"),
        })
        .collect())
}

pub async fn insert_comment(
    pool: &PgPool,
    student_id: Uuid,
    counselor_id: Uuid,
    body: &str,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO behavior_early_warning.counselor_comments (id, student_id, counselor_id, body)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind(student_id)
    .bind(counselor_id)
    .bind(body)
    .execute(pool)
    .await?;
    Ok(id)
}

fn case_from_row(row: &PgRow) -> anyhow::Result<CaseRecord> {
    let status: String = row.get("status");
    Ok(CaseRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        counselor_id: row.get("counselor_id"),
        status: status.parse()?,
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub async fn fetch_cases(pool: &PgPool) -> anyhow::Result<Vec<CaseRecord>> {
    let rows = sqlx::query(
        "SELECT id, student_id, counselor_id, status, notes, created_at, updated_at \
         FROM behavior_early_warning.cases ORDER BY updated_at DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(case_from_row).collect()
}

pub async fn upsert_case_status(
    pool: &PgPool,
    student_id: Uuid,
    counselor_id: Uuid,
    status: CaseStatus,
    notes: Option<&str>,
) -> anyhow::Result<CaseRecord> {
    let row = sqlx::query(
        r#"
        INSERT INTO behavior_early_warning.cases (id, student_id, counselor_id, status, notes)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id) DO UPDATE
        SET counselor_id = EXCLUDED.counselor_id,
            status = EXCLUDED.status,
            notes = COALESCE(EXCLUDED.notes, behavior_early_warning.cases.notes),
            updated_at = now()
        RETURNING id, student_id, counselor_id, status, notes, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(counselor_id)
    .bind(status.as_str())
    .bind(notes)
    .fetch_one(pool)
    .await?;

    let case = case_from_row(&row)?;
    log::info!("case for student {student_id} is now {}", case.status);
    Ok(case)
}

/// Marks the student deleted and records who did it. History rows are kept.
pub async fn tombstone_student(
    pool: &PgPool,
    student_id: Uuid,
    actor_id: Option<Uuid>,
) -> anyhow::Result<DateTime<Utc>> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        UPDATE behavior_early_warning.students
        SET deleted_at = now()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING full_name, group_name, deleted_at
        "#,
    )
    .bind(student_id)
    .fetch_optional(&mut *tx)
    .await?
    .with_context(|| format!("student {student_id} not found or already removed"))?;

    let full_name: String = row.get("full_name");
    let group_name: String = row.get("group_name");
    let deleted_at: DateTime<Utc> = row.get("deleted_at");

    sqlx::query(
        r#"
        INSERT INTO behavior_early_warning.deletion_log (id, student_name, group_name, actor_id)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&full_name)
    .bind(&group_name)
    .bind(actor_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    log::info!("removed student {full_name} ({group_name})");
    Ok(deleted_at)
}

pub async fn fetch_deletions(pool: &PgPool) -> anyhow::Result<Vec<DeletionLogEntry>> {
    let rows = sqlx::query(
        "SELECT id, student_name, group_name, actor_id, created_at \
         FROM behavior_early_warning.deletion_log ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| DeletionLogEntry {
            id: row.get("id"),
            student_name: row.get("student_name"),
            group_name: row.get("group_name"),
            actor_id: row.get("actor_id"),
            created_at: row.get("created_at"),
        })
        .collect())
}
