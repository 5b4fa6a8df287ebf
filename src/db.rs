use anyhow::{bail, Context};
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::config::PipelineConfig;
use crate::merge;
use crate::models::{Situation, StudentRecord};
use crate::validate;

const STUDENT_COLUMNS: &str = "identity, full_name, email, birth_date, gender, profession, product, \
     order_id, city, state, affiliation, completed, completed_on, grade, progress, \
     specialization, situation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConflict {
    pub identity: String,
    pub email: String,
    pub existing_identity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub inserted: usize,
    pub updated: usize,
    pub conflicts: Vec<EmailConflict>,
}

/// Editable roster fields. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub grade: Option<f64>,
    pub progress: Option<f64>,
    pub situation: Option<Situation>,
}

impl StudentUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self, config: &PipelineConfig) -> anyhow::Result<()> {
        if let Some(name) = &self.full_name {
            if name.trim().is_empty() {
                bail!("full name cannot be blank");
            }
        }
        if let Some(email) = &self.email {
            if !validate::is_valid_email(email.trim()) {
                bail!("'{email}' is not an email address");
            }
        }
        if let Some(grade) = self.grade {
            if !(0.0..=config.grade_scale).contains(&grade) {
                bail!("grade {grade} is outside 0..={}", config.grade_scale);
            }
        }
        if let Some(progress) = self.progress {
            if !(0.0..=100.0).contains(&progress) {
                bail!("progress {progress} is outside 0..=100");
            }
        }
        Ok(())
    }

    /// A new grade without an explicit situation re-derives the situation.
    pub fn apply(&self, student: &mut StudentRecord, passing_grade: f64) {
        if let Some(name) = &self.full_name {
            student.full_name = name.trim().to_string();
        }
        if let Some(email) = &self.email {
            student.email = email.trim().to_lowercase();
        }
        if let Some(birth_date) = self.birth_date {
            student.birth_date = Some(birth_date);
        }
        if let Some(grade) = self.grade {
            student.grade = Some(grade);
            student.situation = merge::situation_for(student.grade, passing_grade);
        }
        if let Some(progress) = self.progress {
            student.progress = Some(progress);
        }
        if let Some(situation) = self.situation {
            student.situation = situation;
        }
    }
}

/// `%` and `_` in the search text match literally.
pub fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn student_from_row(row: &PgRow) -> anyhow::Result<StudentRecord> {
    let situation: String = row.get("situation");
    Ok(StudentRecord {
        identity: row.get("identity"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        birth_date: row.get("birth_date"),
        gender: row.get("gender"),
        profession: row.get("profession"),
        product: row.get("product"),
        order_id: row.get("order_id"),
        city: row.get("city"),
        state: row.get("state"),
        affiliation: row.get("affiliation"),
        completed: row.get("completed"),
        completed_on: row.get("completed_on"),
        grade: row.get("grade"),
        progress: row.get("progress"),
        specialization: row.get("specialization"),
        situation: situation.parse().map_err(anyhow::Error::msg)?,
    })
}

/// Upserts students by identity. A student whose email already belongs to a
/// different identity is skipped and reported as a conflict.
pub async fn save_students(pool: &PgPool, students: &[StudentRecord]) -> anyhow::Result<SaveSummary> {
    let mut tx = pool.begin().await?;
    let mut summary = SaveSummary::default();

    for student in students {
        let owner: Option<String> = sqlx::query_scalar(
            "SELECT identity FROM student_roster.students WHERE email = $1 AND identity <> $2",
        )
        .bind(&student.email)
        .bind(&student.identity)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing_identity) = owner {
            summary.conflicts.push(EmailConflict {
                identity: student.identity.clone(),
                email: student.email.clone(),
                existing_identity,
            });
            continue;
        }

        let inserted: bool = sqlx::query(
            r#"
            INSERT INTO student_roster.students
            (identity, full_name, email, birth_date, gender, profession, product, order_id,
             city, state, affiliation, completed, completed_on, grade, progress,
             specialization, situation)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (identity) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email,
                birth_date = EXCLUDED.birth_date, gender = EXCLUDED.gender,
                profession = EXCLUDED.profession, product = EXCLUDED.product,
                order_id = EXCLUDED.order_id, city = EXCLUDED.city, state = EXCLUDED.state,
                affiliation = EXCLUDED.affiliation, completed = EXCLUDED.completed,
                completed_on = EXCLUDED.completed_on, grade = EXCLUDED.grade,
                progress = EXCLUDED.progress, specialization = EXCLUDED.specialization,
                situation = EXCLUDED.situation, updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&student.identity)
        .bind(&student.full_name)
        .bind(&student.email)
        .bind(student.birth_date)
        .bind(&student.gender)
        .bind(&student.profession)
        .bind(&student.product)
        .bind(&student.order_id)
        .bind(&student.city)
        .bind(&student.state)
        .bind(&student.affiliation)
        .bind(student.completed)
        .bind(student.completed_on)
        .bind(student.grade)
        .bind(student.progress)
        .bind(&student.specialization)
        .bind(student.situation.as_str())
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to save student {}", student.identity))?
        .get("inserted");

        if inserted {
            summary.inserted += 1;
        } else {
            summary.updated += 1;
        }
    }

    tx.commit().await?;
    Ok(summary)
}

pub async fn search_students(pool: &PgPool, search: &str) -> anyhow::Result<Vec<StudentRecord>> {
    let query = format!(
        "SELECT {STUDENT_COLUMNS} FROM student_roster.students \
         WHERE full_name ILIKE $1 OR email ILIKE $1 \
         ORDER BY full_name, identity"
    );
    let rows = sqlx::query(&query)
        .bind(like_pattern(search))
        .fetch_all(pool)
        .await?;

    rows.iter().map(student_from_row).collect()
}

/// Returns the updated student, or `None` when the identity is unknown.
pub async fn update_student(
    pool: &PgPool,
    identity: &str,
    update: &StudentUpdate,
    passing_grade: f64,
) -> anyhow::Result<Option<StudentRecord>> {
    let mut tx = pool.begin().await?;
    let query = format!(
        "SELECT {STUDENT_COLUMNS} FROM student_roster.students WHERE identity = $1 FOR UPDATE"
    );
    let Some(row) = sqlx::query(&query)
        .bind(identity)
        .fetch_optional(&mut *tx)
        .await?
    else {
        return Ok(None);
    };

    let mut student = student_from_row(&row)?;
    update.apply(&mut student, passing_grade);

    sqlx::query(
        r#"
        UPDATE student_roster.students
        SET full_name = $2, email = $3, birth_date = $4, grade = $5, progress = $6,
            situation = $7, updated_at = now()
        WHERE identity = $1
        "#,
    )
    .bind(&student.identity)
    .bind(&student.full_name)
    .bind(&student.email)
    .bind(student.birth_date)
    .bind(student.grade)
    .bind(student.progress)
    .bind(student.situation.as_str())
    .execute(&mut *tx)
    .await
    .with_context(|| format!("failed to update student {identity} (is the email already in use?)"))?;

    tx.commit().await?;
    Ok(Some(student))
}
