use crate::db;
use crate::grading::{self, CourseThresholds, GradingScale, ResultStatus};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const BULK_MAX_ENTRIES: usize = 5000;
const PARTIAL_FAILURE_ERROR_LIMIT: usize = 5;
const TOTAL_FAILURE_ERROR_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarksError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("score must be between 0 and {max_marks} (got {score})")]
    InvalidScore { score: f64, max_marks: i64 },
    #[error("{0}")]
    InvalidInput(String),
    #[error("failed to save mark: {0}")]
    Persistence(String),
    #[error("failed to read marks: {0}")]
    Query(String),
}

impl MarksError {
    pub fn code(&self) -> &'static str {
        match self {
            MarksError::NotFound { .. } => "not_found",
            MarksError::InvalidScore { .. } => "invalid_score",
            MarksError::InvalidInput(_) => "bad_params",
            MarksError::Persistence(_) => "db_write_failed",
            MarksError::Query(_) => "db_query_failed",
        }
    }
}

impl From<rusqlite::Error> for MarksError {
    fn from(e: rusqlite::Error) -> Self {
        MarksError::Persistence(e.to_string())
    }
}

fn query_err(e: rusqlite::Error) -> MarksError {
    MarksError::Query(e.to_string())
}

/// Natural key of a mark.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkKey {
    pub student_id: String,
    pub course_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkEntry {
    pub student_id: String,
    pub course_id: String,
    pub score: f64,
}

impl MarkEntry {
    pub fn key(&self) -> MarkKey {
        MarkKey {
            student_id: self.student_id.clone(),
            course_id: self.course_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub score_obtained: f64,
    pub grade: String,
    pub status: ResultStatus,
    pub recorded_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Mark joined with the labels a listing needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRow {
    #[serde(flatten)]
    pub mark: Mark,
    pub roll_no: String,
    pub student_name: String,
    pub course_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnterOutcome {
    pub mark_id: String,
    pub created: bool,
    pub grade: String,
    pub status: ResultStatus,
    pub percent: f64,
}

/// One item of a bulk request. Items the caller could not even decode are
/// carried through so they are reported alongside real failures.
#[derive(Debug, Clone)]
pub enum BulkInput {
    Entry(MarkEntry),
    Malformed { student_id: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEntryError {
    pub index: usize,
    pub student_id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub success: bool,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<BulkEntryError>,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct MarkFilter {
    pub course_id: Option<String>,
    pub student_id: Option<String>,
}

pub fn course_thresholds(
    conn: &Connection,
    course_id: &str,
) -> rusqlite::Result<Option<CourseThresholds>> {
    conn.query_row(
        "SELECT max_marks, pass_marks FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(CourseThresholds {
                max_marks: r.get(0)?,
                pass_marks: r.get(1)?,
            })
        },
    )
    .optional()
}

pub fn student_exists(conn: &Connection, student_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn find_mark_id(conn: &Connection, key: &MarkKey) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM marks WHERE student_id = ? AND course_id = ?",
        (&key.student_id, &key.course_id),
        |r| r.get(0),
    )
    .optional()
}

/// Records a student's score in a course, creating the mark on first entry
/// and correcting it in place afterwards.
///
/// Gates run in a fixed order (course, score range, student) and nothing is
/// written unless all pass. The lookup and the write share one immediate
/// transaction, and the write itself is an `ON CONFLICT` upsert against the
/// `(student_id, course_id)` unique key.
pub fn enter_marks(
    conn: &Connection,
    scale: &GradingScale,
    entry: &MarkEntry,
    recorded_by: &str,
) -> Result<EnterOutcome, MarksError> {
    let recorded_by = recorded_by.trim();
    if recorded_by.is_empty() {
        return Err(MarksError::InvalidInput("recordedBy must not be empty".into()));
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let Some(thresholds) = course_thresholds(&tx, &entry.course_id)? else {
        return Err(MarksError::NotFound {
            entity: "course",
            id: entry.course_id.clone(),
        });
    };

    let score = entry.score;
    if !score.is_finite() || score < 0.0 || score > thresholds.max_marks as f64 {
        return Err(MarksError::InvalidScore {
            score,
            max_marks: thresholds.max_marks,
        });
    }

    if !student_exists(&tx, &entry.student_id)? {
        return Err(MarksError::NotFound {
            entity: "student",
            id: entry.student_id.clone(),
        });
    }

    let eval = grading::evaluate(scale, score, thresholds);
    let key = entry.key();
    let existing = find_mark_id(&tx, &key)?;

    let now = db::now_timestamp();
    let new_id = Uuid::new_v4().to_string();
    let mark_id: String = tx.query_row(
        "INSERT INTO marks(id, student_id, course_id, score_obtained, grade, status,
                           recorded_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_id) DO UPDATE SET
           score_obtained = excluded.score_obtained,
           grade = excluded.grade,
           status = excluded.status,
           recorded_by = excluded.recorded_by,
           updated_at = excluded.updated_at
         RETURNING id",
        (
            &new_id,
            &key.student_id,
            &key.course_id,
            score,
            &eval.grade,
            eval.status.as_str(),
            recorded_by,
            &now,
            &now,
        ),
        |r| r.get(0),
    )?;
    tx.commit()?;

    let created = existing.is_none();
    tracing::info!(
        mark_id = %mark_id,
        student_id = %key.student_id,
        course_id = %key.course_id,
        score,
        grade = %eval.grade,
        status = eval.status.as_str(),
        created,
        "mark entered"
    );

    Ok(EnterOutcome {
        mark_id,
        created,
        grade: eval.grade,
        status: eval.status,
        percent: eval.percent,
    })
}

/// Applies [`enter_marks`] to every input in order. Each entry commits on its
/// own; a failed entry is reported and the batch moves on.
pub fn bulk_enter_marks<I>(
    conn: &Connection,
    scale: &GradingScale,
    inputs: I,
    recorded_by: &str,
) -> BulkOutcome
where
    I: IntoIterator<Item = BulkInput>,
{
    let mut success_count: usize = 0;
    let mut errors: Vec<BulkEntryError> = Vec::new();
    let mut total: usize = 0;

    for (index, input) in inputs.into_iter().enumerate() {
        total += 1;
        let (student_id, result) = match input {
            BulkInput::Entry(entry) => {
                let r = enter_marks(conn, scale, &entry, recorded_by);
                (entry.student_id, r.map(|_| ()))
            }
            BulkInput::Malformed { student_id, reason } => {
                (student_id, Err(MarksError::InvalidInput(reason)))
            }
        };
        match result {
            Ok(()) => success_count += 1,
            Err(e) => {
                tracing::warn!(index, student_id = %student_id, code = e.code(), "bulk entry rejected: {}", e);
                errors.push(BulkEntryError {
                    index,
                    student_id,
                    code: e.code(),
                    message: e.to_string(),
                });
            }
        }
    }

    let error_count = errors.len();
    let success = success_count > 0;
    let limit = if success {
        PARTIAL_FAILURE_ERROR_LIMIT
    } else {
        TOTAL_FAILURE_ERROR_LIMIT
    };
    errors.truncate(limit);

    let message = if total == 0 {
        "no entries to process".to_string()
    } else if success && error_count == 0 {
        format!("entered {} marks", success_count)
    } else if success {
        format!(
            "entered {} of {} marks; {} failed",
            success_count, total, error_count
        )
    } else {
        format!("no marks were entered; all {} entries failed", total)
    };

    BulkOutcome {
        success,
        success_count,
        error_count,
        errors,
        message,
    }
}

fn mark_from_row(r: &Row<'_>) -> rusqlite::Result<Mark> {
    let status_raw: String = r.get(5)?;
    let status = ResultStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown mark status: {}", status_raw).into(),
        )
    })?;
    Ok(Mark {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        score_obtained: r.get(3)?,
        grade: r.get(4)?,
        status,
        recorded_by: r.get(6)?,
        created_at: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

const MARK_COLUMNS: &str = "m.id, m.student_id, m.course_id, m.score_obtained, m.grade, m.status,
     m.recorded_by, m.created_at, m.updated_at";

pub fn get_mark(conn: &Connection, key: &MarkKey) -> Result<Option<Mark>, MarksError> {
    let sql = format!(
        "SELECT {} FROM marks m WHERE m.student_id = ? AND m.course_id = ?",
        MARK_COLUMNS
    );
    let mark = conn
        .query_row(&sql, (&key.student_id, &key.course_id), mark_from_row)
        .optional()
        .map_err(query_err)?;
    Ok(mark)
}

pub fn list_marks(conn: &Connection, filter: &MarkFilter) -> Result<Vec<MarkRow>, MarksError> {
    let sql = format!(
        "SELECT {}, s.roll_no, s.name, c.code
         FROM marks m
         JOIN students s ON s.id = m.student_id
         JOIN courses c ON c.id = m.course_id
         WHERE (?1 IS NULL OR m.course_id = ?1)
           AND (?2 IS NULL OR m.student_id = ?2)
         ORDER BY c.code, s.roll_no",
        MARK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map((&filter.course_id, &filter.student_id), |r| {
            Ok(MarkRow {
                mark: mark_from_row(r)?,
                roll_no: r.get(9)?,
                student_name: r.get(10)?,
                course_code: r.get(11)?,
            })
        })
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;
    Ok(rows)
}

pub fn delete_mark(conn: &Connection, mark_id: &str) -> Result<(), MarksError> {
    let n = conn.execute("DELETE FROM marks WHERE id = ?", [mark_id])?;
    if n == 0 {
        return Err(MarksError::NotFound {
            entity: "mark",
            id: mark_id.to_string(),
        });
    }
    tracing::info!(mark_id, "mark deleted");
    Ok(())
}
