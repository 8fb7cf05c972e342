use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::model::{
    CorrectAnswer, Difficulty, Question, SourceTag, Subject, ValidationError, OPTION_COUNT,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no questions found{}", subject_suffix(.subject))]
    NotFound { subject: Option<Subject> },
    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("invalid question: {0}")]
    Invalid(#[from] ValidationError),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn subject_suffix(subject: &Option<Subject>) -> String {
    subject.map(|s| format!(" for {}", s)).unwrap_or_default()
}

const QUESTION_COLUMNS: &str = "id, subject, topic, question_text, options, correct_answer, \
     explanation, year, difficulty, is_pyq, source";

/// SQLite-backed question store. One connection behind a mutex, so every
/// write is serialized.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ── Writes ──

    /// Insert unless the id already exists. Returns whether a row was written;
    /// an existing row is never touched.
    pub fn put(&self, question: &Question) -> Result<bool> {
        question.validate()?;
        let row = QuestionRow::try_from(question)?;
        let conn = self.conn()?;
        let n = insert_row(&conn, "INSERT OR IGNORE", &row)?;
        Ok(n > 0)
    }

    /// Batch `put` in one transaction. Returns how many rows were new.
    pub fn put_many(&self, questions: &[Question]) -> Result<usize> {
        let rows = questions
            .iter()
            .map(|q| {
                q.validate()?;
                QuestionRow::try_from(q)
            })
            .collect::<Result<Vec<_>>>()?;

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        for row in &rows {
            count += insert_row(&tx, "INSERT OR IGNORE", row)?;
        }
        tx.commit()?;
        Ok(count)
    }

    /// Full replacement under the same id.
    pub fn replace(&self, question: &Question) -> Result<()> {
        question.validate()?;
        let row = QuestionRow::try_from(question)?;
        let conn = self.conn()?;
        insert_row(&conn, "INSERT OR REPLACE", &row)?;
        Ok(())
    }

    /// Append one answer attempt. Never read back by the store.
    pub fn record_attempt(
        &self,
        user_id: &str,
        question_id: &str,
        selected: usize,
        is_correct: bool,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_responses (user_id, question_id, selected_answer, is_correct, answered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                question_id,
                selected as i64,
                is_correct,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Insert the built-in sample questions when the table is empty.
    /// Returns how many were inserted.
    pub fn seed_if_empty(&self) -> Result<usize> {
        if self.count()? > 0 {
            return Ok(0);
        }
        self.put_many(&sample_questions())
    }

    // ── Reads ──

    pub fn get(&self, id: &str) -> Result<Option<Question>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM questions WHERE id = ?1", QUESTION_COLUMNS),
                [id],
                QuestionRow::from_row,
            )
            .optional()?;
        row.map(Question::try_from).transpose()
    }

    /// One uniformly random question, optionally restricted to a subject.
    pub fn sample(&self, subject: Option<Subject>) -> Result<Question> {
        let conn = self.conn()?;
        let row = match subject {
            Some(s) => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM questions WHERE subject = ?1 ORDER BY RANDOM() LIMIT 1",
                        QUESTION_COLUMNS
                    ),
                    [s.as_str()],
                    QuestionRow::from_row,
                )
                .optional()?,
            None => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM questions ORDER BY RANDOM() LIMIT 1",
                        QUESTION_COLUMNS
                    ),
                    [],
                    QuestionRow::from_row,
                )
                .optional()?,
        };
        row.ok_or(StoreError::NotFound { subject })?.try_into()
    }

    pub fn list_by_subject(&self, subject: Subject, limit: Option<usize>) -> Result<Vec<Question>> {
        let conn = self.conn()?;
        let sql = match limit {
            Some(n) => format!(
                "SELECT {} FROM questions WHERE subject = ?1 ORDER BY created_at, id LIMIT {}",
                QUESTION_COLUMNS, n
            ),
            None => format!(
                "SELECT {} FROM questions WHERE subject = ?1 ORDER BY created_at, id",
                QUESTION_COLUMNS
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([subject.as_str()], QuestionRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(Question::try_from).collect()
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM questions", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn counts_by_subject(&self) -> Result<BTreeMap<String, usize>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT subject, COUNT(*) FROM questions GROUP BY subject")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    pub fn unresolved_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM questions WHERE correct_answer IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS questions (
            id             TEXT PRIMARY KEY,
            subject        TEXT NOT NULL,
            topic          TEXT NOT NULL DEFAULT 'General',
            question_text  TEXT NOT NULL,
            options        TEXT NOT NULL,
            correct_answer INTEGER CHECK(correct_answer BETWEEN 0 AND 3),
            explanation    TEXT NOT NULL DEFAULT '',
            year           INTEGER NOT NULL,
            difficulty     TEXT NOT NULL CHECK(difficulty IN ('Easy','Medium','Hard','Custom')),
            is_pyq         BOOLEAN NOT NULL DEFAULT 1,
            source         TEXT NOT NULL,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_questions_subject ON questions(subject);

        CREATE TABLE IF NOT EXISTS user_responses (
            id              INTEGER PRIMARY KEY,
            user_id         TEXT NOT NULL,
            question_id     TEXT NOT NULL,
            selected_answer INTEGER NOT NULL,
            is_correct      BOOLEAN NOT NULL,
            answered_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_user_responses_user ON user_responses(user_id);
        ",
    )
}

// ── Row mapping ──

/// A `questions` row as stored: enums as text, options as a JSON array.
struct QuestionRow {
    id: String,
    subject: String,
    topic: String,
    question_text: String,
    options: String,
    correct_answer: Option<i64>,
    explanation: String,
    year: i32,
    difficulty: String,
    is_pyq: bool,
    source: String,
}

impl QuestionRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(QuestionRow {
            id: row.get(0)?,
            subject: row.get(1)?,
            topic: row.get(2)?,
            question_text: row.get(3)?,
            options: row.get(4)?,
            correct_answer: row.get(5)?,
            explanation: row.get(6)?,
            year: row.get(7)?,
            difficulty: row.get(8)?,
            is_pyq: row.get(9)?,
            source: row.get(10)?,
        })
    }
}

impl TryFrom<&Question> for QuestionRow {
    type Error = StoreError;

    fn try_from(q: &Question) -> Result<Self> {
        Ok(QuestionRow {
            id: q.id.clone(),
            subject: q.subject.as_str().to_string(),
            topic: q.topic.clone(),
            question_text: q.question_text.clone(),
            options: serde_json::to_string(&q.options)?,
            correct_answer: q.correct_answer.index().map(|i| i as i64),
            explanation: q.explanation.clone(),
            year: q.year,
            difficulty: q.difficulty.as_str().to_string(),
            is_pyq: q.is_pyq,
            source: q.source.as_str().to_string(),
        })
    }
}

impl TryFrom<QuestionRow> for Question {
    type Error = StoreError;

    fn try_from(row: QuestionRow) -> Result<Self> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.id.clone(),
            reason,
        };
        let subject: Subject = row.subject.parse().map_err(corrupt)?;
        let difficulty: Difficulty = row.difficulty.parse().map_err(corrupt)?;
        let source: SourceTag = row.source.parse().map_err(corrupt)?;
        let options: Vec<String> = serde_json::from_str(&row.options)?;
        let found = options.len();
        let options: [String; OPTION_COUNT] = options
            .try_into()
            .map_err(|_| corrupt(format!("expected 4 options, found {}", found)))?;
        let correct_answer = match row.correct_answer {
            None => CorrectAnswer::Unresolved,
            Some(i) => u8::try_from(i)
                .map(CorrectAnswer::Resolved)
                .map_err(|_| corrupt(format!("correct_answer {} out of range", i)))?,
        };

        Ok(Question {
            id: row.id,
            subject,
            topic: row.topic,
            question_text: row.question_text,
            options,
            correct_answer,
            explanation: row.explanation,
            year: row.year,
            difficulty,
            is_pyq: row.is_pyq,
            source,
        })
    }
}

fn insert_row(conn: &Connection, verb: &str, r: &QuestionRow) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "{} INTO questions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            verb, QUESTION_COLUMNS
        ),
        params![
            r.id,
            r.subject,
            r.topic,
            r.question_text,
            r.options,
            r.correct_answer,
            r.explanation,
            r.year,
            r.difficulty,
            r.is_pyq,
            r.source,
        ],
    )
}

// ── Seed data ──

#[allow(clippy::too_many_arguments)]
fn seed(
    id: &str,
    subject: Subject,
    topic: &str,
    text: &str,
    options: [&str; OPTION_COUNT],
    correct: u8,
    explanation: &str,
    year: i32,
) -> Question {
    Question {
        id: id.to_string(),
        subject,
        topic: topic.to_string(),
        question_text: text.to_string(),
        options: options.map(String::from),
        correct_answer: CorrectAnswer::Resolved(correct),
        explanation: explanation.to_string(),
        year,
        difficulty: Difficulty::Medium,
        is_pyq: true,
        source: SourceTag::Scraped,
    }
}

fn sample_questions() -> Vec<Question> {
    vec![
        seed(
            "SEED_PHYSICS_001",
            Subject::Physics,
            "Kinematics",
            "A body starts from rest with uniform acceleration 2 m/s^2. Distance covered in 5 s is",
            ["10 m", "20 m", "25 m", "50 m"],
            2,
            "s = ut + at^2/2 = 0 + 2 * 25 / 2 = 25 m.",
            2019,
        ),
        seed(
            "SEED_CHEMISTRY_001",
            Subject::Chemistry,
            "Atomic Structure",
            "The number of unpaired electrons in a ground-state nitrogen atom is",
            ["1", "2", "3", "5"],
            2,
            "Nitrogen is 1s2 2s2 2p3 with three singly occupied 2p orbitals.",
            2020,
        ),
        seed(
            "SEED_BIOLOGY_001",
            Subject::Biology,
            "Cell Biology",
            "Which organelle is known as the powerhouse of the cell?",
            ["Nucleus", "Mitochondria", "Golgi body", "Lysosome"],
            1,
            "Mitochondria carry out aerobic respiration and produce most of the cell's ATP.",
            2021,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::IdStrategy;
    use chrono::TimeZone;

    fn question(id: &str, subject: Subject, text: &str) -> Question {
        Question {
            id: id.to_string(),
            subject,
            topic: "General".into(),
            question_text: text.to_string(),
            options: ["a", "b", "c", "d"].map(String::from),
            correct_answer: CorrectAnswer::Resolved(0),
            explanation: String::new(),
            year: 2022,
            difficulty: Difficulty::Medium,
            is_pyq: true,
            source: SourceTag::Scraped,
        }
    }

    #[test]
    fn put_is_idempotent_and_keeps_first() {
        let store = Store::open_in_memory().unwrap();
        let first = question("Q1", Subject::Physics, "first?");
        let second = question("Q1", Subject::Physics, "second?");
        assert!(store.put(&first).unwrap());
        assert!(!store.put(&second).unwrap());
        assert!(!store.put(&first).unwrap());
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("Q1").unwrap(), Some(first));
    }

    #[test]
    fn concurrent_puts_keep_one_row_per_id() {
        let store = Store::open_in_memory().unwrap();
        let inserted: usize = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|w| {
                    let store = &store;
                    s.spawn(move || {
                        (0..20)
                            .filter(|i| {
                                let text = format!("worker {} asks {}?", w, i);
                                let q = question(&format!("Q{}", i), Subject::Physics, &text);
                                store.put(&q).unwrap()
                            })
                            .count()
                    })
                })
                .collect();
            workers.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(inserted, 20);
        assert_eq!(store.count().unwrap(), 20);
        assert_eq!(store.counts_by_subject().unwrap().get("Physics"), Some(&20));
    }

    #[test]
    fn put_rejects_invalid_records() {
        let store = Store::open_in_memory().unwrap();
        let mut q = question("Q1", Subject::Physics, "Q?");
        q.options[3] = " ".into();
        assert!(matches!(store.put(&q), Err(StoreError::Invalid(ValidationError::EmptyOption(3)))));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn replace_overwrites() {
        let store = Store::open_in_memory().unwrap();
        store.put(&question("Q1", Subject::Physics, "old?")).unwrap();
        let newer = question("Q1", Subject::Physics, "new?");
        store.replace(&newer).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("Q1").unwrap(), Some(newer));
    }

    #[test]
    fn put_many_counts_new_rows() {
        let store = Store::open_in_memory().unwrap();
        store.put(&question("Q1", Subject::Physics, "one?")).unwrap();
        let batch = vec![
            question("Q1", Subject::Physics, "dup?"),
            question("Q2", Subject::Biology, "two?"),
            question("Q2", Subject::Biology, "dup two?"),
            question("Q3", Subject::Chemistry, "three?"),
        ];
        assert_eq!(store.put_many(&batch).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn sample_respects_subject_filter() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..10 {
            let subject = if i % 2 == 0 { Subject::Physics } else { Subject::Biology };
            store.put(&question(&format!("Q{}", i), subject, "Q?")).unwrap();
        }
        for _ in 0..50 {
            assert_eq!(store.sample(Some(Subject::Biology)).unwrap().subject, Subject::Biology);
        }
        assert!(store.sample(None).is_ok());
    }

    #[test]
    fn sample_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(store.sample(None), Err(StoreError::NotFound { subject: None })));
        store.put(&question("Q1", Subject::Physics, "Q?")).unwrap();
        let err = store.sample(Some(Subject::Chemistry)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { subject: Some(Subject::Chemistry) }));
        assert_eq!(err.to_string(), "no questions found for Chemistry");
    }

    #[test]
    fn unresolved_answer_roundtrips_as_null() {
        let store = Store::open_in_memory().unwrap();
        let mut q = question("Q1", Subject::Biology, "Which organelle respires?");
        q.correct_answer = CorrectAnswer::Unresolved;
        store.put(&q).unwrap();
        store.put(&question("Q2", Subject::Biology, "resolved?")).unwrap();
        assert_eq!(store.get("Q1").unwrap().unwrap().correct_answer, CorrectAnswer::Unresolved);
        assert_eq!(store.unresolved_count().unwrap(), 1);
    }

    #[test]
    fn list_and_counts() {
        let store = Store::open_in_memory().unwrap();
        store.put(&question("P1", Subject::Physics, "p1?")).unwrap();
        store.put(&question("P2", Subject::Physics, "p2?")).unwrap();
        store.put(&question("U1", Subject::Unknown, "u1?")).unwrap();
        assert_eq!(store.list_by_subject(Subject::Physics, None).unwrap().len(), 2);
        assert_eq!(store.list_by_subject(Subject::Physics, Some(1)).unwrap().len(), 1);
        assert!(store.list_by_subject(Subject::Chemistry, None).unwrap().is_empty());
        let counts = store.counts_by_subject().unwrap();
        assert_eq!(counts.get("Physics"), Some(&2));
        assert_eq!(counts.get("Unknown"), Some(&1));
    }

    #[test]
    fn authored_questions_store_and_replace() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let opts = || ["1", "2", "3", "4"].map(String::from).to_vec();
        let authored = |correct: usize, explanation: &str| {
            Question::custom(
                Subject::Physics,
                "Units",
                "SI unit of force?",
                opts(),
                correct,
                explanation,
                IdStrategy::ContentHash,
                now,
            )
            .unwrap()
        };
        let q = authored(0, "");
        store.put(&q).unwrap();
        let edited = authored(1, "fixed");
        assert_eq!(q.id, edited.id);
        store.replace(&edited).unwrap();
        let stored = store.get(&q.id).unwrap().unwrap();
        assert_eq!(stored.correct_answer, CorrectAnswer::Resolved(1));
        assert_eq!(stored.source, SourceTag::Custom);
        assert!(!stored.is_pyq);
    }

    #[test]
    fn attempts_are_appended() {
        let store = Store::open_in_memory().unwrap();
        store.seed_if_empty().unwrap();
        store.record_attempt("user-1", "SEED_BIOLOGY_001", 1, true).unwrap();
        store.record_attempt("user-1", "SEED_BIOLOGY_001", 0, false).unwrap();
        let conn = store.conn().unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM user_responses", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn seed_only_when_empty() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.seed_if_empty().unwrap(), 3);
        assert_eq!(store.seed_if_empty().unwrap(), 0);
        for subject in Subject::KNOWN {
            assert_eq!(store.sample(Some(subject)).unwrap().subject, subject);
        }
    }

    #[test]
    fn corrupt_rows_surface_as_errors() {
        let store = Store::open_in_memory().unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute(
                "INSERT INTO questions (id, subject, question_text, options, year, difficulty, source)
                 VALUES ('BAD', 'Physics', 'Q?', '[\"a\",\"b\"]', 2020, 'Easy', 'scraped')",
                [],
            )
            .unwrap();
        }
        assert!(matches!(store.get("BAD"), Err(StoreError::Corrupt { id, .. }) if id == "BAD"));
    }

    #[test]
    fn open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/pyq.sqlite");
        let store = Store::open(&path).unwrap();
        store.put(&question("Q1", Subject::Physics, "Q?")).unwrap();
        drop(store);
        assert_eq!(Store::open(&path).unwrap().count().unwrap(), 1);
    }
}
