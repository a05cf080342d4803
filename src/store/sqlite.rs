use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    page_window, snake_to_title_case, EvaluationDetail, EvaluationSummary, NewEvaluation,
    NewResult, NewTestCase, Page, ResultRecord, ResultStore, RunTotals, SuiteAnalysis, TestCase,
    TestCaseDetails,
};
use crate::accounting::{CostBreakdown, TokenCounts};
use crate::scoring::Verdict;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS evaluation_types (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT
);

CREATE TABLE IF NOT EXISTS criteria (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    evaluation_type_id INTEGER NOT NULL REFERENCES evaluation_types(id),
    name               TEXT NOT NULL CHECK (name <> ''),
    description        TEXT,
    UNIQUE (evaluation_type_id, name)
);

CREATE TABLE IF NOT EXISTS test_cases (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    evaluation_type_id INTEGER NOT NULL REFERENCES evaluation_types(id),
    criterion_id       INTEGER NOT NULL REFERENCES criteria(id),
    input              TEXT NOT NULL,
    description        TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS evaluations (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    evaluation_type_id INTEGER NOT NULL REFERENCES evaluation_types(id),
    timestamp          TEXT NOT NULL,
    system_prompt      TEXT NOT NULL,
    model_name         TEXT NOT NULL,
    scoring_model      TEXT NOT NULL,
    total_tokens       INTEGER NOT NULL DEFAULT 0,
    total_cost         REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS evaluation_results (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    evaluation_id            INTEGER NOT NULL REFERENCES evaluations(id),
    test_case_id             INTEGER NOT NULL REFERENCES test_cases(id),
    output                   TEXT NOT NULL,
    result                   TEXT NOT NULL CHECK (result IN ('pass', 'fail', 'error')),
    explanation              TEXT NOT NULL,
    evaluation_input_tokens  INTEGER NOT NULL DEFAULT 0,
    evaluation_output_tokens INTEGER NOT NULL DEFAULT 0,
    scoring_input_tokens     INTEGER NOT NULL DEFAULT 0,
    scoring_output_tokens    INTEGER NOT NULL DEFAULT 0,
    evaluation_input_cost    REAL NOT NULL DEFAULT 0,
    evaluation_output_cost   REAL NOT NULL DEFAULT 0,
    scoring_input_cost       REAL NOT NULL DEFAULT 0,
    scoring_output_cost      REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_results_evaluation ON evaluation_results(evaluation_id);
"#;

const SUMMARY_COLUMNS: &str = "e.id, t.name, e.timestamp, e.system_prompt, e.model_name, \
     e.scoring_model, e.total_tokens, e.total_cost, \
     (SELECT COUNT(*) FROM evaluation_results r WHERE r.evaluation_id = e.id AND r.result = 'pass'), \
     (SELECT COUNT(*) FROM evaluation_results r WHERE r.evaluation_id = e.id)";

const RECORD_COLUMNS: &str = "tc.id, tc.input, tc.description, c.name, r.output, r.result, \
     r.explanation, r.evaluation_input_tokens, r.evaluation_output_tokens, \
     r.scoring_input_tokens, r.scoring_output_tokens, r.evaluation_input_cost, \
     r.evaluation_output_cost, r.scoring_input_cost, r.scoring_output_cost, \
     e.model_name, e.scoring_model";

const RECORD_JOINS: &str = "FROM evaluation_results r \
     JOIN evaluations e ON e.id = r.evaluation_id \
     JOIN test_cases tc ON tc.id = r.test_case_id \
     JOIN criteria c ON c.id = tc.criterion_id";

/// SQLite-backed store. Every statement runs on the blocking pool behind a
/// single connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database. `:memory:` gives a private in-memory db.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().context("Failed to open in-memory database")?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {}", parent.display())
                    })?;
                }
            }
            Connection::open(path).with_context(|| format!("Failed to open database {}", path))?
        };
        Self::init_connection(&conn)?;
        debug!(path, "Database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA).context("Failed to create schema")?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .context("Database task panicked")?
    }
}

fn type_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM evaluation_types WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?)
}

fn insert_result(conn: &Connection, r: &NewResult) -> Result<i64> {
    conn.execute(
        "INSERT INTO evaluation_results (
            evaluation_id, test_case_id, output, result, explanation,
            evaluation_input_tokens, evaluation_output_tokens,
            scoring_input_tokens, scoring_output_tokens,
            evaluation_input_cost, evaluation_output_cost,
            scoring_input_cost, scoring_output_cost
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            r.evaluation_id,
            r.test_case_id,
            r.output,
            r.verdict.as_str(),
            r.explanation,
            r.tokens.evaluation_input as i64,
            r.tokens.evaluation_output as i64,
            r.tokens.scoring_input as i64,
            r.tokens.scoring_output as i64,
            r.costs.evaluation_input,
            r.costs.evaluation_output,
            r.costs.scoring_input,
            r.costs.scoring_output,
        ],
    )
    .with_context(|| {
        format!(
            "Failed to store result for test case {} of evaluation {}",
            r.test_case_id, r.evaluation_id
        )
    })?;
    Ok(conn.last_insert_rowid())
}

fn set_totals(conn: &Connection, evaluation_id: i64, totals: RunTotals) -> Result<()> {
    let changed = conn.execute(
        "UPDATE evaluations SET total_tokens = ?1, total_cost = ?2 WHERE id = ?3",
        params![totals.tokens as i64, totals.cost, evaluation_id],
    )?;
    if changed == 0 {
        anyhow::bail!("Evaluation {} not found", evaluation_id);
    }
    Ok(())
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<EvaluationSummary> {
    Ok(EvaluationSummary {
        id: row.get(0)?,
        evaluation_type: row.get(1)?,
        timestamp: parse_timestamp(&row.get::<_, String>(2)?)?,
        system_prompt: row.get(3)?,
        model_name: row.get(4)?,
        scoring_model: row.get(5)?,
        total_tokens: row.get::<_, i64>(6)? as u64,
        total_cost: row.get(7)?,
        total_score: row.get::<_, i64>(8)? as usize,
        total_cases: row.get::<_, i64>(9)? as usize,
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ResultRecord> {
    let verdict_raw: String = row.get(5)?;
    Ok(ResultRecord {
        test_case: TestCase {
            id: row.get(0)?,
            input: row.get(1)?,
            description: row.get(2)?,
            criterion: row.get(3)?,
        },
        output: row.get(4)?,
        verdict: Verdict::parse(&verdict_raw).unwrap_or(Verdict::Error),
        explanation: row.get(6)?,
        tokens: TokenCounts {
            evaluation_input: row.get::<_, i64>(7)? as u64,
            evaluation_output: row.get::<_, i64>(8)? as u64,
            scoring_input: row.get::<_, i64>(9)? as u64,
            scoring_output: row.get::<_, i64>(10)? as u64,
        },
        costs: CostBreakdown {
            evaluation_input: row.get(11)?,
            evaluation_output: row.get(12)?,
            scoring_input: row.get(13)?,
            scoring_output: row.get(14)?,
        },
        evaluation_model: row.get(15)?,
        scoring_model: row.get(16)?,
    })
}

fn summary(conn: &Connection, evaluation_id: i64) -> Result<Option<EvaluationSummary>> {
    let sql = format!(
        "SELECT {} FROM evaluations e JOIN evaluation_types t ON t.id = e.evaluation_type_id \
         WHERE e.id = ?1",
        SUMMARY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![evaluation_id], row_to_summary)
        .optional()?)
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn create_evaluation(&self, new: NewEvaluation) -> Result<i64> {
        self.with_conn(move |conn| {
            let type_id = type_id(conn, &new.evaluation_type)?.with_context(|| {
                format!("Evaluation type {} not found", new.evaluation_type)
            })?;
            conn.execute(
                "INSERT INTO evaluations (
                    evaluation_type_id, timestamp, system_prompt, model_name,
                    scoring_model, total_tokens, total_cost
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    type_id,
                    Utc::now().to_rfc3339(),
                    new.system_prompt,
                    new.evaluation_model,
                    new.scoring_model,
                    new.totals.tokens as i64,
                    new.totals.cost,
                ],
            )
            .context("Failed to create evaluation")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn append_result(&self, result: NewResult) -> Result<i64> {
        self.with_conn(move |conn| insert_result(conn, &result)).await
    }

    async fn update_totals(&self, evaluation_id: i64, totals: RunTotals) -> Result<()> {
        self.with_conn(move |conn| set_totals(conn, evaluation_id, totals))
            .await
    }

    async fn record_case(&self, result: NewResult, totals: RunTotals) -> Result<i64> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = insert_result(&tx, &result)?;
            set_totals(&tx, result.evaluation_id, totals)?;
            tx.commit()?;
            Ok(id)
        })
        .await
    }

    async fn load_suite(&self, evaluation_type: &str) -> Result<Option<Vec<TestCase>>> {
        let name = evaluation_type.to_string();
        self.with_conn(move |conn| {
            let Some(type_id) = type_id(conn, &name)? else {
                return Ok(None);
            };
            let mut stmt = conn.prepare(
                "SELECT tc.id, tc.input, tc.description, c.name
                 FROM test_cases tc JOIN criteria c ON c.id = tc.criterion_id
                 WHERE tc.evaluation_type_id = ?1
                 ORDER BY tc.id",
            )?;
            let cases = stmt
                .query_map(params![type_id], |row| {
                    Ok(TestCase {
                        id: row.get(0)?,
                        input: row.get(1)?,
                        description: row.get(2)?,
                        criterion: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(cases))
        })
        .await
    }

    async fn get_result(
        &self,
        evaluation_id: i64,
        test_case_id: i64,
    ) -> Result<Option<TestCaseDetails>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} {} WHERE r.evaluation_id = ?1 AND r.test_case_id = ?2",
                RECORD_COLUMNS, RECORD_JOINS
            );
            let record = conn
                .query_row(&sql, params![evaluation_id, test_case_id], row_to_record)
                .optional()?;
            Ok(record.map(TestCaseDetails::from))
        })
        .await
    }

    async fn list_evaluations(
        &self,
        page: usize,
        limit: usize,
    ) -> Result<Page<EvaluationSummary>> {
        let (page, limit, offset) = page_window(page, limit);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM evaluations", [], |row| row.get(0))?;
            let sql = format!(
                "SELECT {} FROM evaluations e JOIN evaluation_types t ON t.id = e.evaluation_type_id \
                 ORDER BY e.id DESC LIMIT ?1 OFFSET ?2",
                SUMMARY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params![limit as i64, offset], row_to_summary)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Page::new(items, total as usize, page, limit))
        })
        .await
    }

    async fn get_evaluation(&self, evaluation_id: i64) -> Result<Option<EvaluationDetail>> {
        self.with_conn(move |conn| {
            let Some(summary) = summary(conn, evaluation_id)? else {
                return Ok(None);
            };
            let sql = format!(
                "SELECT {} {} WHERE r.evaluation_id = ?1 ORDER BY r.id",
                RECORD_COLUMNS, RECORD_JOINS
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params![evaluation_id], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(EvaluationDetail::assemble(summary, records)))
        })
        .await
    }

    async fn test_case_analysis(&self, evaluation_type: &str) -> Result<Option<SuiteAnalysis>> {
        let name = evaluation_type.to_string();
        self.with_conn(move |conn| {
            let Some(type_id) = type_id(conn, &name)? else {
                return Ok(None);
            };
            let mut stmt = conn.prepare(
                "SELECT c.name, COALESCE(c.description, ''), COUNT(tc.id)
                 FROM criteria c LEFT JOIN test_cases tc ON tc.criterion_id = c.id
                 WHERE c.evaluation_type_id = ?1
                 GROUP BY c.id",
            )?;
            let rows = stmt
                .query_map(params![type_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as usize,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut analysis = SuiteAnalysis::default();
            for (criterion, description, count) in rows {
                analysis.total_test_cases += count;
                if count > 0 {
                    analysis.counts_per_criterion.insert(criterion.clone(), count);
                }
                analysis.criteria.insert(criterion, description);
            }
            Ok(Some(analysis))
        })
        .await
    }

    async fn seed_suite(
        &self,
        evaluation_type: &str,
        description: Option<&str>,
        cases: Vec<NewTestCase>,
    ) -> Result<usize> {
        let name = evaluation_type.to_string();
        let description = description.map(str::to_string);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO evaluation_types (name, description) VALUES (?1, ?2)",
                params![name, description],
            )?;
            let type_id = type_id(&tx, &name)?
                .with_context(|| format!("Evaluation type {} missing after insert", name))?;

            let mut criterion_ids: BTreeMap<String, i64> = BTreeMap::new();
            for case in &cases {
                if case.criterion.trim().is_empty() {
                    anyhow::bail!("Test case with input {:?} has an empty criterion", case.input);
                }
                let criterion_id = match criterion_ids.get(&case.criterion) {
                    Some(id) => *id,
                    None => {
                        tx.execute(
                            "INSERT OR IGNORE INTO criteria (evaluation_type_id, name, description)
                             VALUES (?1, ?2, ?3)",
                            params![type_id, case.criterion, snake_to_title_case(&case.criterion)],
                        )?;
                        let id: i64 = tx.query_row(
                            "SELECT id FROM criteria WHERE evaluation_type_id = ?1 AND name = ?2",
                            params![type_id, case.criterion],
                            |row| row.get(0),
                        )?;
                        criterion_ids.insert(case.criterion.clone(), id);
                        id
                    }
                };
                tx.execute(
                    "INSERT INTO test_cases (id, evaluation_type_id, criterion_id, input, description)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![case.id, type_id, criterion_id, case.input, case.description],
                )
                .with_context(|| format!("Failed to insert test case {:?}", case.input))?;
            }
            tx.commit()?;
            Ok(cases.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: Option<i64>, criterion: &str, input: &str) -> NewTestCase {
        NewTestCase {
            id,
            criterion: criterion.to_string(),
            input: input.to_string(),
            description: String::new(),
        }
    }

    fn new_eval(totals: RunTotals) -> NewEvaluation {
        NewEvaluation {
            evaluation_type: "speech_to_text".into(),
            system_prompt: "Transcribe".into(),
            evaluation_model: "gpt-4o-mini".into(),
            scoring_model: "gpt-4o".into(),
            totals,
        }
    }

    fn result(evaluation_id: i64, test_case_id: i64, verdict: Verdict) -> NewResult {
        NewResult {
            evaluation_id,
            test_case_id,
            output: "echo".into(),
            verdict,
            explanation: "- fine".into(),
            tokens: TokenCounts {
                evaluation_input: 3,
                evaluation_output: 1,
                scoring_input: 20,
                scoring_output: 4,
            },
            costs: CostBreakdown {
                evaluation_input: 0.001,
                scoring_input: 0.002,
                ..Default::default()
            },
        }
    }

    async fn seeded() -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        store
            .seed_suite(
                "speech_to_text",
                Some("Speech transcription"),
                vec![
                    case(Some(10), "clarity", "hello"),
                    case(Some(11), "filler_words", "um so"),
                    case(None, "clarity", "world"),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_seed_and_load_suite() {
        let store = seeded().await;
        let suite = store.load_suite("speech_to_text").await.unwrap().unwrap();
        assert_eq!(suite.len(), 3);
        assert_eq!(suite[0].id, 10);
        assert_eq!(suite[1].criterion, "filler_words");
        assert_eq!(suite[2].id, 12);
        assert!(store.load_suite("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_suite_is_some() {
        let store = SqliteStore::open(":memory:").unwrap();
        store.seed_suite("empty", None, vec![]).await.unwrap();
        assert_eq!(store.load_suite("empty").await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_empty_criterion_rejected() {
        let store = SqliteStore::open(":memory:").unwrap();
        let err = store
            .seed_suite("t", None, vec![case(None, "", "x")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty criterion"));
        // transaction rolled back
        assert!(store.load_suite("t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_case_and_detail() {
        let store = seeded().await;
        let eval_id = store
            .create_evaluation(new_eval(RunTotals { tokens: 5, cost: 0.01 }))
            .await
            .unwrap();

        store
            .record_case(result(eval_id, 10, Verdict::Pass), RunTotals { tokens: 33, cost: 0.013 })
            .await
            .unwrap();
        store
            .record_case(result(eval_id, 11, Verdict::Error), RunTotals { tokens: 61, cost: 0.016 })
            .await
            .unwrap();

        let details = store.get_result(eval_id, 10).await.unwrap().unwrap();
        assert_eq!(details.result, Verdict::Pass);
        assert_eq!(details.explanation, "- fine");
        assert_eq!(details.input_model, "gpt-4o-mini");
        assert_eq!(details.output_model, "gpt-4o");
        assert_eq!(details.tokens.scoring_input, 20);
        assert!((details.scoring_cost - 0.002).abs() < 1e-12);
        assert!(store.get_result(eval_id, 12).await.unwrap().is_none());

        let detail = store.get_evaluation(eval_id).await.unwrap().unwrap();
        assert_eq!(detail.summary.total_tokens, 61);
        assert!((detail.summary.total_cost - 0.016).abs() < 1e-12);
        assert_eq!(detail.summary.total_score, 1);
        assert_eq!(detail.summary.total_cases, 2);
        assert_eq!(detail.summary.evaluation_type, "speech_to_text");
        assert_eq!(detail.test_case_results.len(), 2);
        assert_eq!(detail.scores_by_criteria["filler_words"].pass_count, 0);
    }

    #[tokio::test]
    async fn test_append_to_unknown_evaluation_fails() {
        let store = seeded().await;
        assert!(store
            .append_result(result(999, 10, Verdict::Pass))
            .await
            .is_err());
        assert!(store
            .update_totals(999, RunTotals::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_record_case_is_atomic() {
        let store = seeded().await;
        let eval_id = store
            .create_evaluation(new_eval(RunTotals::default()))
            .await
            .unwrap();
        // unknown test case violates the foreign key, totals must not move
        assert!(store
            .record_case(result(eval_id, 404, Verdict::Pass), RunTotals { tokens: 99, cost: 1.0 })
            .await
            .is_err());
        let detail = store.get_evaluation(eval_id).await.unwrap().unwrap();
        assert_eq!(detail.summary.total_tokens, 0);
        assert_eq!(detail.summary.total_cases, 0);
    }

    #[tokio::test]
    async fn test_list_and_analysis() {
        let store = seeded().await;
        for _ in 0..3 {
            store
                .create_evaluation(new_eval(RunTotals::default()))
                .await
                .unwrap();
        }
        let page = store.list_evaluations(1, 2).await.unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.evaluations.len(), 2);
        assert!(page.evaluations[0].id > page.evaluations[1].id);
        let beyond = store.list_evaluations(usize::MAX, 10).await.unwrap();
        assert!(beyond.evaluations.is_empty());
        assert_eq!(beyond.total_count, 3);

        let analysis = store
            .test_case_analysis("speech_to_text")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.total_test_cases, 3);
        assert_eq!(analysis.counts_per_criterion["clarity"], 2);
        assert_eq!(analysis.criteria["filler_words"], "Filler Words");
        assert!(store.test_case_analysis("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("eval.db");
        let path = path.to_str().unwrap().to_string();
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .seed_suite("speech_to_text", None, vec![case(None, "clarity", "a")])
                .await
                .unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        let suite = reopened.load_suite("speech_to_text").await.unwrap().unwrap();
        assert_eq!(suite.len(), 1);
    }
}
