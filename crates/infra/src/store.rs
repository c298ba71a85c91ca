use chrono::{DateTime, Utc};
use common::errors::{RemedyError, RemedyResult};
use parking_lot::Mutex;
use remedy_core::{
    ApplicationRecord, ApplicationState, CycleOutcome, Deployment, DeploymentStatus, DomainKey,
    ExpertiseScore, Fix, Issue, IssueCategory, LearningCycle, SafetyTier, Severity, SourceSpan,
    StrategyKind, VerificationResult,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS issues (
  id TEXT PRIMARY KEY,
  file_path TEXT NOT NULL,
  span_json TEXT NOT NULL,
  category TEXT NOT NULL,
  severity INTEGER NOT NULL CHECK (severity BETWEEN 1 AND 4),
  detector_source TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_issues_file ON issues(file_path);

CREATE TABLE IF NOT EXISTS fixes (
  id TEXT PRIMARY KEY,
  issue_id TEXT NOT NULL REFERENCES issues(id),
  strategy TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  confidence REAL NOT NULL CHECK (confidence BETWEEN 0.0 AND 1.0),
  safety_tier TEXT NOT NULL CHECK (safety_tier IN ('safe','medium','risky')),
  generated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fixes_issue ON fixes(issue_id);

CREATE TABLE IF NOT EXISTS application_records (
  id TEXT PRIMARY KEY,
  fix_id TEXT NOT NULL REFERENCES fixes(id),
  file_path TEXT NOT NULL,
  state TEXT NOT NULL,
  applied_at TEXT,
  verification_json TEXT,
  rolled_back_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_records_fix ON application_records(fix_id);

CREATE TABLE IF NOT EXISTS deployments (
  id TEXT PRIMARY KEY,
  fix_id TEXT NOT NULL REFERENCES fixes(id),
  file_path TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('pending','live','reverted')),
  production_error_count INTEGER NOT NULL DEFAULT 0,
  cycle_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS learning_cycles (
  id TEXT PRIMARY KEY,
  issue_id TEXT NOT NULL,
  fix_id TEXT,
  stages_json TEXT NOT NULL,
  outcome TEXT CHECK (outcome IN ('success','failed','production-success','production-issues') OR outcome IS NULL),
  metadata_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  completed_at TEXT
);

-- Terminal outcomes are write-once; history is replayed, never overwritten.
CREATE TRIGGER IF NOT EXISTS trg_cycles_outcome_write_once
BEFORE UPDATE OF outcome ON learning_cycles
WHEN OLD.outcome IS NOT NULL AND NEW.outcome IS NOT OLD.outcome
BEGIN
  SELECT RAISE(FAIL, 'learning cycle outcome is terminal');
END;

CREATE TABLE IF NOT EXISTS expertise_scores (
  strategy TEXT NOT NULL,
  domain TEXT NOT NULL,
  weight REAL NOT NULL CHECK (weight BETWEEN 0.0 AND 1.0),
  sample_count INTEGER NOT NULL,
  last_updated TEXT NOT NULL,
  PRIMARY KEY (strategy, domain)
);

CREATE TABLE IF NOT EXISTS scan_log (
  file_path TEXT PRIMARY KEY,
  scanned_at TEXT NOT NULL
);
";

/// Durable store for the six pipeline entities, keyed by UUID.
///
/// rusqlite behind a mutex; callers are short-lived transactions so the
/// single connection is not a bottleneck at crawl scale.
pub struct Store {
    conn: Mutex<Connection>,
}

fn storage_err(e: rusqlite::Error) -> RemedyError {
    RemedyError::Storage(e.to_string())
}

fn json_err(e: serde_json::Error) -> RemedyError {
    RemedyError::Serialization(e.to_string())
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> RemedyResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> RemedyResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> RemedyResult<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // === Issues ===

    pub fn insert_issue(&self, issue: &Issue) -> RemedyResult<()> {
        let span = serde_json::to_string(&issue.location).map_err(json_err)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO issues (id, file_path, span_json, category, severity, detector_source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    issue.id.to_string(),
                    path_str(&issue.file_path),
                    span,
                    issue.category.domain(),
                    issue.severity as i64,
                    issue.detector_source,
                    issue.created_at.to_rfc3339(),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_issue(&self, id: Uuid) -> RemedyResult<Option<Issue>> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, file_path, span_json, category, severity, detector_source, created_at
                 FROM issues WHERE id = ?1",
                params![id.to_string()],
                row_to_issue,
            )
            .optional()
            .map_err(storage_err)
    }

    pub fn issues_for_file(&self, file_path: &Path) -> RemedyResult<Vec<Issue>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, file_path, span_json, category, severity, detector_source, created_at
                 FROM issues WHERE file_path = ?1 ORDER BY created_at",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![path_str(file_path)], row_to_issue)
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    /// Historical issue count per file, feeding the crawl prioritizer.
    pub fn issue_density(&self, file_path: &Path) -> RemedyResult<u64> {
        self.conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM issues WHERE file_path = ?1",
                params![path_str(file_path)],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(storage_err)
    }

    // === Fixes ===

    pub fn insert_fix(&self, fix: &Fix) -> RemedyResult<()> {
        let payload = serde_json::to_string(&fix.payload).map_err(json_err)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO fixes (id, issue_id, strategy, payload_json, confidence, safety_tier, generated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    fix.id.to_string(),
                    fix.issue_id.to_string(),
                    fix.strategy.as_str(),
                    payload,
                    fix.confidence,
                    fix.safety_tier.as_str(),
                    fix.generated_at.to_rfc3339(),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Medium-tier fixes with no application record yet: the
    /// hold-for-approval work list shown to operators.
    pub fn pending_approval_fixes(&self) -> RemedyResult<Vec<Fix>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT f.id, f.issue_id, f.strategy, f.payload_json, f.confidence, f.safety_tier, f.generated_at
                 FROM fixes f
                 LEFT JOIN application_records r ON r.fix_id = f.id
                 WHERE f.safety_tier = 'medium' AND r.id IS NULL
                 ORDER BY f.generated_at",
            )
            .map_err(storage_err)?;
        let rows = stmt.query_map([], row_to_fix).map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    // === Application records ===

    pub fn save_record(&self, record: &ApplicationRecord) -> RemedyResult<()> {
        let verification = record
            .verification
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO application_records (id, fix_id, file_path, state, applied_at, verification_json, rolled_back_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   state = excluded.state,
                   applied_at = excluded.applied_at,
                   verification_json = excluded.verification_json,
                   rolled_back_at = excluded.rolled_back_at",
                params![
                    record.id.to_string(),
                    record.fix_id.to_string(),
                    path_str(&record.file_path),
                    record.state.as_str(),
                    record.applied_at.map(|t| t.to_rfc3339()),
                    verification,
                    record.rolled_back_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    /// Count of verified-pass applications for one issue. The pipeline
    /// invariant keeps this at most 1.
    pub fn verified_pass_count_for_issue(&self, issue_id: Uuid) -> RemedyResult<u64> {
        self.conn
            .lock()
            .query_row(
                "SELECT COUNT(*)
                 FROM application_records r
                 JOIN fixes f ON f.id = r.fix_id
                 WHERE f.issue_id = ?1 AND r.state = 'verified'",
                params![issue_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(storage_err)
    }

    // === Deployments ===

    pub fn save_deployment(&self, deployment: &Deployment) -> RemedyResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO deployments (id, fix_id, file_path, status, production_error_count, cycle_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   production_error_count = excluded.production_error_count",
                params![
                    deployment.id.to_string(),
                    deployment.fix_id.to_string(),
                    path_str(&deployment.file_path),
                    deployment.status.as_str(),
                    deployment.production_error_count as i64,
                    deployment.cycle_id.to_string(),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn deployments_with_status(
        &self,
        status: DeploymentStatus,
    ) -> RemedyResult<Vec<Deployment>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, fix_id, file_path, status, production_error_count, cycle_id
                 FROM deployments WHERE status = ?1",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![status.as_str()], row_to_deployment)
            .map_err(storage_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
    }

    // === Learning cycles ===

    pub fn save_cycle(&self, cycle: &LearningCycle) -> RemedyResult<()> {
        let stages = serde_json::to_string(&cycle.stages).map_err(json_err)?;
        let metadata = serde_json::to_string(&cycle.metadata).map_err(json_err)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO learning_cycles (id, issue_id, fix_id, stages_json, outcome, metadata_json, created_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   fix_id = excluded.fix_id,
                   stages_json = excluded.stages_json,
                   outcome = excluded.outcome,
                   metadata_json = excluded.metadata_json,
                   completed_at = excluded.completed_at",
                params![
                    cycle.id.to_string(),
                    cycle.issue_id.to_string(),
                    cycle.fix_id.map(|id| id.to_string()),
                    stages,
                    cycle.outcome.map(|o| o.as_str()),
                    metadata,
                    cycle.created_at.to_rfc3339(),
                    cycle.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn cycles_with_outcome(&self, outcome: CycleOutcome) -> RemedyResult<u64> {
        self.conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM learning_cycles WHERE outcome = ?1",
                params![outcome.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(storage_err)
    }

    // === Expertise ===

    pub fn save_expertise(&self, score: &ExpertiseScore) -> RemedyResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO expertise_scores (strategy, domain, weight, sample_count, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(strategy, domain) DO UPDATE SET
                   weight = excluded.weight,
                   sample_count = excluded.sample_count,
                   last_updated = excluded.last_updated",
                params![
                    score.key.strategy.as_str(),
                    score.key.domain,
                    score.weight,
                    score.sample_count as i64,
                    score.last_updated.to_rfc3339(),
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn load_expertise(&self) -> RemedyResult<Vec<ExpertiseScore>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT strategy, domain, weight, sample_count, last_updated FROM expertise_scores")
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], |row| {
                let strategy: String = row.get(0)?;
                let domain: String = row.get(1)?;
                let weight: f64 = row.get(2)?;
                let sample_count: i64 = row.get(3)?;
                let last_updated: String = row.get(4)?;
                Ok((strategy, domain, weight, sample_count, last_updated))
            })
            .map_err(storage_err)?;

        let mut scores = Vec::new();
        for row in rows {
            let (strategy, domain, weight, sample_count, last_updated) =
                row.map_err(storage_err)?;
            let strategy = StrategyKind::from_str_key(&strategy).ok_or_else(|| {
                RemedyError::Storage(format!("unknown strategy key '{strategy}'"))
            })?;
            scores.push(ExpertiseScore {
                key: DomainKey::new(strategy, domain),
                weight,
                sample_count: sample_count as u64,
                last_updated: parse_ts(&last_updated)?,
            });
        }
        Ok(scores)
    }

    // === Scan log ===

    pub fn record_scan(&self, file_path: &Path, at: DateTime<Utc>) -> RemedyResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO scan_log (file_path, scanned_at) VALUES (?1, ?2)
                 ON CONFLICT(file_path) DO UPDATE SET scanned_at = excluded.scanned_at",
                params![path_str(file_path), at.to_rfc3339()],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn last_scan(&self, file_path: &Path) -> RemedyResult<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT scanned_at FROM scan_log WHERE file_path = ?1",
                params![path_str(file_path)],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(|s| parse_ts(&s)).transpose()
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parse_ts(raw: &str) -> RemedyResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RemedyError::Storage(format!("bad timestamp '{raw}': {e}")))
}

fn parse_uuid(raw: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    let id: String = row.get(0)?;
    let file_path: String = row.get(1)?;
    let span_json: String = row.get(2)?;
    let category: String = row.get(3)?;
    let severity: i64 = row.get(4)?;
    let detector_source: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    let span: SourceSpan = serde_json::from_str(&span_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Issue {
        id: parse_uuid(id)?,
        file_path: PathBuf::from(file_path),
        location: span,
        category: IssueCategory::from_domain(&category),
        severity: match severity {
            1 => Severity::Low,
            2 => Severity::Medium,
            3 => Severity::High,
            _ => Severity::Critical,
        },
        detector_source,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_fix(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fix> {
    let id: String = row.get(0)?;
    let issue_id: String = row.get(1)?;
    let strategy: String = row.get(2)?;
    let payload_json: String = row.get(3)?;
    let confidence: f64 = row.get(4)?;
    let tier: String = row.get(5)?;
    let generated_at: String = row.get(6)?;

    let payload = serde_json::from_str(&payload_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Fix {
        id: parse_uuid(id)?,
        issue_id: parse_uuid(issue_id)?,
        strategy: StrategyKind::from_str_key(&strategy).unwrap_or(StrategyKind::Pattern),
        payload,
        confidence,
        safety_tier: match tier.as_str() {
            "safe" => SafetyTier::Safe,
            "medium" => SafetyTier::Medium,
            _ => SafetyTier::Risky,
        },
        generated_at: DateTime::parse_from_rfc3339(&generated_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn row_to_deployment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Deployment> {
    let id: String = row.get(0)?;
    let fix_id: String = row.get(1)?;
    let file_path: String = row.get(2)?;
    let status: String = row.get(3)?;
    let count: i64 = row.get(4)?;
    let cycle_id: String = row.get(5)?;
    Ok(Deployment {
        id: parse_uuid(id)?,
        fix_id: parse_uuid(fix_id)?,
        file_path: PathBuf::from(file_path),
        status: match status.as_str() {
            "pending" => DeploymentStatus::Pending,
            "live" => DeploymentStatus::Live,
            _ => DeploymentStatus::Reverted,
        },
        production_error_count: count as u32,
        cycle_id: parse_uuid(cycle_id)?,
    })
}
