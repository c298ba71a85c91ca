use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Per-file scheduling signals gathered before a crawl batch.
#[derive(Debug, Clone)]
pub struct FileSignals {
    pub path: PathBuf,
    /// Last filesystem modification, if known
    pub modified_at: Option<DateTime<Utc>>,
    /// Historical issue count for this file
    pub issue_density: u64,
    /// When the file was last scanned, if ever
    pub last_scanned_at: Option<DateTime<Utc>>,
}

/// Orders the crawl frontier: recently changed files, files with a history
/// of issues, and files that have not been scanned recently go first. Ties
/// break on lexical path order so a given frontier always schedules
/// identically.
pub struct FilePrioritizer {
    now: DateTime<Utc>,
}

impl FilePrioritizer {
    pub fn new() -> Self {
        Self { now: Utc::now() }
    }

    /// Fixed reference clock, for deterministic tests.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn order(&self, mut files: Vec<FileSignals>, limit: usize) -> Vec<PathBuf> {
        files.sort_by(|a, b| {
            let score_a = self.score(a);
            let score_b = self.score(b);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        files.into_iter().take(limit).map(|f| f.path).collect()
    }

    fn score(&self, file: &FileSignals) -> f64 {
        self.recency_score(file) + self.density_score(file) + self.staleness_score(file)
    }

    /// Changes within the last hour score close to 1.0 and decay from there.
    fn recency_score(&self, file: &FileSignals) -> f64 {
        match file.modified_at {
            Some(modified) => {
                let age_hours = (self.now - modified).num_seconds().max(0) as f64 / 3600.0;
                1.0 / (1.0 + age_hours)
            }
            None => 0.0,
        }
    }

    /// Saturating: the difference between 0 and 5 prior issues matters far
    /// more than between 50 and 55.
    fn density_score(&self, file: &FileSignals) -> f64 {
        let density = file.issue_density as f64;
        density / (density + 5.0)
    }

    /// A never-scanned file outranks any recently scanned one.
    fn staleness_score(&self, file: &FileSignals) -> f64 {
        match file.last_scanned_at {
            None => 1.0,
            Some(scanned) => {
                let age_hours = (self.now - scanned).num_seconds().max(0) as f64 / 3600.0;
                (age_hours / (age_hours + 24.0)).min(1.0)
            }
        }
    }
}

impl Default for FilePrioritizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signals(path: &str) -> FileSignals {
        FileSignals {
            path: PathBuf::from(path),
            modified_at: None,
            issue_density: 0,
            last_scanned_at: None,
        }
    }

    #[test]
    fn recently_changed_files_first() {
        let now = Utc::now();
        let prioritizer = FilePrioritizer::at(now);

        let mut fresh = signals("b.rs");
        fresh.modified_at = Some(now - Duration::minutes(5));
        fresh.last_scanned_at = Some(now - Duration::hours(1));

        let mut stale = signals("a.rs");
        stale.modified_at = Some(now - Duration::days(30));
        stale.last_scanned_at = Some(now - Duration::hours(1));

        let order = prioritizer.order(vec![stale, fresh], 10);
        assert_eq!(order, vec![PathBuf::from("b.rs"), PathBuf::from("a.rs")]);
    }

    #[test]
    fn issue_dense_files_first() {
        let now = Utc::now();
        let prioritizer = FilePrioritizer::at(now);

        let mut dense = signals("z.rs");
        dense.issue_density = 12;
        dense.last_scanned_at = Some(now - Duration::hours(1));
        let mut clean = signals("a.rs");
        clean.last_scanned_at = Some(now - Duration::hours(1));

        let order = prioritizer.order(vec![clean, dense], 10);
        assert_eq!(order[0], PathBuf::from("z.rs"));
    }

    #[test]
    fn never_scanned_beats_recently_scanned() {
        let now = Utc::now();
        let prioritizer = FilePrioritizer::at(now);

        let unscanned = signals("n.rs");
        let mut scanned = signals("a.rs");
        scanned.last_scanned_at = Some(now - Duration::minutes(2));

        let order = prioritizer.order(vec![scanned, unscanned], 10);
        assert_eq!(order[0], PathBuf::from("n.rs"));
    }

    #[test]
    fn ties_break_lexically_for_determinism() {
        let prioritizer = FilePrioritizer::at(Utc::now());
        let order = prioritizer.order(
            vec![signals("c.rs"), signals("a.rs"), signals("b.rs")],
            10,
        );
        assert_eq!(
            order,
            vec![
                PathBuf::from("a.rs"),
                PathBuf::from("b.rs"),
                PathBuf::from("c.rs")
            ]
        );
    }

    #[test]
    fn limit_truncates_frontier() {
        let prioritizer = FilePrioritizer::at(Utc::now());
        let order = prioritizer.order(
            vec![signals("a.rs"), signals("b.rs"), signals("c.rs")],
            2,
        );
        assert_eq!(order.len(), 2);
    }
}
