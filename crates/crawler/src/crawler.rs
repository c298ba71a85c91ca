use crate::detector::{Finding, IssueDetector};
use crate::prioritizer::{FilePrioritizer, FileSignals};
use chrono::{DateTime, Utc};
use common::config::CrawlerConfig;
use common::errors::RemedyResult;
use common::events::PipelineEvent;
use common::{topics, EventBus};
use infra::{ResultCache, Store};
use remedy_core::Issue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

/// Extensions considered part of the scannable working set.
const SCAN_EXTENSIONS: &[&str] = &["rs", "js", "ts", "py", "go", "java", "c", "cpp", "cs"];

/// Result of one crawl batch. Failures are per-file and never abort the
/// batch.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub files_scanned: usize,
    pub files_failed: Vec<(PathBuf, String)>,
    pub issues: Vec<Issue>,
    pub cache_hits: usize,
    pub cancelled: bool,
}

/// Walks a prioritized working set under a semaphore bound, emitting one
/// [`Issue`] per detected defect.
pub struct Crawler {
    detector: Arc<dyn IssueDetector>,
    cache: Arc<ResultCache>,
    store: Arc<Store>,
    bus: EventBus<PipelineEvent>,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(
        detector: Arc<dyn IssueDetector>,
        cache: Arc<ResultCache>,
        store: Arc<Store>,
        bus: EventBus<PipelineEvent>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            detector,
            cache,
            store,
            bus,
            config,
        }
    }

    /// Discover scannable files under `root`.
    pub fn discover(&self, root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| SCAN_EXTENSIONS.contains(&ext))
            })
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Build the ordered frontier for a candidate set.
    pub fn frontier(&self, candidates: Vec<PathBuf>) -> Vec<PathBuf> {
        let signals: Vec<FileSignals> = candidates
            .into_iter()
            .map(|path| {
                let modified_at = std::fs::metadata(&path)
                    .and_then(|meta| meta.modified())
                    .ok()
                    .map(DateTime::<Utc>::from);
                let issue_density = self.store.issue_density(&path).unwrap_or(0);
                let last_scanned_at = self.store.last_scan(&path).unwrap_or(None);
                FileSignals {
                    path,
                    modified_at,
                    issue_density,
                    last_scanned_at,
                }
            })
            .collect();
        FilePrioritizer::new().order(signals, self.config.batch_limit)
    }

    /// Crawl an explicit file list. Scans run concurrently up to the
    /// configured bound; cancellation takes effect between files and every
    /// in-flight scan finishes before the report is returned.
    pub async fn crawl_files(
        &self,
        files: Vec<PathBuf>,
        cancel: &CancellationToken,
    ) -> RemedyResult<CrawlReport> {
        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency()));
        let mut handles = Vec::new();
        let mut report = CrawlReport::default();

        for path in files {
            if cancel.is_cancelled() {
                info!("crawl cancelled, stopping frontier dispatch");
                report.cancelled = true;
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let detector = self.detector.clone();
            let cache = self.cache.clone();
            handles.push(tokio::spawn(async move {
                let result = scan_one(detector.as_ref(), &cache, &path).await;
                drop(permit);
                (path, result)
            }));
        }

        for handle in handles {
            let (path, result) = handle.await.map_err(|e| {
                common::errors::RemedyError::Internal(format!("scan task panicked: {e}"))
            })?;
            match result {
                Ok(outcome) => {
                    report.files_scanned += 1;
                    if outcome.from_cache {
                        report.cache_hits += 1;
                    }
                    let _ = self.store.record_scan(&path, Utc::now());
                    for finding in outcome.findings {
                        let issue = Issue::new(
                            &path,
                            finding.span,
                            finding.category,
                            finding.severity,
                            self.detector.source_id(),
                        );
                        if let Err(e) = self.store.insert_issue(&issue) {
                            warn!(path = %path.display(), error = %e, "failed to persist issue");
                        }
                        self.bus
                            .publish(
                                topics::TOPIC_ISSUE_DETECTED,
                                PipelineEvent::IssueDetected {
                                    issue_id: issue.id,
                                    file_path: issue.file_path.clone(),
                                    category: issue.category.domain().to_string(),
                                },
                            )
                            .await;
                        report.issues.push(issue);
                    }
                }
                Err(e) => {
                    // One bad file never sinks the batch
                    warn!(path = %path.display(), error = %e, "file scan failed, skipping");
                    report.files_failed.push((path, e.to_string()));
                }
            }
        }

        info!(
            scanned = report.files_scanned,
            failed = report.files_failed.len(),
            issues = report.issues.len(),
            cache_hits = report.cache_hits,
            "crawl batch finished"
        );
        self.bus
            .publish(
                topics::TOPIC_CRAWL_FINISHED,
                PipelineEvent::CrawlFinished {
                    files_scanned: report.files_scanned,
                    files_failed: report.files_failed.len(),
                    issues_found: report.issues.len(),
                },
            )
            .await;
        Ok(report)
    }

    /// Discover, prioritize, and crawl everything under `root`.
    pub async fn crawl(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> RemedyResult<CrawlReport> {
        let frontier = self.frontier(self.discover(root));
        debug!(files = frontier.len(), "crawl frontier built");
        self.crawl_files(frontier, cancel).await
    }
}

struct ScanOutcome {
    findings: Vec<Finding>,
    from_cache: bool,
}

/// Content fingerprint: file bytes + detector identity, so a detector
/// upgrade re-scans everything.
fn fingerprint(content: &str, detector_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content.as_bytes());
    hasher.update(detector_id.as_bytes());
    format!("scan:{}", hasher.finalize().to_hex())
}

async fn scan_one(
    detector: &dyn IssueDetector,
    cache: &ResultCache,
    path: &Path,
) -> RemedyResult<ScanOutcome> {
    let content = tokio::fs::read_to_string(path).await?;
    let key = fingerprint(&content, detector.source_id());

    if let Some(findings) = cache.get_typed::<Vec<Finding>>(&key) {
        return Ok(ScanOutcome {
            findings,
            from_cache: true,
        });
    }

    let findings = detector.detect(path, &content).await?;
    cache.set_typed(&key, &findings, CACHE_TTL);
    Ok(ScanOutcome {
        findings,
        from_cache: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::HeuristicDetector;
    use async_trait::async_trait;
    use common::errors::RemedyError;
    use std::io::Write;

    fn test_crawler(detector: Arc<dyn IssueDetector>) -> Crawler {
        Crawler::new(
            detector,
            Arc::new(ResultCache::in_memory()),
            Arc::new(Store::in_memory().expect("store")),
            EventBus::default(),
            CrawlerConfig::default(),
        )
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(content.as_bytes()).expect("write");
        path
    }

    #[tokio::test]
    async fn crawl_emits_issues_and_persists_them() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "bad.rs", "let x = y.unwrap();\n");
        write_file(dir.path(), "ok.rs", "fn id(x: u8) -> u8 { x }\n");

        let crawler = test_crawler(Arc::new(HeuristicDetector::new()));
        let report = crawler
            .crawl(dir.path(), &CancellationToken::new())
            .await
            .expect("crawl");

        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.issues.len(), 1);
        assert!(report.files_failed.is_empty());

        let persisted = crawler
            .store
            .issues_for_file(&dir.path().join("bad.rs"))
            .expect("query");
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn identical_content_hits_cache_on_second_crawl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = write_file(dir.path(), "bad.rs", "let x = y.unwrap();\n");

        let crawler = test_crawler(Arc::new(HeuristicDetector::new()));
        let cancel = CancellationToken::new();
        let first = crawler
            .crawl_files(vec![file.clone()], &cancel)
            .await
            .expect("crawl");
        assert_eq!(first.cache_hits, 0);

        let second = crawler
            .crawl_files(vec![file], &cancel)
            .await
            .expect("crawl");
        assert_eq!(second.cache_hits, 1);
        // Cache hit still yields the issue
        assert_eq!(second.issues.len(), 1);
    }

    #[tokio::test]
    async fn failing_file_is_skipped_not_fatal() {
        struct FlakyDetector;

        #[async_trait]
        impl IssueDetector for FlakyDetector {
            fn source_id(&self) -> &str {
                "flaky-v1"
            }
            async fn detect(&self, path: &Path, _content: &str) -> RemedyResult<Vec<Finding>> {
                if path.file_name().is_some_and(|n| n == "poison.rs") {
                    Err(RemedyError::Internal("detector crashed".into()))
                } else {
                    Ok(Vec::new())
                }
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let good = write_file(dir.path(), "good.rs", "fn a() {}\n");
        let bad = write_file(dir.path(), "poison.rs", "fn b() {}\n");

        let crawler = test_crawler(Arc::new(FlakyDetector));
        let report = crawler
            .crawl_files(vec![good, bad], &CancellationToken::new())
            .await
            .expect("crawl");

        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.files_failed.len(), 1);
        assert!(report.files_failed[0].0.ends_with("poison.rs"));
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_between_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files: Vec<PathBuf> = (0..10)
            .map(|i| write_file(dir.path(), &format!("f{i}.rs"), "fn x() {}\n"))
            .collect();

        let crawler = test_crawler(Arc::new(HeuristicDetector::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = crawler.crawl_files(files, &cancel).await.expect("crawl");
        assert!(report.cancelled);
        assert_eq!(report.files_scanned, 0);
    }

    #[test]
    fn discover_filters_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "code.rs", "");
        write_file(dir.path(), "notes.txt", "");

        let crawler = test_crawler(Arc::new(HeuristicDetector::new()));
        let found = crawler.discover(dir.path());
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("code.rs"));
    }
}
