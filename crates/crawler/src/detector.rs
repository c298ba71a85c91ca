use async_trait::async_trait;
use common::errors::RemedyResult;
use regex::Regex;
use remedy_core::{IssueCategory, Severity, SourceSpan};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One defect found by a detector, before it becomes an [`remedy_core::Issue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub span: SourceSpan,
    pub category: IssueCategory,
    pub severity: Severity,
}

/// Ingestion boundary for external static-analysis collaborators.
///
/// Implementations receive file content and return findings; they must be
/// side-effect-free so scans can run concurrently and be memoized.
#[async_trait]
pub trait IssueDetector: Send + Sync {
    /// Stable name + version, part of the crawl memoization key. Bumping
    /// the version invalidates cached results.
    fn source_id(&self) -> &str;

    async fn detect(&self, path: &Path, content: &str) -> RemedyResult<Vec<Finding>>;
}

struct Rule {
    pattern: Regex,
    category: IssueCategory,
    severity: Severity,
}

/// Built-in line-oriented heuristic detector.
///
/// Deliberately shallow: real analysis lives behind the boundary. These
/// rules exist so the pipeline is exercisable end-to-end without an
/// external collaborator.
pub struct HeuristicDetector {
    rules: Vec<Rule>,
}

impl Default for HeuristicDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicDetector {
    pub fn new() -> Self {
        let rules = vec![
            Rule {
                pattern: Regex::new(r"\.unwrap\(\)|\bNullPointer\b|->\s*deref\(\)")
                    .expect("static regex"),
                category: IssueCategory::NullDereference,
                severity: Severity::High,
            },
            Rule {
                pattern: Regex::new(r"catch\s*\(\s*\)|\.ok\(\);\s*$|let _ = .*\?")
                    .expect("static regex"),
                category: IssueCategory::UnhandledError,
                severity: Severity::Medium,
            },
            Rule {
                pattern: Regex::new(r"\beval\s*\(|\bexec\s*\(|new Function\(")
                    .expect("static regex"),
                category: IssueCategory::UnsafePattern,
                severity: Severity::Critical,
            },
            Rule {
                pattern: Regex::new(r"\bmem::forget\b|open\([^)]*\)\s*;\s*//\s*leak")
                    .expect("static regex"),
                category: IssueCategory::ResourceLeak,
                severity: Severity::Medium,
            },
        ];
        Self { rules }
    }
}

#[async_trait]
impl IssueDetector for HeuristicDetector {
    fn source_id(&self) -> &str {
        "heuristic-v1"
    }

    async fn detect(&self, _path: &Path, content: &str) -> RemedyResult<Vec<Finding>> {
        let mut findings = Vec::new();
        for (line_idx, line) in content.lines().enumerate() {
            for rule in &self.rules {
                if let Some(m) = rule.pattern.find(line) {
                    findings.push(Finding {
                        span: SourceSpan::single_line(
                            line_idx as u32 + 1,
                            m.start() as u32 + 1,
                            m.end() as u32,
                        ),
                        category: rule.category.clone(),
                        severity: rule.severity,
                    });
                }
            }
        }
        Ok(findings)
    }
}
