use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier of a detected issue
pub type IssueId = Uuid;

/// Line/column range of a finding inside a file. Lines and columns are
/// 1-based; the end position is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl SourceSpan {
    pub fn single_line(line: u32, start_col: u32, end_col: u32) -> Self {
        Self {
            start_line: line,
            start_col,
            end_line: line,
            end_col,
        }
    }

    /// Number of lines touched by the span.
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// True when two spans share at least one line.
    pub fn overlaps(&self, other: &SourceSpan) -> bool {
        self.start_line <= other.end_line && other.start_line <= self.end_line
    }
}

/// Defect category reported by a detector. The category doubles as the
/// expertise domain used to rank fix strategies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCategory {
    NullDereference,
    UnhandledError,
    ResourceLeak,
    UninitializedValue,
    UnsafePattern,
    Custom(String),
}

impl IssueCategory {
    /// Stable key for expertise lookups and persistence.
    pub fn domain(&self) -> &str {
        match self {
            IssueCategory::NullDereference => "null-dereference",
            IssueCategory::UnhandledError => "unhandled-error",
            IssueCategory::ResourceLeak => "resource-leak",
            IssueCategory::UninitializedValue => "uninitialized-value",
            IssueCategory::UnsafePattern => "unsafe-pattern",
            IssueCategory::Custom(name) => name.as_str(),
        }
    }

    pub fn from_domain(domain: &str) -> Self {
        match domain {
            "null-dereference" => IssueCategory::NullDereference,
            "unhandled-error" => IssueCategory::UnhandledError,
            "resource-leak" => IssueCategory::ResourceLeak,
            "uninitialized-value" => IssueCategory::UninitializedValue,
            "unsafe-pattern" => IssueCategory::UnsafePattern,
            other => IssueCategory::Custom(other.to_string()),
        }
    }
}

/// Severity assigned by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

/// A detected defect instance in a specific file/location.
///
/// Immutable once created: a re-crawl that sees the same defect again
/// supersedes the old record with a fresh one, it never mutates this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub file_path: PathBuf,
    pub location: SourceSpan,
    pub category: IssueCategory,
    pub severity: Severity,
    pub detector_source: String,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    pub fn new(
        file_path: impl Into<PathBuf>,
        location: SourceSpan,
        category: IssueCategory,
        severity: Severity,
        detector_source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_path: file_path.into(),
            location,
            category,
            severity,
            detector_source: detector_source.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap_detection() {
        let a = SourceSpan::single_line(10, 1, 20);
        let b = SourceSpan {
            start_line: 8,
            start_col: 1,
            end_line: 10,
            end_col: 5,
        };
        let c = SourceSpan::single_line(11, 1, 5);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn domain_round_trip() {
        let cat = IssueCategory::NullDereference;
        assert_eq!(IssueCategory::from_domain(cat.domain()), cat);

        let custom = IssueCategory::Custom("magic-number".into());
        assert_eq!(IssueCategory::from_domain(custom.domain()), custom);
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }
}
