use remedy_core::Issue;

/// Lines of surrounding code handed to strategies on either side of the
/// defect.
const CONTEXT_RADIUS: usize = 5;

/// The code context a strategy sees: the defective line plus a window of
/// surrounding lines.
#[derive(Debug, Clone)]
pub struct IssueContext {
    /// The full line containing the defect, as found in the file
    pub defect_line: String,
    /// Window of lines around the defect (inclusive of it)
    pub window: Vec<String>,
    /// 1-based line number of the defect within the file
    pub line_number: u32,
}

impl IssueContext {
    /// Extract the context window for `issue` from the file's content.
    /// Returns `None` when the recorded location no longer exists in the
    /// content, which means the issue is stale and must not be fixed
    /// against the wrong line.
    pub fn extract(issue: &Issue, content: &str) -> Option<Self> {
        let lines: Vec<&str> = content.lines().collect();
        let idx = issue.location.start_line.checked_sub(1)? as usize;
        let defect_line = lines.get(idx)?.to_string();

        let lo = idx.saturating_sub(CONTEXT_RADIUS);
        let hi = (idx + CONTEXT_RADIUS + 1).min(lines.len());
        let window = lines[lo..hi].iter().map(|l| l.to_string()).collect();

        Some(Self {
            defect_line,
            window,
            line_number: issue.location.start_line,
        })
    }

    /// True when the surrounding function appears to return a `Result`,
    /// which makes `?`-style rewrites viable.
    pub fn in_fallible_context(&self) -> bool {
        self.window
            .iter()
            .any(|line| line.contains("-> Result") || line.contains("-> anyhow::Result"))
    }

    pub fn as_snippet(&self) -> String {
        self.window.join("\n")
    }
}
