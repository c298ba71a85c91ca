use remedy_core::{Fix, SafetyTier};

/// Change size above which a fix stops being "narrow" regardless of what
/// it contains.
const WIDE_CHANGE_CHARS: usize = 400;

/// Fixes spanning more than this many lines are treated as wide blast
/// radius.
const WIDE_CHANGE_LINES: u32 = 5;

/// Domain expertise below this weight demotes an otherwise-safe fix to
/// approval-required.
const LOW_EXPERTISE_FLOOR: f64 = 0.3;

const DYNAMIC_EXECUTION_MARKERS: &[&str] = &[
    "eval(",
    "exec(",
    "new Function",
    "unsafe {",
    "transmute",
    "from_raw",
    "Command::new",
    "child_process",
];

const CONTROL_FLOW_KEYWORDS: &[&str] = &["if ", "for ", "while ", "match ", "loop "];

/// Deterministic mapping from fix content features to a safety tier.
///
/// The tier is advisory to everything downstream except the applier,
/// which enforces it as a hard gate. Expertise can only tighten the
/// result (demote safe to medium), never loosen it.
pub struct SafetyClassifier;

impl SafetyClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, fix: &Fix, domain_expertise: f64) -> SafetyTier {
        let payload = &fix.payload;

        if DYNAMIC_EXECUTION_MARKERS
            .iter()
            .any(|m| payload.replacement.contains(m))
        {
            return SafetyTier::Risky;
        }
        if payload.change_size() > WIDE_CHANGE_CHARS
            || payload.span.line_count() > WIDE_CHANGE_LINES
        {
            return SafetyTier::Risky;
        }

        let adds_control_flow = CONTROL_FLOW_KEYWORDS
            .iter()
            .any(|kw| payload.replacement.contains(kw) && !payload.original.contains(kw));
        if adds_control_flow {
            return SafetyTier::Medium;
        }

        if domain_expertise < LOW_EXPERTISE_FLOOR {
            return SafetyTier::Medium;
        }
        SafetyTier::Safe
    }
}

impl Default for SafetyClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::{FixPayload, SourceSpan, StrategyKind};
    use uuid::Uuid;

    fn fix_with(original: &str, replacement: &str) -> Fix {
        Fix::new(
            Uuid::new_v4(),
            StrategyKind::Pattern,
            FixPayload {
                original: original.into(),
                replacement: replacement.into(),
                span: SourceSpan::single_line(1, 1, original.len().max(1) as u32),
            },
            0.9,
        )
        .expect("valid fix")
    }

    #[test]
    fn mechanical_rewrite_is_safe() {
        let fix = fix_with("x.unwrap();", "x.unwrap_or_default();");
        assert_eq!(SafetyClassifier::new().classify(&fix, 0.5), SafetyTier::Safe);
    }

    #[test]
    fn dynamic_execution_is_always_risky() {
        let fix = fix_with("handle(input);", "eval(input);");
        assert_eq!(
            SafetyClassifier::new().classify(&fix, 1.0),
            SafetyTier::Risky
        );
    }

    #[test]
    fn added_control_flow_requires_approval() {
        let fix = fix_with("let v = m[k];", "let v = if m.contains_key(k) { m[k] } else { 0 };");
        assert_eq!(
            SafetyClassifier::new().classify(&fix, 0.9),
            SafetyTier::Medium
        );
    }

    #[test]
    fn wide_span_is_risky() {
        let mut fix = fix_with("a", "b");
        fix.payload.span = SourceSpan {
            start_line: 1,
            start_col: 1,
            end_line: 10,
            end_col: 1,
        };
        assert_eq!(
            SafetyClassifier::new().classify(&fix, 0.9),
            SafetyTier::Risky
        );
    }

    #[test]
    fn low_expertise_demotes_safe_to_medium() {
        let fix = fix_with("x.unwrap();", "x.unwrap_or_default();");
        assert_eq!(
            SafetyClassifier::new().classify(&fix, 0.1),
            SafetyTier::Medium
        );
    }
}
