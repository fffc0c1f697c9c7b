//! Weighted evidence-quality scoring.

use serde::Serialize;

/// Tokens that mark a strong exception/timeout signal in log patterns or the
/// alert reason.
const STRONG_SIGNAL_TOKENS: [&str; 5] = [
    "traceback",
    "exception",
    "valueerror",
    "timeout",
    "endpointconnectionerror",
];

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceScore {
    pub score: f64,
    pub level: String,
    pub reasons: Vec<String>,
}

/// Inputs to the score; gathered by the evidence builder.
pub struct ScoreInputs<'a> {
    pub pattern_texts: &'a [String],
    pub repo_snippet_count: usize,
    pub executed_query_count: usize,
    pub correlation_line_count: usize,
    pub has_correlation_id: bool,
    pub alert_state: &'a str,
    pub alert_reason: Option<&'a str>,
    pub fixture_mode: bool,
}

/// Compute the evidence score in [0,1] with human-readable reasons.
pub fn score_evidence(inputs: &ScoreInputs<'_>) -> EvidenceScore {
    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();

    if inputs.has_correlation_id && inputs.correlation_line_count > 0 {
        score += 0.35;
        reasons.push("correlation id matched in logs".to_string());
    }
    if !inputs.pattern_texts.is_empty() {
        score += 0.30;
        reasons.push("error signatures extracted".to_string());
    }
    if inputs.repo_snippet_count > 0 {
        score += 0.20;
        reasons.push("code context linked".to_string());
    }
    if inputs.executed_query_count >= 2 {
        score += 0.15;
        reasons.push("multi-query evidence".to_string());
    }

    let mut signal_text = inputs.pattern_texts.join(" ");
    if let Some(reason) = inputs.alert_reason {
        signal_text.push(' ');
        signal_text.push_str(reason);
    }
    let signal_text = signal_text.to_lowercase();
    if STRONG_SIGNAL_TOKENS
        .iter()
        .any(|token| signal_text.contains(token))
    {
        score += 0.20;
        reasons.push("strong exception/timeout signal".to_string());
    }

    if inputs.alert_state.eq_ignore_ascii_case("ok") {
        score += 0.15;
        reasons.push("recovery-state signal".to_string());
    }
    if inputs.fixture_mode {
        score = (score - 0.10).max(0.0);
        reasons.push("fixture mode confidence penalty".to_string());
    }

    let normalized = (score.min(1.0) * 100.0).round() / 100.0;
    let level = if normalized >= 0.75 {
        "high"
    } else if normalized >= 0.45 {
        "medium"
    } else {
        "low"
    };
    EvidenceScore {
        score: normalized,
        level: level.to_string(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs<'a>(patterns: &'a [String]) -> ScoreInputs<'a> {
        ScoreInputs {
            pattern_texts: patterns,
            repo_snippet_count: 0,
            executed_query_count: 0,
            correlation_line_count: 0,
            has_correlation_id: false,
            alert_state: "ALARM",
            alert_reason: None,
            fixture_mode: false,
        }
    }

    #[test]
    fn test_empty_evidence_scores_low() {
        let patterns: Vec<String> = Vec::new();
        let score = score_evidence(&base_inputs(&patterns));
        assert_eq!(score.score, 0.0);
        assert_eq!(score.level, "low");
    }

    #[test]
    fn test_full_signal_clamps_to_one() {
        let patterns = vec!["Traceback (most recent call last)".to_string()];
        let mut inputs = base_inputs(&patterns);
        inputs.repo_snippet_count = 2;
        inputs.executed_query_count = 3;
        inputs.correlation_line_count = 4;
        inputs.has_correlation_id = true;
        inputs.alert_state = "OK";
        let score = score_evidence(&inputs);
        assert_eq!(score.score, 1.0);
        assert_eq!(score.level, "high");
        assert!(score.reasons.iter().any(|r| r.contains("recovery")));
    }

    #[test]
    fn test_fixture_mode_penalty() {
        let patterns = vec!["ERROR something broke".to_string()];
        let mut inputs = base_inputs(&patterns);
        inputs.fixture_mode = true;
        let score = score_evidence(&inputs);
        // 0.30 signatures - 0.10 fixture penalty
        assert!((score.score - 0.20).abs() < 1e-9);
        assert_eq!(score.level, "low");
    }

    #[test]
    fn test_strong_signal_from_alert_reason() {
        let patterns: Vec<String> = Vec::new();
        let mut inputs = base_inputs(&patterns);
        inputs.alert_reason = Some("Lambda timeout after 30s");
        let score = score_evidence(&inputs);
        assert!((score.score - 0.20).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_requires_matching_lines() {
        let patterns: Vec<String> = Vec::new();
        let mut inputs = base_inputs(&patterns);
        inputs.has_correlation_id = true;
        inputs.correlation_line_count = 0;
        assert_eq!(score_evidence(&inputs).score, 0.0);
        inputs.correlation_line_count = 1;
        assert!((score_evidence(&inputs).score - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_medium_band() {
        let patterns = vec!["ERROR x".to_string()];
        let mut inputs = base_inputs(&patterns);
        inputs.executed_query_count = 2;
        // 0.30 + 0.15 = 0.45 -> medium
        assert_eq!(score_evidence(&inputs).level, "medium");
    }
}
