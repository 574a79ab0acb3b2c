//! Folding step results into one project report
//!
//! Pure: no I/O and no failure modes. Degraded or unparsed envelopes are skipped.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::orchestrator::{StepKind, StepOutput, StepResult};
use crate::types::ResultEnvelope;

/// Coarse quality bucket derived from provider scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualitySignal {
    Good,
    Fair,
    Poor,
    Unknown,
}

impl QualitySignal {
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            Some(s) if s >= 80.0 => QualitySignal::Good,
            Some(s) if s >= 50.0 => QualitySignal::Fair,
            Some(_) => QualitySignal::Poor,
            None => QualitySignal::Unknown,
        }
    }
}

/// Summary of a whole job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub steps_completed: usize,
    /// Step kind -> parsed findings of that kind's envelopes
    pub by_kind: BTreeMap<StepKind, Vec<serde_json::Value>>,
    pub recommendations: Vec<String>,
    pub issue_count: usize,
    pub files_analyzed: usize,
    pub file_errors: usize,
    pub average_score: Option<f64>,
    pub quality: QualitySignal,
}

fn usable(envelope: &ResultEnvelope) -> bool {
    envelope.success && envelope.metadata.valid && envelope.results.is_object()
}

/// Aggregate step results.
pub fn aggregate(results: &[StepResult]) -> AggregateReport {
    let mut by_kind: BTreeMap<StepKind, Vec<serde_json::Value>> = BTreeMap::new();
    let mut recommendations = Vec::new();
    let mut issue_count = 0;
    let mut files_analyzed = 0;
    let mut file_errors = 0;
    let mut scores = Vec::new();

    for result in results {
        if let StepOutput::Files(batch) = &result.output {
            files_analyzed += batch.results.len();
            file_errors += batch.errors.len();
        }

        for envelope in result.output.envelopes().into_iter().filter(|e| usable(e)) {
            let findings = &envelope.results;

            if let Some(recs) = findings.get("recommendations").and_then(|r| r.as_array()) {
                recommendations.extend(recs.iter().map(|r| match r.as_str() {
                    Some(text) => text.to_string(),
                    None => r.to_string(),
                }));
            }
            if let Some(issues) = findings.get("issues").and_then(|i| i.as_array()) {
                issue_count += issues.len();
            }
            if let Some(score) = findings.get("score").and_then(|s| s.as_f64()) {
                scores.push(score);
            }

            by_kind.entry(result.kind).or_default().push(findings.clone());
        }
    }

    let average_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    AggregateReport {
        steps_completed: results.len(),
        by_kind,
        recommendations,
        issue_count,
        files_analyzed,
        file_errors,
        average_score,
        quality: QualitySignal::from_score(average_score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FileBatchResult;
    use crate::types::EnvelopeMetadata;
    use serde_json::json;

    fn envelope(results: serde_json::Value) -> ResultEnvelope {
        ResultEnvelope {
            success: true,
            analysis_id: "a".to_string(),
            provider: Some("groq".to_string()),
            results,
            metadata: EnvelopeMetadata {
                valid: true,
                ..Default::default()
            },
            timestamp: "2026-10-16T00:00:00Z".to_string(),
        }
    }

    fn single(kind: StepKind, results: serde_json::Value) -> StepResult {
        StepResult {
            name: kind.to_string(),
            kind,
            output: StepOutput::Single {
                envelope: envelope(results),
            },
        }
    }

    #[test]
    fn test_aggregates_recommendations_and_scores() {
        let mut batch = FileBatchResult::default();
        batch.results.insert(
            "src/a.rs".to_string(),
            envelope(json!({"score": 60, "issues": [{}, {}], "recommendations": ["split a.rs"]})),
        );
        batch
            .errors
            .insert("src/b.rs".to_string(), "unavailable".to_string());

        let results = vec![
            single(
                StepKind::Structure,
                json!({"score": 90, "issues": [], "recommendations": ["add docs"]}),
            ),
            StepResult {
                name: "files".to_string(),
                kind: StepKind::Files,
                output: StepOutput::Files(batch),
            },
            single(
                StepKind::Security,
                json!({"score": 90, "issues": [{}], "recommendations": [{"title": "rotate keys"}]}),
            ),
        ];

        let report = aggregate(&results);
        assert_eq!(report.steps_completed, 3);
        assert_eq!(report.recommendations.len(), 3);
        assert_eq!(report.recommendations[0], "add docs");
        assert!(report.recommendations[2].contains("rotate keys"));
        assert_eq!(report.issue_count, 3);
        assert_eq!(report.files_analyzed, 1);
        assert_eq!(report.file_errors, 1);
        assert_eq!(report.average_score, Some(80.0));
        assert_eq!(report.quality, QualitySignal::Good);
        assert_eq!(report.by_kind[&StepKind::Files].len(), 1);
    }

    #[test]
    fn test_skips_degraded_and_invalid_envelopes() {
        let mut invalid = single(StepKind::Security, json!({"raw": "not json"}));
        if let StepOutput::Single { envelope } = &mut invalid.output {
            envelope.metadata.valid = false;
        }
        let degraded = StepResult {
            name: "insights".to_string(),
            kind: StepKind::Insights,
            output: StepOutput::Single {
                envelope: ResultEnvelope::degraded("down", 0, 0),
            },
        };

        let report = aggregate(&[invalid, degraded]);
        assert_eq!(report.steps_completed, 2);
        assert!(report.recommendations.is_empty());
        assert!(report.by_kind.is_empty());
        assert_eq!(report.quality, QualitySignal::Unknown);
    }

    #[test]
    fn test_quality_buckets() {
        assert_eq!(QualitySignal::from_score(Some(80.0)), QualitySignal::Good);
        assert_eq!(QualitySignal::from_score(Some(50.0)), QualitySignal::Fair);
        assert_eq!(QualitySignal::from_score(Some(49.9)), QualitySignal::Poor);
        assert_eq!(QualitySignal::from_score(None), QualitySignal::Unknown);
    }
}
