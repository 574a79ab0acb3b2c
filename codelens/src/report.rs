//! Text rendering for envelopes, job reports and provider listings

use codelens_core::{
    AvailabilityStatus, ProgressSnapshot, ProviderAvailability, ResultEnvelope,
};
use serde_json::Value;

const DEFAULT_RECOMMENDATIONS: usize = 10;

fn status_icon(status: AvailabilityStatus) -> &'static str {
    match status {
        AvailabilityStatus::Available => "+",
        AvailabilityStatus::LimitReached => "!",
        AvailabilityStatus::RequiresCredential => "-",
    }
}

pub fn print_providers(rows: &[ProviderAvailability]) {
    println!("Providers:");
    for row in rows {
        let usage = match (row.usage, row.limit) {
            (Some(used), Some(limit)) => format!(" {}/{} this month", used, limit),
            _ => String::new(),
        };
        let status = match row.status {
            AvailabilityStatus::Available => "",
            AvailabilityStatus::LimitReached => " (limit reached)",
            AvailabilityStatus::RequiresCredential => " (needs key)",
        };
        println!(
            "  [{}] {:<14} {:<8} {}{}{}",
            status_icon(row.status),
            row.display_name,
            row.tier.as_str(),
            row.model,
            usage,
            status
        );
    }
}

fn print_issues(findings: &Value, indent: &str) {
    let Some(issues) = findings.get("issues").and_then(|i| i.as_array()) else {
        return;
    };
    if issues.is_empty() {
        println!("{}No issues reported.", indent);
        return;
    }
    println!("{}Issues ({}):", indent, issues.len());
    for issue in issues {
        let severity = issue
            .get("severity")
            .and_then(|s| s.as_str())
            .unwrap_or("info");
        let title = issue
            .get("title")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| issue.to_string());
        let location = match (
            issue.get("file").and_then(|f| f.as_str()),
            issue.get("line").and_then(|l| l.as_u64()),
        ) {
            (Some(file), Some(line)) => format!(" ({}:{})", file, line),
            (Some(file), None) => format!(" ({})", file),
            _ => String::new(),
        };
        println!("{}  [{}] {}{}", indent, severity, title, location);
    }
}

fn print_recommendations(recs: &[String], verbose: bool) {
    if recs.is_empty() {
        return;
    }
    println!("Recommendations:");
    let shown = if verbose {
        recs.len()
    } else {
        recs.len().min(DEFAULT_RECOMMENDATIONS)
    };
    for rec in &recs[..shown] {
        println!("  - {}", rec);
    }
    if shown < recs.len() {
        println!("  ... {} more (use --verbose)", recs.len() - shown);
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| match item.as_str() {
                    Some(text) => text.to_string(),
                    None => item.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// One-off analysis result.
pub fn print_envelope(envelope: &ResultEnvelope, verbose: bool) {
    let meta = &envelope.metadata;
    if !envelope.success {
        println!("Analysis unavailable (degraded result)");
        if let Some(error) = &meta.error {
            println!("  Reason: {}", error);
        }
    } else {
        println!(
            "Analysis {} via {}{}",
            envelope.analysis_id,
            envelope.provider.as_deref().unwrap_or("unknown"),
            if meta.cached { " (cached)" } else { "" }
        );
    }

    if !meta.valid && envelope.success {
        println!("Provider output was not structured; raw text follows.\n");
        println!("{}", envelope.results.get("raw").and_then(|r| r.as_str()).unwrap_or(""));
        return;
    }

    let findings = &envelope.results;
    if let Some(summary) = findings.get("summary").and_then(|s| s.as_str()) {
        println!("\n{}\n", summary);
    }
    if let Some(score) = findings.get("score").and_then(|s| s.as_f64()) {
        println!("Score: {:.0}/100", score);
    }
    print_issues(findings, "");
    print_recommendations(&strings(findings.get("recommendations")), verbose);

    if verbose {
        println!(
            "\n{} attempt(s), {}ms, {} tokens",
            meta.attempts, meta.duration_ms, meta.usage.total_tokens
        );
    }
}

/// Completed project job.
pub fn print_project_report(envelope: &ResultEnvelope, progress: &ProgressSnapshot, verbose: bool) {
    let report = &envelope.results["report"];

    println!("Project: {}", progress.project_id);
    println!(
        "Steps: {}/{} completed",
        progress.completed_steps, progress.total_steps
    );
    println!(
        "Files: {} analyzed, {} failed",
        report["filesAnalyzed"].as_u64().unwrap_or(0),
        report["fileErrors"].as_u64().unwrap_or(0)
    );
    println!(
        "Quality: {}{}",
        report["quality"].as_str().unwrap_or("unknown"),
        report["averageScore"]
            .as_f64()
            .map(|s| format!(" (average score {:.0})", s))
            .unwrap_or_default()
    );
    println!("Issues: {}", report["issueCount"].as_u64().unwrap_or(0));

    print_recommendations(&strings(report.get("recommendations")), verbose);

    if !progress.errors.is_empty() {
        println!("\nErrors ({}):", progress.errors.len());
        for error in &progress.errors {
            println!("  ! {}", error);
        }
    }

    if verbose {
        let meta = &envelope.metadata;
        println!(
            "\n{} provider attempt(s), {} tokens, {}ms",
            meta.attempts, meta.usage.total_tokens, meta.duration_ms
        );
    }
}
