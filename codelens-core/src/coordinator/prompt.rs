//! Prompt assembly for single analysis requests

use crate::types::{AnalysisKind, AnalysisRequest, Prompt};

const RESPONSE_SHAPE: &str = r#"Respond with a single JSON object and nothing else:
{"summary": string, "issues": [{"severity": "critical"|"high"|"medium"|"low", "title": string, "description": string, "file": string|null, "line": number|null}], "score": number (0-100), "confidence": "high"|"medium"|"low", "recommendations": [string]}"#;

fn focus(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::FullProject => {
            "Review the overall structure of this project: module boundaries, layering, and maintainability."
        }
        AnalysisKind::SingleFile => "Review this file for correctness, clarity, and maintainability.",
        AnalysisKind::BugFix => "Diagnose the reported bug: find the root cause and propose a minimal fix.",
        AnalysisKind::SecurityAudit => {
            "Audit this code for security vulnerabilities such as injection, unsafe input handling, and secret exposure."
        }
        AnalysisKind::Performance => "Find performance problems: hot loops, needless allocation, blocking I/O.",
        AnalysisKind::TestCoverage => "Assess test coverage: which behaviors are untested and what tests to add.",
        AnalysisKind::Insights => {
            "Synthesize the earlier findings into the most important project-level insights."
        }
        AnalysisKind::Predictive => "Predict where defects are most likely to appear next and why.",
    }
}

/// Build the prompt sent to the provider for a request.
pub fn build_prompt(request: &AnalysisRequest) -> Prompt {
    let system = format!(
        "You are a senior software engineer performing a code analysis. {}\n\n{}",
        focus(request.kind),
        RESPONSE_SHAPE
    );

    let subject = &request.subject;
    let mut user = format!("Project: {}\n", subject.project_id);
    if let Some(file) = &subject.file_id {
        user.push_str(&format!("File: {}\n", file));
    }
    if let Some(bug) = &subject.bug_id {
        user.push_str(&format!("Bug: {}\n", bug));
    }
    if !request.instructions.trim().is_empty() {
        user.push_str(&format!("\nInstructions:\n{}\n", request.instructions.trim()));
    }
    if let Some(content) = &request.content {
        user.push_str(&format!("\n---\n{}\n", content));
    }

    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Subject;

    #[test]
    fn test_prompt_includes_subject_and_content() {
        let request = AnalysisRequest::new(
            AnalysisKind::BugFix,
            Subject::file("proj", "src/lib.rs").with_bug("BUG-1"),
            "alice",
        )
        .with_instructions("crash on empty input")
        .with_content("fn parse() {}");

        let prompt = build_prompt(&request);
        assert!(prompt.system.contains("root cause"));
        assert!(prompt.user.contains("File: src/lib.rs"));
        assert!(prompt.user.contains("Bug: BUG-1"));
        assert!(prompt.user.contains("crash on empty input"));
        assert!(prompt.user.ends_with("fn parse() {}\n"));
    }
}
