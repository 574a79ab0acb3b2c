//! Structural validation of provider output

use crate::error::{Error, Result};

/// Parse provider text into a JSON object.
///
/// Accepts a bare object or one embedded in surrounding prose or a code fence.
pub fn parse_findings(raw: &str) -> Result<serde_json::Value> {
    let parsed = match serde_json::from_str::<serde_json::Value>(raw.trim()) {
        Ok(value) => value,
        Err(_) => {
            let extracted = extract_json_object(raw)?;
            serde_json::from_str::<serde_json::Value>(extracted)
                .map_err(|e| Error::Validation(format!("embedded JSON is invalid: {}", e)))?
        }
    };

    if !parsed.is_object() {
        return Err(Error::Validation(
            "response must be a JSON object".to_string(),
        ));
    }

    Ok(parsed)
}

fn extract_json_object(raw: &str) -> Result<&str> {
    let start = raw
        .find('{')
        .ok_or_else(|| Error::Validation("response did not contain a JSON object".to_string()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| Error::Validation("response did not contain a JSON object".to_string()))?;
    if end <= start {
        return Err(Error::Validation(
            "response JSON bounds are invalid".to_string(),
        ));
    }
    Ok(&raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_bare_object() {
        let value = parse_findings("{\"summary\":\"ok\",\"score\":90}").unwrap();
        assert_eq!(value["score"], 90);
    }

    #[test]
    fn test_parses_fenced_object() {
        let raw = "Here you go:\n```json\n{\"summary\":\"ok\",\"issues\":[]}\n```";
        let value = parse_findings(raw).unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn test_rejects_prose() {
        assert!(matches!(
            parse_findings("The code looks fine."),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_non_object_json() {
        assert!(parse_findings("[1, 2, 3]").is_err());
        assert!(parse_findings("} backwards {").is_err());
    }
}
