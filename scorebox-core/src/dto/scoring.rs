//! Scoring service DTOs

use serde::{Deserialize, Serialize};

/// Body returned by `POST {base}/executions`
///
/// The service has been seen returning the id both as a string and as a
/// number, so both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub id: Option<serde_json::Value>,
}

impl SubmissionResponse {
    /// Scoring token, if the response carried a usable id
    pub fn token(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_string_and_number() {
        let s: SubmissionResponse = serde_json::from_str(r#"{"id": "abc-1"}"#).unwrap();
        assert_eq!(s.token().as_deref(), Some("abc-1"));

        let n: SubmissionResponse = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(n.token().as_deref(), Some("42"));
    }

    #[test]
    fn test_missing_or_empty_id() {
        let missing: SubmissionResponse = serde_json::from_str(r#"{"status": "ok"}"#).unwrap();
        assert_eq!(missing.token(), None);

        let empty: SubmissionResponse = serde_json::from_str(r#"{"id": ""}"#).unwrap();
        assert_eq!(empty.token(), None);
    }
}
