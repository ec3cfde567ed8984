use serde::de::DeserializeOwned;

/// Parses a model reply that should be a JSON object but may arrive wrapped in
/// markdown fences or surrounded by prose.
pub fn extract_json<T: DeserializeOwned>(response: &str) -> Option<T> {
    // Try direct parse first
    if let Ok(value) = serde_json::from_str::<T>(response) {
        return Some(value);
    }

    // Strip markdown code fences
    let trimmed = response.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    if let Ok(value) = serde_json::from_str::<T>(cleaned) {
        return Some(value);
    }

    // Try to find a JSON object in the response
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<T>(&cleaned[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    #[test]
    fn test_direct_json() {
        let parsed: Map<String, Value> = extract_json(r#"{"a":1}"#).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn test_fenced_json() {
        let parsed: Map<String, Value> =
            extract_json("```json\n{\"outcome\":\"completed\"}\n```").unwrap();
        assert_eq!(parsed["outcome"], "completed");
    }

    #[test]
    fn test_embedded_object() {
        let parsed: Map<String, Value> =
            extract_json("Sure! Here it is: {\"name\": \"Jane\"} hope that helps").unwrap();
        assert_eq!(parsed["name"], "Jane");
    }

    #[test]
    fn test_garbage_is_none() {
        assert!(extract_json::<Map<String, Value>>("no json here").is_none());
        assert!(extract_json::<Map<String, Value>>("} backwards {").is_none());
        assert!(extract_json::<Map<String, Value>>("[1, 2, 3]").is_none());
    }
}
