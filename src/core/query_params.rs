use std::collections::HashMap;

/// Parse query parameters from a URI string
///
/// Handles URL decoding and returns a HashMap of parameter key-value pairs.
/// Multiple values for the same key are not supported (only the last is kept).
///
/// # Example
/// ```
/// use mediagram::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/users/search-users?q=ali%20ce&limit=2");
/// assert_eq!(params.get("q"), Some(&"ali ce".to_string()));
/// assert_eq!(params.get("limit"), Some(&"2".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    if let Some(query_start) = uri.find('?') {
        let query = &uri[query_start + 1..];
        for param in query.split('&').filter(|p| !p.is_empty()) {
            if let Some(eq_idx) = param.find('=') {
                let key = &param[..eq_idx];
                let encoded_value = param[eq_idx + 1..].replace('+', " ");
                let decoded = urlencoding::decode(&encoded_value)
                    .map(|v| v.into_owned())
                    .unwrap_or(encoded_value);
                params.insert(key.to_string(), decoded);
            } else {
                // Flag parameter without value
                params.insert(param.to_string(), String::new());
            }
        }
    }

    params
}

/// Get a string parameter from parsed query params with optional default
pub fn get_string(params: &HashMap<String, String>, key: &str, default: Option<&str>) -> Option<String> {
    params.get(key)
        .cloned()
        .or_else(|| default.map(|d| d.to_string()))
}

/// Get an integer parameter, clamped to `1..=max`
pub fn get_int(params: &HashMap<String, String>, key: &str, default: usize, max: usize) -> usize {
    params.get(key)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
        .clamp(1, max.max(1))
}

/// Like [`get_int`] but `None` when the parameter is absent or malformed
pub fn get_optional_int(params: &HashMap<String, String>, key: &str) -> Option<usize> {
    params.get(key)
        .and_then(|s| s.parse::<usize>().ok())
        .map(|n| n.max(1))
}
