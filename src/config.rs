// src/config.rs

/// Environment variable that overrides the backend base URL.
pub const BACKEND_URL_ENV: &str = "FRUITSNAP_BACKEND_URL";

/// Backend used when neither a flag nor the environment says otherwise.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

/// Resolve the backend base URL: explicit argument first, then the
/// environment, then the built-in default.
pub fn backend_url(url_arg: Option<String>) -> String {
    resolve_backend_url(url_arg, std::env::var(BACKEND_URL_ENV).ok())
}

fn resolve_backend_url(url_arg: Option<String>, env_value: Option<String>) -> String {
    let raw = url_arg
        .filter(|u| !u.trim().is_empty())
        .or_else(|| env_value.filter(|u| !u.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
    raw.trim().trim_end_matches('/').to_string()
}

pub fn predict_url(base: &str) -> String {
    format!("{}/predict", base.trim_end_matches('/'))
}

pub fn health_url(base: &str) -> String {
    format!("{}/health", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("http://flag:1"), Some("http://env:2"), "http://flag:1")]
    #[case(None, Some("http://env:2/"), "http://env:2")]
    #[case(Some("  "), Some("http://env:2"), "http://env:2")]
    #[case(None, None, DEFAULT_BACKEND_URL)]
    #[case(None, Some(""), DEFAULT_BACKEND_URL)]
    fn resolves_in_priority_order(
        #[case] flag: Option<&str>,
        #[case] env: Option<&str>,
        #[case] expected: &str,
    ) {
        let got = resolve_backend_url(flag.map(String::from), env.map(String::from));
        assert_eq!(got, expected);
    }

    #[test]
    fn joins_endpoint_paths_without_double_slash() {
        assert_eq!(predict_url("http://host:5000/"), "http://host:5000/predict");
        assert_eq!(health_url("http://host:5000"), "http://host:5000/health");
    }
}
