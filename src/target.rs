//! Target descriptor: the immutable description of one request to issue.

use http::Request;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ConfigError;

/// Immutable description of the request each virtual user issues.
///
/// The URL, header values and body are templates: `${VU}` expands to the
/// runner id and `${ITER}` to the zero-based iteration counter, so rendered
/// requests can vary per virtual user without any shared mutable state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TargetDescriptor {
    /// HTTP method (default: GET)
    #[serde(default = "default_method")]
    pub method: String,
    /// URL template, e.g. "https://api.example.com/v1/users?page=${ITER}"
    pub url: String,
    /// Header name -> value template
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional request body template
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn substitute(template: &str, vu: usize, iteration: u64) -> String {
    // Two fixed placeholders; cheap enough to do per iteration.
    template
        .replace("${VU}", &vu.to_string())
        .replace("${ITER}", &iteration.to_string())
}

impl TargetDescriptor {
    /// Render the descriptor into a concrete request for one iteration.
    pub fn render(&self, vu: usize, iteration: u64) -> Result<Request<String>, http::Error> {
        let mut builder = Request::builder()
            .method(self.method.as_str())
            .uri(substitute(&self.url, vu, iteration));

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), substitute(value, vu, iteration));
        }

        builder.body(self.body.as_deref().map(|b| substitute(b, vu, iteration)).unwrap_or_default())
    }

    /// Fail-fast validation: render once so a bad method, URL or header is a
    /// `ConfigError` before any load is generated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.render(0, 0)
            .map(|_| ())
            .map_err(|e| ConfigError::InvalidTarget(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(url: &str) -> TargetDescriptor {
        TargetDescriptor {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_render_basic_get() {
        let d = descriptor("https://example.com/v1/users");
        let req = d.render(1, 0).unwrap();
        assert_eq!(req.method(), http::Method::GET);
        assert_eq!(req.uri(), "https://example.com/v1/users");
        assert_eq!(req.body(), "");
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let mut d = descriptor("https://example.com/items/${ITER}");
        d.headers
            .insert("x-vu".to_string(), "vu-${VU}".to_string());
        d.body = Some("{\"seq\": ${ITER}}".to_string());

        let req = d.render(7, 42).unwrap();
        assert_eq!(req.uri(), "https://example.com/items/42");
        assert_eq!(req.headers()["x-vu"], "vu-7");
        assert_eq!(req.body(), "{\"seq\": 42}");
    }

    #[test]
    fn test_render_headers_kept_verbatim_without_placeholders() {
        let mut d = descriptor("https://example.com/");
        d.headers.insert(
            "authorization".to_string(),
            "Bearer abc123".to_string(),
        );
        let req = d.render(0, 0).unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer abc123");
    }

    #[test]
    fn test_validate_rejects_bad_method() {
        let mut d = descriptor("https://example.com/");
        d.method = "NOT A METHOD".to_string();
        assert!(matches!(d.validate(), Err(ConfigError::InvalidTarget(_))));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let d = descriptor("not a url");
        assert!(d.validate().is_err());
    }
}
