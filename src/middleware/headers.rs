//! Custom request and response headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::schema::HeadersConfig;

const SECURITY_HEADERS: [(&str, &str); 3] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("referrer-policy", "no-referrer"),
];

/// `None` removes the header.
type Rule = (HeaderName, Option<HeaderValue>);

#[derive(Debug, Default)]
pub struct HeaderRules {
    request: Vec<Rule>,
    response: Vec<Rule>,
}

fn compile<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<Rule> {
    entries
        .filter_map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            if value.is_empty() {
                return Some((name, None));
            }
            match HeaderValue::from_str(value) {
                Ok(v) => Some((name, Some(v))),
                Err(_) => {
                    tracing::warn!(header = %name, "Skipping header rule with invalid value");
                    None
                }
            }
        })
        .collect()
}

impl HeaderRules {
    pub fn from_config(config: &HeadersConfig) -> Self {
        let mut response = compile(
            config
                .response
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        if config.security_headers {
            response.extend(compile(SECURITY_HEADERS.into_iter()));
        }
        Self {
            request: compile(config.request.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
            response,
        }
    }

    pub fn apply_request(&self, headers: &mut HeaderMap) {
        apply(&self.request, headers);
    }

    pub fn apply_response(&self, headers: &mut HeaderMap) {
        apply(&self.response, headers);
    }
}

fn apply(rules: &[Rule], headers: &mut HeaderMap) {
    for (name, value) in rules {
        match value {
            Some(v) => {
                headers.insert(name.clone(), v.clone());
            }
            None => {
                headers.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn sets_and_removes_headers() {
        let rules = HeaderRules::from_config(&HeadersConfig {
            request: BTreeMap::from([
                ("x-env".to_string(), "prod".to_string()),
                ("x-debug".to_string(), String::new()),
            ]),
            response: BTreeMap::from([("server".to_string(), String::new())]),
            security_headers: true,
        });

        let mut req = HeaderMap::new();
        req.insert("x-debug", HeaderValue::from_static("1"));
        rules.apply_request(&mut req);
        assert_eq!(req["x-env"], "prod");
        assert!(!req.contains_key("x-debug"));

        let mut resp = HeaderMap::new();
        resp.insert("server", HeaderValue::from_static("nginx"));
        rules.apply_response(&mut resp);
        assert!(!resp.contains_key("server"));
        assert_eq!(resp["x-content-type-options"], "nosniff");
    }
}
