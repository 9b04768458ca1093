//! Declarative response checks, recorded in the `checks` rate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stampede_core::IterationContext;

use crate::types::HttpResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Assertion {
    Status {
        equals: u16,
    },
    /// A field of the JSON body addressed by a dot path (`args.param1`,
    /// `items.0.id`). The empty path is the whole body, so `{type: json}`
    /// alone asserts the body parses. Without `equals` the field only has to exist.
    Json {
        #[serde(default)]
        path: String,
        #[serde(default)]
        equals: Option<Value>,
    },
    Header {
        header: String,
        #[serde(default)]
        contains: Option<String>,
    },
    BodyContains {
        text: String,
    },
}

impl Assertion {
    pub fn evaluate(&self, response: &HttpResponse) -> bool {
        match self {
            Self::Status { equals } => response.status == *equals,
            Self::Json { path, equals } => {
                let Ok(body) = response.json() else {
                    return false;
                };
                match (lookup(&body, path), equals) {
                    (Some(found), Some(expected)) => found == expected,
                    (Some(_), None) => true,
                    (None, _) => false,
                }
            }
            Self::Header { header, contains } => match (response.header(header), contains) {
                (Some(value), Some(needle)) => value.contains(needle.as_str()),
                (Some(_), None) => true,
                (None, _) => false,
            },
            Self::BodyContains { text } => response
                .body_utf8()
                .is_some_and(|body| body.contains(text.as_str())),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Status { equals } => format!("status is {equals}"),
            Self::Json { path, equals } => match (path.is_empty(), equals) {
                (true, None) => "body is valid json".to_string(),
                (true, Some(v)) => format!("body equals {v}"),
                (false, None) => format!("{path} exists"),
                (false, Some(v)) => format!("{path} equals {v}"),
            },
            Self::Header { header, contains } => match contains {
                Some(needle) => format!("{header} contains {needle}"),
                None => format!("{header} header exists"),
            },
            Self::BodyContains { text } => format!("body contains {text}"),
        }
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// An assertion with the name it is reported under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub assertion: Assertion,
}

impl Check {
    pub fn new(assertion: Assertion) -> Self {
        Self {
            name: None,
            assertion,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.assertion.describe())
    }
}

/// Records every check against `response` and returns whether all passed.
/// A request that never got a response fails all of its checks.
pub fn apply_checks(
    ctx: &IterationContext,
    response: Option<&HttpResponse>,
    checks: &[Check],
) -> bool {
    checks.iter().fold(true, |all, check| {
        let passed = response.is_some_and(|r| check.assertion.evaluate(r));
        ctx.check(&check.display_name(), passed) && all
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HttpTimings;
    use bytes::Bytes;

    fn response(status: u16, content_type: &str, body: &'static str) -> HttpResponse {
        HttpResponse {
            status,
            body: Bytes::from_static(body.as_bytes()),
            headers: vec![("content-type".to_string(), content_type.to_string())],
            bytes_sent: 0,
            bytes_received: 0,
            timings: HttpTimings::default(),
        }
    }

    #[test]
    fn json_paths_resolve_objects_and_arrays() {
        let res = response(
            200,
            "application/json",
            r#"{"args":{"param1":"value1"},"items":[{"id":7}],"message":"Test message"}"#,
        );
        let eq = |path: &str, v: Value| Assertion::Json {
            path: path.to_string(),
            equals: Some(v),
        };

        assert!(eq("args.param1", Value::from("value1")).evaluate(&res));
        assert!(eq("items.0.id", Value::from(7)).evaluate(&res));
        assert!(!eq("items.1.id", Value::from(7)).evaluate(&res));
        assert!(!eq("message", Value::from("other")).evaluate(&res));
        assert!(
            Assertion::Json {
                path: String::new(),
                equals: None
            }
            .evaluate(&res)
        );
    }

    #[test]
    fn json_assertion_fails_on_non_json_body() {
        let res = response(200, "application/xml", "<slideshow/>");
        let valid = Assertion::Json {
            path: String::new(),
            equals: None,
        };
        assert!(!valid.evaluate(&res));
        assert_eq!(valid.describe(), "body is valid json");
    }

    #[test]
    fn header_and_status_assertions() {
        let res = response(404, "application/xml; charset=utf-8", "");
        let header = Assertion::Header {
            header: "Content-Type".to_string(),
            contains: Some("application/xml".to_string()),
        };
        assert!(header.evaluate(&res));
        assert!(Assertion::Status { equals: 404 }.evaluate(&res));
        assert!(!Assertion::Status { equals: 200 }.evaluate(&res));
    }

    #[test]
    fn checks_deserialize_with_optional_name() {
        let checks: Vec<Check> = serde_json::from_str(
            r#"[
                {"type": "status", "equals": 200},
                {"name": "message echoed", "type": "json", "path": "json.message", "equals": "Test message"},
                {"type": "header", "header": "content-type"}
            ]"#,
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(checks[0].display_name(), "status is 200");
        assert_eq!(checks[1].display_name(), "message echoed");
        assert_eq!(
            checks[2].assertion,
            Assertion::Header {
                header: "content-type".to_string(),
                contains: None
            }
        );
    }
}
