use cookie::Cookie;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A cookie attached to every request a client sends.
///
/// Mirrors the attributes of a parsed `Set-Cookie` line. Only `name` and
/// `value` reach the wire (as part of the `Cookie` header); the remaining
/// attributes are carried for callers that round-trip descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CookieDescriptor {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires: Option<OffsetDateTime>,
    pub raw_expires: String,
    /// Seconds. Zero means unspecified, negative means delete now.
    pub max_age: i64,
    pub http_only: bool,
    pub secure: bool,
    pub raw: String,
    pub unparsed: Vec<String>,
}

impl CookieDescriptor {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// The `name=value` pair sent in a `Cookie` request header.
    pub fn header_pair(&self) -> String {
        Cookie::new(self.name.as_str(), self.value.as_str())
            .stripped()
            .to_string()
    }
}

/// Joins descriptors into one `Cookie` header value.
pub fn cookie_header(cookies: &[CookieDescriptor]) -> Option<String> {
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| !c.name.is_empty())
        .map(CookieDescriptor::header_pair)
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_pairs() {
        let cookies = vec![
            CookieDescriptor::new("session", "abc123"),
            CookieDescriptor {
                name: "theme".into(),
                value: "dark".into(),
                path: "/".into(),
                secure: true,
                ..Default::default()
            },
            CookieDescriptor::new("", "ignored"),
        ];
        assert_eq!(
            cookie_header(&cookies).as_deref(),
            Some("session=abc123; theme=dark")
        );
        assert_eq!(cookie_header(&[]), None);
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "name": "sid",
            "value": "xyz",
            "expires": "2030-01-01T00:00:00Z",
            "httpOnly": true,
            "unparsed": ["Priority=High"]
        }"#;
        let desc: CookieDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.name, "sid");
        assert!(desc.http_only);
        assert_eq!(desc.expires.unwrap().year(), 2030);
        assert_eq!(desc.unparsed, vec!["Priority=High".to_string()]);
    }
}
