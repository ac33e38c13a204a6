use crate::{attributes, Error, Result};
use http::HeaderName;

/// Headers that are never recorded, whatever the configuration asks for.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
    "www-authenticate",
];

#[derive(Clone, Debug)]
struct AllowedHeader {
    name: HeaderName,
    attribute: String,
}

/// The request headers that may be recorded as span attributes.
///
/// Filtering against [`SENSITIVE_HEADERS`] happens once, when the policy is built. The
/// attribute key for each surviving header is computed at the same time so that recording a
/// header costs no formatting per request.
#[derive(Clone, Debug, Default)]
pub struct HeaderPolicy {
    allowed: Vec<AllowedHeader>,
    lowercase: Vec<String>,
}

impl HeaderPolicy {
    pub fn new<I, N>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let mut policy = Self::default();

        for name in names {
            let name = name.as_ref();
            if is_sensitive(name) {
                tracing::debug!(header = name, "refusing to record sensitive header");
                continue;
            }

            // `HeaderName` normalizes to lower case.
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|source| {
                Error::InvalidHeaderName {
                    name: name.to_owned(),
                    source,
                }
            })?;

            if policy.allowed.iter().any(|allowed| allowed.name == header) {
                continue;
            }

            let lowercase = header.as_str().to_owned();
            policy.allowed.push(AllowedHeader {
                attribute: format!("{}{lowercase}", attributes::HTTP_REQUEST_HEADER_PREFIX),
                name: header,
            });
            policy.lowercase.push(lowercase);
        }

        Ok(policy)
    }

    /// Lower-cased names of the headers that may be recorded.
    pub fn recordable_headers(&self) -> &[String] {
        &self.lowercase
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// `(header name, attribute key)` pairs in configuration order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&HeaderName, &str)> {
        self.allowed
            .iter()
            .map(|allowed| (&allowed.name, allowed.attribute.as_str()))
    }
}

pub fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_headers_are_dropped_in_any_case() {
        let policy = HeaderPolicy::new([
            "Authorization",
            "COOKIE",
            "Set-Cookie",
            "x-API-key",
            "X-Auth-Token",
            "Proxy-Authorization",
            "WWW-Authenticate",
            "X-Request-Id",
        ])
        .unwrap();

        assert_eq!(policy.recordable_headers(), ["x-request-id"]);
        for sensitive in SENSITIVE_HEADERS {
            assert!(!policy.recordable_headers().iter().any(|h| h == sensitive));
        }
    }

    #[test]
    fn names_are_lowercased_and_deduplicated() {
        let policy = HeaderPolicy::new(["X-Tenant", "x-tenant", "Accept-Language"]).unwrap();

        assert_eq!(policy.recordable_headers(), ["x-tenant", "accept-language"]);
        let attributes: Vec<_> = policy.iter().map(|(_, key)| key).collect();
        assert_eq!(
            attributes,
            [
                "http.request.header.x-tenant",
                "http.request.header.accept-language"
            ]
        );
    }

    #[test]
    fn invalid_header_name_is_an_error() {
        let err = HeaderPolicy::new(["bad header"]).unwrap_err();
        assert!(matches!(err, Error::InvalidHeaderName { .. }));
    }
}
