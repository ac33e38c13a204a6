//! Attribute keys and attribute-set construction shared by tracing and metrics.

use crate::filter::RequestFilter;
use http::{header, request::Parts};
use opentelemetry::{Array, KeyValue, StringValue, Value};
use std::borrow::Cow;
use tracing::debug;

pub const HTTP_METHOD: &str = "http.method";
pub const HTTP_URL: &str = "http.url";
pub const HTTP_SCHEME: &str = "http.scheme";
pub const HTTP_HOST: &str = "http.host";
pub const HTTP_ROUTE: &str = "http.route";
pub const HTTP_ROUTE_STATIC: &str = "http.route.static";
pub const HTTP_USER_AGENT: &str = "http.user_agent";
pub const HTTP_STATUS_CODE: &str = "http.status_code";
pub const HTTP_RESPONSE_CONTENT_LENGTH: &str = "http.response_content_length";
/// Set instead of a status code when a request was dropped before it produced a response.
pub const HTTP_REQUEST_ABANDONED: &str = "http.request.abandoned";
pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_VERSION: &str = "service.version";
pub const HTTP_REQUEST_PARAM_PREFIX: &str = "http.request.param.";
pub const HTTP_REQUEST_HEADER_PREFIX: &str = "http.request.header.";

/// Route template matched by the router, e.g. `/users/{id}`.
///
/// Routers insert this into the request extensions before the instrumentation layers run. When
/// it is missing, spans report the raw request path as the route and metrics report no route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedRoute(pub Cow<'static, str>);

impl MatchedRoute {
    pub fn new(route: impl Into<Cow<'static, str>>) -> Self {
        Self(route.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A route is static when it has no parameter or wildcard segment.
    pub fn is_static(&self) -> bool {
        is_static_route(&self.0)
    }
}

pub fn is_static_route(route: &str) -> bool {
    !route
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.contains('{') || segment.contains('*'))
}

/// Which optional groups of attributes to build.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Include {
    pub url: bool,
    /// Fall back to the request path when no [`MatchedRoute`] is present.
    pub raw_route: bool,
    pub user_agent: bool,
    pub params: bool,
    pub headers: bool,
}

impl Include {
    pub(crate) const SPAN: Include = Include {
        url: true,
        raw_route: true,
        user_agent: true,
        params: true,
        headers: true,
    };
}

/// `"{METHOD} {path}"`, allocated once with its exact size.
pub(crate) fn operation_name(parts: &Parts) -> String {
    let method = parts.method.as_str();
    let path = parts.uri.path();
    let mut name = String::with_capacity(method.len() + 1 + path.len());
    name.push_str(method);
    name.push(' ');
    name.push_str(path);
    name
}

pub(crate) fn scheme(parts: &Parts) -> &str {
    parts.uri.scheme_str().unwrap_or("http")
}

pub(crate) fn host(parts: &Parts) -> Option<&str> {
    parts.uri.host().or_else(|| {
        parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
    })
}

pub(crate) fn full_url(parts: &Parts) -> String {
    if parts.uri.scheme().is_some() {
        return parts.uri.to_string();
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    match host(parts) {
        Some(host) => format!("{}://{host}{path_and_query}", scheme(parts)),
        None => path_and_query.to_owned(),
    }
}

pub(crate) fn request_attributes(
    filter: &RequestFilter,
    parts: &Parts,
    include: Include,
) -> Vec<KeyValue> {
    let mut attributes = Vec::with_capacity(12);

    attributes.push(KeyValue::new(HTTP_METHOD, parts.method.as_str().to_owned()));
    if include.url {
        attributes.push(KeyValue::new(HTTP_URL, full_url(parts)));
    }
    attributes.push(KeyValue::new(HTTP_SCHEME, scheme(parts).to_owned()));
    if let Some(host) = host(parts) {
        attributes.push(KeyValue::new(HTTP_HOST, host.to_owned()));
    }

    match parts.extensions.get::<MatchedRoute>() {
        Some(route) => {
            attributes.push(KeyValue::new(HTTP_ROUTE, route.0.clone()));
            attributes.push(KeyValue::new(HTTP_ROUTE_STATIC, route.is_static()));
        }
        None if include.raw_route => {
            let path = parts.uri.path();
            attributes.push(KeyValue::new(HTTP_ROUTE, path.to_owned()));
            attributes.push(KeyValue::new(HTTP_ROUTE_STATIC, is_static_route(path)));
        }
        None => {}
    }

    if include.user_agent {
        if let Some(user_agent) = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
        {
            attributes.push(KeyValue::new(HTTP_USER_AGENT, user_agent.to_owned()));
        }
    }

    let identity = filter.identity();
    attributes.push(KeyValue::new(SERVICE_NAME, identity.name.clone()));
    if !identity.version.is_empty() {
        attributes.push(KeyValue::new(SERVICE_VERSION, identity.version.clone()));
    }

    if include.params {
        push_param_attributes(filter, parts, &mut attributes);
    }
    if include.headers {
        push_header_attributes(filter, parts, &mut attributes);
    }

    attributes
}

fn push_param_attributes(filter: &RequestFilter, parts: &Parts, attributes: &mut Vec<KeyValue>) {
    let policy = filter.params();
    if policy.records_nothing() {
        return;
    }
    let query = match parts.uri.query() {
        Some(query) if !query.is_empty() => query,
        _ => return,
    };

    // Repeated parameters keep their order of appearance.
    let mut grouped: Vec<(Cow<'_, str>, Vec<StringValue>)> = Vec::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if !policy.should_record_param(&name) {
            continue;
        }
        if value.contains(char::REPLACEMENT_CHARACTER) {
            debug!(param = %name, "query parameter is not valid UTF-8, recording it lossily");
        }
        match grouped.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, values)) => values.push(value.into_owned().into()),
            None => grouped.push((name, vec![value.into_owned().into()])),
        }
    }

    attributes.extend(grouped.into_iter().map(|(name, values)| {
        KeyValue::new(
            format!("{HTTP_REQUEST_PARAM_PREFIX}{name}"),
            Value::Array(Array::String(values)),
        )
    }));
}

fn push_header_attributes(filter: &RequestFilter, parts: &Parts, attributes: &mut Vec<KeyValue>) {
    for (name, key) in filter.headers().iter() {
        let mut joined: Option<String> = None;
        for value in parts.headers.get_all(name) {
            let Ok(value) = value.to_str() else {
                debug!(header = %name, "skipping header value that is not visible ASCII");
                continue;
            };
            match &mut joined {
                Some(joined) => {
                    joined.push_str(", ");
                    joined.push_str(value);
                }
                None => joined = Some(value.to_owned()),
            }
        }

        if let Some(value) = joined {
            attributes.push(KeyValue::new(key.to_owned(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterBuilder;
    use http::Request;

    fn parts(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    fn find<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a Value> {
        attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    #[test]
    fn standard_attributes() {
        let filter = {
            let mut builder = FilterBuilder::new("orders");
            builder.set_service_version("1.4.2");
            builder.build().unwrap()
        };
        let parts = parts(
            Request::get("/api/users?page=2")
                .header("host", "example.com")
                .header("user-agent", "curl/8.0")
                .body(())
                .unwrap(),
        );

        let attributes = request_attributes(&filter, &parts, Include::SPAN);

        assert_eq!(find(&attributes, HTTP_METHOD), Some(&Value::from("GET")));
        assert_eq!(
            find(&attributes, HTTP_URL),
            Some(&Value::from("http://example.com/api/users?page=2"))
        );
        assert_eq!(find(&attributes, HTTP_SCHEME), Some(&Value::from("http")));
        assert_eq!(find(&attributes, HTTP_HOST), Some(&Value::from("example.com")));
        assert_eq!(find(&attributes, HTTP_ROUTE), Some(&Value::from("/api/users")));
        assert_eq!(find(&attributes, HTTP_ROUTE_STATIC), Some(&Value::from(true)));
        assert_eq!(find(&attributes, HTTP_USER_AGENT), Some(&Value::from("curl/8.0")));
        assert_eq!(find(&attributes, SERVICE_NAME), Some(&Value::from("orders")));
        assert_eq!(find(&attributes, SERVICE_VERSION), Some(&Value::from("1.4.2")));
    }

    #[test]
    fn matched_route_is_preferred() {
        let filter = FilterBuilder::new("svc").build().unwrap();
        let parts = parts(
            Request::get("/users/42")
                .extension(MatchedRoute::new("/users/{id}"))
                .body(())
                .unwrap(),
        );

        let attributes = request_attributes(&filter, &parts, Include::SPAN);

        assert_eq!(find(&attributes, HTTP_ROUTE), Some(&Value::from("/users/{id}")));
        assert_eq!(find(&attributes, HTTP_ROUTE_STATIC), Some(&Value::from(false)));
    }

    #[test]
    fn params_respect_the_policy() {
        let filter = {
            let mut builder = FilterBuilder::new("svc");
            builder.add_exclude_params(["password"]);
            builder.add_record_params(["user_id", "tag"]);
            builder.build().unwrap()
        };
        let parts = parts(
            Request::get("/login?user_id=7&password=x&tag=a&other=1&tag=b")
                .body(())
                .unwrap(),
        );

        let attributes = request_attributes(&filter, &parts, Include::SPAN);

        assert_eq!(
            find(&attributes, "http.request.param.user_id"),
            Some(&Value::Array(Array::String(vec!["7".into()])))
        );
        assert_eq!(
            find(&attributes, "http.request.param.tag"),
            Some(&Value::Array(Array::String(vec!["a".into(), "b".into()])))
        );
        assert_eq!(find(&attributes, "http.request.param.password"), None);
        assert_eq!(find(&attributes, "http.request.param.other"), None);
    }

    #[test]
    fn headers_are_recorded_only_when_present_and_allowed() {
        let filter = {
            let mut builder = FilterBuilder::new("svc");
            builder.add_headers(["X-Tenant", "Authorization", "X-Missing"]);
            builder.build().unwrap()
        };
        let parts = parts(
            Request::get("/")
                .header("x-tenant", "acme")
                .header("authorization", "Bearer secret")
                .body(())
                .unwrap(),
        );

        let attributes = request_attributes(&filter, &parts, Include::SPAN);

        assert_eq!(
            find(&attributes, "http.request.header.x-tenant"),
            Some(&Value::from("acme"))
        );
        assert_eq!(find(&attributes, "http.request.header.authorization"), None);
        assert_eq!(find(&attributes, "http.request.header.x-missing"), None);
    }

    #[test]
    fn opaque_header_values_are_skipped() {
        let _guard = crate::init_tracing_for_testing();
        let filter = {
            let mut builder = FilterBuilder::new("svc");
            builder.add_headers(["x-tag"]);
            builder.build().unwrap()
        };
        let mut request = Request::get("/").body(()).unwrap();
        let headers = request.headers_mut();
        headers.append("x-tag", http::HeaderValue::from_static("a"));
        headers.append("x-tag", http::HeaderValue::from_bytes(b"caf\xe9").unwrap());
        headers.append("x-tag", http::HeaderValue::from_static("b"));

        let attributes = request_attributes(&filter, &parts(request), Include::SPAN);

        assert_eq!(
            find(&attributes, "http.request.header.x-tag"),
            Some(&Value::from("a, b"))
        );
    }

    #[test]
    fn undecodable_params_are_recorded_lossily() {
        let _guard = crate::init_tracing_for_testing();
        let filter = FilterBuilder::new("svc").build().unwrap();
        let parts = parts(Request::get("/search?q=%FF").body(()).unwrap());

        let attributes = request_attributes(&filter, &parts, Include::SPAN);

        assert_eq!(
            find(&attributes, "http.request.param.q"),
            Some(&Value::Array(Array::String(vec!["\u{FFFD}".into()])))
        );
    }

    #[test]
    fn metrics_omit_the_raw_path_as_route() {
        let filter = FilterBuilder::new("svc").build().unwrap();
        let include = Include {
            raw_route: false,
            ..Include::SPAN
        };

        let plain = parts(Request::get("/users/1").body(()).unwrap());
        let attributes = request_attributes(&filter, &plain, include);
        assert_eq!(find(&attributes, HTTP_ROUTE), None);
        assert_eq!(find(&attributes, HTTP_ROUTE_STATIC), None);

        let routed = parts(
            Request::get("/users/1")
                .extension(MatchedRoute::new("/users/{id}"))
                .body(())
                .unwrap(),
        );
        let attributes = request_attributes(&filter, &routed, include);
        assert_eq!(find(&attributes, HTTP_ROUTE), Some(&Value::from("/users/{id}")));
    }

    #[test]
    fn static_routes() {
        assert!(is_static_route("/health"));
        assert!(is_static_route("/"));
        assert!(!is_static_route("/users/:id"));
        assert!(!is_static_route("/users/{id}/posts"));
        assert!(!is_static_route("/files/*path"));
    }

    #[test]
    fn operation_name_is_method_and_path() {
        let parts = parts(Request::post("/api/users?x=1").body(()).unwrap());
        assert_eq!(operation_name(&parts), "POST /api/users");
    }
}
