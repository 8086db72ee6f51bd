//! HTTP front end.
//!
//! Every request lands in one fallback handler: load the browser session
//! from its cookie, run the router, persist the session, then answer with
//! a redirect or page, or forward to the application.

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, COOKIE, HOST, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::headers::{is_protocol_header, HeaderSet};
use crate::pages;
use crate::router::{Action, SimRequest, SimulatorAgent};
use crate::session::{BrowserSessionId, SessionStore, SimSession};
use crate::upstream::{Upstream, UpstreamRequest};

/// Shared state of the HTTP front end.
pub struct AppState {
    pub agent: SimulatorAgent,
    pub sessions: Arc<SessionStore>,
    pub upstream: Arc<dyn Upstream>,
}

/// Build the axum router: everything goes through the simulator.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new().fallback(handle_request).with_state(state)
}

async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    match process(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

async fn process(state: &AppState, request: Request) -> Result<Response> {
    let config = state.agent.config();
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, config.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!(
                error = %e,
                limit = config.max_body_bytes,
                path = %parts.uri.path(),
                "Request body rejected"
            );
            return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response());
        }
    };

    let cookie_id = parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| config.parse_session_cookie(cookie))
        .and_then(|id| BrowserSessionId::from_hex(&id));

    let (mut session, created) = state.sessions.load_or_create(cookie_id)?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let sim_request = SimRequest {
        method: parts.method.as_str().to_string(),
        path: parts.uri.path().to_string(),
        params: request_params(&parts.method, &parts.headers, parts.uri.query(), &body),
        url: request_url(&parts.headers, &path_and_query),
    };

    let action = state.agent.route(&sim_request, &mut session)?;

    let set_cookie = persist_session(state, &session, created)?;

    let mut response = match action {
        Action::Redirect(location) => {
            debug!(location = %location, "Redirecting");
            let mut response = StatusCode::FOUND.into_response();
            response.headers_mut().insert(
                LOCATION,
                HeaderValue::from_str(&location).context("Invalid redirect location")?,
            );
            response
        }
        Action::Render(page, status) => {
            let html = pages::render(&page, state.agent.directory(), &config.idp_login_path);
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Html(html)).into_response()
        }
        Action::Forward(headers) => {
            forward(state, parts.method, path_and_query, parts.headers, body, Some(&headers)).await?
        }
        Action::PassThrough => {
            forward(state, parts.method, path_and_query, parts.headers, body, None).await?
        }
    };

    if let Some(cookie) = set_cookie {
        response
            .headers_mut()
            .append(SET_COOKIE, HeaderValue::from_str(&cookie).context("Invalid cookie")?);
    }

    Ok(response)
}

/// Save the session; returns the cookie to set for a new browser session.
///
/// Empty sessions are not kept: new ones are never stored and existing
/// ones (after a logout or reset) are deleted.
fn persist_session(state: &AppState, session: &SimSession, created: bool) -> Result<Option<String>> {
    if session.is_empty() {
        if !created && state.sessions.delete(session.id)? {
            debug!(session_id = %session.id, "Deleted empty session");
        }
        return Ok(None);
    }

    state.sessions.save(session)?;

    Ok(created.then(|| state.agent.config().build_cookie(&session.id.to_hex())))
}

async fn forward(
    state: &AppState,
    method: Method,
    path_and_query: String,
    mut headers: HeaderMap,
    body: Bytes,
    injected: Option<&HeaderSet>,
) -> Result<Response> {
    strip_spoofed_headers(&mut headers);

    if let Some(injected) = injected {
        apply_header_set(&mut headers, injected);
    }

    let upstream = state
        .upstream
        .forward(UpstreamRequest {
            method,
            path_and_query,
            headers,
            body,
        })
        .await?;

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    Ok(response)
}

/// Remove client-supplied copies of headers only the SP may set.
fn strip_spoofed_headers(headers: &mut HeaderMap) {
    let spoofed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_protocol_header(name.as_str()))
        .cloned()
        .collect();

    for name in spoofed {
        warn!(header = %name, "Removing client-supplied SP header");
        headers.remove(&name);
    }
}

/// Write the SP headers, replacing any client-supplied values.
fn apply_header_set(headers: &mut HeaderMap, injected: &HeaderSet) {
    for (name, value) in injected.iter() {
        match (
            HeaderName::try_from(name),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping attribute that is not a valid HTTP header"),
        }
    }
}

/// Query parameters, overridden by form parameters on POST.
fn request_params(
    method: &Method,
    headers: &HeaderMap,
    query: Option<&str>,
    body: &[u8],
) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = query
        .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
        .unwrap_or_default()
        .into_iter()
        .collect();

    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if *method == Method::POST && is_form {
        match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            Ok(form) => params.extend(form),
            Err(e) => debug!(error = %e, "Ignoring unparseable form body"),
        }
    }

    params
}

/// Reconstruct the URL the browser asked for.
fn request_url(headers: &HeaderMap, path_and_query: &str) -> String {
    let host = headers.get(HOST).and_then(|v| v.to_str().ok());
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");

    match host {
        Some(host) => format!("{}://{}{}", scheme, host, path_and_query),
        None => path_and_query.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributePipeline;
    use crate::config::SimulatorConfig;
    use crate::directory::{fixtures, ComputedIdHasher};
    use crate::upstream::UpstreamResponse;
    use async_trait::async_trait;
    use axum::http::Request;
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Upstream answering with the headers it received, as JSON.
    struct EchoUpstream;

    #[async_trait]
    impl Upstream for EchoUpstream {
        async fn forward(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
            let received: BTreeMap<String, String> = request
                .headers
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();
            let body = serde_json::json!({
                "path": request.path_and_query,
                "headers": received,
            });
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Ok(UpstreamResponse {
                status: StatusCode::OK,
                headers,
                body: Bytes::from(body.to_string()),
            })
        }
    }

    fn test_app(config: SimulatorConfig) -> (Router, Arc<SessionStore>, TempDir) {
        let pipeline = AttributePipeline::with_defaults(config.sp_entity_id.clone());
        test_app_with_pipeline(config, pipeline)
    }

    fn test_app_with_pipeline(
        config: SimulatorConfig,
        pipeline: AttributePipeline,
    ) -> (Router, Arc<SessionStore>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sessions =
            Arc::new(SessionStore::open(dir.path().join("sessions.redb"), 3600).unwrap());
        let agent = SimulatorAgent::new(config, Arc::new(fixtures::directory()), pipeline);
        let state = Arc::new(AppState {
            agent,
            sessions: Arc::clone(&sessions),
            upstream: Arc::new(EchoUpstream),
        });
        (build_router(state), sessions, dir)
    }

    async fn send(app: &Router, uri: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri).header(HOST, "app.test");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        app.clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn session_cookie(response: &Response) -> String {
        let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn location(response: &Response) -> &str {
        response.headers().get(LOCATION).unwrap().to_str().unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn echoed_headers(response: Response) -> serde_json::Value {
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        body["headers"].clone()
    }

    async fn log_in(app: &Router) -> String {
        let response = send(app, "/shibsim_idp/login?user=42&destination=/app", None).await;
        session_cookie(&response)
    }

    #[tokio::test]
    async fn test_login_redirects_to_destination() {
        let (app, sessions, _dir) = test_app(SimulatorConfig::default());

        let response = send(&app, "/shibsim_idp/login?user=42&destination=/app", None).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/app");

        let cookie = session_cookie(&response);
        let id = cookie.strip_prefix("shibsim_session=").unwrap();
        let session = sessions
            .get(BrowserSessionId::from_hex(id).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(session.idp().user_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_unknown_user_gets_401_chooser() {
        let (app, _sessions, _dir) = test_app(SimulatorConfig::default());

        let response = send(&app, "/shibsim_idp/login?user=999", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_text(response).await;
        assert!(body.contains("999"));
        assert!(body.contains("Analytical University"));
    }

    #[tokio::test]
    async fn test_protected_path_forwards_sp_headers() {
        let (app, _sessions, _dir) = test_app(SimulatorConfig::default());
        let cookie = log_in(&app).await;

        let response = send(&app, "/dashboard", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = echoed_headers(response).await;

        assert!(headers["remote_user"].as_str().is_some_and(|v| !v.is_empty()));
        assert_eq!(headers["remote_user"], headers["persistent-id"]);
        assert_eq!(headers["shib-identity-provider"], "https://sp.example.ac.uk/shibboleth");
        assert_eq!(headers["displayname"], "Ada Lovelace");

        let assertions = headers
            .as_object()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with("shib-assertion-") && *k != "shib-assertion-count")
            .count();
        let count: usize = headers["shib-assertion-count"].as_str().unwrap().parse().unwrap();
        assert_eq!(count, assertions);
    }

    #[tokio::test]
    async fn test_logout_then_protected_path_redirects() {
        let (app, _sessions, _dir) = test_app(SimulatorConfig::default());
        let cookie = log_in(&app).await;

        let response = send(&app, "/shibsim_idp/logout", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/shibsim_idp/login");

        let response = send(&app, "/dashboard", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            location(&response),
            "/shibsim_idp/login?destination=http%3A%2F%2Fapp.test%2Fdashboard"
        );
    }

    #[tokio::test]
    async fn test_logout_deletes_stored_session() {
        let (app, sessions, _dir) = test_app(SimulatorConfig::default());
        let cookie = log_in(&app).await;
        let id = BrowserSessionId::from_hex(cookie.strip_prefix("shibsim_session=").unwrap()).unwrap();
        assert!(sessions.get(id).unwrap().is_some());

        let response = send(&app, "/shibsim_idp/logout", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(response.headers().get(SET_COOKIE).is_none());
        assert!(sessions.get(id).unwrap().is_none());
        assert_eq!(sessions.session_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_with_413() {
        let (app, sessions, _dir) = test_app(SimulatorConfig {
            protected_paths: vec!["/secure".to_string()],
            max_body_bytes: 16,
            ..Default::default()
        });

        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(HOST, "app.test")
            .body(Body::from(vec![b'x'; 1024]))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(sessions.session_count().unwrap(), 0);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(HOST, "app.test")
            .body(Body::from("small"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_form_post_login() {
        let (app, _sessions, _dir) = test_app(SimulatorConfig::default());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/shibsim_idp/login?destination=/ignored")
            .header(HOST, "app.test")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("user=grace&destination=%2Fhome"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/home");
    }

    #[tokio::test]
    async fn test_spoofed_headers_are_stripped() {
        let (app, _sessions, _dir) = test_app(SimulatorConfig {
            protected_paths: vec!["/secure".to_string()],
            ..Default::default()
        });

        let request = Request::builder()
            .uri("/public")
            .header(HOST, "app.test")
            .header("REMOTE_USER", "admin")
            .header("Shib-Session-ID", "_forged")
            .header("persistent_id", "forged")
            .header("targeted_id", "forged")
            .header("shib_session_id", "_forged")
            .header("accept", "text/html")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert!(response.headers().get(SET_COOKIE).is_none());

        let headers = echoed_headers(response).await;
        for name in [
            "remote_user",
            "shib-session-id",
            "persistent_id",
            "targeted_id",
            "shib_session_id",
        ] {
            assert!(headers.get(name).is_none(), "{} reached the application", name);
        }
        assert_eq!(headers["accept"], "text/html");
    }

    #[tokio::test]
    async fn test_underscore_spoofs_stripped_on_gateway_forward() {
        let (app, _sessions, _dir) = test_app(SimulatorConfig::default());
        let cookie = log_in(&app).await;

        let request = Request::builder()
            .uri("/dashboard")
            .header(HOST, "app.test")
            .header(COOKIE, cookie)
            .header("persistent_id", "forged")
            .header("targeted_id", "forged")
            .header("shib_session_id", "_forged")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let headers = echoed_headers(response).await;

        assert!(headers.get("persistent_id").is_none());
        assert!(headers.get("targeted_id").is_none());
        assert!(headers.get("shib_session_id").is_none());
        assert_eq!(headers["remote_user"], headers["persistent-id"]);
    }

    #[tokio::test]
    async fn test_attributes_cannot_overwrite_sp_headers() {
        let config = SimulatorConfig::default();
        let filter = |mut attrs: BTreeMap<String, String>| {
            attrs.insert("remote_user".to_string(), "admin".to_string());
            attrs.insert("shib-session-id".to_string(), "_forged".to_string());
            attrs
        };
        let pipeline = AttributePipeline::new(
            config.sp_entity_id.clone(),
            Arc::new(filter),
            Arc::new(ComputedIdHasher),
        );
        let (app, sessions, _dir) = test_app_with_pipeline(config, pipeline);
        let cookie = log_in(&app).await;
        let id = BrowserSessionId::from_hex(cookie.strip_prefix("shibsim_session=").unwrap()).unwrap();

        let response = send(&app, "/dashboard", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = echoed_headers(response).await;

        assert_ne!(headers["remote_user"], "admin");
        assert_eq!(headers["remote_user"], headers["persistent-id"]);

        let session = sessions.get(id).unwrap().unwrap();
        assert_eq!(
            headers["shib-session-id"].as_str(),
            session.sp().session_id.as_deref()
        );
        assert_eq!(headers["displayname"], "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_injected_headers_replace_client_values() {
        let (app, _sessions, _dir) = test_app(SimulatorConfig::default());
        let cookie = log_in(&app).await;

        let request = Request::builder()
            .uri("/dashboard")
            .header(HOST, "app.test")
            .header(COOKIE, cookie)
            .header("mail", "forged@evil.test")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let headers = echoed_headers(response).await;
        assert_eq!(headers["mail"], "ada@analytical.ac.uk");
    }

    #[tokio::test]
    async fn test_missing_record_renders_fatal_page() {
        let (app, sessions, _dir) = test_app(SimulatorConfig::default());

        let mut session = SimSession::new(3600);
        session.idp_session().user_id = Some("vanished".to_string());
        sessions.save(&session).unwrap();
        let cookie = format!("shibsim_session={}", session.id.to_hex());

        let response = send(&app, "/dashboard", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("vanished"));
    }

    #[test]
    fn test_request_params_form_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let params = request_params(&Method::POST, &headers, Some("user=1&x=q"), b"user=2");
        assert_eq!(params["user"], "2");
        assert_eq!(params["x"], "q");

        let params = request_params(&Method::GET, &headers, Some("user=1"), b"user=2");
        assert_eq!(params["user"], "1");
    }

    #[test]
    fn test_request_url() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_url(&headers, "/a?b=c"), "/a?b=c");

        headers.insert(HOST, HeaderValue::from_static("app.test"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(request_url(&headers, "/a?b=c"), "https://app.test/a?b=c");
    }
}
