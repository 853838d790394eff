//! HTTP surface of the host
//!
//! - `GET /`: authorize, or complete the redirect callback
//! - `GET /data/{*path}`: authenticated proxy to the third-party API
//! - `GET /health`: liveness and storage backend
//!
//! The OAuth client is synchronous, so every handler builds it and runs it
//! on the blocking pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use common::Secret;
use oauth_client::{
    AuthClient, AuthClientBuilder, AuthStatus, CallbackParams, Endpoints, GrantError,
    SessionHandle, StorageSelector, Transport,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::sessions::{ResolvedSession, SessionRegistry};

/// Client settings shared by every request.
pub struct ClientSettings {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_url: String,
    pub scope: String,
    pub endpoints: Endpoints,
    pub storage: StorageSelector,
    pub storage_dir: PathBuf,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client_secret = config
            .oauth
            .client_secret
            .clone()
            .ok_or_else(|| anyhow::anyhow!("client secret not loaded"))?;
        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            client_secret,
            redirect_url: config.oauth.redirect_url.clone(),
            scope: config.oauth.scope.clone(),
            endpoints: config.oauth.endpoints(),
            storage: config.storage.selector()?,
            storage_dir: config.storage.dir.clone(),
        })
    }

    fn builder(
        &self,
        transport: Arc<dyn Transport>,
        session: Option<SessionHandle>,
    ) -> AuthClientBuilder {
        let builder = AuthClient::builder()
            .client_id(self.client_id.as_str())
            .client_secret(self.client_secret.expose().as_str())
            .redirect_url(self.redirect_url.as_str())
            .scope(self.scope.as_str())
            .endpoints(self.endpoints.clone())
            .storage(self.storage.as_str())
            .storage_dir(self.storage_dir.clone())
            .transport(transport);
        match session {
            Some(session) => builder.session(session),
            None => builder,
        }
    }
}

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<ClientSettings>,
    pub transport: Arc<dyn Transport>,
    pub sessions: SessionRegistry,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            transport,
            sessions,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/", get(authorize_handler))
        .route("/data/{*path}", get(data_handler))
        .route("/health", get(health_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

/// What the authorize handler needs from a client run.
struct AuthorizeView {
    status: AuthStatus,
    authorized: bool,
    auth_link: String,
    rejection: Option<GrantError>,
}

async fn authorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let session = resolve_session(&state, &headers).await;
    let settings = state.settings.clone();
    let transport = state.transport.clone();
    let handle = session.as_ref().map(|s| s.handle.clone());
    let callback = CallbackParams {
        state: query.state,
        code: query.code,
    };

    let view = run_blocking(move || {
        let client = settings.builder(transport, handle).callback(callback).build()?;
        Ok(AuthorizeView {
            status: client.status(),
            authorized: client.is_authorized(),
            auth_link: client.auth_link().to_string(),
            rejection: client.callback_outcome().and_then(|o| o.error()).cloned(),
        })
    })
    .await;

    let response = match view {
        Err(response) => response,
        Ok(view) if view.authorized => {
            if view.status == AuthStatus::CallbackPending {
                info!("user authorized");
            }
            json_response(StatusCode::OK, json!({ "authorized": true }))
        }
        Ok(AuthorizeView {
            rejection: Some(rejection),
            ..
        }) => {
            warn!(error = %rejection, "authorization code exchange rejected");
            json_response(
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": rejection.error,
                    "error_description": rejection.description,
                }),
            )
        }
        Ok(view) => Redirect::to(&view.auth_link).into_response(),
    };

    with_session_cookie(response, session.as_ref())
}

/// Unauthorized users get a 401 whose `auth_link` reuses the pending state,
/// so an authorize page already open in the browser stays completable.
async fn data_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Response {
    let session = resolve_session(&state, &headers).await;
    let settings = state.settings.clone();
    let transport = state.transport.clone();
    let handle = session.as_ref().map(|s| s.handle.clone());

    let result = run_blocking(move || {
        let client = settings
            .builder(transport, handle)
            .reuse_pending_state()
            .build()?;
        if !client.is_authorized() {
            return Ok(Err(client.auth_link().to_string()));
        }
        Ok(Ok(client.fetch_data(&path)))
    })
    .await;

    let response = match result {
        Err(response) => response,
        Ok(Err(auth_link)) => json_response(
            StatusCode::UNAUTHORIZED,
            json!({ "error": "not authorized", "auth_link": auth_link }),
        ),
        Ok(Ok(payload)) => json_response(StatusCode::OK, payload),
    };

    with_session_cookie(response, session.as_ref())
}

async fn health_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "storage": state.settings.storage.as_str(),
            "sessions": state.sessions.len().await,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

/// Cookie session for the request. None unless tokens are session-backed.
async fn resolve_session(state: &AppState, headers: &HeaderMap) -> Option<ResolvedSession> {
    if state.settings.storage != StorageSelector::Session {
        return None;
    }
    let cookie = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok());
    Some(state.sessions.resolve(cookie).await)
}

/// Run client work on the blocking pool. Configuration and storage errors
/// become a 500 response.
async fn run_blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> oauth_client::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(error = %e, configuration = e.is_configuration(), "oauth client failed");
            Err(json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": e.to_string() }),
            ))
        }
        Err(e) => {
            error!(error = %e, "blocking task failed");
            Err(json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal error" }),
            ))
        }
    }
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn with_session_cookie(mut response: Response, session: Option<&ResolvedSession>) -> Response {
    if let Some(cookie) = session.and_then(ResolvedSession::set_cookie)
        && let Ok(value) = HeaderValue::from_str(&cookie)
    {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use oauth_client::{HttpRequest, HttpResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Replays queued responses and records request URLs.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<HttpResponse>>,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn push(&self, status: u16, body: Value) {
            self.responses.lock().unwrap().push_back(HttpResponse {
                status,
                body: body.to_string(),
            });
        }

        fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn send(&self, request: &HttpRequest) -> oauth_client::Result<HttpResponse> {
            self.urls.lock().unwrap().push(request.url.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| oauth_client::Error::Http("no scripted response".into()))
        }
    }

    fn settings(storage: StorageSelector, storage_dir: PathBuf) -> ClientSettings {
        ClientSettings {
            client_id: "id1".into(),
            client_secret: Secret::new("secret1".to_string()),
            redirect_url: "http://cb".into(),
            scope: "read".into(),
            endpoints: Endpoints::new("https://auth.example.com", "https://api.example.com/v1"),
            storage,
            storage_dir,
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(100, Duration::from_secs(3600))
    }

    fn test_app(transport: Arc<ScriptedTransport>) -> Router {
        let state = AppState::new(
            settings(StorageSelector::Session, PathBuf::from("unused")),
            transport,
            registry(),
        );
        build_router(state, 10)
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn session_cookie(response: &Response) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("new session sets a cookie")
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    fn state_param(link: &str) -> String {
        let (_, rest) = link.split_once("state=").unwrap();
        rest.split('&').next().unwrap().to_string()
    }

    fn token_body() -> Value {
        json!({
            "access_token": "A1",
            "token_type": "Bearer",
            "refresh_token": "R1",
            "expires_in": 36000,
            "scope": "read",
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_app(Arc::new(ScriptedTransport::default()));
        let response = app.oneshot(get_request("/health", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["storage"], "session");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn test_unauthorized_user_is_redirected() {
        let transport = Arc::new(ScriptedTransport::default());
        let app = test_app(transport.clone());
        let response = app.oneshot(get_request("/", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let link = location(&response);
        assert!(link.starts_with("https://auth.example.com/authorize/?"));
        assert!(link.contains("client_id=id1"));
        assert!(link.contains("response_type=code"));
        assert!(session_cookie(&response).starts_with("sid="));
        assert!(transport.urls().is_empty(), "no network call before callback");
    }

    #[tokio::test]
    async fn test_full_authorization_flow() {
        let transport = Arc::new(ScriptedTransport::default());
        let app = test_app(transport.clone());

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        let cookie = session_cookie(&response);
        let state = state_param(&location(&response));

        transport.push(200, token_body());
        let callback = format!("/?state={state}&code=c1");
        let response = app
            .clone()
            .oneshot(get_request(&callback, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_json(response).await, json!({ "authorized": true }));

        transport.push(200, json!({ "items": [1, 2, 3] }));
        let response = app
            .clone()
            .oneshot(get_request("/data/items", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "items": [1, 2, 3] }));

        assert_eq!(
            transport.urls(),
            vec![
                "https://auth.example.com/token/".to_string(),
                "https://api.example.com/v1/items".to_string(),
            ]
        );

        // Already authorized: no redirect, no exchange
        let response = app.oneshot(get_request("/", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.urls().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_exchange_returns_bad_gateway() {
        let transport = Arc::new(ScriptedTransport::default());
        let app = test_app(transport.clone());

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        let cookie = session_cookie(&response);
        let state = state_param(&location(&response));

        transport.push(
            400,
            json!({ "error": "invalid_grant", "error_description": "code expired" }),
        );
        let callback = format!("/?state={state}&code=stale");
        let response = app
            .clone()
            .oneshot(get_request(&callback, Some(&cookie)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_grant");
        assert_eq!(body["error_description"], "code expired");

        let response = app
            .oneshot(get_request("/data/items", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_mismatched_state_restarts_authorization() {
        let transport = Arc::new(ScriptedTransport::default());
        let app = test_app(transport.clone());

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        let cookie = session_cookie(&response);

        let response = app
            .oneshot(get_request("/?state=forged&code=c1", Some(&cookie)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(transport.urls().is_empty());
    }

    #[tokio::test]
    async fn test_data_requires_authorization() {
        let transport = Arc::new(ScriptedTransport::default());
        let app = test_app(transport.clone());
        let response = app.oneshot(get_request("/data/items", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "not authorized");
        assert!(
            body["auth_link"]
                .as_str()
                .unwrap()
                .starts_with("https://auth.example.com/authorize/")
        );
        assert!(transport.urls().is_empty());
    }

    #[tokio::test]
    async fn test_data_endpoint_error_is_normalized() {
        let transport = Arc::new(ScriptedTransport::default());
        let app = test_app(transport.clone());

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        let cookie = session_cookie(&response);
        let state = state_param(&location(&response));
        transport.push(200, token_body());
        let callback = format!("/?state={state}&code=c1");
        app.clone()
            .oneshot(get_request(&callback, Some(&cookie)))
            .await
            .unwrap();

        transport.push(404, json!({ "error": { "message": "no such resource" } }));
        let response = app
            .oneshot(get_request("/data/missing", Some(&cookie)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "no such resource" })
        );
    }

    #[tokio::test]
    async fn test_flat_file_backend_persists_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default());
        let sessions = registry();
        let state = AppState::new(
            settings(StorageSelector::FlatFile, dir.path().to_path_buf()),
            transport.clone(),
            sessions.clone(),
        );
        let app = build_router(state, 10);

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let state = state_param(&location(&response));
        transport.push(200, token_body());
        let callback = format!("/?state={state}&code=c1");
        let response = app
            .clone()
            .oneshot(get_request(&callback, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("code")).unwrap(),
            "c1"
        );

        // A different browser shares the file-backed tokens
        let response = app.oneshot(get_request("/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sessions.len().await, 0, "flat-file mode keeps no sessions");
    }

    #[tokio::test]
    async fn test_data_hit_keeps_pending_auth_link_valid() {
        let transport = Arc::new(ScriptedTransport::default());
        let app = test_app(transport.clone());

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        let cookie = session_cookie(&response);
        let pending = state_param(&location(&response));

        let response = app
            .clone()
            .oneshot(get_request("/data/items", Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(state_param(body["auth_link"].as_str().unwrap()), pending);

        transport.push(200, token_body());
        let callback = format!("/?state={pending}&code=c1");
        let response = app
            .oneshot(get_request(&callback, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "authorized": true }));
    }

    #[tokio::test]
    async fn test_flat_file_data_hit_keeps_pending_auth_link_valid() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::default());
        let state = AppState::new(
            settings(StorageSelector::FlatFile, dir.path().to_path_buf()),
            transport.clone(),
            registry(),
        );
        let app = build_router(state, 10);

        let response = app.clone().oneshot(get_request("/", None)).await.unwrap();
        let pending = state_param(&location(&response));

        // Another visitor probing /data must not rotate the shared state
        let response = app
            .clone()
            .oneshot(get_request("/data/items", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("state")).unwrap(),
            pending
        );

        transport.push(200, token_body());
        let callback = format!("/?state={pending}&code=c1");
        let response = app.oneshot(get_request(&callback, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
