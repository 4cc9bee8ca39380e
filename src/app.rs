use std::net::SocketAddr;

use anyhow::Context;
use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::security::{cors_layer, enforce_allowed_hosts, with_security_headers};
use crate::state::AppState;
use crate::{admin, auth, users};

pub fn build_app(state: AppState) -> Router {
    let config = state.config.clone();

    let app = Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(users::router())
                .merge(admin::router())
                .route("/health/", get(|| async { "ok" })),
        )
        .layer(middleware::from_fn_with_state(state.clone(), enforce_allowed_hosts))
        .with_state(state);

    let app = if config.environment.is_production() {
        with_security_headers(app)
    } else {
        app
    };

    app.layer(cors_layer(&config)).layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method().clone();
                let uri = req.uri().clone();
                tracing::info_span!(
                    "http_request",
                    %method,
                    uri = %uri,
                    status = tracing::field::Empty
                )
            })
            .on_response(
                |res: &axum::http::Response<_>,
                 _latency: std::time::Duration,
                 span: &tracing::Span| {
                    let status = res.status();
                    span.record("status", tracing::field::display(status));
                    if status.is_server_error() {
                        tracing::error!(%status, "response");
                    } else {
                        tracing::info!(%status, "response");
                    }
                },
            ),
    )
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::hash_password;
    use crate::db::NewUser;
    use crate::mail::{testing::RecordingMailer, Mailer};
    use crate::security::AllowedHosts;

    const EMAIL: &str = "user@example.com";
    const PASSWORD: &str = "strongpass123";

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        call(app, Method::POST, uri, None, Some(body)).await
    }

    async fn register(app: &Router, email: &str) -> Value {
        let (status, body) = post(
            app,
            "/api/auth/register/",
            json!({ "email": email, "password": PASSWORD }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    /// Creates an active staff user directly in the store and logs in.
    async fn staff_token(state: &AppState, app: &Router) -> (i64, String) {
        let hash = hash_password(PASSWORD).unwrap();
        let staff = state
            .store
            .create_user(NewUser {
                email: "admin@example.com",
                password_hash: &hash,
                first_name: "Ada",
                last_name: "Admin",
                is_staff: true,
            })
            .await
            .unwrap();
        let (status, body) = post(
            app,
            "/api/auth/login/",
            json!({ "email": "admin@example.com", "password": PASSWORD }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (staff.id, body["access"].as_str().unwrap().to_string())
    }

    async fn test_app() -> (AppState, Router) {
        let state = AppState::fake().await;
        let app = build_app(state.clone());
        (state, app)
    }

    #[tokio::test]
    async fn register_login_refresh_flow() {
        let (state, app) = test_app().await;
        let payload = json!({ "email": EMAIL, "password": PASSWORD });

        let (status, body) = post(&app, "/api/auth/register/", payload.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["access"].is_string());
        assert!(body["refresh"].is_string());
        assert_eq!(body["user"]["email"], EMAIL);
        assert!(body["user"].get("password").is_none());

        let user_id = body["user"]["id"].as_i64().unwrap();
        assert!(state.store.find_profile(user_id).await.unwrap().is_none());

        let (status, body) = post(&app, "/api/auth/login/", payload).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access"].is_string());
        let refresh = body["refresh"].as_str().unwrap().to_string();

        let (status, body) = post(
            &app,
            "/api/auth/token/refresh/",
            json!({ "refresh": refresh }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access"].is_string());
        assert!(body.get("refresh").is_none());
    }

    #[tokio::test]
    async fn login_email_is_case_insensitive() {
        let (_, app) = test_app().await;
        register(&app, EMAIL).await;
        let (status, _) = post(
            &app,
            "/api/auth/login/",
            json!({ "email": " USER@Example.com ", "password": PASSWORD }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_field_error() {
        let (_, app) = test_app().await;
        register(&app, EMAIL).await;

        let (status, body) = post(
            &app,
            "/api/auth/register/",
            json!({ "email": "User@Example.com", "password": PASSWORD }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["email"][0], "user with this email already exists.");
    }

    #[tokio::test]
    async fn registration_validation_errors() {
        let (_, app) = test_app().await;
        let (status, body) = post(
            &app,
            "/api/auth/register/",
            json!({ "email": "not-an-email", "password": "short" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["email"][0], "Enter a valid email address.");
        assert!(body.get("password").is_none());

        let (status, body) = post(
            &app,
            "/api/auth/register/",
            json!({ "email": "a@example.com", "password": "abc" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["email"], "a@example.com");

        let (status, _) = post(
            &app,
            "/api/auth/login/",
            json!({ "email": "a@example.com", "password": "abc" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post(&app, "/api/auth/register/", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["email"][0], "This field is required.");
        assert_eq!(body["password"][0], "This field is required.");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let (_, app) = test_app().await;
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let (_, app) = test_app().await;
        register(&app, EMAIL).await;

        for body in [
            json!({ "email": EMAIL, "password": "wrong-password" }),
            json!({ "email": "nobody@example.com", "password": PASSWORD }),
        ] {
            let (status, body) = post(&app, "/api/auth/login/", body).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["code"], "no_active_account");
        }

        let (status, body) = post(&app, "/api/auth/login/", json!({ "email": EMAIL })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["password"][0], "This field is required.");
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_and_access_tokens() {
        let (_, app) = test_app().await;
        let tokens = register(&app, EMAIL).await;

        for token in ["garbage", tokens["access"].as_str().unwrap()] {
            let (status, body) =
                post(&app, "/api/auth/token/refresh/", json!({ "refresh": token })).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["code"], "token_not_valid");
        }

        let (status, _) = post(&app, "/api/auth/token/refresh/", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_blacklists_refresh_token() {
        let (_, app) = test_app().await;
        let tokens = register(&app, EMAIL).await;
        let refresh = json!({ "refresh": tokens["refresh"] });

        let (status, body) = post(&app, "/api/auth/logout/", refresh.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));

        let (status, _) = post(&app, "/api/auth/logout/", refresh.clone()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = post(&app, "/api/auth/token/refresh/", refresh).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_not_valid");
    }

    #[tokio::test]
    async fn current_user_requires_access_token() {
        let (_, app) = test_app().await;
        let tokens = register(&app, EMAIL).await;
        let access = tokens["access"].as_str().unwrap();
        let refresh = tokens["refresh"].as_str().unwrap();

        let (status, body) = call(&app, Method::GET, "/api/auth/user/", Some(access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], EMAIL);
        assert_eq!(body["is_active"], true);

        let (status, body) = call(&app, Method::GET, "/api/auth/user/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "not_authenticated");

        let (status, _) = call(&app, Method::GET, "/api/auth/user/", Some(refresh), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_is_created_on_first_read_and_patched() {
        let (_, app) = test_app().await;
        let tokens = register(&app, EMAIL).await;
        let access = tokens["access"].as_str().unwrap();
        let user_id = tokens["user"]["id"].as_i64().unwrap();

        let (status, first) =
            call(&app, Method::GET, "/api/users/profile/", Some(access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["user_id"], user_id);
        assert_eq!(first["preferences"], json!({}));
        assert_eq!(first["avatar"], Value::Null);

        let (_, second) = call(&app, Method::GET, "/api/users/profile/", Some(access), None).await;
        assert_eq!(second["id"], first["id"]);

        let (status, patched) = call(
            &app,
            Method::PATCH,
            "/api/users/profile/",
            Some(access),
            Some(json!({ "avatar": "avatars/me.png", "preferences": { "currency": "EUR" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["id"], first["id"]);
        assert_eq!(patched["avatar"], "avatars/me.png");
        assert_eq!(patched["preferences"]["currency"], "EUR");
        assert_eq!(patched["created_at"], first["created_at"]);

        let (status, body) = call(
            &app,
            Method::PATCH,
            "/api/users/profile/",
            Some(access),
            Some(json!({ "preferences": "dark" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["preferences"].is_array());

        let (status, _) = call(&app, Method::GET, "/api/users/profile/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_routes_require_staff() {
        let (_, app) = test_app().await;
        let tokens = register(&app, EMAIL).await;
        let access = tokens["access"].as_str().unwrap();

        let (status, _) = call(&app, Method::GET, "/api/admin/profiles/", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            call(&app, Method::GET, "/api/admin/profiles/", Some(access), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["detail"].as_str().unwrap().contains("permission"));
    }

    #[tokio::test]
    async fn admin_searches_profiles_by_email() {
        let (state, app) = test_app().await;
        let (_, staff) = staff_token(&state, &app).await;

        for email in ["alice@example.com", "bob@example.com", "al_x@other.org"] {
            let tokens = register(&app, email).await;
            let access = tokens["access"].as_str().unwrap();
            call(&app, Method::GET, "/api/users/profile/", Some(access), None).await;
        }

        let (status, body) =
            call(&app, Method::GET, "/api/admin/profiles/", Some(staff.as_str()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        assert_eq!(body["results"][0]["user"], "al_x@other.org");
        assert_eq!(body["results"][0]["label"], "Profile for al_x@other.org");

        let (_, body) = call(
            &app,
            Method::GET,
            "/api/admin/profiles/?search=ALICE",
            Some(staff.as_str()),
            None,
        )
        .await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["user"], "alice@example.com");

        let (_, body) = call(
            &app,
            Method::GET,
            "/api/admin/profiles/?search=al_&limit=1",
            Some(staff.as_str()),
            None,
        )
        .await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["user"], "al_x@other.org");

        let (_, body) = call(
            &app,
            Method::GET,
            "/api/admin/profiles/?limit=2&offset=2",
            Some(staff.as_str()),
            None,
        )
        .await;
        assert_eq!(body["count"], 3);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["user"], "alice@example.com");
    }

    #[tokio::test]
    async fn deactivated_user_is_locked_out() {
        let (state, app) = test_app().await;
        let (_, staff) = staff_token(&state, &app).await;
        let tokens = register(&app, EMAIL).await;
        let user_id = tokens["user"]["id"].as_i64().unwrap();

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/admin/users/{user_id}/deactivate/"),
            Some(staff.as_str()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_active"], false);

        let (status, _) = post(
            &app,
            "/api/auth/login/",
            json!({ "email": EMAIL, "password": PASSWORD }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = post(
            &app,
            "/api/auth/token/refresh/",
            json!({ "refresh": tokens["refresh"] }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/auth/user/",
            tokens["access"].as_str(),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "user_inactive");

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/admin/users/9999/deactivate/",
            Some(staff.as_str()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_user_cascades() {
        let (state, app) = test_app().await;
        let (staff_id, staff) = staff_token(&state, &app).await;
        let tokens = register(&app, EMAIL).await;
        let user_id = tokens["user"]["id"].as_i64().unwrap();
        let access = tokens["access"].as_str().unwrap();
        call(&app, Method::GET, "/api/users/profile/", Some(access), None).await;

        let uri = format!("/api/admin/users/{user_id}/");
        let (status, body) = call(&app, Method::DELETE, &uri, Some(staff.as_str()), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
        assert!(state.store.find_profile(user_id).await.unwrap().is_none());

        let (status, _) = call(&app, Method::DELETE, &uri, Some(staff.as_str()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = post(
            &app,
            "/api/auth/token/refresh/",
            json!({ "refresh": tokens["refresh"] }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/api/admin/users/{staff_id}/"),
            Some(staff.as_str()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn welcome_mail_is_sent_after_registration() {
        let fake = AppState::fake().await;
        let recorder = Arc::new(RecordingMailer::default());
        let state = AppState::from_parts(
            fake.store.clone(),
            fake.config.clone(),
            recorder.clone() as Arc<dyn Mailer>,
        );
        let app = build_app(state);
        register(&app, EMAIL).await;

        for _ in 0..50 {
            if !recorder.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, EMAIL);
    }

    #[tokio::test]
    async fn disallowed_host_is_rejected() {
        let fake = AppState::fake().await;
        let mut config = (*fake.config).clone();
        config.allowed_hosts = AllowedHosts::new(["api.smartpay.io"]);
        let state = AppState::from_parts(fake.store.clone(), Arc::new(config), fake.mailer.clone());
        let app = build_app(state);

        let req = |host: &str| {
            Request::builder()
                .uri("/api/health/")
                .header(header::HOST, host)
                .body(Body::empty())
                .unwrap()
        };

        let res = app.clone().oneshot(req("api.smartpay.io:443")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.oneshot(req("evil.example")).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["detail"], "Invalid HTTP_HOST header: 'evil.example'.");
    }

    #[tokio::test]
    async fn production_adds_security_headers() {
        let fake = AppState::fake().await;
        let mut config = (*fake.config).clone();
        config.environment = crate::config::Environment::Production;
        let state = AppState::from_parts(fake.store.clone(), Arc::new(config), fake.mailer.clone());
        let app = build_app(state);

        let req = Request::builder()
            .uri("/api/health/")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(res.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(res.headers().contains_key(header::STRICT_TRANSPORT_SECURITY));
    }

    #[tokio::test]
    async fn health() {
        let (_, app) = test_app().await;
        let (status, body) = call(&app, Method::GET, "/api/health/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
