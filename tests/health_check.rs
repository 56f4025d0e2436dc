//! Integration tests for the public endpoints of the server

use authgate::auth::AuthenticationEngine;
use authgate::configuration::JwtSettings;
use authgate::startup::run;
use authgate::store::{InMemoryCredentialStore, InMemoryRefreshStore};
use std::net::TcpListener;
use std::sync::Arc;

fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let jwt = JwtSettings {
        secret: "test-secret-key-at-least-32-characters-long".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 2_592_000,
        issuer: "test".to_string(),
        leeway: 0,
    };
    let engine = AuthenticationEngine::new(
        Arc::new(InMemoryCredentialStore::new()),
        Arc::new(InMemoryRefreshStore::new()),
        &jwt,
        4,
    )
    .expect("Failed to build engine");

    let server = run(listener, Arc::new(engine))
        .expect("Failed to create server");

    let _ = tokio::spawn(async move {
        let _ = server.await;
    });

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let addr = spawn_app();
    let client = reqwest::Client::new();

    let test_cases = vec![
        ("GET", "/api/me"),
        ("POST", "/api/logout"),
        ("POST", "/api/password"),
        ("PUT", "/api/users/a@test.com/role"),
    ];

    for (method, path) in test_cases {
        let request = match method {
            "GET" => client.get(&format!("{}{}", addr, path)),
            "PUT" => client.put(&format!("{}{}", addr, path)),
            _ => client.post(&format!("{}{}", addr, path)),
        };
        let response = request.send().await.expect("Failed to execute request");

        assert_eq!(
            401,
            response.status().as_u16(),
            "{} {} did not fail with 401 without a token",
            method,
            path
        );
    }
}

#[tokio::test]
async fn malformed_bearer_token_is_rejected() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/api/me", addr))
        .header("Authorization", "Bearer invalid.token.here")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(401, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_INVALID");
}
