//! HTTP transport scenarios: tunneled calls, codec header handling,
//! authentication, and the failsafe client.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use crosstalk::{
    ClientConfig, CodecKind, Credentials, ExecutorConfig, FailsafeHttpClientConnection,
    HttpClientConnection, HttpProcessorConfig, ReplyStatus, ServiceWrapper,
    client::ClientTransport,
    server::{AuthAnswer, Authenticator},
};
use test_util::spawn_http;

fn http_client(url: String, codec: CodecKind) -> Arc<HttpClientConnection> {
    Arc::new(
        HttpClientConnection::new(url, codec, None, &ClientConfig::default())
            .expect("build http client"),
    )
}

#[tokio::test]
async fn tunneled_sum_both_codecs() {
    let server = spawn_http(ExecutorConfig::default(), HttpProcessorConfig::default(), None).await;
    for codec in [CodecKind::Binary, CodecKind::Json] {
        let client = http_client(server.url("calc"), codec);
        let calc = ServiceWrapper::new(Arc::clone(&client) as _, "Calculator", "calc");
        let mut params = calc.params();
        params.push(&13i32).push(&2i32);
        let sum: i32 = calc.call("Add", params).await.expect("Add");
        assert_eq!(sum, 15);
        client.close().await;
    }
    server.shutdown().await;
}

#[tokio::test]
async fn root_path_takes_service_from_body() {
    let server = spawn_http(ExecutorConfig::default(), HttpProcessorConfig::default(), None).await;
    let client = http_client(server.root_url(), CodecKind::Json);
    let calc = ServiceWrapper::new(Arc::clone(&client) as _, "Calculator", "calc");
    let mut params = calc.params();
    params.push(&20i32).push(&22i32);
    let sum: i32 = calc.call("Add", params).await.expect("Add");
    assert_eq!(sum, 42);
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn unknown_service_via_http() {
    let server = spawn_http(ExecutorConfig::default(), HttpProcessorConfig::default(), None).await;
    let client = http_client(server.url("ghost"), CodecKind::Binary);
    let ghost = ServiceWrapper::new(Arc::clone(&client) as _, "Ghost", "ghost");
    let err = ghost
        .call::<i32>("foo", ghost.params())
        .await
        .expect_err("ghost must not resolve");
    assert_eq!(err.status, ReplyStatus::ServiceUnavailable);
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn missing_codec_header_is_bad_request() {
    let server = spawn_http(ExecutorConfig::default(), HttpProcessorConfig::default(), None).await;
    let http = reqwest::Client::new();

    let response = http
        .post(server.url("calc"))
        .body("{}")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = http
        .post(server.url("calc"))
        .header("codec", "xml")
        .body("{}")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    server.shutdown().await;
}

#[tokio::test]
async fn undecodable_body_is_bad_request() {
    let server = spawn_http(ExecutorConfig::default(), HttpProcessorConfig::default(), None).await;
    let http = reqwest::Client::new();
    let response = http
        .post(server.url("calc"))
        .header("codec", "json")
        .body("this is not a packet")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    server.shutdown().await;
}

struct FixedAuthenticator;

#[async_trait]
impl Authenticator for FixedAuthenticator {
    async fn authenticate(&self, credentials: Option<&Credentials>) -> AuthAnswer {
        match credentials {
            Some(creds) if creds.user == "aladdin" && creds.password == "sesame" => AuthAnswer::Ok,
            Some(_) => AuthAnswer::Denied,
            None => AuthAnswer::NeedsChallenge,
        }
    }
}

#[tokio::test]
async fn basic_auth_gates_requests() {
    let server = spawn_http(
        ExecutorConfig::default(),
        HttpProcessorConfig::default(),
        Some(Arc::new(FixedAuthenticator)),
    )
    .await;

    // Correct credentials pass through to the service.
    let authed = Arc::new(
        HttpClientConnection::new(
            server.url("calc"),
            CodecKind::Binary,
            Some(Credentials {
                user: "aladdin".to_string(),
                password: "sesame".to_string(),
            }),
            &ClientConfig::default(),
        )
        .expect("build client"),
    );
    let calc = ServiceWrapper::new(Arc::clone(&authed) as _, "Calculator", "calc");
    let mut params = calc.params();
    params.push(&1i32).push(&2i32);
    let sum: i32 = calc.call("Add", params).await.expect("authorized Add");
    assert_eq!(sum, 3);
    authed.close().await;

    // Wrong credentials: 401, surfaced as a connection error for the call.
    let denied = Arc::new(
        HttpClientConnection::new(
            server.url("calc"),
            CodecKind::Binary,
            Some(Credentials {
                user: "aladdin".to_string(),
                password: "wrong".to_string(),
            }),
            &ClientConfig::default(),
        )
        .expect("build client"),
    );
    let calc = ServiceWrapper::new(Arc::clone(&denied) as _, "Calculator", "calc");
    let mut params = calc.params();
    params.push(&1i32).push(&2i32);
    let err = calc.call::<i32>("Add", params).await.expect_err("denied");
    assert_eq!(err.status, ReplyStatus::ConnError);
    denied.close().await;

    // No credentials at all: the server challenges.
    let http = reqwest::Client::new();
    let response = http
        .post(server.url("calc"))
        .header("codec", "binary")
        .body(Vec::new())
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));

    server.shutdown().await;
}

#[tokio::test]
async fn forms_page_lists_services() {
    let server = spawn_http(
        ExecutorConfig::default(),
        HttpProcessorConfig {
            enable_auto_forms: true,
            ..HttpProcessorConfig::default()
        },
        None,
    )
    .await;
    let page = reqwest::get(format!("http://{}/rpc/__forms", server.addr))
        .await
        .expect("fetch forms")
        .text()
        .await
        .expect("body");
    assert!(page.contains("calc"));
    assert!(page.contains("echo"));
    server.shutdown().await;
}

#[tokio::test]
async fn failsafe_retries_across_backends() {
    let server = spawn_http(ExecutorConfig::default(), HttpProcessorConfig::default(), None).await;

    // One dead backend, one live; the walk must land on the live one.
    let backends = vec![
        "http://127.0.0.1:9/rpc/calc".to_string(),
        server.url("calc"),
    ];
    let client = Arc::new(
        FailsafeHttpClientConnection::new(
            backends,
            4,
            CodecKind::Json,
            None,
            &ClientConfig::default(),
        )
        .expect("build failsafe client"),
    );
    let calc = ServiceWrapper::new(Arc::clone(&client) as _, "Calculator", "calc");
    calc.set_call_timeout(Duration::from_secs(30));
    let mut params = calc.params();
    params.push(&40i32).push(&2i32);
    let sum: i32 = calc.call("Add", params).await.expect("Add via failsafe");
    assert_eq!(sum, 42);
    client.close().await;

    server.shutdown().await;
}

#[tokio::test]
async fn failsafe_exhaustion_is_conn_error() {
    let backends = vec!["http://127.0.0.1:9/rpc/calc".to_string()];
    let client = Arc::new(
        FailsafeHttpClientConnection::new(
            backends,
            2,
            CodecKind::Binary,
            None,
            &ClientConfig::default(),
        )
        .expect("build failsafe client"),
    );
    let calc = ServiceWrapper::new(Arc::clone(&client) as _, "Calculator", "calc");
    let mut params = calc.params();
    params.push(&1i32).push(&1i32);
    let err = calc.call::<i32>("Add", params).await.expect_err("all dead");
    assert_eq!(err.status, ReplyStatus::ConnError);
    client.close().await;
}
