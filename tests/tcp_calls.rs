//! End-to-end TCP scenarios: happy path, routing errors, argument errors,
//! and composite round-trips, with both codecs.

use std::{sync::Arc, time::Duration};

use crosstalk::{
    ClientConfig, CodecKind, ExecutorConfig, ReplyStatus, ServerConfig, ServiceWrapper,
    TcpClientConnection,
    client::ClientTransport,
};
use test_util::{Family, Person, spawn_tcp};

async fn tcp_client(addr: std::net::SocketAddr, codec: CodecKind) -> Arc<TcpClientConnection> {
    Arc::new(
        TcpClientConnection::connect(&addr.to_string(), codec, &ClientConfig::default())
            .await
            .expect("connect"),
    )
}

async fn with_server<F, Fut>(codec: CodecKind, test: F)
where
    F: FnOnce(Arc<TcpClientConnection>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let server = spawn_tcp(ExecutorConfig::default(), ServerConfig::default()).await;
    let client = tcp_client(server.addr, codec).await;
    test(Arc::clone(&client)).await;
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn happy_path_sum_binary() {
    with_server(CodecKind::Binary, |client| async move {
        let calc = ServiceWrapper::new(client, "Calculator", "calc");
        let mut params = calc.params();
        params.push(&13i32).push(&2i32);
        let sum: i32 = calc.call("Add", params).await.expect("Add");
        assert_eq!(sum, 15);
    })
    .await;
}

#[tokio::test]
async fn happy_path_sum_json() {
    with_server(CodecKind::Json, |client| async move {
        let calc = ServiceWrapper::new(client, "Calculator", "calc");
        let mut params = calc.params();
        params.push(&13i32).push(&2i32);
        let sum: i32 = calc.call("Add", params).await.expect("Add");
        assert_eq!(sum, 15);
    })
    .await;
}

#[tokio::test]
async fn mixed_argument_method() {
    with_server(CodecKind::Binary, |client| async move {
        let calc = ServiceWrapper::new(client, "Calculator", "calc");
        let mut params = calc.params();
        params.push(&13i32).push(&2.718f64).push(&"text".to_string());
        let result: i32 = calc.call("TestMe", params).await.expect("TestMe");
        assert_eq!(result, 15);
    })
    .await;
}

#[tokio::test]
async fn unknown_service_is_unavailable() {
    with_server(CodecKind::Binary, |client| async move {
        let ghost = ServiceWrapper::new(client, "Ghost", "ghost");
        let err = ghost
            .call::<i32>("foo", ghost.params())
            .await
            .expect_err("ghost must not resolve");
        assert_eq!(err.status, ReplyStatus::ServiceUnavailable);
        assert_eq!(err.hint, "SERVICE_UNAVAILABLE");
    })
    .await;
}

#[tokio::test]
async fn unknown_method_is_unavailable() {
    with_server(CodecKind::Json, |client| async move {
        let calc = ServiceWrapper::new(client, "Calculator", "calc");
        let err = calc
            .call::<i32>("nope", calc.params())
            .await
            .expect_err("nope must not resolve");
        assert_eq!(err.status, ReplyStatus::ProcUnavailable);
    })
    .await;
}

#[tokio::test]
async fn bad_arguments_are_garbage() {
    with_server(CodecKind::Binary, |client| async move {
        let calc = ServiceWrapper::new(client, "Calculator", "calc");

        // Wrong type.
        let mut params = calc.params();
        params.push(&"abc".to_string());
        let err = calc.call::<i32>("Add", params).await.expect_err("wrong type");
        assert_eq!(err.status, ReplyStatus::GarbageArgs);

        // Too few.
        let mut params = calc.params();
        params.push(&1i32);
        let err = calc.call::<i32>("Add", params).await.expect_err("too few");
        assert_eq!(err.status, ReplyStatus::GarbageArgs);

        // Too many; the service method is not invoked either way.
        let mut params = calc.params();
        params.push(&1i32).push(&2i32).push(&3i32);
        let err = calc.call::<i32>("Add", params).await.expect_err("too many");
        assert_eq!(err.status, ReplyStatus::GarbageArgs);
    })
    .await;
}

#[tokio::test]
async fn wrong_return_type_is_reported() {
    with_server(CodecKind::Binary, |client| async move {
        let calc = ServiceWrapper::new(client, "Calculator", "calc");
        let mut params = calc.params();
        params.push(&1i32).push(&2i32);
        let err = calc
            .call::<String>("Add", params)
            .await
            .expect_err("i32 result cannot decode as String");
        assert_eq!(
            err.hint,
            "Error decoding data, the server returned a wrong type"
        );
    })
    .await;
}

fn sample_family() -> Family {
    let mother = Person {
        name: "Ma".to_string(),
        height: 1.68,
        age: 103,
        married: Some(true),
    };
    let father = Person {
        name: "Pa".to_string(),
        height: 1.69,
        age: 107,
        married: Some(false),
    };
    Family {
        children: vec![mother.clone(), father.clone()],
        mother,
        father,
    }
}

#[tokio::test]
async fn composite_round_trip_binary() {
    with_server(CodecKind::Binary, |client| async move {
        let echo = ServiceWrapper::new(client, "Echo", "echo");
        let family = sample_family();
        let mut params = echo.params();
        params
            .push(&family.mother)
            .push(&family.father)
            .push(&family.children);
        let reply: Family = echo.call("SetFamily", params).await.expect("SetFamily");
        assert_eq!(reply, family);
    })
    .await;
}

#[tokio::test]
async fn composite_round_trip_json() {
    with_server(CodecKind::Json, |client| async move {
        let echo = ServiceWrapper::new(client, "Echo", "echo");
        let family = sample_family();
        let mut params = echo.params();
        params
            .push(&family.mother)
            .push(&family.father)
            .push(&family.children);
        let reply: Family = echo.call("SetFamily", params).await.expect("SetFamily");
        assert_eq!(reply, family);
    })
    .await;
}

#[tokio::test]
async fn immediate_reply_encoding_mode() {
    // Same wire behavior with replies encoded on the completing worker.
    let server = spawn_tcp(
        ExecutorConfig::default(),
        ServerConfig {
            reply_encoding: crosstalk::ReplyEncoding::Immediate,
            ..ServerConfig::default()
        },
    )
    .await;
    let client = tcp_client(server.addr, CodecKind::Json).await;
    let calc = ServiceWrapper::new(Arc::clone(&client) as _, "Calculator", "calc");
    let mut params = calc.params();
    params.push(&8i32).push(&9i32);
    let sum: i32 = calc.call("Add", params).await.expect("Add");
    assert_eq!(sum, 17);
    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_calls_multiplex_one_connection() {
    with_server(CodecKind::Binary, |client| async move {
        let calc = Arc::new(ServiceWrapper::new(client, "Calculator", "calc"));
        let mut joins = Vec::new();
        for i in 0..32i32 {
            let calc = Arc::clone(&calc);
            joins.push(tokio::spawn(async move {
                let mut params = calc.params();
                params.push(&i).push(&i);
                let sum: i32 = calc.call("Add", params).await.expect("Add");
                assert_eq!(sum, i + i);
            }));
        }
        for join in joins {
            join.await.expect("task");
        }
    })
    .await;
}

#[tokio::test]
async fn raw_query_surface_works() {
    with_server(CodecKind::Binary, |client| async move {
        let mut params = crosstalk::ParamList::new(CodecKind::Binary);
        params.push(&20i32).push(&22i32);
        let (status, result) = client
            .query("calc", "Add", params.finish(), Duration::from_secs(5))
            .await;
        assert_eq!(status, ReplyStatus::Success);
        let sum: i32 =
            crosstalk::codec::decode_value(CodecKind::Binary, result).expect("decode sum");
        assert_eq!(sum, 42);
    })
    .await;
}
