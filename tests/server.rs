//! End-to-end tests over a real socket.

mod common;

use std::time::Duration;

use reserve::handlers::custom::custom;
use reserve::{Mapping, Outcome, ServerConfig};
use serde_json::json;

#[tokio::test]
async fn serves_file_after_custom_redirect() {
    let dispatcher = common::dispatcher_with(
        common::site("server-file"),
        vec![
            Mapping::new()
                .method("GET")
                .matching("^/redirect")
                .custom(custom(|_| async { Ok(Outcome::from("/file.txt")) }))
                .into(),
            Mapping::new().matching("^/(.*)").file("$1").into(),
        ],
    )
    .await;
    let (addr, shutdown, _updates) = common::start_server(dispatcher).await;

    let response = common::client()
        .get(format!("http://{addr}/redirect"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "Hello World!");

    let response = common::client()
        .get(format!("http://{addr}/missing.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    shutdown.trigger();
}

#[tokio::test]
async fn unmatched_request_is_501() {
    let dispatcher = common::dispatcher(vec![Mapping::new().matching("^/only$").status(204).into()]).await;
    let (addr, shutdown, _updates) = common::start_server(dispatcher).await;

    let response = common::client()
        .post(format!("http://{addr}/elsewhere?x=1"))
        .body("ignored")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 501);

    shutdown.trigger();
}

#[tokio::test]
async fn proxies_to_upstream() {
    let backend = common::start_mock_backend("upstream says hi").await;
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .matching("^/api/(.*)")
        .url(format!("http://{backend}/$1"))
        .into()])
    .await;
    let (addr, shutdown, _updates) = common::start_server(dispatcher).await;

    let response = common::client()
        .get(format!("http://{addr}/api/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "mock");
    assert_eq!(response.text().await.unwrap(), "upstream says hi");

    shutdown.trigger();
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let dispatcher = common::dispatcher(vec![Mapping::new()
        .url("http://127.0.0.1:1/")
        .into()])
    .await;
    let (addr, shutdown, _updates) = common::start_server(dispatcher).await;

    let response = common::client()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    shutdown.trigger();
}

#[tokio::test]
async fn reloaded_config_replaces_mappings() {
    let dispatcher = common::dispatcher(vec![Mapping::new().status(200).into()]).await;
    let (addr, shutdown, updates) = common::start_server(dispatcher).await;
    let client = common::client();
    let url = format!("http://{addr}/");

    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);

    updates
        .send(ServerConfig {
            mappings: vec![json!({ "match": "^/", "status": 204 })],
            ..ServerConfig::default()
        })
        .unwrap();

    let mut status = 0;
    for _ in 0..50 {
        status = client.get(&url).send().await.unwrap().status().as_u16();
        if status == 204 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, 204);

    shutdown.trigger();
}
