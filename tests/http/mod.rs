use std::net::SocketAddr;
use std::time::Duration;

use docbase::frontend::http::filters;
use docbase::service::App;
use docbase::version::BuildInfo;
use rstest::rstest;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use warp::hyper::body::to_bytes;
use warp::hyper::client::HttpConnector;
use warp::hyper::{Body, Client, Method, Request, Response, StatusCode};

use crate::memory_app;

/// Serve `app` on a random free port. Returns the address and a channel that
/// stops the server.
fn start_server(app: App) -> (SocketAddr, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel();
    let (addr, server) = warp::serve(filters(
        app,
        BuildInfo::from_build_env(),
        Duration::from_secs(5),
    ))
    .bind_with_graceful_shutdown("127.0.0.1:0".parse::<SocketAddr>().unwrap(), async {
        rx.await.ok();
    });
    tokio::task::spawn(server);
    (addr, tx)
}

async fn response_json(response: Response<Body>) -> Value {
    let body_bytes = to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&body_bytes).unwrap()
}

async fn call(
    client: &Client<HttpConnector>,
    method: Method,
    uri: String,
    body: Option<Value>,
) -> Response<Body> {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();
    client.request(req).await.unwrap()
}

#[rstest]
#[tokio::test]
async fn test_http_document_flow(#[future] memory_app: App) {
    let (addr, terminate) = start_server(memory_app.await);
    let client = Client::new();
    let base = format!("http://{addr}");

    let resp = call(&client, Method::POST, format!("{base}/users"), None).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let user_id = response_json(resp).await["id"].clone();

    let resp = call(
        &client,
        Method::POST,
        format!("{base}/projects"),
        Some(json!({"user_id": user_id, "name": "Acme"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let project_id = response_json(resp).await["id"].as_str().unwrap().to_string();

    let resp = call(
        &client,
        Method::POST,
        format!("{base}/projects/{project_id}/collections"),
        Some(json!({
            "name": "todos",
            "attributes": [
                {"name": "title", "type": "string", "required": true},
                {"name": "done", "type": "boolean"}
            ]
        })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let documents = format!("{base}/projects/{project_id}/collections/todos/documents");
    let resp = call(
        &client,
        Method::POST,
        documents.clone(),
        Some(json!({"title": "buy milk"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = response_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    // Reserved fields are rejected
    let resp = call(
        &client,
        Method::POST,
        documents.clone(),
        Some(json!({"id": "x", "title": "nope"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = call(
        &client,
        Method::GET,
        format!("{documents}?title__endswith=milk&select=title"),
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(response_json(resp).await, json!({"title": "buy milk"}));

    let resp = call(
        &client,
        Method::PUT,
        format!("{documents}/{id}"),
        Some(json!({"done": true})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(response_json(resp).await["done"], json!(true));

    let resp = call(&client, Method::GET, format!("{documents}?done=true"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(response_json(resp).await["id"], json!(id));

    let resp = call(&client, Method::DELETE, format!("{documents}/{id}"), None).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = call(&client, Method::GET, format!("{documents}/{id}"), None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(resp).await["code"], json!("not_found"));

    terminate.send(()).unwrap();
}
