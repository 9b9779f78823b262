//! End-to-end forwarding tests: a real proxy in front of real backends.
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use myelin::{middleware, Handler, Proxy};

async fn spawn_backend(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_proxy(proxy: Proxy) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new().fallback_service(proxy.into_service());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarded_response_keeps_status_headers_and_body() {
    let backend = spawn_backend(axum::Router::new().route(
        "/echo",
        get(|| async {
            (
                StatusCode::CREATED,
                [("x-backend", "echo-1")],
                "echo body",
            )
        }),
    ))
    .await;

    let proxy = Proxy::new();
    proxy.forward(&format!("http://{backend}")).unwrap();
    let proxy_addr = spawn_proxy(proxy).await;

    let resp = reqwest::get(format!("http://{proxy_addr}/echo"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    assert_eq!(resp.headers()["x-backend"], "echo-1");
    assert_eq!(resp.text().await.unwrap(), "echo body");
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_middleware_decorates_forwarded_responses() {
    let backend = spawn_backend(
        axum::Router::new().route("/", get(|| async { "from backend" })),
    )
    .await;

    let proxy = Proxy::new();
    proxy.use_middleware(middleware::from_fn(|req, next: Handler| async move {
        let mut resp = next(req).await;
        resp.headers_mut()
            .insert("server", axum::http::HeaderValue::from_static("proxy"));
        resp
    }));
    proxy.forward(&format!("http://{backend}")).unwrap();
    let proxy_addr = spawn_proxy(proxy).await;

    let resp = reqwest::get(format!("http://{proxy_addr}/")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["server"], "proxy");
    assert_eq!(resp.text().await.unwrap(), "from backend");
}

#[tokio::test(flavor = "multi_thread")]
async fn routed_and_default_upstreams() {
    let ip_backend = spawn_backend(
        axum::Router::new().route("/ip", get(|| async { "ip backend" })),
    )
    .await;
    let fallback_backend = spawn_backend(
        axum::Router::new().fallback(|| async { "fallback backend" }),
    )
    .await;

    let proxy = Proxy::new();
    proxy
        .get("/ip")
        .forward(&format!("http://{ip_backend}"))
        .unwrap();
    proxy
        .forward(&format!("http://{fallback_backend}"))
        .unwrap();
    let proxy_addr = spawn_proxy(proxy).await;

    let resp = reqwest::get(format!("http://{proxy_addr}/ip")).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "ip backend");

    let resp = reqwest::get(format!("http://{proxy_addr}/other"))
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "fallback backend");
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarded_headers_are_stamped() {
    let backend = spawn_backend(axum::Router::new().route(
        "/headers",
        get(|headers: HeaderMap| async move {
            let forwarded_for = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let forwarded_host = headers
                .get("x-forwarded-host")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let has_server = headers.contains_key("x-forwarded-server");
            format!("{forwarded_for}|{forwarded_host}|{has_server}")
        }),
    ))
    .await;

    let proxy = Proxy::new();
    proxy.forward(&format!("http://{backend}")).unwrap();
    let proxy_addr = spawn_proxy(proxy).await;

    let body = reqwest::get(format!("http://{proxy_addr}/headers"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let mut fields = body.split('|');
    assert_eq!(fields.next(), Some("127.0.0.1"));
    assert_eq!(fields.next(), Some(proxy_addr.to_string().as_str()));
    assert_eq!(fields.next(), Some("true"));
}

#[tokio::test(flavor = "multi_thread")]
async fn custom_headers_cross_the_proxy_but_captures_feed_routes() {
    let backend = spawn_backend(axum::Router::new().route(
        "/hello/{name}",
        get(|req: Request<Body>| async move {
            let query = req.uri().query().unwrap_or("").to_string();
            let x_foo = req
                .headers()
                .get("x-foo")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            format!("{query}|{x_foo}")
        }),
    ))
    .await;

    let proxy = Proxy::new();
    proxy
        .get("/hello/:name")
        .forward(&format!("http://{backend}"))
        .unwrap();
    let proxy_addr = spawn_proxy(proxy).await;

    let client = reqwest::Client::new();
    let body = client
        .get(format!("http://{proxy_addr}/hello/blake?a=b"))
        .header("x-foo", "bar")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let (query, x_foo) = body.split_once('|').unwrap();
    assert_eq!(query, ":name=blake&a=b");
    assert_eq!(x_foo, "bar");
}

#[tokio::test(flavor = "multi_thread")]
async fn method_not_allowed_over_the_wire() {
    let proxy = Proxy::new();
    proxy.router().set_force_method_not_allowed(true);
    proxy.post("/foo/:name").handle_fn(|_req| async {
        axum::http::Response::builder()
            .status(200)
            .body(Body::empty())
            .unwrap()
    });
    proxy.put("/foo/:name").handle_fn(|_req| async {
        axum::http::Response::builder()
            .status(200)
            .body(Body::empty())
            .unwrap()
    });
    let proxy_addr = spawn_proxy(proxy).await;

    let resp = reqwest::get(format!("http://{proxy_addr}/foo/keith"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    let allow = resp.headers()["allow"].to_str().unwrap();
    let mut methods: Vec<&str> = allow.split(", ").collect();
    methods.sort_unstable();
    assert_eq!(methods, vec!["POST", "PUT"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_upstream_is_a_bad_gateway() {
    let proxy = Proxy::new();
    // Nothing listens on this port.
    proxy.forward("http://127.0.0.1:1").unwrap();
    let proxy_addr = spawn_proxy(proxy).await;

    let resp = reqwest::get(format!("http://{proxy_addr}/")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(resp.text().await.unwrap(), "Bad Gateway");
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_middleware_is_contained() {
    let proxy = Proxy::new();
    proxy.use_middleware(middleware::from_fn(
        |_req, _next: Handler| async move {
            panic!("handler exploded");
        },
    ));
    let proxy_addr = spawn_proxy(proxy).await;

    let resp = reqwest::get(format!("http://{proxy_addr}/")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text().await.unwrap(), "Proxy Error");

    // The proxy survives and keeps serving.
    let resp = reqwest::get(format!("http://{proxy_addr}/again"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(flavor = "multi_thread")]
async fn post_bodies_reach_the_upstream() {
    let backend = spawn_backend(axum::Router::new().route(
        "/submit",
        axum::routing::post(|body: String| async move {
            (StatusCode::OK, format!("got: {body}")).into_response()
        }),
    ))
    .await;

    let proxy = Proxy::new();
    proxy.forward(&format!("http://{backend}")).unwrap();
    let proxy_addr = spawn_proxy(proxy).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{proxy_addr}/submit"))
        .body("payload-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "got: payload-123");
}
