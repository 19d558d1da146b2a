use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use waypoint::{App, Config, Routable};

async fn start(app: App) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::new(app).serve(listener));
    addr
}

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8(buf).unwrap()
}

fn hello_app(config: Config) -> App {
    let mut app = App::with_config(config);
    app.get("/hello/:name", |c| {
        let greeting = format!("hello {}", c.param("name"));
        c.send_string(greeting)
    });
    app.post("/upload", |c| {
        let size = c.body().len().to_string();
        c.send_string(size)
    });
    app
}

#[tokio::test]
async fn serves_a_request_over_tcp() {
    let config = Config {
        server_header: "waypoint".into(),
        ..Config::default()
    };
    let addr = start(hello_app(config)).await;
    let response = send(addr, "GET /hello/world HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Date: "));
    assert!(response.contains("Server: waypoint\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.ends_with("\r\n\r\nhello world"));
}

#[tokio::test]
async fn reads_the_request_body() {
    let addr = start(hello_app(Config::default())).await;
    let response = send(addr, "POST /upload HTTP/1.1\r\nContent-Length: 5\r\n\r\nabcde").await;
    assert!(response.ends_with("\r\n\r\n5"));
}

#[tokio::test]
async fn head_response_has_no_body() {
    let addr = start(hello_app(Config::default())).await;
    let response = send(addr, "HEAD /hello/world HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Length: 11\r\n"));
    assert!(response.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn unknown_route_is_404() {
    let addr = start(hello_app(Config::default())).await;
    let response = send(addr, "GET /missing HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(response.ends_with("Cannot GET /missing"));
}

#[tokio::test]
async fn oversized_headers_are_431() {
    let config = Config {
        read_buffer_size: 128,
        ..Config::default()
    };
    let addr = start(hello_app(config)).await;
    let raw = format!("GET /hello/x HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "p".repeat(200));
    let response = send(addr, &raw).await;
    assert!(response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
}

#[tokio::test]
async fn oversized_body_is_413() {
    let config = Config {
        body_limit: 4,
        ..Config::default()
    };
    let addr = start(hello_app(config)).await;
    let response = send(addr, "POST /upload HTTP/1.1\r\nContent-Length: 10\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 413 Request Entity Too Large\r\n"));
}

#[tokio::test]
async fn get_only_server_rejects_post() {
    let config = Config {
        get_only: true,
        ..Config::default()
    };
    let addr = start(hello_app(config)).await;
    let response = send(addr, "POST /upload HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
}

#[tokio::test]
async fn slow_client_gets_408() {
    let config = Config {
        read_timeout_ms: Some(50),
        ..Config::default()
    };
    let addr = start(hello_app(config)).await;
    let response = send(addr, "GET /hello/slow HTTP/1.1\r\n").await;
    assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
}

#[tokio::test]
async fn panicking_handler_is_500() {
    let mut app = App::new();
    app.get("/boom", |_| panic!("boom"));
    let addr = start(app).await;
    let response = send(addr, "GET /boom HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(response.ends_with("Panic: boom"));
}
