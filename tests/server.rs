use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use starmap::{
    Pipeline, Response, Router, Server, StatusCode,
    cache::{CacheConfig, ResponseStore},
    context::Context,
    middleware::LoggerMiddleware,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct Reply {
    status_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn request(addr: std::net::SocketAddr, head: &str) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(head.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();

    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap().to_owned();
    let headers = lines
        .map(|line| {
            let (k, v) = line.split_once(": ").unwrap();
            (k.to_owned(), v.to_owned())
        })
        .collect();

    Reply {
        status_line,
        headers,
        body: body.to_owned(),
    }
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

struct TestServer {
    addr: std::net::SocketAddr,
    store: Arc<ResponseStore>,
    stars_calls: Arc<AtomicUsize>,
    stars_broken: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn start(config: CacheConfig) -> TestServer {
    let stars_calls = Arc::new(AtomicUsize::new(0));
    let stars_broken = Arc::new(AtomicBool::new(false));

    let mut router = Router::new();
    router.get("/ping", |_ctx| async {
        Response::json(StatusCode::Ok, &serde_json::json!({ "message": "pong" }))
    });
    let (calls, broken) = (Arc::clone(&stars_calls), Arc::clone(&stars_broken));
    router.get("/stars", move |_ctx| {
        calls.fetch_add(1, Ordering::SeqCst);
        let broken = broken.load(Ordering::SeqCst);
        async move {
            if broken {
                Response::new(StatusCode::InternalServerError).body("stars unavailable")
            } else {
                Response::json(StatusCode::Ok, &serde_json::json!([{ "hid": 1, "mag": -1.46 }]))
            }
        }
    });

    let store = config.build_store();
    let pipeline = Pipeline::new(router)
        .wrap(LoggerMiddleware)
        .cache(&config, Arc::clone(&store));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(server.run_with_shutdown(pipeline, async {
        let _ = rx.await;
    }));

    TestServer {
        addr,
        store,
        stars_calls,
        stars_broken,
        shutdown: Some(tx),
    }
}

#[tokio::test]
async fn ping_miss_then_hit_over_tcp() {
    let server = start(CacheConfig::default()).await;

    let first = request(server.addr, &get("/ping")).await;
    assert_eq!(first.status_line, "HTTP/1.1 200 OK");
    assert_eq!(first.header("X-Cache"), Some("MISS"));
    assert_eq!(first.header("Content-Type"), Some("application/json; charset=utf-8"));
    assert_eq!(first.body, r#"{"message":"pong"}"#);

    let second = request(server.addr, &get("/ping")).await;
    assert_eq!(second.status_line, "HTTP/1.1 200 OK");
    assert_eq!(second.header("X-Cache"), Some("HIT"));
    assert_eq!(second.header("Content-Type"), first.header("Content-Type"));
    assert_eq!(second.body, first.body);
}

#[tokio::test]
async fn failed_stars_read_is_not_cached() {
    let server = start(CacheConfig::default()).await;
    server.stars_broken.store(true, Ordering::SeqCst);

    let first = request(server.addr, &get("/stars")).await;
    assert_eq!(first.status_line, "HTTP/1.1 500 Internal Server Error");
    assert_eq!(first.header("X-Cache"), Some("MISS"));
    assert!(server.store.is_empty());

    server.stars_broken.store(false, Ordering::SeqCst);
    let second = request(server.addr, &get("/stars")).await;
    assert_eq!(second.status_line, "HTTP/1.1 200 OK");
    assert_eq!(second.header("X-Cache"), Some("MISS"));

    let third = request(server.addr, &get("/stars")).await;
    assert_eq!(third.header("X-Cache"), Some("HIT"));
    assert_eq!(server.stars_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn conditional_requests_use_their_own_entry() {
    let server = start(CacheConfig::default()).await;

    request(server.addr, &get("/stars")).await;
    let conditional = request(
        server.addr,
        "GET /stars HTTP/1.1\r\nIf-Modified-Since: Sat, 01 Jan 2000 00:00:00 GMT\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(conditional.header("X-Cache"), Some("MISS"));
    assert_eq!(server.stars_calls.load(Ordering::SeqCst), 2);
    assert_eq!(server.store.len(), 2);
}

#[tokio::test]
async fn disabled_cache_never_sets_the_header() {
    let server = start(CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    })
    .await;

    for _ in 0..2 {
        let reply = request(server.addr, &get("/stars")).await;
        assert_eq!(reply.status_line, "HTTP/1.1 200 OK");
        assert_eq!(reply.header("X-Cache"), None);
    }
    assert_eq!(server.stars_calls.load(Ordering::SeqCst), 2);
    assert!(server.store.is_empty());
}

#[tokio::test]
async fn keep_alive_serves_pipelined_requests() {
    let server = start(CacheConfig::default()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let pipelined = "GET /ping HTTP/1.1\r\nHost: localhost\r\n\r\n\
                     GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
    stream.write_all(pipelined.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(raw).unwrap();

    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(text.contains("X-Cache: MISS"));
    assert!(text.contains("X-Cache: HIT"));
}

#[tokio::test]
async fn malformed_request_gets_400() {
    let server = start(CacheConfig::default()).await;
    let reply = request(server.addr, "NOT A REQUEST\r\n\r\n").await;
    assert_eq!(reply.status_line, "HTTP/1.1 400 Bad Request");
    assert_eq!(reply.header("Connection"), Some("close"));
}

#[tokio::test]
async fn scoped_cache_serves_assets_and_skips_writes() {
    let assets = std::env::temp_dir().join(format!("starmap-assets-{}", std::process::id()));
    tokio::fs::create_dir_all(assets.join("js")).await.unwrap();
    tokio::fs::write(assets.join("js/app.js"), "drawSky();").await.unwrap();

    let saves = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    let root = assets.clone();
    router.get("/assets/*", move |ctx: Context| {
        let file = root.join(ctx.params().get("wildcard").unwrap_or("").trim_start_matches('/'));
        async move {
            match tokio::fs::read(&file).await {
                Ok(contents) => Response::new(StatusCode::Ok)
                    .header("Content-Type", "text/javascript; charset=utf-8")
                    .body_bytes(contents),
                Err(_) => Response::new(StatusCode::NotFound),
            }
        }
    });
    let counter = Arc::clone(&saves);
    router.post("/leaderboard", move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Response::new(StatusCode::Ok).body("saved") }
    });

    let config = CacheConfig {
        routes: vec!["/assets/*".to_owned()],
        ..CacheConfig::default()
    };
    let store = config.build_store();
    let pipeline = Pipeline::new(router).cache(&config, Arc::clone(&store));
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_with_shutdown(pipeline, async {
        let _ = rx.await;
    }));

    let first = request(addr, &get("/assets/js/app.js")).await;
    assert_eq!(first.status_line, "HTTP/1.1 200 OK");
    assert_eq!(first.header("X-Cache"), Some("MISS"));
    assert_eq!(first.body, "drawSky();");

    tokio::fs::remove_dir_all(&assets).await.unwrap();
    let second = request(addr, &get("/assets/js/app.js")).await;
    assert_eq!(second.header("X-Cache"), Some("HIT"));
    assert_eq!(second.body, "drawSky();");

    let post = "POST /leaderboard HTTP/1.1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    for _ in 0..2 {
        let reply = request(addr, post).await;
        assert_eq!(reply.body, "saved");
        assert_eq!(reply.header("X-Cache"), None);
    }
    assert_eq!(saves.load(Ordering::SeqCst), 2);
    assert_eq!(store.len(), 1);

    let _ = tx.send(());
}
