//! Star-map read API served behind the response cache.
//!
//! ```text
//! cargo run --example starmap -- --addr 127.0.0.1:8080 --data-dir ./data
//! cargo run --example starmap -- --static-dir ./web --version-file ./version.txt
//! cargo run --example starmap -- --no-cache
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use starmap::{
    Pipeline, Response, Router, Server, StatusCode, cache::CacheConfig, context::Context,
    middleware::LoggerMiddleware,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Star-map HTTP server with an in-process response cache")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "STARMAP_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// Disable the response cache
    #[arg(long, env = "STARMAP_NO_CACHE")]
    no_cache: bool,

    /// Directory holding stars.json, constellations.json and families.json
    #[arg(long, env = "STARMAP_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory holding index.html and the assets/ tree
    #[arg(long, env = "STARMAP_STATIC_DIR", default_value = ".")]
    static_dir: PathBuf,

    /// File served on /version
    #[arg(long, env = "STARMAP_VERSION_FILE", default_value = "/var/webapp/version.txt")]
    version_file: PathBuf,
}

/// Read routes served behind the cache.
const CACHED_ROUTES: [&str; 8] = [
    "/",
    "/index.html",
    "/ping",
    "/stars",
    "/constellations",
    "/families",
    "/assets/*",
    "/version",
];

#[derive(Debug, Serialize, Deserialize)]
struct Star {
    hid: u64,
    ra: f64,
    dec: f64,
    mag: f64,
    clr: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Edge {
    start: u64,
    end: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Constellation {
    name: String,
    short: String,
    family: String,
    origin: String,
    meaning: String,
    luminary: String,
    month: String,
    info: String,
    ra: f64,
    dec: f64,
    edges: Vec<Edge>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Group {
    level: u64,
    constellations: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Family {
    name: String,
    info: String,
    num_constellations: u64,
    groups: Vec<Group>,
}

#[derive(Debug, thiserror::Error)]
enum DataError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DataError> {
    let raw = tokio::fs::read(path).await.map_err(|source| DataError::Read {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| DataError::Parse {
        path: path.to_owned(),
        source,
    })
}

// Static data falls back to an empty list so the server still starts without it.
async fn load_or_empty<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    match load_json(path).await {
        Ok(items) => items,
        Err(e) => {
            warn!(error = %e, "serving an empty list");
            Vec::new()
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "text/plain; charset=utf-8",
    }
}

// Missing or unreadable files answer 404.
async fn serve_file(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(contents) => Response::new(StatusCode::Ok)
            .header("Content-Type", content_type(path))
            .body_bytes(contents),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "static file unavailable");
            Response::new(StatusCode::NotFound)
        }
    }
}

// `rest` is the wildcard capture, e.g. `/js/app.js`.
fn asset_path(assets: &Path, rest: &str) -> Option<PathBuf> {
    let mut path = assets.to_path_buf();
    for part in rest.split('/').filter(|part| !part.is_empty()) {
        if part == ".." || part == "." {
            return None;
        }
        path.push(part);
    }
    Some(path)
}

fn static_routes(router: &mut Router, static_dir: &Path, version_file: &Path) {
    let index = Arc::new(static_dir.join("index.html"));
    for route in ["/", "/index.html"] {
        let index = Arc::clone(&index);
        router.get(route, move |_ctx| {
            let index = Arc::clone(&index);
            async move { serve_file(&index).await }
        });
    }

    let assets = Arc::new(static_dir.join("assets"));
    router.get("/assets/*", move |ctx: Context| {
        let file = asset_path(&assets, ctx.params().get("wildcard").unwrap_or(""));
        async move {
            match file {
                Some(file) => serve_file(&file).await,
                None => Response::new(StatusCode::NotFound),
            }
        }
    });

    let version_file = Arc::new(version_file.to_owned());
    router.get("/version", move |_ctx| {
        let version_file = Arc::clone(&version_file);
        async move { serve_file(&version_file).await }
    });
}

async fn routes(args: &Args) -> Router {
    let data_dir = args.data_dir.as_path();
    let constellations: Arc<Vec<Constellation>> =
        Arc::new(load_or_empty(&data_dir.join("constellations.json")).await);
    let families: Arc<Vec<Family>> = Arc::new(load_or_empty(&data_dir.join("families.json")).await);
    let stars_path = Arc::new(data_dir.join("stars.json"));

    let mut router = Router::new();

    router.get("/ping", |_ctx| async {
        Response::json(StatusCode::Ok, &serde_json::json!({ "message": "pong" }))
    });

    // Re-read on every request; the cache keeps this off the hot path.
    router.get("/stars", move |_ctx| {
        let path = Arc::clone(&stars_path);
        async move {
            match load_json::<Vec<Star>>(&path).await {
                Ok(stars) => Response::json(StatusCode::Ok, &stars),
                Err(e) => {
                    warn!(error = %e, "stars unavailable");
                    Response::new(StatusCode::InternalServerError).body(e.to_string())
                }
            }
        }
    });

    router.get("/constellations", move |_ctx| {
        let constellations = Arc::clone(&constellations);
        async move { Response::json(StatusCode::Ok, constellations.as_slice()) }
    });

    router.get("/families", move |_ctx| {
        let families = Arc::clone(&families);
        async move { Response::json(StatusCode::Ok, families.as_slice()) }
    });

    static_routes(&mut router, &args.static_dir, &args.version_file);
    router
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = CacheConfig {
        enabled: !args.no_cache,
        routes: CACHED_ROUTES.map(String::from).to_vec(),
        ..CacheConfig::default()
    };
    config.validate()?;

    let store = config.build_store();
    let sweeper = store.spawn_sweeper(config.sweep_interval());

    let pipeline = Pipeline::new(routes(&args).await)
        .wrap(LoggerMiddleware)
        .cache(&config, store);

    let server = Server::bind(&args.addr).await?;
    info!(address = %server.local_addr(), cache = config.enabled, "starting starmap");

    server
        .run_with_shutdown(pipeline, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    sweeper.abort();
    Ok(())
}
