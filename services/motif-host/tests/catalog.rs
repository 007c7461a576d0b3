use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use motif_host::catalog::{Catalog, HttpCatalog};
use motif_host::discovery::{discover_catalog, SourcePolicy};
use motif_host::HostProvider;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

const NAMES: [&str; 4] = ["fly/a#1.graph", "fly/b?v=2.graph", "fly/c d.graph", "worm/w.graph"];

fn contents(name: &str) -> Option<&'static str> {
    match name {
        "fly/a#1.graph" => Some("a b\n"),
        "fly/b?v=2.graph" => Some("x y\ny z\n"),
        "fly/c d.graph" => Some("p q\nq r\nr p\n"),
        "worm/w.graph" => Some("m n\n"),
        // What a truncated request would hit.
        "fly/a" | "fly/b" => Some("decoy decoy2\ndecoy2 decoy3\ndecoy3 decoy\ndecoy decoy3\n"),
        _ => None,
    }
}

async fn list(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    let prefix = q.get("prefix").cloned().unwrap_or_default();
    let entries: Vec<Value> =
        NAMES.iter().filter(|n| n.starts_with(&prefix)).map(|n| json!({"name": n, "owner": "lab"})).collect();
    Json(Value::Array(entries))
}

async fn file(Path(name): Path<String>) -> Result<String, StatusCode> {
    contents(name.trim_start_matches('/')).map(str::to_string).ok_or(StatusCode::NOT_FOUND)
}

async fn fake_catalog() -> String {
    let app = Router::new().route("/list", get(list)).route("/files/*name", get(file));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

#[tokio::test]
async fn listing_honours_prefix() {
    let cat = HttpCatalog::new(&fake_catalog().await, Duration::from_secs(5)).unwrap();
    let names: Vec<String> = cat.list_metadata("fly/").await.unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, ["fly/a#1.graph", "fly/b?v=2.graph", "fly/c d.graph"]);
    let worm = cat.list_metadata("worm/").await.unwrap();
    assert_eq!(worm[0].extra.get("owner"), Some(&json!("lab")));
}

#[tokio::test]
async fn names_with_reserved_characters_fetch_their_own_bytes() {
    let cat = HttpCatalog::new(&fake_catalog().await, Duration::from_secs(5)).unwrap();
    for name in ["fly/a#1.graph", "fly/b?v=2.graph", "fly/c d.graph"] {
        let bytes = cat.get_file(name).await.unwrap();
        assert_eq!(Some(String::from_utf8(bytes).unwrap().as_str()), contents(name), "{name}");
    }
    assert!(cat.get_file("fly/missing.graph").await.is_err());
}

#[tokio::test]
async fn http_catalog_discovery_builds_one_provider_per_entry() {
    let cat = HttpCatalog::new(&fake_catalog().await, Duration::from_secs(5)).unwrap();
    let report = discover_catalog(&cat, "fly/", SourcePolicy::FailFast).await.unwrap();
    assert!(report.warnings.is_empty());
    let mut seen: Vec<(String, usize)> = report
        .providers
        .iter()
        .map(|p| match p {
            motif_host::Provider::LocalEngine(local) => (p.get_uri().to_string(), local.graph().edge_count()),
            other => panic!("unexpected provider {}", other.kind()),
        })
        .collect();
    seen.sort();
    assert_eq!(
        seen,
        [
            ("catalog://fly/a#1.graph".to_string(), 1),
            ("catalog://fly/b?v=2.graph".to_string(), 2),
            ("catalog://fly/c d.graph".to_string(), 3),
        ]
    );
}
