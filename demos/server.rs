//! Render server with an in-memory store
//!
//! Run with: cargo run --example server --features axum
//!
//! Settings come from `FRUITSTAND_CONFIG` (a YAML file) if set, then
//! `FRUITSTAND_*` environment variables. The renderer defaults to
//! `node render.js`.
//!
//! Then test with:
//!   curl -o out.png 'http://localhost:5000/display/render?k=lobby&w=800&h=480&cs=3b7'

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use fruitstand::cache::{make_key, Cache};
use fruitstand::config::ConfigMap;
use fruitstand::model::ConfigScope;
use fruitstand::store::PlaylistStore;
use fruitstand::{
    axum_ext, config, HttpFetcher, MemoryStore, Orchestrator, ProcessRenderer, ScreenRegistry,
    Settings,
};

const QUOTE_TTL: Duration = Duration::from_secs(3600);

/// GET /screens/render/fruitstand/color_test
async fn color_test() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html><html><body style=\"margin:0;display:flex;height:100vh\">\
         <div style=\"flex:1;background:#000\"></div>\
         <div style=\"flex:1;background:#fff\"></div>\
         <div style=\"flex:1;background:#f00\"></div>\
         <div style=\"flex:1;background:#0f0\"></div>\
         <div style=\"flex:1;background:#00f\"></div>\
         <div style=\"flex:1;background:#ff0\"></div>\
         <div style=\"flex:1;background:#f80\"></div>\
         </body></html>",
    )
}

/// GET /screens/render/fruitstand/zenquotes
async fn zen_quote(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    let entry_id = params.get("entry").and_then(|v| v.parse::<i64>().ok());
    let config = screen_config(&orchestrator, "fruitstand/zenquotes", entry_id).await;
    let mode = config
        .get("mode")
        .and_then(Value::as_str)
        .unwrap_or("random");

    let quote = fetch_quote(orchestrator.cache(), mode).await;
    let field = |name: &str| {
        quote
            .as_ref()
            .and_then(|q| q.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Html(format!(
        "<!DOCTYPE html><html><body style=\"font-family:serif;padding:10%\">\
         <blockquote style=\"font-size:2.5em\">{}</blockquote><p>{}</p></body></html>",
        field("q").unwrap_or_else(|| "Nothing is permanent.".to_string()),
        field("a").unwrap_or_default()
    ))
}

/// Effective config of a screen at the placement named by `entry_id`.
async fn screen_config(orchestrator: &Orchestrator, key: &str, entry_id: Option<i64>) -> ConfigMap {
    let Some(screen) = orchestrator.registry().get(key) else {
        return ConfigMap::new();
    };
    let store = orchestrator.store();
    let entry = match entry_id {
        Some(id) => store.find_entry(id).await.ok().flatten(),
        None => None,
    };
    config::resolve(&**store, &screen, entry.as_ref())
        .await
        .unwrap_or_else(|_| screen.default_config.clone())
}

async fn fetch_quote(cache: &Cache, mode: &str) -> Option<Value> {
    let key = make_key("zenquotes", &[mode]);
    let url = format!("https://zenquotes.io/api/{}", mode);
    let result = cache
        .get_or_fetch(&key, QUOTE_TTL, || async move {
            let body = reqwest::get(&url).await?.error_for_status()?.bytes().await?;
            let quotes: Value = serde_json::from_slice(&body)?;
            Ok::<_, fruitstand::Error>(quotes.get(0).cloned())
        })
        .await;
    match result {
        Ok(quote) => quote,
        Err(e) => {
            tracing::warn!("Quote fetch failed: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = match std::env::var("FRUITSTAND_CONFIG") {
        Ok(path) => Settings::load(path)?,
        Err(_) => Settings::from_env()?,
    };

    // Seed one playlist and assign it to every display on first sight
    let store = Arc::new(MemoryStore::new());
    let playlist = store.add_playlist("Lobby", 900)?;
    let quote = store.add_entry(playlist.id, "fruitstand/zenquotes", 0, None)?;
    store.add_entry(playlist.id, "fruitstand/color_test", 1, Some(300))?;
    config::save(
        &*store,
        &ConfigScope::Entry(quote.id),
        &json!({ "mode": "today" })
            .as_object()
            .cloned()
            .unwrap_or_default(),
    )
    .await?;

    let cache = Cache::from_settings(&settings.cache, store.clone()).await?;
    let orchestrator = Arc::new(
        Orchestrator::new(
            store.clone(),
            ScreenRegistry::with_builtin_screens(),
            settings.clone(),
            Arc::new(ProcessRenderer::new(settings.renderer.clone())),
            Arc::new(HttpFetcher::new(settings.renderer.timeout())?),
        )
        .with_cache(cache),
    );

    let screens = Router::new()
        .route("/screens/render/fruitstand/color_test", get(color_test))
        .route("/screens/render/fruitstand/zenquotes", get(zen_quote))
        .with_state(orchestrator.clone());
    let app = axum_ext::router(orchestrator).merge(screens);

    // Devices register themselves; hand new ones the seeded playlist
    let assigner = store.clone();
    let playlist_id = playlist.id;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        loop {
            tick.tick().await;
            if let Err(e) = assigner.assign_unassigned(playlist_id) {
                tracing::warn!("Playlist assignment failed: {}", e);
            }
        }
    });

    tracing::info!("Starting render server on {}", settings.base_url);
    let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
    axum::serve(listener, app).await?;
    Ok(())
}
