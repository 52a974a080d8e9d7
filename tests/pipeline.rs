//! End-to-end request scenarios against the in-memory store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use fruitstand::color::{self, Converted};
use fruitstand::model::{DeviceStatus, DisplayClass, ImageFormat, SecretStatus};
use fruitstand::render::FetchedPage;
use fruitstand::screen::{APPROVAL_CODE_SCREEN, ERROR_SCREEN};
use fruitstand::store::{DeviceStore, PlaylistStore};
use fruitstand::{
    DenialKind, DeviceRequest, Error, MemoryStore, Orchestrator, PageFetcher, Renderer,
    ScreenRegistry, ScreenType, Settings, DEFAULT_REFRESH_INTERVAL,
};

/// Returns a mid-gray bitmap and remembers every URL it was asked for.
#[derive(Default)]
struct RecordingRenderer {
    urls: Mutex<Vec<String>>,
    fail_content: bool,
}

impl RecordingRenderer {
    fn failing_content() -> Self {
        Self {
            fail_content: true,
            ..Default::default()
        }
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    fn last_url(&self) -> String {
        self.urls().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn render(&self, url: &str, width: u32, height: u32) -> Result<Vec<u8>, Error> {
        self.urls.lock().unwrap().push(url.to_string());
        if self.fail_content && !url.contains("/screens/render/fruitstand/") {
            return Err(Error::Render("browser crashed".to_string()));
        }
        let image = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
        color::encode(Converted::Rgb { image, bits: 24 }, ImageFormat::Png)
    }
}

struct EchoFetcher;

#[async_trait]
impl PageFetcher for EchoFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, Error> {
        Ok(FetchedPage {
            body: format!("<html>{}</html>", url).into_bytes(),
            content_type: "text/html; charset=utf-8".to_string(),
        })
    }
}

fn registry() -> ScreenRegistry {
    let mut registry = ScreenRegistry::with_system_screens();
    registry
        .register(ScreenType::new("weather", "Weather").with_endpoint("/content/weather"))
        .register(ScreenType::new("quote", "Quote").with_endpoint("/content/quote"));
    registry
}

fn pipeline(
    store: Arc<MemoryStore>,
    settings: Settings,
    renderer: Arc<RecordingRenderer>,
) -> Orchestrator {
    Orchestrator::new(store, registry(), settings, renderer, Arc::new(EchoFetcher))
}

fn approval_settings() -> Settings {
    Settings {
        base_url: "http://fruitstand.test".to_string(),
        enable_display_approval: true,
        ..Settings::default()
    }
}

/// Create an active display and assign it a playlist of the given screens.
async fn display_with_playlist(
    store: &MemoryStore,
    key: &str,
    screens: &[(&str, Option<u32>)],
) -> Vec<i64> {
    let playlist = store.add_playlist("P", 1200).unwrap();
    let ids = screens
        .iter()
        .enumerate()
        .map(|(order, (screen, refresh))| {
            store
                .add_entry(playlist.id, *screen, order as i32, *refresh)
                .unwrap()
                .id
        })
        .collect();
    let settings = Settings::default();
    fruitstand::device::sync_device(store, &settings, &DeviceRequest::new(key))
        .await
        .unwrap();
    store
        .edit_device(key, |d| d.playlist_id = Some(playlist.id))
        .unwrap();
    ids
}

#[tokio::test]
async fn new_display_waits_for_approval() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = pipeline(store.clone(), approval_settings(), renderer.clone());

    let request = DeviceRequest::from_query_string("k=dev-1&w=400&h=300");
    let response = orch.handle(&request).await.unwrap();

    let device = store.find_device_by_key("dev-1").await.unwrap().unwrap();
    assert_eq!(device.status, DeviceStatus::Pending);
    let code = device.approval_code.clone().unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    assert_eq!(response.refresh_interval, DEFAULT_REFRESH_INTERVAL);
    assert_eq!(response.refresh_interval, 600);
    assert_eq!(response.content_type, "image/png");

    let url = renderer.last_url();
    assert!(url.starts_with(&format!(
        "http://fruitstand.test/screens/render/{}?",
        APPROVAL_CODE_SCREEN
    )));
    assert!(url.contains(&format!("code={}", code)));
    assert!(url.contains(&format!("display={}", device.id)));

    let image = color::decode(&response.body).unwrap();
    assert_eq!(image.dimensions(), (400, 300));
}

#[tokio::test]
async fn approved_display_rotates_through_playlist() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = pipeline(store.clone(), Settings::default(), renderer.clone());
    let ids = display_with_playlist(&store, "dev-2", &[("weather", None), ("quote", Some(60))]).await;

    let request = DeviceRequest::new("dev-2");
    let first = orch.handle(&request).await.unwrap();
    assert!(renderer.last_url().contains("/content/weather?"));
    assert_eq!(first.refresh_interval, 1200);
    let device = store.find_device_by_key("dev-2").await.unwrap().unwrap();
    assert_eq!(device.cursor, Some(ids[0]));

    let second = orch.handle(&request).await.unwrap();
    assert!(renderer.last_url().contains("/content/quote?"));
    assert_eq!(second.refresh_interval, 60);
    let device = store.find_device_by_key("dev-2").await.unwrap().unwrap();
    assert_eq!(device.cursor, Some(ids[1]));

    orch.handle(&request).await.unwrap();
    assert!(renderer.last_url().contains("/content/weather?"));
    assert!(renderer
        .last_url()
        .contains(&format!("entry={}", ids[0])));
}

#[tokio::test]
async fn approving_a_display_unlocks_content() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = pipeline(store.clone(), approval_settings(), renderer.clone());
    let request = DeviceRequest::new("lobby");

    orch.handle(&request).await.unwrap();
    assert!(renderer.last_url().contains(APPROVAL_CODE_SCREEN));

    let playlist = store.add_playlist("P", 900).unwrap();
    store.add_entry(playlist.id, "quote", 0, None).unwrap();
    store
        .edit_device("lobby", |d| d.playlist_id = Some(playlist.id))
        .unwrap();
    let approved = store.approve_device("lobby").unwrap().unwrap();
    assert_eq!(approved.approval_code, None);

    let response = orch.handle(&request).await.unwrap();
    assert!(renderer.last_url().contains("/content/quote?"));
    assert_eq!(response.refresh_interval, 900);
}

#[tokio::test]
async fn auth_takes_precedence_over_approval() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let settings = Settings {
        enable_display_auth: true,
        ..approval_settings()
    };
    let orch = pipeline(store.clone(), settings, renderer.clone());

    orch.handle(&DeviceRequest::new("dev-3")).await.unwrap();
    let url = renderer.last_url();
    assert!(url.contains(ERROR_SCREEN));
    assert!(url.contains("error_title=Unauthenticated"));

    let device = store.find_device_by_key("dev-3").await.unwrap().unwrap();
    assert_eq!(device.status, DeviceStatus::Pending);

    // With a valid secret the device moves on to the approval check
    store.add_secret("lobby", "s3cret", SecretStatus::Active).unwrap();
    orch.handle(&DeviceRequest::new("dev-3").with_secret("s3cret"))
        .await
        .unwrap();
    assert!(renderer.last_url().contains(APPROVAL_CODE_SCREEN));
}

#[tokio::test]
async fn browser_display_receives_page() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = pipeline(store.clone(), Settings::default(), renderer.clone());
    display_with_playlist(&store, "kiosk", &[("weather", None)]).await;

    let request = DeviceRequest::new("kiosk")
        .with_display_class(DisplayClass::Browser)
        .with_geometry(1920, 1080);
    let response = orch.handle(&request).await.unwrap();

    assert_eq!(response.content_type, "text/html; charset=utf-8");
    let body = String::from_utf8(response.body).unwrap();
    assert!(body.contains("/content/weather?"));
    assert!(renderer.urls().is_empty());
}

#[tokio::test]
async fn renderer_failure_falls_back_to_error_screen() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::failing_content());
    let orch = pipeline(store.clone(), Settings::default(), renderer.clone());
    display_with_playlist(&store, "dev-4", &[("weather", Some(30))]).await;

    let response = orch.handle(&DeviceRequest::new("dev-4")).await.unwrap();

    let urls = renderer.urls();
    assert_eq!(urls.len(), 2);
    assert!(urls[0].contains("/content/weather?"));
    assert!(urls[1].contains(ERROR_SCREEN));
    assert!(urls[1].contains("error_title=Internal+Error"));
    assert_eq!(response.refresh_interval, DEFAULT_REFRESH_INTERVAL);
    assert_eq!(response.content_type, "image/png");
}

#[tokio::test]
async fn unregistered_screen_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = pipeline(store.clone(), Settings::default(), renderer.clone());
    display_with_playlist(&store, "dev-5", &[("retired", None)]).await;

    orch.handle(&DeviceRequest::new("dev-5")).await.unwrap();
    let url = renderer.last_url();
    assert!(url.contains(ERROR_SCREEN));
    assert!(url.contains("error_title=Screen+Not+Found"));
}

#[tokio::test]
async fn stale_cursor_restarts_rotation() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = pipeline(store.clone(), Settings::default(), renderer.clone());
    let ids =
        display_with_playlist(&store, "dev-6", &[("weather", None), ("quote", None)]).await;
    let request = DeviceRequest::new("dev-6");

    orch.handle(&request).await.unwrap();
    orch.handle(&request).await.unwrap();
    store.remove_entry(ids[1]).unwrap();

    orch.handle(&request).await.unwrap();
    let device = store.find_device_by_key("dev-6").await.unwrap().unwrap();
    assert_eq!(device.cursor, Some(ids[0]));
    let remaining = store
        .list_entries(device.playlist_id.unwrap())
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn mono_output_has_no_gray() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = pipeline(store.clone(), Settings::default(), renderer);
    display_with_playlist(&store, "dev-7", &[("weather", None)]).await;

    let request = DeviceRequest::new("dev-7")
        .with_color_spec("1b")
        .with_geometry(32, 16);
    let response = orch.handle(&request).await.unwrap();

    let image = color::decode(&response.body).unwrap();
    assert!(image
        .pixels()
        .all(|p| p.0 == [0, 0, 0] || p.0 == [255, 255, 255]));
}

#[tokio::test]
async fn unknown_display_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(RecordingRenderer::default());
    let orch = pipeline(store, Settings::default(), renderer.clone());

    let denial = orch
        .handle(&DeviceRequest::default().with_display_id(404))
        .await
        .unwrap_err();
    assert_eq!(denial.kind, DenialKind::DeviceNotFound);
    assert!(renderer.urls().is_empty());
}
