use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use image::{ImageFormat, RgbImage};
use mmotcw::config::AppConfig;
use mmotcw::routes;
use mmotcw::state::AppState;
use mmotcw::CalendarWeek;
use serde::Serialize;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestApp {
    pub state: AppState,
    router: Router,
    source: TempDir,
    _cache: TempDir,
}

impl TestApp {
    pub fn new() -> Result<Self> {
        let source = tempfile::tempdir().context("failed to create source dir")?;
        let cache = tempfile::tempdir().context("failed to create cache dir")?;

        let config = AppConfig {
            source_dir: source.path().to_path_buf(),
            cache_dir: cache.path().to_path_buf(),
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            warm_cache: false,
            warmup_years: 1,
            warmup_workers: Some(1),
        };

        let state = AppState::from_config(config)?;
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            source,
            _cache: cache,
        })
    }

    #[allow(dead_code)]
    pub fn source_path(&self) -> PathBuf {
        self.source.path().to_path_buf()
    }

    #[allow(dead_code)]
    pub fn write_users(&self, users: &[&str]) -> Result<()> {
        let mut content = users.join("\n");
        content.push('\n');
        fs::write(self.source.path().join("users.txt"), content).context("failed to write users")
    }

    /// Places an image straight into a week folder, bypassing the upload route.
    #[allow(dead_code)]
    pub fn write_image(&self, cw: CalendarWeek, file_name: &str, width: u32, height: u32) -> Result<()> {
        let dir = self.source.path().join(cw.path());
        fs::create_dir_all(&dir).context("failed to create week dir")?;
        let format = ImageFormat::from_path(file_name).context("unknown image extension")?;
        fs::write(dir.join(file_name), encode_image(width, height, format)?)
            .context("failed to write image")
    }

    #[allow(dead_code)]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        user: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        let request = with_user(builder, user).body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post(&self, path: &str, user: Option<&str>) -> Result<hyper::Response<Body>> {
        self.empty_request(Method::POST, path, user).await
    }

    pub async fn get(&self, path: &str, user: Option<&str>) -> Result<hyper::Response<Body>> {
        self.empty_request(Method::GET, path, user).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, user: Option<&str>) -> Result<hyper::Response<Body>> {
        self.empty_request(Method::DELETE, path, user).await
    }

    #[allow(dead_code)]
    pub async fn upload_image(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        user: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = "boundary-mmotcw-test";
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let builder = Request::builder()
            .method(Method::POST)
            .uri("/api/uploads")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            );
        let request = with_user(builder, user).body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn empty_request(
        &self,
        method: Method,
        path: &str,
        user: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(method).uri(path);
        let request = with_user(builder, user).body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

fn with_user(builder: axum::http::request::Builder, user: Option<&str>) -> axum::http::request::Builder {
    match user {
        Some(user) => {
            let credentials = STANDARD.encode(format!("{user}:secret"));
            builder.header("authorization", format!("Basic {credentials}"))
        }
        None => builder,
    }
}

pub fn encode_image(width: u32, height: u32, format: ImageFormat) -> Result<Vec<u8>> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    });
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, format)
        .map_err(|err| anyhow!("failed to encode test image: {err}"))?;
    Ok(bytes.into_inner())
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}
