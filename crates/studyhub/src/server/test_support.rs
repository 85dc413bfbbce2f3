//! Router-level test harness

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

use super::state::{AppState, StateParts};
use super::StudyHubServer;
use crate::analysis::{AnalysisError, AnalysisResult, DocumentAnalyzer, QuestionAnswer};
use crate::auth::StaticTokenVerifier;
use crate::config::{Environment, StorageConfig, StudyHubConfig};
use crate::storage::StudyDb;

pub const TOKEN: &str = "owner-token";
pub const OWNER: &str = "researcher-1";
pub const OTHER_TOKEN: &str = "other-token";
pub const OTHER: &str = "researcher-2";

/// Analyzer that holds every run until the test opens the gate
pub struct GatedAnalyzer {
    gate: watch::Receiver<bool>,
    failure: Option<String>,
}

#[async_trait]
impl DocumentAnalyzer for GatedAnalyzer {
    async fn analyze(&self, _path: &Path) -> Result<AnalysisResult, AnalysisError> {
        let mut gate = self.gate.clone();
        let _ = gate.wait_for(|open| *open).await;

        match &self.failure {
            Some(stderr) => Err(AnalysisError::NonZeroExit {
                status: "exit status: 2".into(),
                stderr: stderr.clone(),
            }),
            None => Ok(analyzed()),
        }
    }

    fn name(&self) -> &str {
        "gated"
    }
}

pub fn analyzed() -> AnalysisResult {
    AnalysisResult {
        title: "Analyzed Title".into(),
        abstract_text: "Analyzed Abstract".into(),
        brief_description: "Analyzed Brief".into(),
        genres: vec!["Energy".into(), "Materials".into()],
        questions: vec![
            QuestionAnswer {
                question: "Q1".into(),
                answer: "A1".into(),
            },
            QuestionAnswer {
                question: "Q2".into(),
                answer: "A2".into(),
            },
        ],
    }
}

#[derive(Clone)]
pub struct TestApp {
    pub state: AppState,
    router: Router,
    gate: Arc<watch::Sender<bool>>,
    dir: Arc<TempDir>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None, |_| {}).await
    }

    pub async fn failing(stderr: &str) -> Self {
        Self::build(Some(stderr.to_string()), |_| {}).await
    }

    pub async fn production() -> Self {
        Self::build(None, |config| {
            config.server.environment = Environment::Production;
        })
        .await
    }

    async fn build(failure: Option<String>, tweak: impl FnOnce(&mut StudyHubConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = StudyHubConfig::default();
        config.storage = StorageConfig::rooted_at(dir.path().to_path_buf());
        config.analysis.output_dir = dir.path().join("analysis");
        config.chat.program = "sh".into();
        config.chat.script_path = dir.path().join("chat.sh");
        tweak(&mut config);

        let (gate, rx) = watch::channel(false);
        let verifier = StaticTokenVerifier::default()
            .with_token(TOKEN, OWNER)
            .with_token(OTHER_TOKEN, OTHER);

        let state = AppState::from_parts(StateParts {
            config,
            analyzer: Arc::new(GatedAnalyzer { gate: rx, failure }),
            verifier: Arc::new(verifier),
            db: StudyDb::in_memory().unwrap(),
        })
        .await
        .unwrap();

        let router = StudyHubServer::with_state(state.clone()).build_router();
        Self {
            state,
            router,
            gate: Arc::new(gate),
            dir: Arc::new(dir),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Let analyzer runs finish
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let response = self
            .router
            .clone()
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    pub async fn get_text(&self, uri: &str, token: Option<&str>) -> (StatusCode, String) {
        let (status, body) = self.request(Method::GET, uri, token, None, Vec::new()).await;
        (status, String::from_utf8(body).unwrap())
    }

    pub async fn get_json(&self, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.request(Method::GET, uri, token, None, Vec::new()).await;
        (status, to_json(&body))
    }

    pub async fn delete_json(&self, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.request(Method::DELETE, uri, token, None, Vec::new()).await;
        (status, to_json(&body))
    }

    pub async fn post_json(
        &self,
        uri: &str,
        token: Option<&str>,
        payload: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let (status, body) = self
            .request(
                Method::POST,
                uri,
                token,
                Some("application/json"),
                serde_json::to_vec(&payload).unwrap(),
            )
            .await;
        (status, to_json(&body))
    }

    pub async fn post_multipart(
        &self,
        uri: &str,
        token: Option<&str>,
        form: MultipartBody,
    ) -> (StatusCode, serde_json::Value) {
        self.send_multipart(Method::POST, uri, token, form).await
    }

    pub async fn put_multipart(
        &self,
        uri: &str,
        token: Option<&str>,
        form: MultipartBody,
    ) -> (StatusCode, serde_json::Value) {
        self.send_multipart(Method::PUT, uri, token, form).await
    }

    async fn send_multipart(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        form: MultipartBody,
    ) -> (StatusCode, serde_json::Value) {
        let (content_type, body) = form.finish();
        let (status, body) = self
            .request(method, uri, token, Some(&content_type), body)
            .await;
        (status, to_json(&body))
    }

    /// Poll a job until it leaves `pending`
    pub async fn wait_terminal(&self, id: &str) -> serde_json::Value {
        let uri = format!("/studies/analysis-status/{}", id);
        for _ in 0..200 {
            let (status, view) = self.get_json(&uri, Some(TOKEN)).await;
            assert_eq!(status, StatusCode::OK);
            if view["status"] != "pending" {
                return view;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("analysis job {} never finished", id);
    }

    pub fn upload_count(&self) -> usize {
        count_files(self.state.files().uploads_dir())
    }

    pub fn document_count(&self) -> usize {
        count_files(self.state.files().documents_dir())
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).filter(|e| e.path().is_file()).count())
        .unwrap_or(0)
}

fn to_json(body: &[u8]) -> serde_json::Value {
    if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).to_string()))
    }
}

/// Hand-built multipart/form-data body
pub struct MultipartBody {
    boundary: String,
    buf: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: "----studyhub-test-boundary".to_string(),
            buf: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, data: &[u8]) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary, name, filename
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.buf
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.buf,
        )
    }
}
