use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::UploadError;

const META_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Gate description of one upload request link.
#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct RequestMeta {
    #[serde(default)]
    pub requires_password: bool,
    #[serde(default)]
    pub captcha_required: bool,
    #[serde(default)]
    pub captcha_enabled: bool,
    pub captcha_site_key: Option<String>,
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    pub max_file_size: Option<u64>,
    pub folder: Option<String>,
    pub expires_in: Option<i64>,
    pub error: Option<String>,
}

/// Body of every upload endpoint reply. All fields optional; any reply may
/// carry CAPTCHA state.
#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct UploadReply {
    pub upload_id: Option<String>,
    pub offset: Option<u64>,
    pub complete: Option<bool>,
    pub captcha_required: Option<bool>,
    pub captcha_enabled: Option<bool>,
    pub captcha_site_key: Option<String>,
    pub error: Option<String>,
}

/// An upload reply together with its HTTP status. Non-2xx statuses are data
/// here, not errors; classification is the protocol layer's job.
#[derive(Clone, Debug)]
pub struct ApiReply {
    pub status: u16,
    pub body: UploadReply,
}

#[derive(Clone, Debug)]
pub struct SingleUpload {
    pub hash: String,
    pub file: PathBuf,
    pub file_name: String,
    pub rel_path: Option<String>,
    pub password: Option<String>,
    pub captcha_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ChunkUpload {
    pub hash: String,
    pub rel_path: String,
    pub offset: u64,
    pub total: u64,
    /// Correlation id from the first acknowledged chunk; absent before it.
    pub upload_id: Option<String>,
    pub password: Option<String>,
    pub captcha_token: Option<String>,
    pub body: Vec<u8>,
}

/// The upload endpoints the client drives. Implementations return
/// `UploadError::Network` only for transport-level failures.
#[async_trait]
pub trait UploadApi: Send + Sync {
    async fn fetch_meta(
        &self,
        hash: &str,
        password: Option<&str>,
    ) -> Result<RequestMeta, UploadError>;

    async fn upload_single(&self, req: SingleUpload) -> Result<ApiReply, UploadError>;

    async fn upload_chunk(&self, req: ChunkUpload) -> Result<ApiReply, UploadError>;
}

/// reqwest-backed client for the request-upload endpoints.
pub struct HttpUploadApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUploadApi {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn request_url(&self, hash: &str, suffix: &str) -> String {
        format!("{}/api/droppr/requests/{hash}{suffix}", self.base_url)
    }

    /// Header values must be ASCII; user-provided strings are percent-encoded
    /// the way the original client did before placing them in headers.
    fn header_encode(value: &str) -> String {
        urlencoding::encode(value).into_owned()
    }

    async fn into_reply(response: reqwest::Response) -> ApiReply {
        let status = response.status().as_u16();
        let body = response.json::<UploadReply>().await.unwrap_or_default();
        ApiReply { status, body }
    }
}

#[async_trait]
impl UploadApi for HttpUploadApi {
    async fn fetch_meta(
        &self,
        hash: &str,
        password: Option<&str>,
    ) -> Result<RequestMeta, UploadError> {
        let mut request = self
            .client
            .get(self.request_url(hash, ""))
            .timeout(META_FETCH_TIMEOUT);
        if let Some(password) = password {
            request = request.header("X-Request-Password", Self::header_encode(password));
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.json::<UploadReply>().await.unwrap_or_default();
            return Err(crate::errors::classify_status(status, body.error.as_deref()));
        }
        Ok(response.json::<RequestMeta>().await?)
    }

    async fn upload_single(&self, req: SingleUpload) -> Result<ApiReply, UploadError> {
        let bytes = tokio::fs::read(&req.file).await?;
        let mut form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(req.file_name.clone()),
        );
        if let Some(rel_path) = &req.rel_path {
            form = form.text("relative_path", rel_path.clone());
        }

        let mut request = self
            .client
            .post(self.request_url(&req.hash, "/upload"))
            .multipart(form);
        if let Some(password) = &req.password {
            request = request.header("X-Request-Password", Self::header_encode(password));
        }
        if let Some(token) = &req.captcha_token {
            request = request.header("X-Captcha-Token", token.clone());
        }

        Ok(Self::into_reply(request.send().await?).await)
    }

    async fn upload_chunk(&self, req: ChunkUpload) -> Result<ApiReply, UploadError> {
        let end = req.offset + req.body.len() as u64;
        let mut request = self
            .client
            .post(self.request_url(&req.hash, "/upload-chunk"))
            .header(
                "Content-Range",
                format!("bytes {}-{}/{}", req.offset, end.saturating_sub(1), req.total),
            )
            .header("X-Upload-Offset", req.offset.to_string())
            .header("X-Upload-Length", req.total.to_string())
            .header("X-Upload-Path", Self::header_encode(&req.rel_path));
        if let Some(id) = &req.upload_id {
            request = request.header("X-Upload-Id", id.clone());
        }
        if let Some(password) = &req.password {
            request = request.header("X-Request-Password", Self::header_encode(password));
        }
        if let Some(token) = &req.captcha_token {
            request = request.header("X-Captcha-Token", token.clone());
        }

        Ok(Self::into_reply(request.body(req.body).send().await?).await)
    }
}
