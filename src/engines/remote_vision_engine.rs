// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::models::stage_result::Detection;
use crate::engines::traits::{DetectionEngine, EngineError, OcrEngine};

#[derive(Serialize)]
struct ImageBody {
    /// base64 编码的图片
    image: String,
}

#[derive(Deserialize)]
struct OcrResponse {
    text: String,
}

#[derive(Deserialize)]
struct DetectResponse {
    objects: Vec<Detection>,
}

/// 远程视觉引擎
///
/// 调用外部视觉服务：`POST {endpoint}/ocr` 返回 `{text}`，
/// `POST {endpoint}/detect` 返回 `{objects[]}`
pub struct RemoteVisionEngine {
    client: reqwest::Client,
    ocr_url: Url,
    detect_url: Url,
    api_key: Option<String>,
}

impl RemoteVisionEngine {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, EngineError> {
        let base = Url::parse(endpoint)
            .map_err(|e| EngineError::Misconfigured(format!("invalid vision endpoint {}: {}", endpoint, e)))?;
        let join = |path: &str| {
            join_path(&base, path)
                .map_err(|e| EngineError::Misconfigured(format!("invalid vision endpoint: {}", e)))
        };

        Ok(Self {
            client: reqwest::Client::new(),
            ocr_url: join("ocr")?,
            detect_url: join("detect")?,
            api_key,
        })
    }

    fn encode(image: &[u8]) -> Result<ImageBody, EngineError> {
        if image.is_empty() {
            return Err(EngineError::InvalidInput("empty image".to_string()));
        }
        Ok(ImageBody {
            image: BASE64.encode(image),
        })
    }
}

#[async_trait]
impl OcrEngine for RemoteVisionEngine {
    async fn recognize(&self, image: &[u8]) -> Result<String, EngineError> {
        let body = Self::encode(image)?;
        let response: OcrResponse =
            post_json(&self.client, &self.ocr_url, self.api_key.as_deref(), &body).await?;
        Ok(response.text)
    }

    fn name(&self) -> &'static str {
        "remote-ocr"
    }
}

#[async_trait]
impl DetectionEngine for RemoteVisionEngine {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, EngineError> {
        let body = Self::encode(image)?;
        let response: DetectResponse =
            post_json(&self.client, &self.detect_url, self.api_key.as_deref(), &body).await?;
        Ok(response.objects)
    }

    fn name(&self) -> &'static str {
        "remote-detection"
    }
}

/// 在基础地址后追加路径段，保留基础地址已有的路径前缀
pub(crate) fn join_path(base: &Url, segment: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(segment)
}

/// 发送 JSON 请求并解析 JSON 响应
///
/// 非 2xx 状态码返回 `HttpStatus`，响应格式不符返回 `Other`
pub(crate) async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &Url,
    api_key: Option<&str>,
    body: &B,
) -> Result<R, EngineError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let mut request = client.post(url.clone()).json(body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::HttpStatus(status.as_u16()));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::Other(format!("unexpected response from {}: {}", url, e)))
}
