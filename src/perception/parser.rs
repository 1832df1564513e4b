//! HTTP client for the OmniParser-style UI parsing service.
//!
//! `POST <endpoint>/omni` with the base64 image as a bare JSON string body;
//! replies with `{"success": bool, "parsed_content": [...], "image_base64": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;

use crate::errors::{VisorError, VisorResult};
use crate::perception::traits::UiParser;
use crate::perception::types::{CropRegion, ElementKind, ParseOutput, UIElement};

#[derive(Debug, Deserialize)]
struct OmniResponse {
    success: bool,
    #[serde(default)]
    parsed_content: Vec<OmniItem>,
    image_base64: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OmniItem {
    #[serde(rename = "type")]
    kind: ElementKind,
    bbox: [f64; 4],
    #[serde(default)]
    interactivity: bool,
    content: Option<String>,
}

pub struct OmniParserClient {
    endpoint: String,
    client: reqwest::Client,
}

impl OmniParserClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> VisorResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl UiParser for OmniParserClient {
    async fn parse(&self, image_bytes: &[u8], crop_hint: Option<&CropRegion>) -> VisorResult<ParseOutput> {
        let b64 = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let url = format!("{}/omni", self.endpoint);
        tracing::debug!(url = %url, bytes = image_bytes.len(), crop = ?crop_hint, "sending image to parser");

        let response = self
            .client
            .post(&url)
            .json(&b64)
            .send()
            .await
            .map_err(|e| VisorError::ParseService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisorError::ParseService(format!("{status}: {body}")));
        }

        let body: OmniResponse = response
            .json()
            .await
            .map_err(|e| VisorError::ParseService(format!("malformed body: {e}")))?;
        if !body.success {
            return Err(VisorError::ParseService(
                body.error.unwrap_or_else(|| "parser reported failure".into()),
            ));
        }

        let labeled_image = match body.image_base64 {
            Some(b64) => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(b64.as_bytes())
                    .map_err(|e| VisorError::ParseService(format!("bad labeled image: {e}")))?,
            ),
            None => None,
        };

        let elements: Vec<UIElement> = body
            .parsed_content
            .into_iter()
            .enumerate()
            .map(|(index, item)| UIElement {
                index,
                kind: item.kind,
                content: item.content.unwrap_or_default(),
                interactive: item.interactivity,
                bbox: item.bbox,
            })
            .collect();

        tracing::info!(elements = elements.len(), labeled = labeled_image.is_some(), "UI parse complete");
        Ok(ParseOutput { elements, labeled_image })
    }
}
