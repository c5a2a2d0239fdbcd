use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::assets::CharacterAsset;
use crate::core::config::Config;
use crate::core::error::{Result, StoryError};
use crate::core::state::ContinuationPolicy;
use crate::services::prompts::{self, ArtStyle, AspectRatio};

/// Story text plus one image prompt per paragraph. Guaranteed non-empty and
/// of equal length by [`parse_story_payload`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoryGenerationResult {
    pub title: String,
    pub paragraphs: Vec<String>,
    pub image_prompts: Vec<String>,
}

/// Like [`StoryGenerationResult`] but for a continuation: no title.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryContinuation {
    pub paragraphs: Vec<String>,
    pub image_prompts: Vec<String>,
}

/// The five remote operations the pipelines and follow-up actions are built
/// from. Stateless: every required value is passed explicitly, and each call
/// is a single round trip.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    async fn generate_story(
        &self,
        characters: &[CharacterAsset],
        language: &str,
        style: ArtStyle,
        scene_count: usize,
        mode: ContinuationPolicy,
    ) -> Result<StoryGenerationResult>;

    async fn continue_story(
        &self,
        existing: &[String],
        characters: &[CharacterAsset],
        language: &str,
        style: ArtStyle,
        scene_count: usize,
        mode: ContinuationPolicy,
    ) -> Result<StoryContinuation>;

    async fn generate_image(
        &self,
        prompt: &str,
        characters: &[CharacterAsset],
        aspect: AspectRatio,
    ) -> Result<Vec<u8>>;

    async fn generate_video_prompt(
        &self,
        paragraph: &str,
        image: &[u8],
        characters: &[CharacterAsset],
        style: ArtStyle,
        language: &str,
    ) -> Result<String>;

    async fn edit_image(
        &self,
        image: &[u8],
        instruction: &str,
        characters: &[CharacterAsset],
    ) -> Result<Vec<u8>>;
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiClient {
    config: Config,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiRequestPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiTextPart>,
}

#[derive(Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Serialize, Default)]
struct GeminiRequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiBlob>,
}

#[derive(Serialize)]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiApiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<GeminiResponseBlob>,
}

#[derive(Deserialize)]
struct GeminiResponseBlob {
    data: String,
}

#[derive(Deserialize, Debug)]
struct GeminiApiError {
    message: String,
    #[serde(default)]
    code: Option<u16>,
}

fn text_part(text: String) -> GeminiRequestPart {
    GeminiRequestPart {
        text: Some(text),
        ..Default::default()
    }
}

fn image_part(mime_type: &str, data: &[u8]) -> GeminiRequestPart {
    GeminiRequestPart {
        inline_data: Some(GeminiBlob {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(data),
        }),
        ..Default::default()
    }
}

fn character_parts(characters: &[CharacterAsset]) -> impl Iterator<Item = GeminiRequestPart> + '_ {
    characters
        .iter()
        .map(|asset| image_part(&asset.mime_type, &asset.data))
}

fn first_text(response: &GeminiResponse) -> Option<String> {
    for candidate in response.candidates.as_deref().unwrap_or_default() {
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Some(text) = &part.text {
                    if !text.is_empty() {
                        return Some(text.clone());
                    }
                }
            }
        }
    }
    None
}

fn first_image(response: &GeminiResponse) -> Option<&str> {
    for candidate in response.candidates.as_deref().unwrap_or_default() {
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Some(blob) = &part.inline_data {
                    if !blob.data.is_empty() {
                        return Some(&blob.data);
                    }
                }
            }
        }
    }
    None
}

fn story_schema(with_title: bool) -> serde_json::Value {
    let mut properties = serde_json::json!({
        "paragraphs": { "type": "ARRAY", "items": { "type": "STRING" } },
        "imagePrompts": { "type": "ARRAY", "items": { "type": "STRING" } },
    });
    let mut required = vec!["paragraphs", "imagePrompts"];
    if with_title {
        properties["title"] = serde_json::json!({ "type": "STRING" });
        required.insert(0, "title");
    }
    serde_json::json!({
        "type": "OBJECT",
        "properties": properties,
        "required": required,
    })
}

fn string_list(value: Option<&serde_json::Value>) -> Result<Vec<String>> {
    let items = value
        .and_then(|v| v.as_array())
        .ok_or(StoryError::MalformedResponse)?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or(StoryError::MalformedResponse)
        })
        .collect()
}

/// Validates a raw structured story payload.
///
/// Both list fields must exist, be lists of strings, and be non-empty.
/// Mismatched lengths are recovered by truncating to the shorter list; that
/// keeps a usable story when the model miscounts one side.
pub(crate) fn parse_story_payload(raw: &str) -> Result<StoryGenerationResult> {
    let clean = prompts::strip_code_blocks(raw);
    let value: serde_json::Value = serde_json::from_str(&clean)
        .map_err(|e| StoryError::UnparsableResponse(format!("{}. Body: {}", e, clean)))?;
    let object = value.as_object().ok_or(StoryError::MalformedResponse)?;

    let mut paragraphs = string_list(object.get("paragraphs"))?;
    let mut image_prompts = string_list(object.get("imagePrompts"))?;

    if paragraphs.is_empty() && image_prompts.is_empty() {
        return Err(StoryError::EmptyGeneration);
    }
    if paragraphs.is_empty() || image_prompts.is_empty() {
        return Err(StoryError::MalformedResponse);
    }

    if paragraphs.len() != image_prompts.len() {
        let keep = paragraphs.len().min(image_prompts.len());
        warn!(
            "story response has {} paragraphs but {} image prompts, truncating to {}",
            paragraphs.len(),
            image_prompts.len(),
            keep
        );
        paragraphs.truncate(keep);
        image_prompts.truncate(keep);
    }

    let title = object
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(StoryGenerationResult {
        title,
        paragraphs,
        image_prompts,
    })
}

impl GeminiClient {
    pub fn new(config: Config) -> Self {
        info!(
            "initializing Gemini client (text: {}, image: {})",
            config.text_model, config.image_model
        );
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> Result<Url> {
        let raw = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );
        let mut url = Url::parse(&raw).map_err(|e| StoryError::InvalidBaseUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        Ok(url)
    }

    async fn generate_content(&self, model: &str, request: &GeminiRequest) -> Result<GeminiResponse> {
        let url = self.endpoint(model)?;
        let resp = self.client.post(url).json(request).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Keep the body text so parse failures stay debuggable.
        let body = resp.text().await?;
        let mut response: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| StoryError::UnparsableResponse(format!("{}. Body: {}", e, body)))?;

        if let Some(error) = response.error.take() {
            return Err(StoryError::Api {
                status: error.code.unwrap_or_else(|| status.as_u16()),
                message: error.message,
            });
        }

        Ok(response)
    }

    fn structured_request(
        prompt: String,
        characters: &[CharacterAsset],
        with_title: bool,
    ) -> GeminiRequest {
        let mut parts = vec![text_part(prompt)];
        parts.extend(character_parts(characters));
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiTextPart {
                    text: prompts::story_system_prompt(),
                }],
            }),
            generation_config: Some(GeminiGenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(story_schema(with_title)),
                response_modalities: None,
            }),
        }
    }

    fn image_request(parts: Vec<GeminiRequestPart>) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            system_instruction: None,
            generation_config: Some(GeminiGenerationConfig {
                response_mime_type: None,
                response_schema: None,
                response_modalities: Some(vec!["IMAGE".to_string(), "TEXT".to_string()]),
            }),
        }
    }

    fn decode_image(response: &GeminiResponse) -> Result<Vec<u8>> {
        let data = first_image(response).ok_or(StoryError::NoImageReturned)?;
        BASE64
            .decode(data)
            .map_err(|e| StoryError::UnparsableResponse(format!("invalid base64 image payload: {}", e)))
    }
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate_story(
        &self,
        characters: &[CharacterAsset],
        language: &str,
        style: ArtStyle,
        scene_count: usize,
        mode: ContinuationPolicy,
    ) -> Result<StoryGenerationResult> {
        let prompt = prompts::story_prompt(language, style, scene_count, mode);
        let request = Self::structured_request(prompt, characters, true);
        let response = self.generate_content(&self.config.text_model, &request).await?;
        let raw = first_text(&response).ok_or(StoryError::EmptyResponse)?;
        parse_story_payload(&raw)
    }

    async fn continue_story(
        &self,
        existing: &[String],
        characters: &[CharacterAsset],
        language: &str,
        style: ArtStyle,
        scene_count: usize,
        mode: ContinuationPolicy,
    ) -> Result<StoryContinuation> {
        let prompt = prompts::continuation_prompt(existing, language, style, scene_count, mode);
        let request = Self::structured_request(prompt, characters, false);
        let response = self.generate_content(&self.config.text_model, &request).await?;
        let raw = first_text(&response).ok_or(StoryError::EmptyResponse)?;
        let story = parse_story_payload(&raw)?;
        Ok(StoryContinuation {
            paragraphs: story.paragraphs,
            image_prompts: story.image_prompts,
        })
    }

    async fn generate_image(
        &self,
        prompt: &str,
        characters: &[CharacterAsset],
        aspect: AspectRatio,
    ) -> Result<Vec<u8>> {
        let mut parts = vec![text_part(prompts::image_prompt(prompt, aspect))];
        parts.extend(character_parts(characters));
        let request = Self::image_request(parts);
        let response = self.generate_content(&self.config.image_model, &request).await?;
        Self::decode_image(&response)
    }

    async fn generate_video_prompt(
        &self,
        paragraph: &str,
        image: &[u8],
        characters: &[CharacterAsset],
        style: ArtStyle,
        language: &str,
    ) -> Result<String> {
        let mut parts = vec![
            text_part(prompts::video_prompt(paragraph, style, language)),
            image_part("image/png", image),
        ];
        parts.extend(character_parts(characters));
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            system_instruction: None,
            generation_config: None,
        };
        let response = self.generate_content(&self.config.text_model, &request).await?;
        let text = first_text(&response).ok_or(StoryError::EmptyResponse)?;
        let trimmed = text.trim().to_string();
        if trimmed.is_empty() {
            return Err(StoryError::EmptyResponse);
        }
        Ok(trimmed)
    }

    async fn edit_image(
        &self,
        image: &[u8],
        instruction: &str,
        characters: &[CharacterAsset],
    ) -> Result<Vec<u8>> {
        let mut parts = vec![
            text_part(prompts::edit_prompt(instruction)),
            image_part("image/png", image),
        ];
        parts.extend(character_parts(characters));
        let request = Self::image_request(parts);
        let response = self.generate_content(&self.config.image_model, &request).await?;
        Self::decode_image(&response)
    }
}
