use log::warn;
use std::time::Duration;
use tokio::time::sleep;

use crate::core::assets::CharacterAsset;
use crate::core::error::{Result, StoryError};
use crate::core::state::ContinuationPolicy;
use crate::services::llm::GenerativeClient;
use crate::services::prompts::{ArtStyle, AspectRatio};

/// Bounded retry for per-scene illustration calls: at most `max_attempts`
/// tries with a fixed pause in between. Follow-up regenerates bypass this and
/// make a single attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Display settings shared by every version generated in a session.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub language: String,
    pub art_style: ArtStyle,
    pub aspect_ratio: AspectRatio,
}

/// Callbacks a pipeline run reports through. All methods default to no-ops so
/// observers implement only what they consume. Stages run 1..=4: story call,
/// story ready, illustrating, done.
pub trait PipelineObserver: Send + Sync {
    fn stage(&self, _stage: u8, _detail: Option<&str>) {}
    fn story_produced(&self, _title: &str, _paragraphs: &[String], _image_prompts: &[String]) {}
    fn continuation_produced(&self, _paragraphs: &[String], _image_prompts: &[String]) {}
    fn image_produced(&self, _scene_index: usize, _image: Option<&[u8]>) {}
    fn image_progress(&self, _current: usize, _total: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub scenes: usize,
    pub failed: usize,
}

async fn attempt_image(
    client: &dyn GenerativeClient,
    prompt: &str,
    characters: &[CharacterAsset],
    aspect: AspectRatio,
    retry: &RetryPolicy,
) -> Option<Vec<u8>> {
    for attempt in 1..=retry.max_attempts {
        match client.generate_image(prompt, characters, aspect).await {
            Ok(bytes) => return Some(bytes),
            Err(e) => {
                warn!(
                    "illustration attempt {}/{} failed: {}",
                    attempt, retry.max_attempts, e
                );
                if attempt < retry.max_attempts {
                    sleep(retry.backoff).await;
                }
            }
        }
    }
    None
}

/// Generates one illustration per prompt, strictly in order: a scene's
/// request is not issued until the previous scene's attempt (including its
/// retry) has resolved. Failures are reported per scene and counted, never
/// propagated.
async fn illustrate(
    client: &dyn GenerativeClient,
    characters: &[CharacterAsset],
    aspect: AspectRatio,
    prompts: &[String],
    index_offset: usize,
    retry: &RetryPolicy,
    observer: &dyn PipelineObserver,
) -> usize {
    let total = prompts.len();
    let mut failed = 0;

    for (i, prompt) in prompts.iter().enumerate() {
        match attempt_image(client, prompt, characters, aspect, retry).await {
            Some(bytes) => observer.image_produced(index_offset + i, Some(&bytes)),
            None => {
                failed += 1;
                observer.image_produced(index_offset + i, None);
            }
        }
        observer.image_progress(i + 1, total);
    }

    failed
}

/// The new-story pipeline: story + prompts, then one illustration per scene.
/// Partial illustration failures complete normally; only a story-stage error
/// or every scene failing ends the run with an error.
pub async fn run_generation(
    client: &dyn GenerativeClient,
    characters: &[CharacterAsset],
    settings: &GenerationSettings,
    scene_count: usize,
    mode: ContinuationPolicy,
    retry: &RetryPolicy,
    observer: &dyn PipelineObserver,
) -> Result<GenerationOutcome> {
    observer.stage(1, Some("writing story"));
    let story = client
        .generate_story(characters, &settings.language, settings.art_style, scene_count, mode)
        .await?;
    observer.story_produced(&story.title, &story.paragraphs, &story.image_prompts);
    observer.stage(2, Some("story ready"));

    observer.stage(3, Some("illustrating"));
    let failed = illustrate(
        client,
        characters,
        settings.aspect_ratio,
        &story.image_prompts,
        0,
        retry,
        observer,
    )
    .await;

    let scenes = story.image_prompts.len();
    if scenes > 0 && failed == scenes {
        return Err(StoryError::AllImagesFailed { total: scenes });
    }

    observer.stage(4, Some("done"));
    Ok(GenerationOutcome { scenes, failed })
}

/// The continue-story pipeline. Same shape as [`run_generation`], but the
/// remote call receives the full paragraph history, scenes are appended, and
/// observer indices start after the existing scenes. The all-failed check
/// covers the newly added scenes only.
pub async fn run_continuation(
    client: &dyn GenerativeClient,
    existing: &[String],
    characters: &[CharacterAsset],
    settings: &GenerationSettings,
    scene_count: usize,
    mode: ContinuationPolicy,
    retry: &RetryPolicy,
    observer: &dyn PipelineObserver,
) -> Result<GenerationOutcome> {
    observer.stage(1, Some("continuing story"));
    let continuation = client
        .continue_story(
            existing,
            characters,
            &settings.language,
            settings.art_style,
            scene_count,
            mode,
        )
        .await?;
    observer.continuation_produced(&continuation.paragraphs, &continuation.image_prompts);
    observer.stage(2, Some("story ready"));

    observer.stage(3, Some("illustrating"));
    let failed = illustrate(
        client,
        characters,
        settings.aspect_ratio,
        &continuation.image_prompts,
        existing.len(),
        retry,
        observer,
    )
    .await;

    let scenes = continuation.image_prompts.len();
    if scenes > 0 && failed == scenes {
        return Err(StoryError::AllImagesFailed { total: scenes });
    }

    observer.stage(4, Some("done"));
    Ok(GenerationOutcome { scenes, failed })
}
