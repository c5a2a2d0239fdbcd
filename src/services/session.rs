use futures_util::future::join_all;
use log::warn;
use std::sync::{Arc, Mutex};

use crate::core::assets::{self, CharacterAsset, ImageSource};
use crate::core::error::{Result, StoryError};
use crate::core::state::{ContinuationPolicy, SessionEvent, SessionState, VersionId};
use crate::services::llm::GenerativeClient;
use crate::services::pipeline::{
    self, GenerationOutcome, GenerationSettings, PipelineObserver, RetryPolicy,
};

/// Coarse per-version progress, forwarded from the pipelines. All methods
/// default to no-ops.
pub trait ProgressReporter: Send + Sync {
    fn stage(&self, _version: VersionId, _stage: u8, _detail: Option<&str>) {}
    fn image_progress(&self, _version: VersionId, _current: usize, _total: usize) {}
}

struct NullReporter;

impl ProgressReporter for NullReporter {}

// Everything a follow-up action needs besides the scene itself: the encoded
// character assets and the session display settings.
#[derive(Clone)]
struct StoryContext {
    characters: Arc<Vec<CharacterAsset>>,
    settings: GenerationSettings,
}

/// Owns the story versions of one user session and drives all remote work
/// against them. Versions generate concurrently and settle independently;
/// every state mutation funnels through the [`SessionState`] reducer under
/// one lock, so callbacks from parallel pipelines never interleave partial
/// writes.
#[derive(Clone)]
pub struct StorySession {
    client: Arc<dyn GenerativeClient>,
    retry: RetryPolicy,
    state: Arc<Mutex<SessionState>>,
    context: Arc<Mutex<Option<StoryContext>>>,
}

// Bridges pipeline callbacks for one version into session events.
struct VersionObserver {
    state: Arc<Mutex<SessionState>>,
    reporter: Arc<dyn ProgressReporter>,
    version: VersionId,
}

impl PipelineObserver for VersionObserver {
    fn stage(&self, stage: u8, detail: Option<&str>) {
        self.reporter.stage(self.version, stage, detail);
    }

    fn story_produced(&self, title: &str, paragraphs: &[String], image_prompts: &[String]) {
        self.state.lock().unwrap().apply(SessionEvent::StoryProduced {
            version_id: self.version,
            title: title.to_string(),
            paragraphs: paragraphs.to_vec(),
            image_prompts: image_prompts.to_vec(),
        });
    }

    fn continuation_produced(&self, paragraphs: &[String], image_prompts: &[String]) {
        self.state
            .lock()
            .unwrap()
            .apply(SessionEvent::ContinuationProduced {
                version_id: self.version,
                paragraphs: paragraphs.to_vec(),
                image_prompts: image_prompts.to_vec(),
            });
    }

    fn image_produced(&self, scene_index: usize, image: Option<&[u8]>) {
        let event = match image {
            Some(bytes) => SessionEvent::SceneImageReady {
                version_id: self.version,
                scene_index,
                bytes: bytes.to_vec(),
            },
            None => SessionEvent::SceneImageFailed {
                version_id: self.version,
                scene_index,
            },
        };
        self.state.lock().unwrap().apply(event);
    }

    fn image_progress(&self, current: usize, total: usize) {
        self.reporter.image_progress(self.version, current, total);
    }
}

impl StorySession {
    pub fn new(client: Arc<dyn GenerativeClient>) -> Self {
        Self::with_retry(client, RetryPolicy::default())
    }

    pub fn with_retry(client: Arc<dyn GenerativeClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            state: Arc::new(Mutex::new(SessionState::default())),
            context: Arc::new(Mutex::new(None)),
        }
    }

    /// A copy of the current session state, for display.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    pub fn active_version(&self) -> Option<VersionId> {
        self.state.lock().unwrap().active
    }

    pub fn set_active(&self, version_id: VersionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.version(version_id).is_none() {
            return Err(StoryError::UnknownVersion(version_id));
        }
        state.active = Some(version_id);
        Ok(())
    }

    fn apply(&self, event: SessionEvent) {
        self.state.lock().unwrap().apply(event);
    }

    fn require_context(&self) -> Result<StoryContext> {
        self.context
            .lock()
            .unwrap()
            .clone()
            .ok_or(StoryError::NothingGenerated)
    }

    fn settle(&self, version_id: VersionId, result: &Result<GenerationOutcome>) {
        match result {
            Ok(outcome) => {
                if outcome.failed > 0 {
                    warn!(
                        "story version {}: {}/{} illustrations failed",
                        version_id, outcome.failed, outcome.scenes
                    );
                }
                self.apply(SessionEvent::GenerationFinished { version_id });
            }
            Err(e) => {
                warn!("story version {} failed: {}", version_id, e);
                self.apply(SessionEvent::GenerationFailed {
                    version_id,
                    message: e.to_string(),
                });
            }
        }
    }

    /// Generates `version_count` independent story versions from the given
    /// character images. Placeholders for every version are visible through
    /// [`snapshot`](Self::snapshot) before any remote work starts; the call
    /// returns once every version has settled. A version failing never
    /// affects its siblings, so the call succeeds even if versions failed;
    /// their terminal state is in the session.
    pub async fn start_generation(
        &self,
        sources: &[ImageSource],
        settings: GenerationSettings,
        scene_count: usize,
        mode: ContinuationPolicy,
        version_count: usize,
        reporter: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<Vec<VersionId>> {
        if sources.is_empty() || sources.len() > 2 {
            return Err(StoryError::InvalidCharacterCount(sources.len()));
        }
        if !(2..=100).contains(&scene_count) {
            return Err(StoryError::InvalidSceneCount(scene_count));
        }
        let version_count = version_count.max(1);

        // Encode once per session; every pipeline and follow-up call shares
        // these by value.
        let mut characters = Vec::with_capacity(sources.len());
        for source in sources {
            characters.push(assets::encode(source).await?);
        }
        let characters = Arc::new(characters);
        *self.context.lock().unwrap() = Some(StoryContext {
            characters: characters.clone(),
            settings: settings.clone(),
        });

        let ids: Vec<VersionId> = {
            let mut state = self.state.lock().unwrap();
            (0..version_count)
                .map(|_| state.push_placeholder(mode))
                .collect()
        };

        let reporter: Arc<dyn ProgressReporter> =
            reporter.unwrap_or_else(|| Arc::new(NullReporter));

        let runs = ids.iter().map(|&version_id| {
            let observer = VersionObserver {
                state: self.state.clone(),
                reporter: reporter.clone(),
                version: version_id,
            };
            let characters = characters.clone();
            let settings = settings.clone();
            async move {
                let result = pipeline::run_generation(
                    self.client.as_ref(),
                    &characters,
                    &settings,
                    scene_count,
                    mode,
                    &self.retry,
                    &observer,
                )
                .await;
                self.settle(version_id, &result);
            }
        });
        join_all(runs).await;

        Ok(ids)
    }

    /// Appends scenes to an existing version. Rejected while that version is
    /// still generating.
    pub async fn continue_story(
        &self,
        version_id: VersionId,
        scene_count: usize,
        mode: ContinuationPolicy,
        reporter: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<GenerationOutcome> {
        if !(1..=100).contains(&scene_count) {
            return Err(StoryError::InvalidSceneCount(scene_count));
        }
        let context = self.require_context()?;

        let existing: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            let version = state
                .version(version_id)
                .ok_or(StoryError::UnknownVersion(version_id))?;
            if version.loading {
                return Err(StoryError::VersionBusy);
            }
            let existing = version
                .scenes
                .iter()
                .map(|scene| scene.paragraph.clone())
                .collect();
            state.apply(SessionEvent::ContinuationStarted {
                version_id,
                policy: mode,
            });
            existing
        };

        let reporter: Arc<dyn ProgressReporter> =
            reporter.unwrap_or_else(|| Arc::new(NullReporter));
        let observer = VersionObserver {
            state: self.state.clone(),
            reporter,
            version: version_id,
        };

        let result = pipeline::run_continuation(
            self.client.as_ref(),
            &existing,
            &context.characters,
            &context.settings,
            scene_count,
            mode,
            &self.retry,
            &observer,
        )
        .await;
        self.settle(version_id, &result);
        result
    }

    // Looks up a scene for a follow-up action and enforces the guards shared
    // by all of them: version known and settled, scene in range, no other
    // action in flight for that scene. Applies `started` only when every
    // guard passed.
    fn guard_scene<T>(
        &self,
        version_id: VersionId,
        scene_index: usize,
        pick: impl FnOnce(&crate::core::state::Scene) -> Result<T>,
        started: SessionEvent,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        let version = state
            .version(version_id)
            .ok_or(StoryError::UnknownVersion(version_id))?;
        if version.loading {
            return Err(StoryError::VersionBusy);
        }
        let scene = version
            .scenes
            .get(scene_index)
            .ok_or(StoryError::SceneOutOfRange(scene_index))?;
        if scene.is_busy() {
            return Err(StoryError::SceneBusy(scene_index));
        }
        let picked = pick(scene)?;
        state.apply(started);
        Ok(picked)
    }

    /// Re-runs a scene's illustration with its existing prompt. Single
    /// attempt, no automatic retry.
    pub async fn regenerate_image(&self, version_id: VersionId, scene_index: usize) -> Result<()> {
        let context = self.require_context()?;
        let prompt = self.guard_scene(
            version_id,
            scene_index,
            |scene| Ok(scene.image_prompt.clone()),
            SessionEvent::RegenerateStarted {
                version_id,
                scene_index,
            },
        )?;

        match self
            .client
            .generate_image(&prompt, &context.characters, context.settings.aspect_ratio)
            .await
        {
            Ok(bytes) => {
                self.apply(SessionEvent::SceneImageReady {
                    version_id,
                    scene_index,
                    bytes,
                });
                Ok(())
            }
            Err(e) => {
                self.apply(SessionEvent::SceneImageFailed {
                    version_id,
                    scene_index,
                });
                Err(e)
            }
        }
    }

    /// Applies a user instruction to a scene's ready illustration. On failure
    /// the current illustration is left untouched.
    pub async fn edit_image(
        &self,
        version_id: VersionId,
        scene_index: usize,
        instruction: &str,
    ) -> Result<()> {
        let context = self.require_context()?;
        let base = self.guard_scene(
            version_id,
            scene_index,
            |scene| {
                scene
                    .ready_image()
                    .map(|bytes| bytes.to_vec())
                    .ok_or(StoryError::ImageNotReady(scene_index))
            },
            SessionEvent::EditStarted {
                version_id,
                scene_index,
            },
        )?;

        match self
            .client
            .edit_image(&base, instruction, &context.characters)
            .await
        {
            Ok(bytes) => {
                self.apply(SessionEvent::EditApplied {
                    version_id,
                    scene_index,
                    bytes,
                });
                Ok(())
            }
            Err(e) => {
                self.apply(SessionEvent::EditFailed {
                    version_id,
                    scene_index,
                });
                Err(e)
            }
        }
    }

    /// Produces a short motion description for a scene's ready illustration.
    pub async fn generate_video_prompt(
        &self,
        version_id: VersionId,
        scene_index: usize,
    ) -> Result<()> {
        let context = self.require_context()?;
        let (paragraph, image) = self.guard_scene(
            version_id,
            scene_index,
            |scene| {
                let image = scene
                    .ready_image()
                    .map(|bytes| bytes.to_vec())
                    .ok_or(StoryError::ImageNotReady(scene_index))?;
                Ok((scene.paragraph.clone(), image))
            },
            SessionEvent::VideoPromptStarted {
                version_id,
                scene_index,
            },
        )?;

        match self
            .client
            .generate_video_prompt(
                &paragraph,
                &image,
                &context.characters,
                context.settings.art_style,
                &context.settings.language,
            )
            .await
        {
            Ok(prompt) => {
                self.apply(SessionEvent::VideoPromptProduced {
                    version_id,
                    scene_index,
                    prompt,
                });
                Ok(())
            }
            Err(e) => {
                self.apply(SessionEvent::VideoPromptFailed {
                    version_id,
                    scene_index,
                });
                Err(e)
            }
        }
    }
}
