use log::warn;
use uuid::Uuid;

/// Opaque identifier for one story version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionId(Uuid);

impl VersionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a generation run should close the story or leave it open for
/// further scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContinuationPolicy {
    #[default]
    Conclude,
    Extend,
}

impl ContinuationPolicy {
    pub fn from_key(key: &str) -> Self {
        match key {
            "conclude" => Self::Conclude,
            "extend" => Self::Extend,
            other => {
                warn!("unknown continuation policy '{}', defaulting to conclude", other);
                Self::Conclude
            }
        }
    }
}

/// Lifecycle of one scene's illustration. Transitions to `Ready` or `Failed`
/// exactly once per generation attempt; a regenerate drives it back through
/// `Pending`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SceneImage {
    #[default]
    Pending,
    Ready(Vec<u8>),
    Failed,
}

/// One narrative beat: a paragraph, its illustration, and the optional
/// follow-up assets the user can request for it.
#[derive(Debug, Clone)]
pub struct Scene {
    pub paragraph: String,
    pub image_prompt: String,
    pub image: SceneImage,
    pub video_prompt: Option<String>,
    pub video_prompt_loading: bool,
    pub edit_loading: bool,
    pub regenerating: bool,
}

impl Scene {
    pub fn new(paragraph: String, image_prompt: String) -> Self {
        Self {
            paragraph,
            image_prompt,
            image: SceneImage::Pending,
            video_prompt: None,
            video_prompt_loading: false,
            edit_loading: false,
            regenerating: false,
        }
    }

    /// A follow-up action may only start when no other action is in flight
    /// for this scene.
    pub fn is_busy(&self) -> bool {
        self.regenerating || self.edit_loading || self.video_prompt_loading
    }

    pub fn ready_image(&self) -> Option<&[u8]> {
        match &self.image {
            SceneImage::Ready(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// One user-visible story instance. Created as an empty, loading placeholder
/// the moment generation is requested; never deleted for the life of the
/// session. `error` is the terminal failed display state.
#[derive(Debug, Clone)]
pub struct StoryVersion {
    pub id: VersionId,
    pub title: String,
    pub scenes: Vec<Scene>,
    pub policy: ContinuationPolicy,
    pub loading: bool,
    pub error: Option<String>,
}

impl StoryVersion {
    fn placeholder(policy: ContinuationPolicy) -> Self {
        Self {
            id: VersionId::new(),
            title: String::new(),
            scenes: Vec::new(),
            policy,
            loading: true,
            error: None,
        }
    }

    /// Scenes with a finished illustration, in order. This is the input
    /// contract of the export collaborator.
    pub fn ready_images(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.scenes
            .iter()
            .enumerate()
            .filter_map(|(index, scene)| scene.ready_image().map(|bytes| (index, bytes)))
    }

    pub fn video_prompts(&self) -> impl Iterator<Item = (usize, &str)> {
        self.scenes
            .iter()
            .enumerate()
            .filter_map(|(index, scene)| scene.video_prompt.as_deref().map(|p| (index, p)))
    }
}

/// State transitions, one event per remote-call outcome or user action.
/// Callbacks from concurrently running pipelines all funnel through
/// [`SessionState::apply`] under the session lock.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StoryProduced {
        version_id: VersionId,
        title: String,
        paragraphs: Vec<String>,
        image_prompts: Vec<String>,
    },
    ContinuationProduced {
        version_id: VersionId,
        paragraphs: Vec<String>,
        image_prompts: Vec<String>,
    },
    SceneImageReady {
        version_id: VersionId,
        scene_index: usize,
        bytes: Vec<u8>,
    },
    SceneImageFailed {
        version_id: VersionId,
        scene_index: usize,
    },
    GenerationFinished {
        version_id: VersionId,
    },
    GenerationFailed {
        version_id: VersionId,
        message: String,
    },
    ContinuationStarted {
        version_id: VersionId,
        policy: ContinuationPolicy,
    },
    RegenerateStarted {
        version_id: VersionId,
        scene_index: usize,
    },
    EditStarted {
        version_id: VersionId,
        scene_index: usize,
    },
    EditApplied {
        version_id: VersionId,
        scene_index: usize,
        bytes: Vec<u8>,
    },
    EditFailed {
        version_id: VersionId,
        scene_index: usize,
    },
    VideoPromptStarted {
        version_id: VersionId,
        scene_index: usize,
    },
    VideoPromptProduced {
        version_id: VersionId,
        scene_index: usize,
        prompt: String,
    },
    VideoPromptFailed {
        version_id: VersionId,
        scene_index: usize,
    },
}

/// The ordered collection of story versions plus the pointer to the one the
/// host is currently displaying.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub versions: Vec<StoryVersion>,
    pub active: Option<VersionId>,
}

impl SessionState {
    /// Creates the empty, loading placeholder for a new story version and
    /// makes it the active one.
    pub fn push_placeholder(&mut self, policy: ContinuationPolicy) -> VersionId {
        let version = StoryVersion::placeholder(policy);
        let id = version.id;
        self.versions.push(version);
        self.active = Some(id);
        id
    }

    pub fn version(&self, id: VersionId) -> Option<&StoryVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    fn version_mut(&mut self, id: VersionId) -> Option<&mut StoryVersion> {
        let version = self.versions.iter_mut().find(|v| v.id == id);
        if version.is_none() {
            warn!("dropping event for unknown story version {}", id);
        }
        version
    }

    fn scene_mut(&mut self, id: VersionId, index: usize) -> Option<&mut Scene> {
        let version = self.version_mut(id)?;
        let scene = version.scenes.get_mut(index);
        if scene.is_none() {
            warn!("dropping event for missing scene {} of version {}", index, id);
        }
        scene
    }

    /// The single state-transition function. Events addressing versions or
    /// scenes that no longer exist are logged and dropped; a stale callback
    /// must never corrupt or panic the session.
    pub fn apply(&mut self, event: SessionEvent) {
        use SessionEvent::*;

        match event {
            StoryProduced {
                version_id,
                title,
                paragraphs,
                image_prompts,
            } => {
                if let Some(version) = self.version_mut(version_id) {
                    version.title = title;
                    version.scenes = paragraphs
                        .into_iter()
                        .zip(image_prompts)
                        .map(|(paragraph, prompt)| Scene::new(paragraph, prompt))
                        .collect();
                }
            }
            ContinuationProduced {
                version_id,
                paragraphs,
                image_prompts,
            } => {
                if let Some(version) = self.version_mut(version_id) {
                    version.scenes.extend(
                        paragraphs
                            .into_iter()
                            .zip(image_prompts)
                            .map(|(paragraph, prompt)| Scene::new(paragraph, prompt)),
                    );
                }
            }
            SceneImageReady {
                version_id,
                scene_index,
                bytes,
            } => {
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.image = SceneImage::Ready(bytes);
                    scene.regenerating = false;
                }
            }
            SceneImageFailed {
                version_id,
                scene_index,
            } => {
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.image = SceneImage::Failed;
                    scene.regenerating = false;
                }
            }
            GenerationFinished { version_id } => {
                if let Some(version) = self.version_mut(version_id) {
                    version.loading = false;
                }
            }
            GenerationFailed {
                version_id,
                message,
            } => {
                if let Some(version) = self.version_mut(version_id) {
                    version.loading = false;
                    version.error = Some(message);
                }
            }
            ContinuationStarted { version_id, policy } => {
                if let Some(version) = self.version_mut(version_id) {
                    version.loading = true;
                    version.policy = policy;
                    version.error = None;
                }
            }
            RegenerateStarted {
                version_id,
                scene_index,
            } => {
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.regenerating = true;
                    scene.image = SceneImage::Pending;
                }
            }
            EditStarted {
                version_id,
                scene_index,
            } => {
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.edit_loading = true;
                }
            }
            EditApplied {
                version_id,
                scene_index,
                bytes,
            } => {
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.image = SceneImage::Ready(bytes);
                    scene.edit_loading = false;
                }
            }
            EditFailed {
                version_id,
                scene_index,
            } => {
                // The existing image stays untouched.
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.edit_loading = false;
                }
            }
            VideoPromptStarted {
                version_id,
                scene_index,
            } => {
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.video_prompt_loading = true;
                }
            }
            VideoPromptProduced {
                version_id,
                scene_index,
                prompt,
            } => {
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.video_prompt = Some(prompt);
                    scene.video_prompt_loading = false;
                }
            }
            VideoPromptFailed {
                version_id,
                scene_index,
            } => {
                if let Some(scene) = self.scene_mut(version_id, scene_index) {
                    scene.video_prompt_loading = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_story(paragraphs: &[&str]) -> (SessionState, VersionId) {
        let mut state = SessionState::default();
        let id = state.push_placeholder(ContinuationPolicy::Conclude);
        state.apply(SessionEvent::StoryProduced {
            version_id: id,
            title: "The Brave Cat".to_string(),
            paragraphs: paragraphs.iter().map(|p| p.to_string()).collect(),
            image_prompts: paragraphs.iter().map(|p| format!("draw {}", p)).collect(),
        });
        (state, id)
    }

    #[test]
    fn test_placeholder_is_loading_and_active() {
        let mut state = SessionState::default();
        let id = state.push_placeholder(ContinuationPolicy::Extend);

        let version = state.version(id).unwrap();
        assert!(version.loading);
        assert!(version.scenes.is_empty());
        assert!(version.error.is_none());
        assert_eq!(version.policy, ContinuationPolicy::Extend);
        assert_eq!(state.active, Some(id));
    }

    #[test]
    fn test_story_produced_creates_pending_scenes() {
        let (state, id) = state_with_story(&["one", "two"]);
        let version = state.version(id).unwrap();
        assert_eq!(version.title, "The Brave Cat");
        assert_eq!(version.scenes.len(), 2);
        assert!(version
            .scenes
            .iter()
            .all(|s| s.image == SceneImage::Pending));
        assert_eq!(version.scenes[1].image_prompt, "draw two");
    }

    #[test]
    fn test_image_outcomes_and_finish() {
        let (mut state, id) = state_with_story(&["one", "two"]);
        state.apply(SessionEvent::SceneImageReady {
            version_id: id,
            scene_index: 0,
            bytes: vec![7],
        });
        state.apply(SessionEvent::SceneImageFailed {
            version_id: id,
            scene_index: 1,
        });
        state.apply(SessionEvent::GenerationFinished { version_id: id });

        let version = state.version(id).unwrap();
        assert_eq!(version.scenes[0].image, SceneImage::Ready(vec![7]));
        assert_eq!(version.scenes[1].image, SceneImage::Failed);
        assert!(!version.loading);
        assert!(version.error.is_none());
    }

    #[test]
    fn test_generation_failed_is_terminal_not_loading() {
        let mut state = SessionState::default();
        let id = state.push_placeholder(ContinuationPolicy::Conclude);
        state.apply(SessionEvent::GenerationFailed {
            version_id: id,
            message: "remote response contained no text".to_string(),
        });

        let version = state.version(id).unwrap();
        assert!(!version.loading);
        assert_eq!(
            version.error.as_deref(),
            Some("remote response contained no text")
        );
    }

    #[test]
    fn test_continuation_appends_and_keeps_prefix() {
        let (mut state, id) = state_with_story(&["one", "two"]);
        state.apply(SessionEvent::SceneImageReady {
            version_id: id,
            scene_index: 0,
            bytes: vec![1],
        });
        state.apply(SessionEvent::ContinuationStarted {
            version_id: id,
            policy: ContinuationPolicy::Extend,
        });
        state.apply(SessionEvent::ContinuationProduced {
            version_id: id,
            paragraphs: vec!["three".to_string()],
            image_prompts: vec!["draw three".to_string()],
        });

        let version = state.version(id).unwrap();
        assert!(version.loading);
        assert_eq!(version.policy, ContinuationPolicy::Extend);
        assert_eq!(version.scenes.len(), 3);
        assert_eq!(version.scenes[0].image, SceneImage::Ready(vec![1]));
        assert_eq!(version.scenes[2].paragraph, "three");
        assert_eq!(version.scenes[2].image, SceneImage::Pending);
    }

    #[test]
    fn test_regenerate_resets_scene_to_pending() {
        let (mut state, id) = state_with_story(&["one", "two"]);
        state.apply(SessionEvent::SceneImageFailed {
            version_id: id,
            scene_index: 0,
        });
        state.apply(SessionEvent::RegenerateStarted {
            version_id: id,
            scene_index: 0,
        });

        let scene = &state.version(id).unwrap().scenes[0];
        assert!(scene.regenerating);
        assert!(scene.is_busy());
        assert_eq!(scene.image, SceneImage::Pending);

        state.apply(SessionEvent::SceneImageReady {
            version_id: id,
            scene_index: 0,
            bytes: vec![9],
        });
        let scene = &state.version(id).unwrap().scenes[0];
        assert!(!scene.regenerating);
        assert_eq!(scene.image, SceneImage::Ready(vec![9]));
    }

    #[test]
    fn test_edit_failure_leaves_image_unchanged() {
        let (mut state, id) = state_with_story(&["one", "two"]);
        state.apply(SessionEvent::SceneImageReady {
            version_id: id,
            scene_index: 0,
            bytes: vec![1, 2],
        });
        state.apply(SessionEvent::EditStarted {
            version_id: id,
            scene_index: 0,
        });
        assert!(state.version(id).unwrap().scenes[0].is_busy());

        state.apply(SessionEvent::EditFailed {
            version_id: id,
            scene_index: 0,
        });
        let scene = &state.version(id).unwrap().scenes[0];
        assert!(!scene.edit_loading);
        assert_eq!(scene.image, SceneImage::Ready(vec![1, 2]));
    }

    #[test]
    fn test_video_prompt_lifecycle() {
        let (mut state, id) = state_with_story(&["one", "two"]);
        state.apply(SessionEvent::VideoPromptStarted {
            version_id: id,
            scene_index: 1,
        });
        assert!(state.version(id).unwrap().scenes[1].video_prompt_loading);

        state.apply(SessionEvent::VideoPromptProduced {
            version_id: id,
            scene_index: 1,
            prompt: "slow pan over the meadow".to_string(),
        });
        let scene = &state.version(id).unwrap().scenes[1];
        assert!(!scene.video_prompt_loading);
        assert_eq!(scene.video_prompt.as_deref(), Some("slow pan over the meadow"));
    }

    #[test]
    fn test_stale_events_are_dropped() {
        let (mut state, id) = state_with_story(&["one"]);
        // Unknown version and out-of-range scene must be no-ops.
        state.apply(SessionEvent::SceneImageReady {
            version_id: VersionId::new(),
            scene_index: 0,
            bytes: vec![1],
        });
        state.apply(SessionEvent::SceneImageFailed {
            version_id: id,
            scene_index: 42,
        });
        assert_eq!(state.version(id).unwrap().scenes[0].image, SceneImage::Pending);
    }

    #[test]
    fn test_export_accessors() {
        let (mut state, id) = state_with_story(&["one", "two", "three"]);
        state.apply(SessionEvent::SceneImageReady {
            version_id: id,
            scene_index: 0,
            bytes: vec![1],
        });
        state.apply(SessionEvent::SceneImageFailed {
            version_id: id,
            scene_index: 1,
        });
        state.apply(SessionEvent::SceneImageReady {
            version_id: id,
            scene_index: 2,
            bytes: vec![3],
        });
        state.apply(SessionEvent::VideoPromptProduced {
            version_id: id,
            scene_index: 2,
            prompt: "zoom out".to_string(),
        });

        let version = state.version(id).unwrap();
        let images: Vec<_> = version.ready_images().collect();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0], (0, &[1u8][..]));
        assert_eq!(images[1], (2, &[3u8][..]));
        let prompts: Vec<_> = version.video_prompts().collect();
        assert_eq!(prompts, vec![(2, "zoom out")]);
    }

    #[test]
    fn test_policy_from_key_defaults_to_conclude() {
        assert_eq!(ContinuationPolicy::from_key("extend"), ContinuationPolicy::Extend);
        assert_eq!(ContinuationPolicy::from_key("conclude"), ContinuationPolicy::Conclude);
        assert_eq!(ContinuationPolicy::from_key("loop"), ContinuationPolicy::Conclude);
    }
}
