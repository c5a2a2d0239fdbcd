use crate::core::state::VersionId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoryError>;

/// Everything that can go wrong between the host UI and the remote
/// generation service. Per-scene illustration failures are swallowed into
/// scene state by the pipeline; only stage failures and the all-failed
/// condition surface as errors from a pipeline run.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("failed to read character image {path}: {source}")]
    ImageRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported character image type: {0}")]
    UnsupportedImage(String),

    #[error("character image is empty")]
    EmptyImage,

    #[error("remote response could not be parsed: {0}")]
    UnparsableResponse(String),

    #[error("remote response is missing its paragraph or prompt list")]
    MalformedResponse,

    #[error("remote response contained no paragraphs and no image prompts")]
    EmptyGeneration,

    #[error("remote response contained no image payload")]
    NoImageReturned,

    #[error("remote response contained no text")]
    EmptyResponse,

    #[error("remote API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("all {total} scene illustrations failed")]
    AllImagesFailed { total: usize },

    #[error("unknown story version {0}")]
    UnknownVersion(VersionId),

    #[error("scene index {0} is out of range")]
    SceneOutOfRange(usize),

    #[error("scene {0} has no ready illustration")]
    ImageNotReady(usize),

    #[error("another action is still running for scene {0}")]
    SceneBusy(usize),

    #[error("this story version is still generating")]
    VersionBusy,

    #[error("scene count {0} is outside the allowed range 2..=100")]
    InvalidSceneCount(usize),

    #[error("a story takes one or two character images, got {0}")]
    InvalidCharacterCount(usize),

    #[error("no story has been generated in this session yet")]
    NothingGenerated,
}
