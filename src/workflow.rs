//! Per-session workflow: selections, the pending request, and the
//! animation sub-workflow.
//!
//! Every call-starting intent switches the phase synchronously, bumps the
//! request epoch, and spawns the external call. The call's outcome is applied
//! only if the epoch still matches, so a result that settles after a reset
//! never reaches the fresh session.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::blobs::BlobStore;
use crate::export::{self, DownloadTarget, VIDEO_DOWNLOAD_NAME};
use crate::fal::{FalError, FalTransport};
use crate::generation::GenerationClient;
use crate::models::{
    ArtworkKind, ArtworkView, GeneratedArtwork, OptionVisibility, RegenerateRequest, SelectionPatch, Selections,
    SourceImage, SourceView, VideoView,
};
use crate::video::{VideoClient, STATUE_MOTION_PROMPT};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateTag {
    Idle,
    Loading,
    ResultReady,
    AnimatingLastFrame,
    ReviewingLastFrame,
    AnimatingVideo,
    VideoReady,
    Errored,
}

impl StateTag {
    pub fn as_str(self) -> &'static str {
        match self {
            StateTag::Idle => "idle",
            StateTag::Loading => "loading",
            StateTag::ResultReady => "result_ready",
            StateTag::AnimatingLastFrame => "animating_last_frame",
            StateTag::ReviewingLastFrame => "reviewing_last_frame",
            StateTag::AnimatingVideo => "animating_video",
            StateTag::VideoReady => "video_ready",
            StateTag::Errored => "errored",
        }
    }
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnimationStep {
    Idle,
    GeneratingLastFrame,
    ReviewingLastFrame,
    GeneratingVideo,
    Done,
}

/// The external call that failed.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Generation,
    LastFrame,
    Video,
}

#[derive(Debug, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// The superseded result stays alive, hidden, until the call settles.
    Loading { previous: Option<GeneratedArtwork> },
    ResultReady { artwork: GeneratedArtwork },
    AnimatingLastFrame { artwork: GeneratedArtwork },
    ReviewingLastFrame { artwork: GeneratedArtwork, last_frame_url: String },
    AnimatingVideo { artwork: GeneratedArtwork, last_frame_url: Option<String> },
    VideoReady { artwork: GeneratedArtwork, last_frame_url: Option<String>, video_url: String },
    Errored(Box<Failure>),
}

/// `fallback` is never `Errored` itself.
#[derive(Debug)]
pub struct Failure {
    pub step: Step,
    pub message: String,
    pub fallback: Phase,
}

impl Phase {
    pub fn tag(&self) -> StateTag {
        match self {
            Phase::Idle => StateTag::Idle,
            Phase::Loading { .. } => StateTag::Loading,
            Phase::ResultReady { .. } => StateTag::ResultReady,
            Phase::AnimatingLastFrame { .. } => StateTag::AnimatingLastFrame,
            Phase::ReviewingLastFrame { .. } => StateTag::ReviewingLastFrame,
            Phase::AnimatingVideo { .. } => StateTag::AnimatingVideo,
            Phase::VideoReady { .. } => StateTag::VideoReady,
            Phase::Errored(_) => StateTag::Errored,
        }
    }

    /// The phase shown underneath an error.
    fn effective(&self) -> &Phase {
        match self {
            Phase::Errored(failure) => &failure.fallback,
            other => other,
        }
    }

    fn artwork(&self) -> Option<&GeneratedArtwork> {
        match self {
            Phase::ResultReady { artwork }
            | Phase::AnimatingLastFrame { artwork }
            | Phase::ReviewingLastFrame { artwork, .. }
            | Phase::AnimatingVideo { artwork, .. }
            | Phase::VideoReady { artwork, .. } => Some(artwork),
            Phase::Errored(failure) => failure.fallback.artwork(),
            Phase::Idle | Phase::Loading { .. } => None,
        }
    }

    fn last_frame_url(&self) -> Option<&str> {
        match self {
            Phase::ReviewingLastFrame { last_frame_url, .. } => Some(last_frame_url),
            Phase::AnimatingVideo { last_frame_url, .. } | Phase::VideoReady { last_frame_url, .. } => last_frame_url.as_deref(),
            Phase::Errored(failure) => failure.fallback.last_frame_url(),
            _ => None,
        }
    }

    fn video_url(&self) -> Option<&str> {
        match self {
            Phase::VideoReady { video_url, .. } => Some(video_url),
            _ => None,
        }
    }

    fn animation_step(&self) -> AnimationStep {
        match self.effective() {
            Phase::AnimatingLastFrame { .. } => AnimationStep::GeneratingLastFrame,
            Phase::ReviewingLastFrame { .. } => AnimationStep::ReviewingLastFrame,
            Phase::AnimatingVideo { .. } => AnimationStep::GeneratingVideo,
            Phase::VideoReady { .. } => AnimationStep::Done,
            _ => AnimationStep::Idle,
        }
    }

    /// Gives up whatever result the phase still holds, hidden or not.
    fn into_artwork(self) -> Option<GeneratedArtwork> {
        match self {
            Phase::Idle => None,
            Phase::Loading { previous } => previous,
            Phase::ResultReady { artwork }
            | Phase::AnimatingLastFrame { artwork }
            | Phase::ReviewingLastFrame { artwork, .. }
            | Phase::AnimatingVideo { artwork, .. }
            | Phase::VideoReady { artwork, .. } => Some(artwork),
            Phase::Errored(failure) => failure.fallback.into_artwork(),
        }
    }

    fn failed(step: Step, err: &FalError, fallback: Phase) -> Phase {
        Phase::Errored(Box::new(Failure { step, message: err.to_string(), fallback }))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("select an image first")]
    MissingSource,
    #[error("{intent} is not allowed while {state}")]
    InvalidTransition { intent: &'static str, state: StateTag },
    #[error("{intent} only applies to a {expected:?}")]
    WrongArtwork { intent: &'static str, expected: ArtworkKind },
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ErrorView {
    pub step: Step,
    pub message: String,
}

/// Everything the front-end renders from.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Snapshot {
    pub id: Uuid,
    pub state: StateTag,
    pub animation: AnimationStep,
    pub epoch: u64,
    pub selections: Selections,
    pub options: OptionVisibility,
    pub source: Option<SourceView>,
    pub artwork: Option<ArtworkView>,
    pub last_frame_url: Option<String>,
    pub video: Option<VideoView>,
    pub error: Option<ErrorView>,
    pub updated_at: DateTime<Utc>,
}

/// A call that has been started; the session already shows its pending phase.
pub struct Pending {
    pub snapshot: Snapshot,
    task: JoinHandle<()>,
}

impl Pending {
    pub async fn settled(self) {
        if let Err(e) = self.task.await {
            error!("❌ Workflow task ended abnormally: {}", e);
        }
    }
}

struct SessionState {
    selections: Selections,
    source: Option<Arc<SourceImage>>,
    phase: Phase,
    epoch: u64,
    updated_at: DateTime<Utc>,
}

impl SessionState {
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn begin_request(&mut self) -> u64 {
        self.epoch += 1;
        self.touch();
        self.epoch
    }

    /// Takes the phase an intent acts on. An intent issued over an error acts
    /// on its fallback; a rejected intent leaves the phase as it was.
    fn take_phase<T>(
        &mut self,
        intent: &'static str,
        accept: impl FnOnce(Phase) -> Result<T, Phase>,
    ) -> Result<T, WorkflowError> {
        let state = self.phase.tag();
        match std::mem::take(&mut self.phase) {
            Phase::Errored(failure) => {
                let Failure { step, message, fallback } = *failure;
                accept(fallback).map_err(|fallback| {
                    self.phase = Phase::Errored(Box::new(Failure { step, message, fallback }));
                    WorkflowError::InvalidTransition { intent, state }
                })
            }
            phase => accept(phase).map_err(|phase| {
                self.phase = phase;
                WorkflowError::InvalidTransition { intent, state }
            }),
        }
    }

    fn require_idle(&mut self, intent: &'static str) -> Result<(), WorkflowError> {
        self.take_phase(intent, |phase| match phase {
            Phase::Idle => Ok(()),
            other => Err(other),
        })
    }
}

pub struct Workflow {
    id: Uuid,
    state: Mutex<SessionState>,
    last_seen: Mutex<Instant>,
    generation: GenerationClient,
    video: VideoClient,
    blobs: Arc<BlobStore>,
}

impl Workflow {
    pub fn new(transport: Arc<dyn FalTransport>, blobs: Arc<BlobStore>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SessionState {
                selections: Selections::default(),
                source: None,
                phase: Phase::Idle,
                epoch: 0,
                updated_at: Utc::now(),
            }),
            last_seen: Mutex::new(Instant::now()),
            generation: GenerationClient::new(Arc::clone(&transport), Arc::clone(&blobs)),
            video: VideoClient::new(transport),
            blobs,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Records client activity; any request against the session counts.
    pub fn mark_seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_of(&self.state.lock())
    }

    fn snapshot_of(&self, state: &SessionState) -> Snapshot {
        let visible = state.phase.effective();
        Snapshot {
            id: self.id,
            state: state.phase.tag(),
            animation: state.phase.animation_step(),
            epoch: state.epoch,
            selections: state.selections,
            options: state.selections.visible_options(),
            source: state.source.as_ref().map(|s| s.view()),
            artwork: visible.artwork().map(GeneratedArtwork::view),
            last_frame_url: visible.last_frame_url().map(str::to_string),
            video: visible.video_url().map(|url| VideoView { url: url.to_string(), download_name: VIDEO_DOWNLOAD_NAME }),
            error: match &state.phase {
                Phase::Errored(failure) => Some(ErrorView { step: failure.step, message: failure.message.clone() }),
                _ => None,
            },
            updated_at: state.updated_at,
        }
    }

    pub fn source(&self) -> Option<Arc<SourceImage>> {
        self.state.lock().source.clone()
    }

    pub fn download(&self) -> Option<DownloadTarget> {
        let state = self.state.lock();
        state.phase.effective().artwork().map(|artwork| export::resolve_download(artwork, &self.blobs))
    }

    pub fn video_download(&self) -> Option<DownloadTarget> {
        let state = self.state.lock();
        state.phase.effective().video_url().map(|url| DownloadTarget::Remote(url.to_string()))
    }

    fn release(&self, artwork: GeneratedArtwork) {
        if let Some(handle) = artwork.handle {
            self.blobs.release(handle);
        }
    }

    pub fn set_source(&self, source: SourceImage) -> Result<Snapshot, WorkflowError> {
        let mut state = self.state.lock();
        state.require_idle("set_source")?;
        info!("🖼️ Session {} source set to '{}' ({} bytes)", self.id, source.file_name, source.bytes.len());
        state.source = Some(Arc::new(source));
        state.phase = Phase::Idle;
        state.touch();
        Ok(self.snapshot_of(&state))
    }

    pub fn update_selections(&self, patch: &SelectionPatch) -> Result<Snapshot, WorkflowError> {
        let mut state = self.state.lock();
        state.require_idle("update_selections")?;
        state.selections.apply(patch);
        state.phase = Phase::Idle;
        state.touch();
        Ok(self.snapshot_of(&state))
    }

    pub fn generate(self: &Arc<Self>) -> Result<Pending, WorkflowError> {
        let mut state = self.state.lock();
        let source = state.source.clone().ok_or(WorkflowError::MissingSource)?;
        state.require_idle("generate")?;
        state.phase = Phase::Loading { previous: None };
        Ok(self.start_generation(&mut state, source))
    }

    /// Generates again from the result screen, or retries a failed
    /// generation. Overrides become the current selections whatever the outcome.
    pub fn regenerate(self: &Arc<Self>, overrides: &RegenerateRequest) -> Result<Pending, WorkflowError> {
        let mut state = self.state.lock();
        let source = state.source.clone().ok_or(WorkflowError::MissingSource)?;
        let retry = matches!(&state.phase, Phase::Errored(failure) if failure.step == Step::Generation);
        let previous = state.take_phase("regenerate", |phase| match phase {
            Phase::ResultReady { artwork } => Ok(Some(artwork)),
            Phase::Idle if retry => Ok(None),
            other => Err(other),
        })?;
        state.selections.apply(&SelectionPatch::from(overrides));
        state.phase = Phase::Loading { previous };
        Ok(self.start_generation(&mut state, source))
    }

    fn start_generation(self: &Arc<Self>, state: &mut SessionState, source: Arc<SourceImage>) -> Pending {
        let epoch = state.begin_request();
        let selections = state.selections;
        info!("🚀 Session {} generating {:?} with {:?} (epoch {})", self.id, selections.artwork, selections.model, epoch);

        let workflow = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = workflow.generation.generate_artwork(&source, &selections).await;
            workflow.finish_generation(epoch, outcome);
        });
        Pending { snapshot: self.snapshot_of(state), task }
    }

    fn finish_generation(&self, epoch: u64, outcome: Result<GeneratedArtwork, FalError>) {
        let mut state = self.state.lock();
        let previous = match std::mem::take(&mut state.phase) {
            Phase::Loading { previous } if state.epoch == epoch => previous,
            other => {
                state.phase = other;
                warn!("🗑️ Discarding stale generation result (epoch {} vs {})", epoch, state.epoch);
                if let Ok(artwork) = outcome {
                    self.release(artwork);
                }
                return;
            }
        };

        state.phase = match outcome {
            Ok(artwork) => {
                info!("✅ Session {} result ready", self.id);
                Phase::ResultReady { artwork }
            }
            Err(e) => {
                error!("❌ Session {} generation failed: {}", self.id, e);
                Phase::failed(Step::Generation, &e, Phase::Idle)
            }
        };
        state.touch();
        // Released only once its replacement is in place.
        if let Some(previous) = previous {
            self.release(previous);
        }
    }

    pub fn animate_statue(self: &Arc<Self>, back_image: SourceImage) -> Result<Pending, WorkflowError> {
        let mut state = self.state.lock();
        if state.selections.artwork != ArtworkKind::Statue {
            return Err(WorkflowError::WrongArtwork { intent: "animate_statue", expected: ArtworkKind::Statue });
        }
        let artwork = state.take_phase("animate_statue", |phase| match phase {
            Phase::ResultReady { artwork } if !artwork.source_url.is_empty() => Ok(artwork),
            other => Err(other),
        })?;
        let first_frame_url = artwork.source_url.clone();
        state.phase = Phase::AnimatingLastFrame { artwork };
        let epoch = state.begin_request();
        info!("🎞️ Session {} generating last frame (epoch {})", self.id, epoch);

        let workflow = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = workflow.generation.generate_last_frame(&first_frame_url, &back_image).await;
            workflow.finish_last_frame(epoch, outcome);
        });
        Ok(Pending { snapshot: self.snapshot_of(&state), task })
    }

    fn finish_last_frame(&self, epoch: u64, outcome: Result<String, FalError>) {
        let mut state = self.state.lock();
        let artwork = match std::mem::take(&mut state.phase) {
            Phase::AnimatingLastFrame { artwork } if state.epoch == epoch => artwork,
            other => {
                state.phase = other;
                warn!("🗑️ Discarding stale last frame (epoch {} vs {})", epoch, state.epoch);
                return;
            }
        };

        state.phase = match outcome {
            Ok(last_frame_url) => Phase::ReviewingLastFrame { artwork, last_frame_url },
            Err(e) => {
                error!("❌ Session {} last frame failed: {}", self.id, e);
                Phase::failed(Step::LastFrame, &e, Phase::ResultReady { artwork })
            }
        };
        state.touch();
    }

    pub fn confirm_last_frame(self: &Arc<Self>) -> Result<Pending, WorkflowError> {
        let mut state = self.state.lock();
        let (artwork, last_frame_url) = state.take_phase("confirm_last_frame", |phase| match phase {
            Phase::ReviewingLastFrame { artwork, last_frame_url } => Ok((artwork, last_frame_url)),
            other => Err(other),
        })?;
        let first_frame_url = artwork.source_url.clone();
        let last = last_frame_url.clone();
        state.phase = Phase::AnimatingVideo { artwork, last_frame_url: Some(last_frame_url) };
        let epoch = state.begin_request();
        info!("🎬 Session {} generating statue video (epoch {})", self.id, epoch);

        let workflow = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = workflow.video.generate_statue_video(&first_frame_url, &last, STATUE_MOTION_PROMPT).await;
            workflow.finish_video(epoch, outcome);
        });
        Ok(Pending { snapshot: self.snapshot_of(&state), task })
    }

    pub fn animate_painting(self: &Arc<Self>) -> Result<Pending, WorkflowError> {
        let mut state = self.state.lock();
        if state.selections.artwork != ArtworkKind::Painting {
            return Err(WorkflowError::WrongArtwork { intent: "animate_painting", expected: ArtworkKind::Painting });
        }
        let artwork = state.take_phase("animate_painting", |phase| match phase {
            Phase::ResultReady { artwork } if !artwork.source_url.is_empty() => Ok(artwork),
            other => Err(other),
        })?;
        let image_url = artwork.source_url.clone();
        state.phase = Phase::AnimatingVideo { artwork, last_frame_url: None };
        let epoch = state.begin_request();
        info!("🎬 Session {} generating painting video (epoch {})", self.id, epoch);

        let workflow = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = workflow.video.generate_painting_video(&image_url).await;
            workflow.finish_video(epoch, outcome);
        });
        Ok(Pending { snapshot: self.snapshot_of(&state), task })
    }

    fn finish_video(&self, epoch: u64, outcome: Result<String, FalError>) {
        let mut state = self.state.lock();
        let (artwork, last_frame_url) = match std::mem::take(&mut state.phase) {
            Phase::AnimatingVideo { artwork, last_frame_url } if state.epoch == epoch => (artwork, last_frame_url),
            other => {
                state.phase = other;
                warn!("🗑️ Discarding stale video (epoch {} vs {})", epoch, state.epoch);
                return;
            }
        };

        state.phase = match outcome {
            Ok(video_url) => Phase::VideoReady { artwork, last_frame_url, video_url },
            Err(e) => {
                error!("❌ Session {} video failed: {}", self.id, e);
                // Statue videos fall back to the last-frame review, paintings to the result.
                let fallback = match last_frame_url {
                    Some(last_frame_url) => Phase::ReviewingLastFrame { artwork, last_frame_url },
                    None => Phase::ResultReady { artwork },
                };
                Phase::failed(Step::Video, &e, fallback)
            }
        };
        state.touch();
    }

    pub fn back_to_image(&self) -> Result<Snapshot, WorkflowError> {
        let mut state = self.state.lock();
        let artwork = state.take_phase("back_to_image", |phase| match phase {
            Phase::VideoReady { artwork, .. } => Ok(artwork),
            other => Err(other),
        })?;
        state.phase = Phase::ResultReady { artwork };
        state.touch();
        Ok(self.snapshot_of(&state))
    }

    pub fn dismiss_error(&self) -> Result<Snapshot, WorkflowError> {
        let mut state = self.state.lock();
        match std::mem::take(&mut state.phase) {
            Phase::Errored(failure) => state.phase = failure.fallback,
            other => {
                let tag = other.tag();
                state.phase = other;
                return Err(WorkflowError::InvalidTransition { intent: "dismiss_error", state: tag });
            }
        }
        state.touch();
        Ok(self.snapshot_of(&state))
    }

    /// Back to an empty selection screen from anywhere. A call still in
    /// flight keeps running, but its result is dropped when it lands.
    pub fn reset(&self) -> Snapshot {
        let mut state = self.state.lock();
        let phase = std::mem::take(&mut state.phase);
        if let Some(artwork) = phase.into_artwork() {
            self.release(artwork);
        }
        state.selections = Selections::default();
        state.source = None;
        state.epoch += 1;
        state.touch();
        info!("🔄 Session {} reset (epoch {})", self.id, state.epoch);
        self.snapshot_of(&state)
    }

    /// Releases everything the session holds before it is dropped.
    pub fn teardown(&self) {
        self.reset();
        info!("👋 Session {} closed", self.id);
    }
}
