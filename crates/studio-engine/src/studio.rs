use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::bail;
use serde_json::json;
use studio_contracts::assets::{encode_file, EncodedAsset, ImageAsset};
use studio_contracts::config::StudioConfig;
use studio_contracts::errors::StudioError;
use studio_contracts::events::{payload, EventWriter};
use studio_contracts::request::{
    AspectRatio, EditPlan, GeneratePlan, GenerationRequest, StoryboardPlan, MAX_REFERENCE_ASSETS,
};
use studio_contracts::transcript::ChatTranscript;
use tracing::{debug, warn};

use crate::capability::GenerationCapability;
use crate::orchestrator::Orchestrator;
use crate::session::{ChatSessionMachine, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Generate,
    Edit,
    Storyboard,
    Chat,
}

impl Tab {
    pub const ALL: [Tab; 4] = [Tab::Generate, Tab::Edit, Tab::Storyboard, Tab::Chat];

    pub fn as_str(self) -> &'static str {
        match self {
            Tab::Generate => "generate",
            Tab::Edit => "edit",
            Tab::Storyboard => "storyboard",
            Tab::Chat => "chat",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tab {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Tab::ALL
            .into_iter()
            .find(|tab| tab.as_str() == normalized)
            .ok_or_else(|| format!("unknown tab '{}'", value.trim()))
    }
}

/// Upload slots. Characters are the two storyboard references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSlot {
    EditSource,
    EditReference,
    Character(usize),
}

impl fmt::Display for AssetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetSlot::EditSource => f.write_str("source"),
            AssetSlot::EditReference => f.write_str("reference"),
            AssetSlot::Character(idx) => write!(f, "character{}", idx + 1),
        }
    }
}

impl FromStr for AssetSlot {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "source" | "image" => Ok(AssetSlot::EditSource),
            "reference" | "ref" => Ok(AssetSlot::EditReference),
            "character" | "character1" => Ok(AssetSlot::Character(0)),
            "character2" => Ok(AssetSlot::Character(1)),
            _ => Err(format!(
                "unknown upload slot '{}' (use source, reference, character1 or character2)",
                value.trim()
            )),
        }
    }
}

/// A local file the user attached, already encoded for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub path: PathBuf,
    pub asset: EncodedAsset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioInputs {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    /// Never empty; the last remaining scene is cleared instead of removed.
    pub scenes: Vec<String>,
    pub edit_source: Option<UploadedAsset>,
    pub edit_reference: Option<UploadedAsset>,
    pub characters: [Option<UploadedAsset>; MAX_REFERENCE_ASSETS],
}

impl Default for StudioInputs {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            aspect_ratio: AspectRatio::default(),
            scenes: vec![String::new()],
            edit_source: None,
            edit_reference: None,
            characters: Default::default(),
        }
    }
}

impl StudioInputs {
    pub fn slot(&self, slot: AssetSlot) -> Option<&UploadedAsset> {
        match slot {
            AssetSlot::EditSource => self.edit_source.as_ref(),
            AssetSlot::EditReference => self.edit_reference.as_ref(),
            AssetSlot::Character(idx) => self.characters.get(idx).and_then(Option::as_ref),
        }
    }

    fn slot_mut(&mut self, slot: AssetSlot) -> Result<&mut Option<UploadedAsset>, StudioError> {
        match slot {
            AssetSlot::EditSource => Ok(&mut self.edit_source),
            AssetSlot::EditReference => Ok(&mut self.edit_reference),
            AssetSlot::Character(idx) => self.characters.get_mut(idx).ok_or_else(|| {
                StudioError::validation(format!(
                    "Only {MAX_REFERENCE_ASSETS} character references are supported."
                ))
            }),
        }
    }
}

/// Everything a rendering surface needs after a transition.
#[derive(Debug, Clone)]
pub struct StudioSnapshot {
    pub tab: Tab,
    pub loading: bool,
    pub error: Option<String>,
    pub results: Vec<ImageAsset>,
    pub transcript: ChatTranscript,
    pub chat_state: SessionState,
    pub inputs: StudioInputs,
}

pub type Observer = Box<dyn FnMut(&StudioSnapshot)>;

enum BatchJob {
    Generate(GenerationRequest),
    Edit(GenerationRequest),
    Storyboard(Vec<GenerationRequest>),
}

/// The studio view-model: owns inputs, the last result set and the chat
/// session, and exposes one operation per user intent. Every operation
/// ends with a snapshot delivered to observers.
pub struct Studio {
    capability: Arc<dyn GenerationCapability>,
    orchestrator: Orchestrator,
    events: EventWriter,
    chat: ChatSessionMachine,
    inputs: StudioInputs,
    tab: Tab,
    loading: bool,
    error: Option<String>,
    results: Vec<ImageAsset>,
    observers: Vec<Observer>,
}

impl Studio {
    pub fn new(
        config: &StudioConfig,
        capability: Arc<dyn GenerationCapability>,
        events: EventWriter,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(capability.clone(), events.clone()),
            capability,
            events,
            chat: ChatSessionMachine::new(config.system_instruction.as_str()),
            inputs: StudioInputs::default(),
            tab: Tab::default(),
            loading: false,
            error: None,
            results: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&StudioSnapshot) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn snapshot(&self) -> StudioSnapshot {
        StudioSnapshot {
            tab: self.tab,
            loading: self.loading,
            error: self.error.clone(),
            results: self.results.clone(),
            transcript: self.chat.transcript().clone(),
            chat_state: self.chat.state(),
            inputs: self.inputs.clone(),
        }
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn results(&self) -> &[ImageAsset] {
        &self.results
    }

    pub fn inputs(&self) -> &StudioInputs {
        &self.inputs
    }

    /// Switching tabs drops the previous tab's results and error.
    pub fn select_tab(&mut self, tab: Tab) {
        self.tab = tab;
        self.error = None;
        self.results.clear();
        self.notify();
    }

    pub fn set_prompt(&mut self, prompt: &str) {
        self.inputs.prompt = prompt.to_string();
        self.notify();
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: AspectRatio) {
        self.inputs.aspect_ratio = aspect_ratio;
        self.notify();
    }

    pub fn add_scene(&mut self, prompt: &str) {
        let scenes = &mut self.inputs.scenes;
        // The blank starter scene is filled before a new one is appended.
        if scenes.len() == 1 && scenes[0].trim().is_empty() {
            scenes[0] = prompt.to_string();
        } else {
            scenes.push(prompt.to_string());
        }
        self.notify();
    }

    pub fn set_scene(&mut self, index: usize, prompt: &str) -> Result<(), StudioError> {
        let result = match self.inputs.scenes.get_mut(index) {
            Some(scene) => {
                *scene = prompt.to_string();
                Ok(())
            }
            None => Err(scene_out_of_range(index)),
        };
        self.settle_input(result)
    }

    pub fn remove_scene(&mut self, index: usize) -> Result<(), StudioError> {
        let result = if index >= self.inputs.scenes.len() {
            Err(scene_out_of_range(index))
        } else {
            if self.inputs.scenes.len() == 1 {
                self.inputs.scenes[0].clear();
            } else {
                self.inputs.scenes.remove(index);
            }
            Ok(())
        };
        self.settle_input(result)
    }

    /// Reads and encodes the file now; unreadable files leave the slot as it
    /// was.
    pub fn upload_asset(&mut self, slot: AssetSlot, path: &Path) -> Result<(), StudioError> {
        let result = encode_file(path).and_then(|asset| {
            let target = self.inputs.slot_mut(slot)?;
            *target = Some(UploadedAsset {
                path: path.to_path_buf(),
                asset,
            });
            Ok(())
        });
        if result.is_ok() {
            debug!(slot = %slot, path = %path.display(), "asset uploaded");
        }
        self.settle_input(result)
    }

    pub fn remove_asset(&mut self, slot: AssetSlot) -> Result<(), StudioError> {
        let result = self.inputs.slot_mut(slot).map(|target| {
            target.take();
        });
        self.settle_input(result)
    }

    pub fn submit_generate(&mut self) -> Result<usize, StudioError> {
        let job = GeneratePlan {
            prompt: self.inputs.prompt.clone(),
            aspect_ratio: self.inputs.aspect_ratio,
        }
        .build()
        .map(BatchJob::Generate);
        self.run_batch(job)
    }

    pub fn submit_edit(&mut self) -> Result<usize, StudioError> {
        let job = EditPlan {
            prompt: self.inputs.prompt.clone(),
            source: self.inputs.edit_source.as_ref().map(|upload| upload.asset.clone()),
            reference: self
                .inputs
                .edit_reference
                .as_ref()
                .map(|upload| upload.asset.clone()),
            aspect_ratio: self.inputs.aspect_ratio,
        }
        .build()
        .map(BatchJob::Edit);
        self.run_batch(job)
    }

    pub fn submit_storyboard(&mut self) -> Result<usize, StudioError> {
        let job = StoryboardPlan {
            scenes: self.inputs.scenes.clone(),
            characters: self
                .inputs
                .characters
                .iter()
                .flatten()
                .map(|upload| upload.asset.clone())
                .collect(),
            aspect_ratio: self.inputs.aspect_ratio,
        }
        .build()
        .map(BatchJob::Storyboard);
        self.run_batch(job)
    }

    /// Returns whether the message was accepted. Failed replies show up as
    /// a synthetic transcript entry, never as the studio error.
    pub fn submit_chat_message(&mut self, text: &str) -> bool {
        let Some(turn) = self.chat.begin(self.capability.as_ref(), text) else {
            return false;
        };
        self.loading = true;
        self.notify();

        let reply = turn.dispatch();
        let failed = reply.result().is_err();
        let appended = self.chat.complete(reply).map(|message| message.text.len());
        self.record(
            "chat_turn",
            json!({
                "failed": failed,
                "reply_chars": appended,
                "messages": self.chat.transcript().len(),
            }),
        );
        self.loading = false;
        self.notify();
        true
    }

    pub fn new_chat(&mut self) {
        self.chat.reset();
        self.record("chat_reset", json!({}));
        self.notify();
    }

    /// Submits whatever the current tab submits.
    pub fn submit_current(&mut self) -> Result<usize, StudioError> {
        match self.tab {
            Tab::Generate => self.submit_generate(),
            Tab::Edit => self.submit_edit(),
            Tab::Storyboard => self.submit_storyboard(),
            Tab::Chat => Err(StudioError::validation(
                "Type a message to chat with the assistant.",
            )),
        }
    }

    /// Saves result `index` (0-based) under its download name.
    pub fn download(&self, index: usize, dir: &Path) -> anyhow::Result<PathBuf> {
        let Some(asset) = self.results.get(index) else {
            bail!(
                "no result {} to download ({} available)",
                index + 1,
                self.results.len()
            );
        };
        asset.save_to(dir)
    }

    pub fn download_all(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        self.results.iter().map(|asset| asset.save_to(dir)).collect()
    }

    /// Validation errors arrive here before the loading transition, so a
    /// rejected submit never dispatches.
    fn run_batch(&mut self, job: Result<BatchJob, StudioError>) -> Result<usize, StudioError> {
        let job = match job {
            Ok(job) => job,
            Err(err) => {
                self.error = Some(err.to_string());
                self.notify();
                return Err(err);
            }
        };

        self.loading = true;
        self.error = None;
        self.results.clear();
        self.notify();

        let outcome = match job {
            BatchJob::Generate(request) => self.orchestrator.generate(&request),
            BatchJob::Edit(request) => self.orchestrator.edit_variants(&request),
            BatchJob::Storyboard(requests) => self.orchestrator.storyboard(requests),
        };

        self.loading = false;
        let result = match outcome {
            Ok(assets) => {
                let count = assets.len();
                self.results = assets;
                Ok(count)
            }
            Err(err) => {
                self.error = Some(err.to_string());
                Err(err)
            }
        };
        self.notify();
        result
    }

    fn settle_input(&mut self, result: Result<(), StudioError>) -> Result<(), StudioError> {
        self.error = result.as_ref().err().map(ToString::to_string);
        self.notify();
        result
    }

    fn record(&self, event_type: &str, value: serde_json::Value) {
        if let Err(err) = self.events.emit(event_type, payload(value)) {
            warn!(event_type, error = %err, "failed to record studio event");
        }
    }

    fn notify(&mut self) {
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for observer in &mut self.observers {
            observer(&snapshot);
        }
    }
}

fn scene_out_of_range(index: usize) -> StudioError {
    StudioError::validation(format!("There is no scene {}.", index + 1))
}
