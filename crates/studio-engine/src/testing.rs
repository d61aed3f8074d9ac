//! Scripted capability for engine tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use studio_contracts::assets::ImageAsset;
use studio_contracts::errors::{CapabilityError, StudioError};
use studio_contracts::request::{GenerationRequest, StoryboardPlan};

use crate::capability::{ChatSession, GenerationCapability};

/// Deterministic stand-in for the generation service.
///
/// Images echo their prompt in the bytes. Delays are keyed by the trailing
/// number of the request label ("Scene 2", "Variant 3"), so tests can make
/// any slot finish first.
#[derive(Default)]
pub struct ScriptedCapability {
    delays_ms: Vec<u64>,
    failures: Vec<(String, String)>,
    open_failure: Option<String>,
    generate_count: Option<usize>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    max_references: AtomicUsize,
    open_attempts: AtomicUsize,
    sessions_opened: AtomicUsize,
    system_instructions: Mutex<Vec<String>>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delays(mut self, delays_ms: &[u64]) -> Self {
        self.delays_ms = delays_ms.to_vec();
        self
    }

    /// Fails any request whose prompt or label equals `needle`, and any chat
    /// message equal to it.
    pub fn failing_on(mut self, needle: &str, cause: &str) -> Self {
        self.failures.push((needle.to_string(), cause.to_string()));
        self
    }

    pub fn failing_open(mut self, cause: &str) -> Self {
        self.open_failure = Some(cause.to_string());
        self
    }

    pub fn with_generate_count(mut self, count: usize) -> Self {
        self.generate_count = Some(count);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_reference_assets_seen(&self) -> usize {
        self.max_references.load(Ordering::SeqCst)
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn system_instructions(&self) -> Vec<String> {
        self.system_instructions
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    fn failure_for(&self, request: &GenerationRequest) -> Option<CapabilityError> {
        self.failures
            .iter()
            .find(|(needle, _)| *needle == request.source_prompt || *needle == request.label)
            .map(|(_, cause)| CapabilityError::new(cause.as_str()))
    }

    fn delay_for(&self, label: &str) -> Duration {
        let slot = label
            .rsplit(' ')
            .next()
            .and_then(|number| number.parse::<usize>().ok())
            .and_then(|number| number.checked_sub(1));
        let millis = slot
            .and_then(|slot| self.delays_ms.get(slot))
            .copied()
            .unwrap_or(0);
        Duration::from_millis(millis)
    }

    fn single(
        &self,
        kind: &str,
        request: &GenerationRequest,
    ) -> Result<ImageAsset, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.max_references
            .fetch_max(request.reference_assets.len(), Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        thread::sleep(self.delay_for(&request.label));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failure_for(request) {
            return Err(err);
        }
        Ok(ImageAsset::new(
            format!("{kind}:{}", request.source_prompt).into_bytes(),
            "image/png",
        ))
    }
}

impl GenerationCapability for ScriptedCapability {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        count: usize,
    ) -> Result<Vec<ImageAsset>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure_for(request) {
            return Err(err);
        }
        let count = self.generate_count.unwrap_or(count);
        Ok((0..count)
            .map(|idx| {
                ImageAsset::new(
                    format!("generate:{}:{idx}", request.source_prompt).into_bytes(),
                    "image/png",
                )
            })
            .collect())
    }

    fn generate_scene(&self, request: &GenerationRequest) -> Result<ImageAsset, CapabilityError> {
        self.single("scene", request)
    }

    fn edit_image(&self, request: &GenerationRequest) -> Result<ImageAsset, CapabilityError> {
        self.single("edit", request)
    }

    fn open_session(
        &self,
        system_instruction: &str,
    ) -> Result<Box<dyn ChatSession>, CapabilityError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(cause) = &self.open_failure {
            return Err(CapabilityError::new(cause.as_str()));
        }
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut values) = self.system_instructions.lock() {
            values.push(system_instruction.to_string());
        }
        Ok(Box::new(ScriptedChat {
            failures: self.failures.clone(),
        }))
    }
}

struct ScriptedChat {
    failures: Vec<(String, String)>,
}

impl ChatSession for ScriptedChat {
    fn send(&mut self, text: &str) -> Result<String, CapabilityError> {
        if let Some((_, cause)) = self.failures.iter().find(|(needle, _)| needle == text) {
            return Err(CapabilityError::new(cause.as_str()));
        }
        Ok(format!("echo: {text}"))
    }
}

pub fn scene_requests(scenes: &[&str]) -> Result<Vec<GenerationRequest>, StudioError> {
    StoryboardPlan {
        scenes: scenes.iter().map(|scene| scene.to_string()).collect(),
        ..StoryboardPlan::default()
    }
    .build()
}
