use std::sync::Arc;
use std::thread;

use serde_json::json;
use studio_contracts::assets::ImageAsset;
use studio_contracts::batch::{GenerationBatch, Outcome};
use studio_contracts::errors::{CapabilityError, StudioError};
use studio_contracts::events::{payload, EventPayload, EventWriter};
use studio_contracts::request::{GenerationRequest, EDIT_VARIANT_COUNT, GENERATE_IMAGE_COUNT};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::GenerationCapability;

/// Which single-image capability operation a fan-out dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutOp {
    Scene,
    Edit,
}

impl FanOutOp {
    fn as_str(self) -> &'static str {
        match self {
            FanOutOp::Scene => "scene",
            FanOutOp::Edit => "edit",
        }
    }
}

/// Issues generation work against the capability and aggregates results.
///
/// Two shapes: `generate` is a single service call that must return the
/// full batch, `fan_out` dispatches one call per request concurrently and
/// fills results by slot. Neither retries nor times out.
#[derive(Clone)]
pub struct Orchestrator {
    capability: Arc<dyn GenerationCapability>,
    events: EventWriter,
}

impl Orchestrator {
    pub fn new(capability: Arc<dyn GenerationCapability>, events: EventWriter) -> Self {
        Self { capability, events }
    }

    pub fn capability(&self) -> &dyn GenerationCapability {
        self.capability.as_ref()
    }

    /// Service-side batch. A short batch is a hard failure, never a partial
    /// success.
    pub fn generate(&self, request: &GenerationRequest) -> Result<Vec<ImageAsset>, StudioError> {
        let batch_id = new_batch_id();
        self.record(
            "batch_started",
            json!({
                "batch_id": batch_id,
                "shape": "service_batch",
                "provider": self.capability.name(),
                "slots": GENERATE_IMAGE_COUNT,
                "prompt": request.source_prompt,
                "aspect_ratio": request.aspect_ratio.as_str(),
            }),
        );

        let images = match self.capability.generate(request, GENERATE_IMAGE_COUNT) {
            Ok(images) => images,
            Err(err) => {
                self.record_failure(&batch_id, None, &request.label, &err.cause);
                return Err(err.into());
            }
        };
        if images.len() != GENERATE_IMAGE_COUNT {
            let err = StudioError::IncompleteBatch {
                expected: GENERATE_IMAGE_COUNT,
                received: images.len(),
            };
            self.record_failure(&batch_id, None, &request.label, &err.to_string());
            return Err(err);
        }

        let assets = images
            .into_iter()
            .enumerate()
            .map(|(slot, image)| image.in_slot(slot, &request.source_prompt))
            .collect::<Vec<ImageAsset>>();
        for asset in &assets {
            self.record_artifact(&batch_id, &request.label, asset);
        }
        self.record(
            "batch_completed",
            json!({"batch_id": batch_id, "images": assets.len()}),
        );
        Ok(assets)
    }

    /// Four independent edit calls for the same request.
    pub fn edit_variants(&self, request: &GenerationRequest) -> Result<Vec<ImageAsset>, StudioError> {
        let requests = (0..EDIT_VARIANT_COUNT)
            .map(|idx| request.with_label(format!("Variant {}", idx + 1)))
            .collect();
        self.fan_out(requests, FanOutOp::Edit)?.into_assets()
    }

    pub fn storyboard(&self, requests: Vec<GenerationRequest>) -> Result<Vec<ImageAsset>, StudioError> {
        self.fan_out(requests, FanOutOp::Scene)?.into_assets()
    }

    /// Dispatches every request before waiting on any of them. Slot `i` of
    /// the result always answers `requests[i]`, whatever order the calls
    /// finish in.
    pub fn fan_out(
        &self,
        requests: Vec<GenerationRequest>,
        op: FanOutOp,
    ) -> Result<GenerationBatch, StudioError> {
        if requests.is_empty() {
            return Err(StudioError::validation("Nothing to generate."));
        }
        let batch_id = new_batch_id();
        self.record(
            "batch_started",
            json!({
                "batch_id": batch_id,
                "shape": "fan_out",
                "op": op.as_str(),
                "provider": self.capability.name(),
                "slots": requests.len(),
                "labels": requests.iter().map(|request| request.label.as_str()).collect::<Vec<&str>>(),
            }),
        );
        info!(batch_id = %batch_id, op = op.as_str(), slots = requests.len(), "fan-out dispatched");

        let capability = self.capability.as_ref();
        let mut slots: Vec<Option<Outcome<ImageAsset>>> = vec![None; requests.len()];
        thread::scope(|scope| {
            let handles = requests
                .iter()
                .enumerate()
                .map(|(slot, request)| {
                    let handle = scope.spawn(move || match op {
                        FanOutOp::Scene => capability.generate_scene(request),
                        FanOutOp::Edit => capability.edit_image(request),
                    });
                    (slot, handle)
                })
                .collect::<Vec<_>>();

            for (slot, handle) in handles {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(CapabilityError::new("generation worker panicked")));
                debug!(batch_id = %batch_id, slot, ok = result.is_ok(), "slot settled");
                slots[slot] = Some(Outcome::from(result));
            }
        });

        let results = slots
            .into_iter()
            .zip(requests.iter())
            .enumerate()
            .map(|(slot, (outcome, request))| {
                match outcome.unwrap_or_else(|| {
                    Outcome::Failure(CapabilityError::new("slot never settled"))
                }) {
                    Outcome::Success(image) => {
                        Outcome::Success(image.in_slot(slot, &request.source_prompt))
                    }
                    failure => failure,
                }
            })
            .collect::<Vec<Outcome<ImageAsset>>>();

        let batch = GenerationBatch {
            batch_id,
            requests,
            results,
        };
        self.record_batch(&batch);
        Ok(batch)
    }

    fn record_batch(&self, batch: &GenerationBatch) {
        for (request, outcome) in batch.requests.iter().zip(batch.results.iter()) {
            if let Outcome::Success(asset) = outcome {
                self.record_artifact(&batch.batch_id, &request.label, asset);
            }
        }
        match batch.first_failure() {
            Some((slot, label, err)) => {
                warn!(batch_id = %batch.batch_id, slot, label, cause = %err.cause, "fan-out failed");
                self.record_failure(&batch.batch_id, Some(slot), label, &err.cause);
            }
            None => self.record(
                "batch_completed",
                json!({"batch_id": batch.batch_id, "images": batch.succeeded()}),
            ),
        }
    }

    fn record_artifact(&self, batch_id: &str, label: &str, asset: &ImageAsset) {
        self.record(
            "artifact_created",
            json!({
                "batch_id": batch_id,
                "slot": asset.index,
                "label": label,
                "artifact_id": asset.fingerprint(),
                "mime_type": asset.mime_type,
                "bytes": asset.bytes.len(),
            }),
        );
    }

    fn record_failure(&self, batch_id: &str, slot: Option<usize>, label: &str, error: &str) {
        self.record(
            "batch_failed",
            json!({
                "batch_id": batch_id,
                "slot": slot,
                "label": label,
                "error": error,
            }),
        );
    }

    /// Event log failures never fail a generation.
    fn record(&self, event_type: &str, value: serde_json::Value) {
        let event: EventPayload = payload(value);
        if let Err(err) = self.events.emit(event_type, event) {
            warn!(event_type, error = %err, "failed to record studio event");
        }
    }
}

fn new_batch_id() -> String {
    format!("batch-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use serde_json::Value;
    use studio_contracts::request::{AspectRatio, EditPlan, GeneratePlan, StoryboardPlan};

    use super::*;
    use crate::testing::{scene_requests, ScriptedCapability};

    fn orchestrator(
        capability: ScriptedCapability,
    ) -> anyhow::Result<(tempfile::TempDir, Orchestrator, Arc<ScriptedCapability>)> {
        let temp = tempfile::tempdir()?;
        let capability = Arc::new(capability);
        let events = EventWriter::new(temp.path().join("events.jsonl"), "session-test");
        let orchestrator = Orchestrator::new(capability.clone(), events);
        Ok((temp, orchestrator, capability))
    }

    fn event_types(temp: &tempfile::TempDir) -> anyhow::Result<Vec<String>> {
        let raw = fs::read_to_string(temp.path().join("events.jsonl"))?;
        raw.lines()
            .map(|line| {
                let value: Value = serde_json::from_str(line)?;
                Ok(value["type"].as_str().unwrap_or_default().to_string())
            })
            .collect()
    }

    #[test]
    fn single_scene_lands_in_slot_zero() -> anyhow::Result<()> {
        let (_temp, orchestrator, _) = orchestrator(ScriptedCapability::new())?;
        let requests = scene_requests(&["A hero discovers a glowing orb"])?;

        let assets = orchestrator.storyboard(requests)?;
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].index, 0);
        assert_eq!(assets[0].bytes, b"scene:A hero discovers a glowing orb".to_vec());
        assert_eq!(assets[0].file_name(), "a_hero_discovers_a_glowing_orb_1.png");
        Ok(())
    }

    #[test]
    fn slot_order_follows_requests_not_completion() -> anyhow::Result<()> {
        let prompts = ["first", "second", "third", "fourth", "fifth"];
        // Each permutation makes a different slot finish first.
        let permutations: [[u64; 5]; 3] = [
            [50, 40, 30, 20, 0],
            [0, 45, 10, 35, 20],
            [30, 0, 50, 5, 15],
        ];
        for delays in permutations {
            let (_temp, orchestrator, capability) =
                orchestrator(ScriptedCapability::new().with_delays(&delays))?;
            let batch = orchestrator.fan_out(scene_requests(&prompts)?, FanOutOp::Scene)?;

            assert_eq!(batch.results.len(), prompts.len());
            for (slot, outcome) in batch.results.iter().enumerate() {
                let asset = outcome
                    .success()
                    .ok_or_else(|| anyhow::anyhow!("slot {slot} failed"))?;
                assert_eq!(asset.index, slot);
                assert_eq!(asset.bytes, format!("scene:{}", prompts[slot]).into_bytes());
            }
            assert_eq!(capability.calls(), prompts.len());
        }
        Ok(())
    }

    #[test]
    fn calls_are_dispatched_concurrently() -> anyhow::Result<()> {
        let (_temp, orchestrator, capability) =
            orchestrator(ScriptedCapability::new().with_delays(&[150, 150, 150, 150]))?;
        orchestrator.fan_out(scene_requests(&["a", "b", "c", "d"])?, FanOutOp::Scene)?;
        assert_eq!(capability.peak_in_flight(), 4);
        Ok(())
    }

    #[test]
    fn one_failed_scene_fails_the_storyboard_without_partials() -> anyhow::Result<()> {
        let (temp, orchestrator, capability) = orchestrator(
            ScriptedCapability::new()
                .with_delays(&[0, 30, 10])
                .failing_on("second scene", "content blocked"),
        )?;
        let requests = StoryboardPlan {
            scenes: vec![
                "first scene".to_string(),
                "second scene".to_string(),
                "third scene".to_string(),
            ],
            characters: vec![
                studio_contracts::assets::encode_bytes(b"hero", "image/png"),
                studio_contracts::assets::encode_bytes(b"villain", "image/png"),
            ],
            aspect_ratio: AspectRatio::Landscape,
        }
        .build()?;

        match orchestrator.storyboard(requests) {
            Err(StudioError::SlotFailed { slot, label, source }) => {
                assert_eq!(slot, 1);
                assert_eq!(label, "Scene 2");
                assert_eq!(source.cause, "content blocked");
            }
            other => panic!("expected scene 2 failure, got {other:?}"),
        }
        assert_eq!(capability.calls(), 3);
        assert_eq!(capability.max_reference_assets_seen(), 2);

        let types = event_types(&temp)?;
        assert_eq!(types.first().map(String::as_str), Some("batch_started"));
        assert_eq!(types.last().map(String::as_str), Some("batch_failed"));
        Ok(())
    }

    #[test]
    fn partial_report_is_available_from_the_batch() -> anyhow::Result<()> {
        let (_temp, orchestrator, _) =
            orchestrator(ScriptedCapability::new().failing_on("b", "boom"))?;
        let batch = orchestrator.fan_out(scene_requests(&["a", "b", "c"])?, FanOutOp::Scene)?;
        let report = batch.report();
        assert!(report[0].outcome.is_success());
        assert_eq!(report[1].outcome.failure().map(|err| err.cause.as_str()), Some("boom"));
        assert!(report[2].outcome.is_success());
        assert!(batch.into_assets().is_err());
        Ok(())
    }

    #[test]
    fn empty_fan_out_is_never_dispatched() -> anyhow::Result<()> {
        let (_temp, orchestrator, capability) = orchestrator(ScriptedCapability::new())?;
        let err = orchestrator.fan_out(Vec::new(), FanOutOp::Scene).err();
        assert!(matches!(err, Some(StudioError::Validation(_))));
        assert_eq!(capability.calls(), 0);
        Ok(())
    }

    #[test]
    fn edit_fans_out_four_labelled_variants() -> anyhow::Result<()> {
        let (_temp, orchestrator, capability) = orchestrator(ScriptedCapability::new())?;
        let request = EditPlan {
            prompt: "make it night".to_string(),
            source: Some(studio_contracts::assets::encode_bytes(b"src", "image/png")),
            reference: None,
            aspect_ratio: AspectRatio::Original,
        }
        .build()?;

        let assets = orchestrator.edit_variants(&request)?;
        assert_eq!(assets.len(), EDIT_VARIANT_COUNT);
        assert_eq!(capability.calls(), EDIT_VARIANT_COUNT);
        assert_eq!(
            assets.iter().map(|asset| asset.index).collect::<Vec<usize>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(assets[3].file_name(), "make_it_night_4.png");
        Ok(())
    }

    #[test]
    fn failed_edit_variant_names_the_variant() -> anyhow::Result<()> {
        let (_temp, orchestrator, _) = orchestrator(
            ScriptedCapability::new().failing_on("Variant 3", "rate limited"),
        )?;
        let request = EditPlan {
            prompt: "make it night".to_string(),
            source: Some(studio_contracts::assets::encode_bytes(b"src", "image/png")),
            ..EditPlan::default()
        }
        .build()?;
        let err = orchestrator.edit_variants(&request).err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("Variant 3 failed: rate limited"));
        Ok(())
    }

    #[test]
    fn service_batch_returns_four_indexed_images() -> anyhow::Result<()> {
        let (temp, orchestrator, _) = orchestrator(ScriptedCapability::new())?;
        let request = GeneratePlan {
            prompt: "A hero discovers a glowing orb".to_string(),
            aspect_ratio: AspectRatio::Square,
        }
        .build()?;
        let assets = orchestrator.generate(&request)?;
        assert_eq!(assets.len(), GENERATE_IMAGE_COUNT);
        assert_eq!(assets[2].index, 2);
        assert_eq!(assets[2].origin_prompt, "A hero discovers a glowing orb");

        let types = event_types(&temp)?;
        assert_eq!(
            types.iter().filter(|kind| kind.as_str() == "artifact_created").count(),
            4
        );
        assert_eq!(types.last().map(String::as_str), Some("batch_completed"));
        Ok(())
    }

    #[test]
    fn short_service_batch_is_incomplete_not_partial() -> anyhow::Result<()> {
        let (_temp, orchestrator, _) =
            orchestrator(ScriptedCapability::new().with_generate_count(3))?;
        let request = GeneratePlan {
            prompt: "orb".to_string(),
            aspect_ratio: AspectRatio::Square,
        }
        .build()?;
        match orchestrator.generate(&request) {
            Err(StudioError::IncompleteBatch { expected, received }) => {
                assert_eq!((expected, received), (4, 3));
            }
            other => panic!("expected incomplete batch, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn service_batch_failure_propagates_cause() -> anyhow::Result<()> {
        let (_temp, orchestrator, _) =
            orchestrator(ScriptedCapability::new().failing_on("orb", "quota exceeded"))?;
        let request = GeneratePlan {
            prompt: "orb".to_string(),
            aspect_ratio: AspectRatio::Square,
        }
        .build()?;
        let err = orchestrator.generate(&request).err();
        assert!(matches!(err, Some(StudioError::Capability(ref cause)) if cause.cause == "quota exceeded"));
        Ok(())
    }
}
