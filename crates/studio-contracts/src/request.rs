use std::fmt;
use std::str::FromStr;

use crate::assets::EncodedAsset;
use crate::errors::StudioError;

pub const RATIO_DIRECTIVE_PREFIX: &str = "Output aspect ratio:";
pub const EDIT_VARIANT_COUNT: usize = 4;
pub const GENERATE_IMAGE_COUNT: usize = 4;
pub const MAX_REFERENCE_ASSETS: usize = 2;

const CHARACTER_CONSISTENCY_INSTRUCTION: &str =
    "Keep every character consistent with the provided character reference images.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Square,
    Portrait,
    Landscape,
    Standard,
    Tall,
    Original,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 6] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Standard,
        AspectRatio::Tall,
        AspectRatio::Original,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Standard => "4:3",
            AspectRatio::Tall => "3:4",
            AspectRatio::Original => "original",
        }
    }

    pub fn is_original(self) -> bool {
        self == AspectRatio::Original
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('/', ":");
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unsupported aspect ratio '{}' (expected one of: {})",
                    raw.trim(),
                    AspectRatio::ALL.map(AspectRatio::as_str).join(", ")
                )
            })
    }
}

/// How the target service consumes the aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioTransport {
    /// A dedicated request field (pure generation).
    Structured,
    /// Free-text guidance appended to the prompt (edits and scenes).
    PromptDirective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPart<'a> {
    Text(&'a str),
    Asset(&'a EncodedAsset),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// What the user typed; names downloads.
    pub source_prompt: String,
    /// What goes over the wire.
    pub prompt_text: String,
    pub aspect_ratio: AspectRatio,
    pub ratio_transport: RatioTransport,
    pub reference_assets: Vec<EncodedAsset>,
    pub label: String,
}

impl GenerationRequest {
    /// Ratio to send as a structured field, if this request carries one.
    pub fn structured_ratio(&self) -> Option<AspectRatio> {
        match self.ratio_transport {
            RatioTransport::Structured if !self.aspect_ratio.is_original() => {
                Some(self.aspect_ratio)
            }
            _ => None,
        }
    }

    /// Assets in order, then the prompt text.
    pub fn parts(&self) -> Vec<RequestPart<'_>> {
        let mut parts = self
            .reference_assets
            .iter()
            .map(RequestPart::Asset)
            .collect::<Vec<RequestPart<'_>>>();
        parts.push(RequestPart::Text(&self.prompt_text));
        parts
    }

    pub fn with_label(&self, label: impl Into<String>) -> Self {
        let mut request = self.clone();
        request.label = label.into();
        request
    }
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    prompt: String,
    aspect_ratio: AspectRatio,
    transport: RatioTransport,
    reference_assets: Vec<EncodedAsset>,
    label: String,
}

impl RequestBuilder {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: AspectRatio::default(),
            transport: RatioTransport::Structured,
            reference_assets: Vec::new(),
            label: "Image".to_string(),
        }
    }

    pub fn aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn transport(mut self, transport: RatioTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Reference assets are kept in call order. The two-slot limit is
    /// enforced by whoever owns the upload slots, not here.
    pub fn reference(mut self, asset: EncodedAsset) -> Self {
        self.reference_assets.push(asset);
        self
    }

    pub fn references(mut self, assets: impl IntoIterator<Item = EncodedAsset>) -> Self {
        self.reference_assets.extend(assets);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn build(self) -> Result<GenerationRequest, StudioError> {
        let source_prompt = self.prompt.trim().to_string();
        if source_prompt.is_empty() {
            return Err(StudioError::validation("Please enter a prompt."));
        }
        let prompt_text = match self.transport {
            RatioTransport::PromptDirective => with_ratio_directive(&source_prompt, self.aspect_ratio),
            RatioTransport::Structured => source_prompt.clone(),
        };
        Ok(GenerationRequest {
            source_prompt,
            prompt_text,
            aspect_ratio: self.aspect_ratio,
            ratio_transport: self.transport,
            reference_assets: self.reference_assets,
            label: self.label,
        })
    }
}

pub fn ratio_directive(aspect_ratio: AspectRatio) -> Option<String> {
    if aspect_ratio.is_original() {
        return None;
    }
    Some(format!("{RATIO_DIRECTIVE_PREFIX} {aspect_ratio}."))
}

fn with_ratio_directive(prompt: &str, aspect_ratio: AspectRatio) -> String {
    let Some(directive) = ratio_directive(aspect_ratio) else {
        return prompt.to_string();
    };
    if prompt.contains(&directive) {
        return prompt.to_string();
    }
    format!("{prompt}\n\n{directive}")
}

#[derive(Debug, Clone, Default)]
pub struct GeneratePlan {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
}

impl GeneratePlan {
    pub fn build(&self) -> Result<GenerationRequest, StudioError> {
        RequestBuilder::new(self.prompt.as_str())
            .aspect_ratio(self.aspect_ratio)
            .transport(RatioTransport::Structured)
            .build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EditPlan {
    pub prompt: String,
    pub source: Option<EncodedAsset>,
    pub reference: Option<EncodedAsset>,
    pub aspect_ratio: AspectRatio,
}

impl EditPlan {
    /// One request; the orchestrator sends it once per variant.
    pub fn build(&self) -> Result<GenerationRequest, StudioError> {
        let Some(source) = self.source.clone() else {
            return Err(StudioError::validation("Please upload an image to edit."));
        };
        RequestBuilder::new(self.prompt.as_str())
            .aspect_ratio(self.aspect_ratio)
            .transport(RatioTransport::PromptDirective)
            .reference(source)
            .references(self.reference.clone())
            .label("Edit")
            .build()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoryboardPlan {
    pub scenes: Vec<String>,
    pub characters: Vec<EncodedAsset>,
    pub aspect_ratio: AspectRatio,
}

impl StoryboardPlan {
    /// One request per non-blank scene, labelled with the scene's position
    /// in the full list so failures point at what the user sees.
    pub fn build(&self) -> Result<Vec<GenerationRequest>, StudioError> {
        let has_characters = !self.characters.is_empty();
        let mut requests = Vec::new();
        for (idx, scene) in self.scenes.iter().enumerate() {
            let scene = scene.trim();
            if scene.is_empty() {
                continue;
            }
            let mut request = RequestBuilder::new(scene)
                .aspect_ratio(self.aspect_ratio)
                .transport(RatioTransport::PromptDirective)
                .references(self.characters.iter().cloned())
                .label(format!("Scene {}", idx + 1))
                .build()?;
            if has_characters {
                request.prompt_text =
                    format!("{}\n\n{CHARACTER_CONSISTENCY_INSTRUCTION}", request.prompt_text);
            }
            requests.push(request);
        }
        if requests.is_empty() {
            return Err(StudioError::validation(
                "Please describe at least one scene.",
            ));
        }
        Ok(requests)
    }
}
