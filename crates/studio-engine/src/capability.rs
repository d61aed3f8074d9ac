use studio_contracts::assets::ImageAsset;
use studio_contracts::errors::CapabilityError;
use studio_contracts::request::GenerationRequest;

/// Boundary to the external generative service.
///
/// Implementations perform exactly one remote operation per call and never
/// retry; retry policy, if any, belongs to the caller.
pub trait GenerationCapability: Send + Sync {
    fn name(&self) -> &str;

    /// `count` independent variations of one prompt, produced by the service
    /// in a single call.
    fn generate(
        &self,
        request: &GenerationRequest,
        count: usize,
    ) -> Result<Vec<ImageAsset>, CapabilityError>;

    /// Exactly one image honoring the request's reference assets.
    fn generate_scene(&self, request: &GenerationRequest) -> Result<ImageAsset, CapabilityError>;

    /// Exactly one edited image. The first reference asset is the source,
    /// the optional second one guides the edit.
    fn edit_image(&self, request: &GenerationRequest) -> Result<ImageAsset, CapabilityError>;

    fn open_session(
        &self,
        system_instruction: &str,
    ) -> Result<Box<dyn ChatSession>, CapabilityError>;
}

/// Stateful conversation held by the service. One call at a time.
pub trait ChatSession: Send {
    fn send(&mut self, text: &str) -> Result<String, CapabilityError>;
}
