use crate::assets::ImageAsset;
use crate::errors::{CapabilityError, StudioError};
use crate::request::GenerationRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    Failure(CapabilityError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&CapabilityError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(err) => Some(err),
        }
    }
}

impl<T> From<Result<T, CapabilityError>> for Outcome<T> {
    fn from(result: Result<T, CapabilityError>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        }
    }
}

/// Per-slot view of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub slot: usize,
    pub label: String,
    pub outcome: Outcome<ImageAsset>,
}

/// Requests issued together and their results, `results[i]` answering
/// `requests[i]`.
#[derive(Debug, Clone)]
pub struct GenerationBatch {
    pub batch_id: String,
    pub requests: Vec<GenerationRequest>,
    pub results: Vec<Outcome<ImageAsset>>,
}

impl GenerationBatch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|outcome| outcome.is_success()).count()
    }

    /// Lowest slot that failed, with its request label.
    pub fn first_failure(&self) -> Option<(usize, &str, &CapabilityError)> {
        self.results
            .iter()
            .enumerate()
            .find_map(|(slot, outcome)| outcome.failure().map(|err| (slot, err)))
            .map(|(slot, err)| {
                let label = self
                    .requests
                    .get(slot)
                    .map(|request| request.label.as_str())
                    .unwrap_or("Request");
                (slot, label, err)
            })
    }

    pub fn report(&self) -> Vec<SlotReport> {
        self.requests
            .iter()
            .zip(self.results.iter())
            .enumerate()
            .map(|(slot, (request, outcome))| SlotReport {
                slot,
                label: request.label.clone(),
                outcome: outcome.clone(),
            })
            .collect()
    }

    /// All-or-nothing: every asset in slot order, or the first failed slot.
    pub fn into_assets(self) -> Result<Vec<ImageAsset>, StudioError> {
        if let Some((slot, label, err)) = self.first_failure() {
            return Err(StudioError::SlotFailed {
                slot,
                label: label.to_string(),
                source: err.clone(),
            });
        }
        Ok(self
            .results
            .into_iter()
            .filter_map(|outcome| match outcome {
                Outcome::Success(asset) => Some(asset),
                Outcome::Failure(_) => None,
            })
            .collect())
    }
}
