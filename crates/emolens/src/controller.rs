use crate::state::{StateStore, Ticket};
use emolens_core::{
    DecodeError, EmotionLabel, ImageResizer, InferenceError, LoadError, MapperError, ModelCache,
    ModelLoader, RawImage, TensorBuilder, TensorError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("model load error: {0}")]
    ModelLoad(#[from] LoadError),
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("{0}")]
    Scores(#[from] MapperError),
}

/// How a finished upload relates to what is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The label is now displayed.
    Displayed(EmotionLabel),
    /// A newer upload started meanwhile; this label was discarded.
    Superseded(EmotionLabel),
}

/// Runs the upload sequence: preview, resize, tensor, model, label.
pub struct UploadController<L> {
    state: StateStore,
    resizer: ImageResizer,
    models: ModelCache<L>,
}

impl<L: ModelLoader> UploadController<L> {
    pub fn new(resizer: ImageResizer, models: ModelCache<L>) -> Self {
        Self {
            state: StateStore::new(),
            resizer,
            models,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    #[cfg(test)]
    pub fn models(&self) -> &ModelCache<L> {
        &self.models
    }

    /// Handle one file selection end to end.
    pub async fn upload(&self, raw: RawImage) -> Result<UploadOutcome, PipelineError> {
        let ticket = self.select(&raw);
        self.process(ticket, &raw).await
    }

    /// Show the preview and issue this upload's ticket.
    pub fn select(&self, raw: &RawImage) -> Ticket {
        let ticket = self.state.begin(raw.preview());
        tracing::info!(
            generation = ticket.generation(),
            name = raw.name(),
            mime = raw.mime(),
            "upload selected"
        );
        ticket
    }

    /// Run inference for a selected upload and publish the label if still current.
    pub async fn process(
        &self,
        ticket: Ticket,
        raw: &RawImage,
    ) -> Result<UploadOutcome, PipelineError> {
        match self.classify(raw).await {
            Ok(label) => {
                if self.state.complete(ticket, label) {
                    tracing::info!(generation = ticket.generation(), %label, "emotion displayed");
                    Ok(UploadOutcome::Displayed(label))
                } else {
                    tracing::debug!(
                        generation = ticket.generation(),
                        %label,
                        "newer upload in flight; discarding result"
                    );
                    Ok(UploadOutcome::Superseded(label))
                }
            }
            Err(e) => {
                tracing::warn!(
                    generation = ticket.generation(),
                    name = raw.name(),
                    error = %e,
                    "upload failed; label left unchanged"
                );
                self.state.fail(ticket, e.to_string());
                Err(e)
            }
        }
    }

    async fn classify(&self, raw: &RawImage) -> Result<EmotionLabel, PipelineError> {
        let resized = self.resizer.resize_async(raw).await?;
        let tensor = TensorBuilder::build_async(resized).await?;
        let model = self.models.get().await?;
        let scores = model.clone().predict(tensor).await?;
        tracing::debug!(scores = ?scores.as_slice(), version = model.version(), "forward pass");
        Ok(model.labels().map(&scores)?)
    }
}
