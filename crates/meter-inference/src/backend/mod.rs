//! Inference backend implementations.

#[cfg(feature = "native")]
pub mod ort;

use crate::{InputTensor, OutputTensor, Result};

/// Trait for ONNX inference backends.
///
/// Implementations must be shareable across request threads; the server
/// runs one pipeline per request on the blocking pool.
pub trait InferenceBackend: Send + Sync {
    /// Run inference with the given named inputs.
    fn run(&self, inputs: &[(&str, InputTensor)]) -> Result<Vec<(String, OutputTensor)>>;

    /// Input names expected by the model.
    fn input_names(&self) -> &[String];

    /// Output names produced by the model.
    fn output_names(&self) -> &[String];

    /// Run a single-input model and return its first output.
    fn run_single(&self, input: InputTensor) -> Result<OutputTensor> {
        let name = self
            .input_names()
            .first()
            .cloned()
            .unwrap_or_else(|| "images".to_string());

        self.run(&[(name.as_str(), input)])?
            .into_iter()
            .next()
            .map(|(_, tensor)| tensor)
            .ok_or_else(|| crate::InferenceError::OutputExtraction("model produced no output".to_string()))
    }
}
