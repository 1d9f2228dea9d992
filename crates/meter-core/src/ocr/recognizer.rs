//! Digit-group recognition with a CRNN/CTC model.

use std::path::Path;

use image::RgbImage;
use ndarray::ArrayD;
use tracing::{debug, trace};

use crate::error::OcrError;
use meter_inference::{InferenceBackend, InputTensor};

use super::preprocessing::ImagePreprocessor;
use super::TextRecognizer;

/// CTC text recognizer.
///
/// The model emits `[1, T, classes]` scores; class 0 is the CTC blank and
/// class `i` maps to `dictionary[i]`.
pub struct CtcRecognizer<B: InferenceBackend> {
    backend: B,
    preprocessor: ImagePreprocessor,
    dictionary: Vec<char>,
}

impl<B: InferenceBackend> CtcRecognizer<B> {
    /// Create a recognizer with the given backend and dictionary.
    pub fn new(backend: B, dictionary: Vec<char>) -> Self {
        Self {
            backend,
            preprocessor: ImagePreprocessor::new(),
            dictionary,
        }
    }

    /// Set the model input height and maximum width.
    pub fn with_input_size(mut self, height: u32, max_width: u32) -> Self {
        self.preprocessor = self.preprocessor.with_recognition_size(height, max_width);
        self
    }

    /// Load a dictionary file with one character per line.
    pub fn load_dictionary(path: &Path) -> Result<Vec<char>, OcrError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OcrError::ModelLoad(format!("failed to load dictionary: {}", e)))?;

        let mut chars = vec![' '];
        chars.extend(content.lines().filter_map(|line| line.chars().next()));

        debug!("Loaded dictionary with {} characters", chars.len());
        Ok(chars)
    }

    /// Blank, digits, then ASCII letters.
    pub fn default_dictionary() -> Vec<char> {
        let mut chars = vec![' '];
        chars.extend('0'..='9');
        chars.extend('A'..='Z');
        chars.extend('a'..='z');
        chars
    }

    /// Greedy CTC decode: argmax per step, drop blanks and repeats.
    pub(crate) fn decode(&self, output: &ArrayD<f32>) -> Result<String, OcrError> {
        let shape = output.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(OcrError::Recognition(format!(
                "unexpected output shape: {:?}",
                shape
            )));
        }

        let (steps, classes) = (shape[1], shape[2]);
        let mut text = String::new();
        let mut prev = 0usize;

        for t in 0..steps {
            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..classes {
                let score = output[[0, t, c]];
                if score > best_score {
                    best_score = score;
                    best = c;
                }
            }

            if best != 0 && best != prev {
                match self.dictionary.get(best) {
                    Some(&ch) => text.push(ch),
                    None => {
                        return Err(OcrError::Recognition(format!(
                            "class {} outside dictionary of {}",
                            best,
                            self.dictionary.len()
                        )));
                    }
                }
            }
            prev = best;
        }

        Ok(text)
    }
}

impl<B: InferenceBackend> TextRecognizer for CtcRecognizer<B> {
    fn recognize(&self, crop: &RgbImage) -> Result<String, OcrError> {
        let tensor = self.preprocessor.preprocess_for_recognition(crop)?;

        let output = self
            .backend
            .run_single(InputTensor::Float32(tensor.into_dyn()))
            .map_err(|e| OcrError::Recognition(e.to_string()))?
            .into_f32()
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        let text = self.decode(&output)?;
        trace!("Recognized {:?}", text);
        Ok(text)
    }
}
