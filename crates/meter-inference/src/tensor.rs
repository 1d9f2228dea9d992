//! Tensor types exchanged with inference backends.

use ndarray::ArrayD;

use crate::{InferenceError, Result};

/// Input tensor for inference.
///
/// Both meter models take a single NCHW float image tensor.
#[derive(Debug, Clone)]
pub enum InputTensor {
    Float32(ArrayD<f32>),
}

impl InputTensor {
    /// Shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        match self {
            InputTensor::Float32(arr) => arr.shape(),
        }
    }
}

/// Output tensor from inference.
///
/// Integer outputs are extracted so they can be reported, but neither meter
/// model produces one.
#[derive(Debug, Clone)]
pub enum OutputTensor {
    Float32(ArrayD<f32>),
    Int64(ArrayD<i64>),
}

impl OutputTensor {
    /// Consume the tensor and return the Float32 array.
    pub fn into_f32(self) -> Result<ArrayD<f32>> {
        match self {
            OutputTensor::Float32(arr) => Ok(arr),
            OutputTensor::Int64(_) => Err(InferenceError::OutputExtraction(
                "expected f32 output, got i64".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_input_shape() {
        let tensor = InputTensor::Float32(ArrayD::<f32>::zeros(IxDyn(&[1, 3, 48, 320])));
        assert_eq!(tensor.shape(), &[1, 3, 48, 320]);
    }

    #[test]
    fn test_into_f32() {
        let arr = ArrayD::<f32>::zeros(IxDyn(&[2, 2]));
        assert_eq!(OutputTensor::Float32(arr).into_f32().unwrap().len(), 4);

        let ints = OutputTensor::Int64(ArrayD::<i64>::zeros(IxDyn(&[1])));
        assert!(matches!(ints.into_f32(), Err(InferenceError::OutputExtraction(_))));
    }
}
