//! Scripted models for tests.

use crate::inference::{InferenceModel, ModelLoader, TensorNames};
use anyhow::{anyhow, bail, Result};
use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Responder = Box<dyn FnMut(&ArrayD<f32>, &TensorNames) -> Result<ArrayD<f32>> + Send>;

/// Model whose output is produced by a closure
pub struct MockModel {
    responder: Responder,
    calls: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<(Vec<usize>, TensorNames)>>>,
}

impl MockModel {
    pub fn new(
        responder: impl FnMut(&ArrayD<f32>, &TensorNames) -> Result<ArrayD<f32>> + Send + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always returns `values` with the given shape
    pub fn constant(shape: &[usize], values: Vec<f32>) -> Self {
        let shape = shape.to_vec();
        Self::new(move |_, _| {
            ArrayD::from_shape_vec(IxDyn(&shape), values.clone())
                .map_err(|e| anyhow!("bad mock output shape: {}", e))
        })
    }

    /// Always fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_, _| Err(anyhow!("{}", message)))
    }

    /// Shared counter of `infer` calls
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Shared log of (input shape, tensor names) per call
    pub fn input_log(&self) -> Arc<Mutex<Vec<(Vec<usize>, TensorNames)>>> {
        Arc::clone(&self.inputs)
    }
}

impl InferenceModel for MockModel {
    fn infer(&mut self, input: ArrayD<f32>, names: &TensorNames) -> Result<ArrayD<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.inputs.lock() {
            log.push((input.shape().to_vec(), names.clone()));
        }
        (self.responder)(&input, names)
    }

    fn execution_provider(&self) -> &str {
        "mock"
    }
}

type Factory = Box<dyn Fn() -> MockModel + Send + Sync>;

/// Loader that hands out fresh mock models per reference. Unknown
/// references fail the same way a missing model file does.
#[derive(Default)]
pub struct MockModelLoader {
    factories: HashMap<String, Factory>,
}

impl MockModelLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(
        mut self,
        reference: impl Into<String>,
        factory: impl Fn() -> MockModel + Send + Sync + 'static,
    ) -> Self {
        self.factories.insert(reference.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.factories.contains_key(reference)
    }
}

impl ModelLoader for MockModelLoader {
    fn load(&self, model_reference: &str) -> Result<Box<dyn InferenceModel>> {
        match self.factories.get(model_reference) {
            Some(factory) => Ok(Box::new(factory())),
            None => bail!("model artifact not found: {}", model_reference),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_model() {
        let mut model = MockModel::constant(&[1, 2], vec![0.25, 0.75]);
        let counter = model.call_counter();
        let names = TensorNames::new("in", "out");

        let out = model.infer(ArrayD::zeros(IxDyn(&[1, 3])), &names).unwrap();
        assert_eq!(out.shape(), &[1, 2]);
        assert_eq!(out[[0, 1]], 0.75);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(model.input_log().lock().unwrap()[0].0, vec![1, 3]);
    }

    #[test]
    fn test_failing_model() {
        let mut model = MockModel::failing("boom");
        let err = model
            .infer(ArrayD::zeros(IxDyn(&[1])), &TensorNames::new("a", "b"))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_loader_unknown_reference() {
        let loader = MockModelLoader::new().with_model("known.onnx", || {
            MockModel::constant(&[1], vec![1.0])
        });
        assert!(loader.contains("known.onnx"));
        assert!(loader.load("known.onnx").is_ok());
        let err = loader.load("missing.onnx").err().unwrap();
        assert!(err.to_string().contains("not found"));
    }
}
