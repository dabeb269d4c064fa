//! Classification consumer
//!
//! Feeds every sample of a chunk through the model, averages the resulting
//! probability vectors and emits one event per chunk spanning the chunk.

use super::event::to_ms;
use super::{Consumer, Event, EventData, InputLayout};
use crate::error::{Result, SigstreamError};
use crate::model::{ModelHandle, ModelRegistry, SharedModel};
use crate::stream::{Stream, StreamShape};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    /// Merge all inputs into one stream before classification
    pub merge: bool,
    /// Channels fed to the model; empty uses the descriptor's selection
    pub select: Vec<usize>,
    /// Emit only the winning class instead of all probabilities
    pub best_match_only: bool,
    pub event_name: String,
    pub sender_name: String,
    /// Events whose best probability falls below this are suppressed
    pub min_probability: f64,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            merge: false,
            select: Vec::new(),
            best_match_only: true,
            event_name: "class".to_string(),
            sender_name: "classifier".to_string(),
            min_probability: 0.0,
        }
    }
}

pub struct Classifier {
    options: ClassifierOptions,
    registry: Arc<ModelRegistry>,
    handle: ModelHandle,
    model: Option<SharedModel>,
    layout: InputLayout,
    sum: Vec<f64>,
}

impl Classifier {
    pub fn new(options: ClassifierOptions, registry: Arc<ModelRegistry>, handle: ModelHandle) -> Self {
        Self {
            options,
            registry,
            handle,
            model: None,
            layout: InputLayout::default(),
            sum: Vec::new(),
        }
    }

    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    /// The shared model, once entered
    pub fn model(&self) -> Option<&SharedModel> {
        self.model.as_ref()
    }

    fn event(&self, stream: &Stream, probabilities: &[f64], classes: &[String]) -> Option<Event> {
        let (best, &p_best) = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        if p_best < self.options.min_probability {
            log::debug!(
                "[CLASSIFIER] '{}' at {:.3} below threshold {}",
                classes[best],
                p_best,
                self.options.min_probability
            );
            return None;
        }
        let data = if self.options.best_match_only {
            EventData::Classification {
                class: classes[best].clone(),
                probability: p_best,
            }
        } else {
            EventData::Probabilities(
                classes
                    .iter()
                    .cloned()
                    .zip(probabilities.iter().copied())
                    .collect(),
            )
        };
        Some(Event::new(
            &self.options.event_name,
            &self.options.sender_name,
            to_ms(stream.time()),
            to_ms(stream.duration()),
            data,
        ))
    }
}

impl Consumer for Classifier {
    fn name(&self) -> &'static str {
        "classifier"
    }

    /// Resolve the layout, wait for the model and validate the input
    ///
    /// Blocks until the model is trained or its load failed.
    fn enter(&mut self, inputs: &[StreamShape]) -> Result<()> {
        let selection = if self.options.select.is_empty() {
            self.registry
                .descriptor(self.handle)?
                .selection
                .as_ref()
                .map(|s| s.indices.clone())
        } else {
            Some(self.options.select.clone())
        };
        self.layout = InputLayout::new(self.options.merge, selection);
        let shape = self.layout.shape(self.name(), inputs)?;

        self.registry.load_model(self.handle)?;
        let model = self.registry.wait_for_model_load(self.handle)?;
        model.read().validate_input(&shape)?;
        log::info!(
            "[CLASSIFIER] ready with {} inputs, {} features",
            inputs.len(),
            shape.dim
        );
        self.model = Some(model);
        Ok(())
    }

    fn consume(&mut self, inputs: &[&Stream]) -> Result<Vec<Event>> {
        let model = self
            .model
            .clone()
            .ok_or_else(|| SigstreamError::NotTrained {
                model: self.registry.name(self.handle).unwrap_or_default(),
            })?;
        let stream = self.layout.combine(inputs)?;
        if stream.num() == 0 {
            return Ok(Vec::new());
        }

        let guard = model.read();
        self.sum.clear();
        self.sum.resize(guard.num_classes(), 0.0);
        let sum = &mut self.sum;
        let result = self.layout.for_each_sample(&stream, |sample| {
            let probabilities = guard.forward(sample)?;
            for (total, p) in sum.iter_mut().zip(probabilities) {
                *total += p;
            }
            Ok(())
        });
        match result {
            Err(SigstreamError::NotTrained { model }) => {
                log::warn!("[CLASSIFIER] model '{}' not trained, no result", model);
                return Ok(Vec::new());
            }
            other => other?,
        }

        let n = stream.num() as f64;
        let averaged: Vec<f64> = self.sum.iter().map(|s| s / n).collect();
        Ok(self
            .event(&stream, &averaged, guard.classes())
            .into_iter()
            .collect())
    }

    fn flush(&mut self) {
        self.sum.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelKind};
    use crate::stream::SampleType;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    fn trained_model() -> Model {
        let mut model = Model::new(ModelKind::OnlineNaiveBayes);
        model.setup(vec!["low".into(), "high".into()], 8, 1, 10.0, SampleType::Double);
        for x in [0.0, 0.2, 0.1] {
            model.train(&[x], "low").unwrap();
        }
        for x in [5.0, 5.2, 5.1] {
            model.train(&[x], "high").unwrap();
        }
        model
    }

    fn registry_with_model(dir: &TempDir) -> (Arc<ModelRegistry>, ModelHandle) {
        let path = trained_model().save(dir.path(), "levels").unwrap();
        let registry = Arc::new(ModelRegistry::new());
        let handle = registry.create("levels").unwrap();
        registry.resolve_file(handle, &path).unwrap();
        (registry, handle)
    }

    #[test]
    fn test_one_event_per_chunk() {
        let dir = TempDir::new().unwrap();
        let (registry, handle) = registry_with_model(&dir);
        let mut classifier = Classifier::new(ClassifierOptions::default(), registry, handle);
        let shape = StreamShape::new(4, 1, 10.0, SampleType::Double);
        classifier.enter(&[shape]).unwrap();

        let chunk = Stream::from_f64(vec![5.0, 5.1, 4.9, 5.2], 1, 10.0, 2.0).unwrap();
        let events = classifier.consume(&[&chunk]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time_ms, 2000);
        assert_eq!(events[0].duration_ms, 400);
        let (class, p) = events[0].best().unwrap();
        assert_eq!(class, "high");
        assert!(p > 0.9);
    }

    #[test]
    fn test_full_probabilities_sum_to_one() {
        let dir = TempDir::new().unwrap();
        let (registry, handle) = registry_with_model(&dir);
        let options = ClassifierOptions {
            best_match_only: false,
            ..Default::default()
        };
        let mut classifier = Classifier::new(options, registry, handle);
        classifier
            .enter(&[StreamShape::new(2, 1, 10.0, SampleType::Double)])
            .unwrap();
        let chunk = Stream::from_f64(vec![0.0, 5.0], 1, 10.0, 0.0).unwrap();
        let events = classifier.consume(&[&chunk]).unwrap();
        let EventData::Probabilities(values) = &events[0].data else {
            panic!("expected probabilities");
        };
        assert_eq!(values.len(), 2);
        assert_abs_diff_eq!(values.iter().map(|v| v.1).sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_threshold_and_selection() {
        let dir = TempDir::new().unwrap();
        let (registry, handle) = registry_with_model(&dir);
        let options = ClassifierOptions {
            select: vec![1],
            min_probability: 0.999_999,
            ..Default::default()
        };
        let mut classifier = Classifier::new(options, registry, handle);
        classifier
            .enter(&[StreamShape::new(1, 2, 10.0, SampleType::Double)])
            .unwrap();
        // Halfway between the classes, suppressed
        let chunk = Stream::from_f64(vec![0.0, 2.6], 2, 10.0, 0.0).unwrap();
        assert!(classifier.consume(&[&chunk]).unwrap().is_empty());
    }

    #[test]
    fn test_enter_rejects_wrong_dimension() {
        let dir = TempDir::new().unwrap();
        let (registry, handle) = registry_with_model(&dir);
        let mut classifier = Classifier::new(ClassifierOptions::default(), registry, handle);
        let err = classifier
            .enter(&[StreamShape::new(1, 3, 10.0, SampleType::Double)])
            .unwrap_err();
        assert!(err.is_configuration_fault());
    }
}
