//! Training consumer
//!
//! Online training follows label events: after [`Trainer::notify`] every
//! consumed sample is trained with the current label. Batch training takes a
//! recorded stream plus an [`Annotation`] and trains on every labelled
//! interval in one pass.

use super::{Annotation, Consumer, Event, EventData, InputLayout};
use crate::error::Result;
use crate::model::{ModelDescriptor, Selection, SharedModel};
use crate::stream::{Stream, StreamShape};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerOptions {
    pub merge: bool,
    /// Channels fed to the model; empty feeds all
    pub select: Vec<usize>,
}

pub struct Trainer {
    options: TrainerOptions,
    model: SharedModel,
    layout: InputLayout,
    streams: Vec<StreamShape>,
    label: Option<String>,
    trained_samples: usize,
}

impl Trainer {
    pub fn new(options: TrainerOptions, model: SharedModel) -> Self {
        let selection = (!options.select.is_empty()).then(|| options.select.clone());
        Self {
            layout: InputLayout::new(options.merge, selection),
            options,
            model,
            streams: Vec::new(),
            label: None,
            trained_samples: 0,
        }
    }

    pub fn options(&self) -> &TrainerOptions {
        &self.options
    }

    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    /// Current label from a label event, or the event's name
    pub fn notify(&mut self, event: &Event) {
        let label = match &event.data {
            EventData::Label(label) => label.clone(),
            _ => event.name.clone(),
        };
        log::debug!("[TRAINER] label '{}'", label);
        self.label = Some(label);
    }

    pub fn clear_label(&mut self) {
        self.label = None;
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Samples trained since the last flush
    pub fn trained_samples(&self) -> usize {
        self.trained_samples
    }

    /// Train on every labelled interval of `stream`; returns the sample count
    ///
    /// All intervals are collected first and handed to the model at once, so
    /// batch estimators see the complete training set.
    pub fn train_batch(&mut self, stream: &Stream, annotation: &Annotation) -> Result<usize> {
        let mut samples = Vec::new();
        for entry in annotation.entries() {
            let interval = stream.sub_range(entry.from, entry.to);
            if interval.num() == 0 {
                log::warn!(
                    "[TRAINER] interval [{}, {}) '{}' holds no samples",
                    entry.from,
                    entry.to,
                    entry.label
                );
                continue;
            }
            self.layout.for_each_sample(&interval, |sample| {
                samples.push((sample.to_vec(), entry.label.clone()));
                Ok(())
            })?;
        }
        self.model.write().train_batch(&samples)?;
        log::info!(
            "[TRAINER] trained on {} samples from {} intervals",
            samples.len(),
            annotation.len()
        );
        Ok(samples.len())
    }

    /// Write descriptor, parameters and options into `dir`
    pub fn save(&self, dir: &Path, name: &str) -> Result<PathBuf> {
        let model = self.model.read();
        let streams = if self.streams.is_empty() {
            let input = model.input();
            vec![StreamShape {
                num: 1,
                dim: input.dim,
                bytes: input.bytes,
                sample_type: input.sample_type,
                sr: input.sr,
            }]
        } else {
            self.streams.clone()
        };
        let selection = self.layout.selection().map(|indices| Selection {
            stream: 0,
            indices: indices.to_vec(),
        });
        ModelDescriptor::for_model(&model, name, streams, selection).save(dir, &model)
    }
}

impl Consumer for Trainer {
    fn name(&self) -> &'static str {
        "trainer"
    }

    fn enter(&mut self, inputs: &[StreamShape]) -> Result<()> {
        let shape = self.layout.shape(self.name(), inputs)?;
        self.model.read().validate_input(&shape)?;
        self.streams = inputs
            .iter()
            .map(|s| StreamShape { num: 1, ..s.clone() })
            .collect();
        Ok(())
    }

    fn consume(&mut self, inputs: &[&Stream]) -> Result<Vec<Event>> {
        let Some(label) = self.label.clone() else {
            log::debug!("[TRAINER] no label, skipping chunk");
            return Ok(Vec::new());
        };
        let stream = self.layout.combine(inputs)?;
        let mut model = self.model.write();
        let mut count = 0;
        self.layout.for_each_sample(&stream, |sample| {
            model.train(sample, &label)?;
            count += 1;
            Ok(())
        })?;
        self.trained_samples += count;
        Ok(Vec::new())
    }

    fn flush(&mut self) {
        self.label = None;
        self.trained_samples = 0;
    }
}
