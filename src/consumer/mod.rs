//! Terminal pipeline stages that turn streams into events or training
//!
//! Consumers share the input layout logic: several inputs can be merged into
//! one wider stream, then a subset of channels selected, before each sample
//! reaches the model.

pub mod annotation;
pub mod classifier;
pub mod event;
pub mod trainer;

pub use annotation::{Annotation, AnnotationEntry};
pub use classifier::{Classifier, ClassifierOptions};
pub use event::{Event, EventData, EventState};
pub use trainer::{Trainer, TrainerOptions};

use crate::error::{Result, SigstreamError};
use crate::stream::{Stream, StreamShape};
use crate::transform::Merge;

/// Terminal stage producing events instead of a stream
pub trait Consumer: Send {
    fn name(&self) -> &'static str;

    /// Prepare for inputs of the given shapes
    ///
    /// Fails on shapes the consumer or its model cannot accept.
    fn enter(&mut self, inputs: &[StreamShape]) -> Result<()>;

    fn consume(&mut self, inputs: &[&Stream]) -> Result<Vec<Event>>;

    /// Release per-run state; safe to call repeatedly
    fn flush(&mut self);
}

// ============================================================================
// Input layout
// ============================================================================

/// Merge and selection applied to consumer inputs
#[derive(Debug, Clone, Default)]
pub(crate) struct InputLayout {
    merge: bool,
    selection: Option<Vec<usize>>,
    row: Vec<f64>,
    values: Vec<f64>,
}

impl InputLayout {
    pub(crate) fn new(merge: bool, selection: Option<Vec<usize>>) -> Self {
        Self {
            merge,
            selection,
            ..Default::default()
        }
    }

    pub(crate) fn selection(&self) -> Option<&[usize]> {
        self.selection.as_deref()
    }

    /// Shape of one sample after merge and selection
    pub(crate) fn shape(&self, component: &str, inputs: &[StreamShape]) -> Result<StreamShape> {
        let merged = match inputs {
            [] => {
                return Err(SigstreamError::ShapeMismatch {
                    component: component.to_string(),
                    reason: "no input stream".to_string(),
                })
            }
            [single] if !self.merge => single.clone(),
            many if self.merge => {
                let dim = Merge::merged_dim(component, many)?;
                StreamShape::new(many[0].num, dim, many[0].sr, Merge::merged_type(many))
            }
            _ => {
                log::error!("[{}] {} inputs without merge", component.to_uppercase(), inputs.len());
                return Err(SigstreamError::ShapeMismatch {
                    component: component.to_string(),
                    reason: format!("{} inputs require merge", inputs.len()),
                });
            }
        };

        match &self.selection {
            None => Ok(merged),
            Some(indices) => {
                if let Some(&bad) = indices.iter().find(|&&i| i >= merged.dim) {
                    log::error!(
                        "[{}] selected channel {} exceeds dimension {}",
                        component.to_uppercase(),
                        bad,
                        merged.dim
                    );
                    return Err(SigstreamError::ShapeMismatch {
                        component: component.to_string(),
                        reason: format!("selected channel {} exceeds dimension {}", bad, merged.dim),
                    });
                }
                Ok(StreamShape {
                    dim: indices.len(),
                    ..merged
                })
            }
        }
    }

    /// Merge `inputs` if configured, returning the stream samples come from
    pub(crate) fn combine<'a>(&self, inputs: &[&'a Stream]) -> Result<std::borrow::Cow<'a, Stream>> {
        if self.merge {
            Ok(std::borrow::Cow::Owned(Merge::merge_streams(inputs)?))
        } else {
            inputs
                .first()
                .map(|s| std::borrow::Cow::Borrowed(*s))
                .ok_or_else(|| SigstreamError::ShapeMismatch {
                    component: "consumer".to_string(),
                    reason: "no input stream".to_string(),
                })
        }
    }

    /// Call `f` with every selected sample of `stream`
    pub(crate) fn for_each_sample<F>(&mut self, stream: &Stream, mut f: F) -> Result<()>
    where
        F: FnMut(&[f64]) -> Result<()>,
    {
        stream.copy_to_f64(&mut self.values)?;
        let dim = stream.dim();
        if dim == 0 {
            return Ok(());
        }
        for full in self.values.chunks_exact(dim) {
            match &self.selection {
                None => f(full)?,
                Some(indices) => {
                    self.row.clear();
                    self.row.extend(indices.iter().map(|&i| full[i]));
                    f(&self.row)?;
                }
            }
        }
        Ok(())
    }
}
