//! Trained models
//!
//! A [`Model`] couples an expected input shape and ordered class list with
//! kind-specific parameters. Kinds form a closed set ([`ModelKind`]); each
//! carries its own parameter struct inside [`ModelParams`].
//!
//! Lifecycle: `Model::new(kind)` → [`Model::setup`] → [`Model::load`] (or
//! training) → `trained`. Descriptors and the shared-model rendezvous live in
//! [`descriptor`] and [`registry`].

pub mod descriptor;
pub mod naive_bayes;
pub mod registry;
pub mod svm;

pub use descriptor::{ModelDescriptor, Selection, DESCRIPTOR_EXTENSION, DESCRIPTOR_VERSION};
pub use naive_bayes::{ClassStats, FeatureStats, NaiveBayes, NaiveBayesOptions, LEGACY_WEIGHT_SUM};
pub use registry::{DescriptorSource, ModelHandle, ModelRegistry, ModelState, SharedModel};
pub use svm::{LinearClass, Svm, SvmOptions};

use crate::error::{Result, SigstreamError};
use crate::math::normalize_probabilities;
use crate::options;
use crate::stream::{SampleType, StreamShape};
use std::fmt;
use std::path::Path;

// ============================================================================
// Kinds
// ============================================================================

/// Supported model kinds, named as in descriptor files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    NaiveBayes,
    OnlineNaiveBayes,
    Svm,
    /// Caller-supplied [`Predictor`]
    External,
}

impl ModelKind {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "NaiveBayes" => Ok(ModelKind::NaiveBayes),
            "OnlineNaiveBayes" => Ok(ModelKind::OnlineNaiveBayes),
            "Svm" | "SVM" => Ok(ModelKind::Svm),
            "External" => Ok(ModelKind::External),
            other => Err(SigstreamError::ModelNotFound {
                model: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::NaiveBayes => "NaiveBayes",
            ModelKind::OnlineNaiveBayes => "OnlineNaiveBayes",
            ModelKind::Svm => "Svm",
            ModelKind::External => "External",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque inference backend plugged in as [`ModelKind::External`]
///
/// Scores need not be normalised; the model renormalises them.
pub trait Predictor: Send + Sync + fmt::Debug {
    fn load(&mut self, path: &Path) -> Result<()>;

    fn predict(&self, features: &[f64]) -> Result<Vec<f64>>;
}

/// Trained parameters per kind
#[derive(Debug)]
pub enum ModelParams {
    NaiveBayes(NaiveBayes),
    OnlineNaiveBayes(NaiveBayes),
    Svm(Svm),
    External(Option<Box<dyn Predictor>>),
}

impl ModelParams {
    fn empty(kind: ModelKind) -> Self {
        match kind {
            ModelKind::NaiveBayes => ModelParams::NaiveBayes(NaiveBayes::default()),
            ModelKind::OnlineNaiveBayes => ModelParams::OnlineNaiveBayes(NaiveBayes::default()),
            ModelKind::Svm => ModelParams::Svm(Svm::default()),
            ModelKind::External => ModelParams::External(None),
        }
    }
}

// ============================================================================
// Model
// ============================================================================

/// Expected input of a model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub sample_type: SampleType,
    pub bytes: usize,
    pub dim: usize,
    pub sr: f64,
}

impl Default for ModelInput {
    fn default() -> Self {
        Self {
            sample_type: SampleType::Float,
            bytes: 4,
            dim: 0,
            sr: 0.0,
        }
    }
}

#[derive(Debug)]
pub struct Model {
    kind: ModelKind,
    input: ModelInput,
    classes: Vec<String>,
    trained: bool,
    params: ModelParams,
}

impl Model {
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            input: ModelInput::default(),
            classes: Vec::new(),
            trained: false,
            params: ModelParams::empty(kind),
        }
    }

    /// Declare the input shape and classes; resets trained state
    pub fn setup(
        &mut self,
        classes: Vec<String>,
        bytes: usize,
        dim: usize,
        sr: f64,
        sample_type: SampleType,
    ) {
        self.input = ModelInput {
            sample_type,
            bytes,
            dim,
            sr,
        };
        match &mut self.params {
            ModelParams::NaiveBayes(nb) | ModelParams::OnlineNaiveBayes(nb) => {
                let options = nb.options.clone();
                *nb = NaiveBayes::new(&classes, dim);
                nb.options = options;
            }
            ModelParams::Svm(svm) => {
                svm.scale = vec![(0.0, 0.0); dim];
                svm.classes.clear();
            }
            ModelParams::External(_) => {}
        }
        self.classes = classes;
        self.trained = false;
    }

    /// Model built and set up from a resolved descriptor
    pub fn from_descriptor(descriptor: &ModelDescriptor) -> Self {
        let mut model = Model::new(descriptor.kind);
        model.setup(
            descriptor.classes.clone(),
            descriptor.bytes(),
            descriptor.input_dim(),
            descriptor.sample_rate(),
            descriptor.sample_type(),
        );
        model
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn input(&self) -> &ModelInput {
        &self.input
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ModelParams {
        &mut self.params
    }

    /// Install the backend of an external model
    pub fn attach_predictor(&mut self, predictor: Box<dyn Predictor>) -> Result<()> {
        match &mut self.params {
            ModelParams::External(slot) => {
                *slot = Some(predictor);
                Ok(())
            }
            _ => Err(unsupported(self.kind, "attach_predictor")),
        }
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Load trained parameters and, if given, an option file
    ///
    /// A missing option file keeps defaults. Class names in the parameter
    /// file win over the declared ones (with a warning on mismatch).
    pub fn load(&mut self, model_path: &Path, option_path: Option<&Path>) -> Result<()> {
        log::info!("[MODEL] loading {} from {}", self.kind, model_path.display());
        let loaded = match self.kind {
            ModelKind::NaiveBayes | ModelKind::OnlineNaiveBayes => {
                let mut nb = NaiveBayes::read(model_path)?;
                if let Some(path) = option_path {
                    nb.options = options::load_or_default(path)?;
                }
                let (names, features) = (nb.class_names(), nb.feature_count());
                let params = if self.kind == ModelKind::NaiveBayes {
                    ModelParams::NaiveBayes(nb)
                } else {
                    ModelParams::OnlineNaiveBayes(nb)
                };
                Some((params, names, features))
            }
            ModelKind::Svm => {
                let mut svm = Svm::read(model_path)?;
                if let Some(path) = option_path {
                    svm.options = options::load_or_default(path)?;
                }
                let (names, features) = (svm.class_names(), svm.feature_count());
                Some((ModelParams::Svm(svm), names, features))
            }
            ModelKind::External => {
                let ModelParams::External(Some(predictor)) = &mut self.params else {
                    return Err(SigstreamError::LoadFailed {
                        model: self.kind.to_string(),
                        reason: "no predictor attached".to_string(),
                    });
                };
                predictor.load(model_path)?;
                None
            }
        };

        if let Some((params, names, features)) = loaded {
            if features != self.input.dim {
                log::error!(
                    "[MODEL] {} holds {} features, input has {} dimensions",
                    model_path.display(),
                    features,
                    self.input.dim
                );
                return Err(SigstreamError::ParameterFile {
                    path: model_path.to_path_buf(),
                    line: 0,
                    reason: format!(
                        "feature count {} does not match input dimension {}",
                        features, self.input.dim
                    ),
                });
            }
            self.params = params;
            self.reconcile_classes(names);
        }

        self.trained = true;
        log::info!("[MODEL] {} trained with {} classes", self.kind, self.classes.len());
        Ok(())
    }

    fn reconcile_classes(&mut self, names: Vec<String>) {
        if names.len() != self.classes.len() {
            log::warn!(
                "[MODEL] descriptor declares {} classes, parameters hold {}",
                self.classes.len(),
                names.len()
            );
        } else {
            for (declared, loaded) in self.classes.iter().zip(&names) {
                if declared != loaded {
                    log::warn!("[MODEL] class '{}' renamed to '{}'", declared, loaded);
                }
            }
        }
        self.classes = names;
    }

    /// Write the parameter file
    pub fn save_params(&self, path: &Path) -> Result<()> {
        let text = match &self.params {
            ModelParams::NaiveBayes(nb) => nb.format(false),
            ModelParams::OnlineNaiveBayes(nb) => nb.format(true),
            ModelParams::Svm(svm) => svm.format(),
            ModelParams::External(_) => return Err(unsupported(self.kind, "save")),
        };
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Write the option file
    pub fn save_options(&self, path: &Path) -> Result<()> {
        match &self.params {
            ModelParams::NaiveBayes(nb) | ModelParams::OnlineNaiveBayes(nb) => {
                options::save(path, &nb.options)
            }
            ModelParams::Svm(svm) => options::save(path, &svm.options),
            ModelParams::External(_) => Err(unsupported(self.kind, "save")),
        }
    }

    /// Write descriptor, parameter and option files into `dir`
    ///
    /// Returns the descriptor path.
    pub fn save(&self, dir: &Path, name: &str) -> Result<std::path::PathBuf> {
        let shape = StreamShape {
            num: 1,
            dim: self.input.dim,
            bytes: self.input.bytes,
            sample_type: self.input.sample_type,
            sr: self.input.sr,
        };
        ModelDescriptor::for_model(self, name, vec![shape], None).save(dir, self)
    }

    // ------------------------------------------------------------------------
    // Inference
    // ------------------------------------------------------------------------

    /// Check an incoming stream against the expected input
    ///
    /// Kind, width and dimension mismatches are fatal; a sample rate
    /// mismatch only warns.
    pub fn validate_input(&self, shape: &StreamShape) -> Result<()> {
        if shape.sample_type != self.input.sample_type || shape.bytes != self.input.bytes {
            log::error!(
                "[MODEL] expected {} ({} bytes), found {} ({} bytes)",
                self.input.sample_type,
                self.input.bytes,
                shape.sample_type,
                shape.bytes
            );
            return Err(SigstreamError::UnsupportedType {
                component: self.kind.to_string(),
                expected: self.input.sample_type.to_string(),
                found: shape.sample_type.to_string(),
            });
        }
        if shape.dim != self.input.dim {
            log::error!(
                "[MODEL] expected dimension {}, found {}",
                self.input.dim,
                shape.dim
            );
            return Err(SigstreamError::ShapeMismatch {
                component: self.kind.to_string(),
                reason: format!("expected dimension {}, found {}", self.input.dim, shape.dim),
            });
        }
        if shape.sr != self.input.sr {
            log::warn!(
                "[MODEL] sample rate {} differs from trained rate {}",
                shape.sr,
                self.input.sr
            );
        }
        Ok(())
    }

    /// Class probabilities for one sample
    pub fn forward(&self, sample: &[f64]) -> Result<Vec<f64>> {
        if !self.trained {
            return Err(SigstreamError::NotTrained {
                model: self.kind.to_string(),
            });
        }
        self.check_dim(sample)?;
        if sample.iter().any(|x| !x.is_finite()) {
            log::warn!("[MODEL] skipping non-finite feature values");
        }

        let mut probabilities = match &self.params {
            ModelParams::NaiveBayes(nb) | ModelParams::OnlineNaiveBayes(nb) => nb.forward(sample),
            ModelParams::Svm(svm) => svm.forward(sample),
            ModelParams::External(Some(predictor)) => {
                let finite: Vec<f64> = sample
                    .iter()
                    .map(|&x| if x.is_finite() { x } else { 0.0 })
                    .collect();
                predictor.predict(&finite)?
            }
            ModelParams::External(None) => {
                return Err(SigstreamError::NotTrained {
                    model: self.kind.to_string(),
                })
            }
        };

        if probabilities.len() != self.classes.len() {
            return Err(SigstreamError::ShapeMismatch {
                component: self.kind.to_string(),
                reason: format!(
                    "{} scores for {} classes",
                    probabilities.len(),
                    self.classes.len()
                ),
            });
        }
        normalize_probabilities(&mut probabilities);
        Ok(probabilities)
    }

    // ------------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------------

    /// Incremental update with one labelled sample
    ///
    /// Samples holding non-finite values are skipped with a warning.
    pub fn train(&mut self, sample: &[f64], label: &str) -> Result<()> {
        let class = self.class_index(label)?;
        self.check_dim(sample)?;
        if sample.iter().any(|x| !x.is_finite()) {
            log::warn!("[MODEL] skipping non-finite training sample for '{}'", label);
            return Ok(());
        }
        match &mut self.params {
            ModelParams::OnlineNaiveBayes(nb) => nb.train(class, sample),
            _ => return Err(unsupported(self.kind, "train")),
        }
        self.trained = true;
        Ok(())
    }

    /// Train from a full set of labelled samples
    ///
    /// Batch kinds replace their parameters; online kinds fold the samples in.
    pub fn train_batch(&mut self, samples: &[(Vec<f64>, String)]) -> Result<()> {
        let mut indexed = Vec::with_capacity(samples.len());
        for (sample, label) in samples {
            let class = self.class_index(label)?;
            self.check_dim(sample)?;
            if sample.iter().any(|x| !x.is_finite()) {
                log::warn!("[MODEL] skipping non-finite training sample for '{}'", label);
                continue;
            }
            indexed.push((sample.as_slice(), class));
        }

        match &mut self.params {
            ModelParams::NaiveBayes(nb) => nb.fit(&indexed),
            ModelParams::OnlineNaiveBayes(nb) => {
                for &(sample, class) in &indexed {
                    nb.train(class, sample);
                }
            }
            _ => return Err(unsupported(self.kind, "train_batch")),
        }
        if !indexed.is_empty() {
            self.trained = true;
        }
        log::debug!("[MODEL] {} trained on {} samples", self.kind, indexed.len());
        Ok(())
    }

    fn class_index(&self, label: &str) -> Result<usize> {
        self.classes
            .iter()
            .position(|c| c == label)
            .ok_or_else(|| SigstreamError::InvalidParameter {
                param: "label".to_string(),
                value: label.to_string(),
                expected: format!("one of {:?}", self.classes),
            })
    }

    fn check_dim(&self, sample: &[f64]) -> Result<()> {
        if sample.len() != self.input.dim {
            return Err(SigstreamError::ShapeMismatch {
                component: self.kind.to_string(),
                reason: format!(
                    "sample has {} values, model expects {}",
                    sample.len(),
                    self.input.dim
                ),
            });
        }
        Ok(())
    }
}

fn unsupported(kind: ModelKind, operation: &str) -> SigstreamError {
    SigstreamError::Unsupported {
        operation: operation.to_string(),
        model: kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;

    fn classes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn online(dim: usize) -> Model {
        let mut model = Model::new(ModelKind::OnlineNaiveBayes);
        model.setup(classes(&["A", "B"]), 4, dim, 50.0, SampleType::Float);
        model
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ModelKind::from_name("OnlineNaiveBayes").unwrap(), ModelKind::OnlineNaiveBayes);
        assert!(matches!(
            ModelKind::from_name("Bogus"),
            Err(SigstreamError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn test_forward_requires_training() {
        let model = online(1);
        assert!(matches!(
            model.forward(&[1.0]),
            Err(SigstreamError::NotTrained { .. })
        ));
    }

    #[test]
    fn test_online_scenario() {
        let mut model = online(1);
        for _ in 0..3 {
            model.train(&[1.0], "A").unwrap();
            model.train(&[5.0], "B").unwrap();
        }
        let p = model.forward(&[1.0]).unwrap();
        assert_eq!(p.len(), 2);
        assert!(p[0] > 0.9);
        assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_train_edge_cases() {
        let mut model = online(1);
        model.train(&[f64::NAN], "A").unwrap();
        assert!(!model.is_trained());
        assert!(matches!(
            model.train(&[1.0], "C"),
            Err(SigstreamError::InvalidParameter { .. })
        ));

        let mut batch = Model::new(ModelKind::NaiveBayes);
        batch.setup(classes(&["A"]), 4, 1, 50.0, SampleType::Float);
        assert!(matches!(
            batch.train(&[1.0], "A"),
            Err(SigstreamError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_batch_training() {
        let mut model = Model::new(ModelKind::NaiveBayes);
        model.setup(classes(&["A", "B"]), 4, 2, 50.0, SampleType::Float);
        let samples = vec![
            (vec![0.0, 1.0], "A".to_string()),
            (vec![0.2, 1.2], "A".to_string()),
            (vec![4.0, -1.0], "B".to_string()),
            (vec![4.2, -1.2], "B".to_string()),
            (vec![f64::INFINITY, 0.0], "B".to_string()),
        ];
        model.train_batch(&samples).unwrap();
        let p = model.forward(&[4.1, -1.1]).unwrap();
        assert!(p[1] > 0.99);
    }

    #[test]
    fn test_validate_input() {
        let model = online(3);
        assert!(model
            .validate_input(&StreamShape::new(1, 3, 50.0, SampleType::Float))
            .is_ok());
        // Sample rate only warns
        assert!(model
            .validate_input(&StreamShape::new(1, 3, 25.0, SampleType::Float))
            .is_ok());
        assert!(matches!(
            model.validate_input(&StreamShape::new(1, 2, 50.0, SampleType::Float)),
            Err(SigstreamError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            model.validate_input(&StreamShape::new(1, 3, 50.0, SampleType::Double)),
            Err(SigstreamError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_load_renames_classes_and_checks_features() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.model");
        std::fs::write(&path, "2\t1\nrest\t0.5\n0\t1\nwalk\t0.5\n3\t1\n").unwrap();

        let mut model = online(1);
        model.load(&path, Some(&dir.path().join("missing.option"))).unwrap();
        assert!(model.is_trained());
        assert_eq!(model.classes(), &classes(&["rest", "walk"])[..]);

        let mut wide = online(2);
        assert!(matches!(
            wide.load(&path, None),
            Err(SigstreamError::ParameterFile { .. })
        ));
        assert!(!wide.is_trained());
    }

    #[derive(Debug)]
    struct Constant(Vec<f64>);

    impl Predictor for Constant {
        fn load(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn predict(&self, _features: &[f64]) -> Result<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_external_predictor_is_renormalised() {
        let mut model = Model::new(ModelKind::External);
        model.setup(classes(&["A", "B"]), 4, 1, 50.0, SampleType::Float);
        model.attach_predictor(Box::new(Constant(vec![3.0, 1.0]))).unwrap();
        model.load(Path::new("unused"), None).unwrap();
        let p = model.forward(&[0.0]).unwrap();
        assert_abs_diff_eq!(p[0], 0.75, epsilon = 1e-12);
    }
}
