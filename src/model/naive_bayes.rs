//! Gaussian naive Bayes
//!
//! Per class and feature the model keeps weighted sufficient statistics
//! (`mean`, `variance_sum`, `weight_sum`), so the batch estimator and the
//! online Welford update share one representation.
//!
//! Parameter file layout (tab separated, `#` lines are comments):
//!
//! ```text
//! <classCount>\t<featureCount>
//! <name>\t<prior>
//! <mean>\t<std>                              (two-column rows)
//! <mean>\t<std>\t<varianceSum>\t<weightSum>  (four-column rows)
//! ...
//! ```

use crate::error::{Result, SigstreamError};
use crate::math::{floor_variance, normalize_probabilities, softmax};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::Write as _;
use std::path::Path;

/// Weight assumed for statistics read from two-column rows
///
/// Provisional: the starting weight of a converted legacy row has no
/// derivation beyond matching the files produced by older trainers.
pub const LEGACY_WEIGHT_SUM: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NaiveBayesOptions {
    /// Combine log-likelihoods instead of multiplying densities
    pub log: bool,
    /// Weight classes by their prior probability
    pub prior: bool,
}

impl Default for NaiveBayesOptions {
    fn default() -> Self {
        Self {
            log: true,
            prior: true,
        }
    }
}

/// Weighted running statistics of one feature
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureStats {
    pub mean: f64,
    pub variance_sum: f64,
    pub weight_sum: f64,
}

impl FeatureStats {
    /// Initial estimate from a mean and standard deviation
    pub fn from_mean_std(mean: f64, std: f64) -> Self {
        Self {
            mean,
            variance_sum: std * std * LEGACY_WEIGHT_SUM,
            weight_sum: LEGACY_WEIGHT_SUM,
        }
    }

    pub fn variance(&self) -> f64 {
        if self.weight_sum > 0.0 {
            self.variance_sum / self.weight_sum
        } else {
            0.0
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Weighted Welford update
    pub fn update(&mut self, x: f64, weight: f64) {
        self.weight_sum += weight;
        let delta = x - self.mean;
        self.mean += weight / self.weight_sum * delta;
        self.variance_sum += weight * delta * (x - self.mean);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassStats {
    pub name: String,
    pub prior: f64,
    pub features: Vec<FeatureStats>,
}

impl ClassStats {
    fn weight(&self) -> f64 {
        self.features.first().map(|f| f.weight_sum).unwrap_or(0.0)
    }
}

/// Gaussian naive Bayes parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NaiveBayes {
    pub options: NaiveBayesOptions,
    pub classes: Vec<ClassStats>,
}

impl NaiveBayes {
    /// Untrained model with uniform priors
    pub fn new(class_names: &[String], dim: usize) -> Self {
        let prior = if class_names.is_empty() {
            0.0
        } else {
            1.0 / class_names.len() as f64
        };
        Self {
            options: NaiveBayesOptions::default(),
            classes: class_names
                .iter()
                .map(|name| ClassStats {
                    name: name.clone(),
                    prior,
                    features: vec![FeatureStats::default(); dim],
                })
                .collect(),
        }
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }

    pub fn feature_count(&self) -> usize {
        self.classes.first().map(|c| c.features.len()).unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // Inference
    // ------------------------------------------------------------------------

    /// Class probabilities for one sample; non-finite features are skipped
    pub fn forward(&self, sample: &[f64]) -> Vec<f64> {
        let log = self.options.log;
        let mut scores: Vec<f64> = self
            .classes
            .iter()
            .map(|class| {
                let mut score = match (log, self.options.prior) {
                    (true, true) => class.prior.ln(),
                    (true, false) => 0.0,
                    (false, true) => class.prior,
                    (false, false) => 1.0,
                };
                for (&x, stats) in sample.iter().zip(&class.features) {
                    if !x.is_finite() {
                        continue;
                    }
                    let variance = floor_variance(stats.variance());
                    let d = x - stats.mean;
                    if log {
                        score += -0.5 * (2.0 * PI * variance).ln() - d * d / (2.0 * variance);
                    } else {
                        score *= (-d * d / (2.0 * variance)).exp() / (2.0 * PI * variance).sqrt();
                    }
                }
                score
            })
            .collect();

        if log {
            softmax(&mut scores);
        } else {
            normalize_probabilities(&mut scores);
        }
        scores
    }

    // ------------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------------

    /// Fold one sample into class `class` and refresh the priors
    pub fn train(&mut self, class: usize, sample: &[f64]) {
        if let Some(stats) = self.classes.get_mut(class) {
            for (feature, &x) in stats.features.iter_mut().zip(sample) {
                feature.update(x, 1.0);
            }
        }
        self.refresh_priors();
    }

    /// Replace all statistics with estimates from `samples`
    pub fn fit(&mut self, samples: &[(&[f64], usize)]) {
        let dim = self.feature_count();
        for class in &mut self.classes {
            class.features = vec![FeatureStats::default(); dim];
        }
        for &(sample, class) in samples {
            if let Some(stats) = self.classes.get_mut(class) {
                for (feature, &x) in stats.features.iter_mut().zip(sample) {
                    feature.update(x, 1.0);
                }
            }
        }
        for class in &self.classes {
            if class.weight() == 0.0 {
                log::warn!("[NAIVEBAYES] class '{}' has no training samples", class.name);
            }
        }
        self.refresh_priors();
    }

    fn refresh_priors(&mut self) {
        let total: f64 = self.classes.iter().map(|c| c.weight()).sum();
        if total <= 0.0 {
            return;
        }
        for class in &mut self.classes {
            class.prior = class.weight() / total;
        }
    }

    // ------------------------------------------------------------------------
    // Parameter file
    // ------------------------------------------------------------------------

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SigstreamError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parse a parameter file; `path` is used for error reporting only
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let fail = |line: usize, reason: String| SigstreamError::ParameterFile {
            path: path.to_path_buf(),
            line,
            reason,
        };
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

        let (line_no, header) = lines
            .next()
            .ok_or_else(|| fail(0, "missing class and feature counts".to_string()))?;
        let (n_classes, n_features) = parse_counts(header, line_no, path)?;

        let mut classes = Vec::new();
        for _ in 0..n_classes {
            let (line_no, line) = lines
                .next()
                .ok_or_else(|| fail(0, "unexpected end of file in class header".to_string()))?;
            let mut fields = line.split('\t').map(str::trim);
            let name = fields.next().unwrap_or_default().to_string();
            let prior: f64 = fields
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| fail(line_no, format!("missing prior for class '{}'", name)))?;

            let mut features = Vec::new();
            for _ in 0..n_features {
                let (line_no, line) = lines.next().ok_or_else(|| {
                    fail(0, format!("unexpected end of file in class '{}'", name))
                })?;
                let values = parse_fields(line, line_no, path)?;
                features.push(match values.as_slice() {
                    [mean, std] => FeatureStats::from_mean_std(*mean, *std),
                    [mean, _std, variance_sum, weight_sum] => FeatureStats {
                        mean: *mean,
                        variance_sum: *variance_sum,
                        weight_sum: *weight_sum,
                    },
                    other => {
                        return Err(fail(
                            line_no,
                            format!("expected 2 or 4 columns, found {}", other.len()),
                        ))
                    }
                });
            }
            classes.push(ClassStats {
                name,
                prior,
                features,
            });
        }

        Ok(Self {
            options: NaiveBayesOptions::default(),
            classes,
        })
    }

    /// Render the parameter file; `online` selects four-column rows
    pub fn format(&self, online: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# gaussian naive bayes ({})",
            if online { "online" } else { "batch" }
        );
        let _ = writeln!(out, "{}\t{}", self.classes.len(), self.feature_count());
        for class in &self.classes {
            let _ = writeln!(out, "{}\t{}", class.name, class.prior);
            for f in &class.features {
                if online {
                    let _ = writeln!(
                        out,
                        "{}\t{}\t{}\t{}",
                        f.mean,
                        f.std(),
                        f.variance_sum,
                        f.weight_sum
                    );
                } else {
                    let _ = writeln!(out, "{}\t{}", f.mean, f.std());
                }
            }
        }
        out
    }
}

/// Class and feature counts of a parameter file header
///
/// Counts must be plain non-negative integers; the file is read line by line,
/// so nothing is preallocated from them.
pub(super) fn parse_counts(header: &str, line_no: usize, path: &Path) -> Result<(usize, usize)> {
    let fail = |reason: String| SigstreamError::ParameterFile {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };
    let fields: Vec<&str> = header
        .split('\t')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();
    let [classes, features] = fields.as_slice() else {
        return Err(fail(format!("expected 2 counts, found {}", fields.len())));
    };
    let count = |field: &str| {
        field
            .parse::<usize>()
            .map_err(|_| fail(format!("'{}' is not a count", field)))
    };
    Ok((count(classes)?, count(features)?))
}

fn parse_fields(line: &str, line_no: usize, path: &Path) -> Result<Vec<f64>> {
    line.split('\t')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            f.parse::<f64>().map_err(|_| SigstreamError::ParameterFile {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("'{}' is not a number", f),
            })
        })
        .collect()
}
