//! Linear one-vs-rest SVM
//!
//! Parameter file layout (tab separated, `#` lines are comments):
//!
//! ```text
//! <classCount>\t<featureCount>
//! <min>\t<max>            featureCount scale rows
//! <name>\t<bias>          per class, followed by
//! <weight>                featureCount weight rows
//! ```

use super::naive_bayes::parse_counts;
use crate::error::{Result, SigstreamError};
use crate::math::softmax;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmOptions {
    pub scale_low: f64,
    pub scale_high: f64,
}

impl Default for SvmOptions {
    fn default() -> Self {
        Self {
            scale_low: -1.0,
            scale_high: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearClass {
    pub name: String,
    pub bias: f64,
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Svm {
    pub options: SvmOptions,
    /// Per-feature `(min, max)` seen at training time
    pub scale: Vec<(f64, f64)>,
    pub classes: Vec<LinearClass>,
}

impl Svm {
    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }

    pub fn feature_count(&self) -> usize {
        self.scale.len()
    }

    /// Map a raw feature into `[scale_low, scale_high]`; a zero range maps to low
    pub fn scale_feature(&self, index: usize, x: f64) -> f64 {
        let (low, high) = (self.options.scale_low, self.options.scale_high);
        match self.scale.get(index) {
            Some(&(min, max)) if max > min => low + (high - low) * (x - min) / (max - min),
            _ => low,
        }
    }

    /// Class probabilities; non-finite features contribute nothing
    pub fn forward(&self, sample: &[f64]) -> Vec<f64> {
        let scaled: Vec<f64> = sample
            .iter()
            .enumerate()
            .map(|(i, &x)| if x.is_finite() { self.scale_feature(i, x) } else { 0.0 })
            .collect();
        let mut scores: Vec<f64> = self
            .classes
            .iter()
            .map(|class| {
                class.bias
                    + class
                        .weights
                        .iter()
                        .zip(&scaled)
                        .map(|(w, x)| w * x)
                        .sum::<f64>()
            })
            .collect();
        softmax(&mut scores);
        scores
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SigstreamError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

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
        let mut next = |what: &str| {
            lines
                .next()
                .ok_or_else(|| fail(0, format!("unexpected end of file, expected {}", what)))
        };
        let number = |line: usize, field: Option<&str>| -> Result<f64> {
            let field = field.map(str::trim).unwrap_or_default();
            field
                .parse()
                .map_err(|_| fail(line, format!("'{}' is not a number", field)))
        };

        let (line_no, header) = next("counts")?;
        let (n_classes, n_features) = parse_counts(header, line_no, path)?;

        let mut scale = Vec::new();
        for _ in 0..n_features {
            let (line_no, line) = next("scale row")?;
            let mut fields = line.split('\t');
            let min = number(line_no, fields.next())?;
            let max = number(line_no, fields.next())?;
            scale.push((min, max));
        }

        let mut classes = Vec::new();
        for _ in 0..n_classes {
            let (line_no, line) = next("class header")?;
            let mut fields = line.split('\t');
            let name = fields.next().unwrap_or_default().trim().to_string();
            let bias = number(line_no, fields.next())?;
            let mut weights = Vec::new();
            for _ in 0..n_features {
                let (line_no, line) = next("weight row")?;
                weights.push(number(line_no, Some(line))?);
            }
            classes.push(LinearClass {
                name,
                bias,
                weights,
            });
        }

        Ok(Self {
            options: SvmOptions::default(),
            scale,
            classes,
        })
    }

    pub fn format(&self) -> String {
        let mut out = String::from("# linear svm\n");
        let _ = writeln!(out, "{}\t{}", self.classes.len(), self.feature_count());
        for (min, max) in &self.scale {
            let _ = writeln!(out, "{}\t{}", min, max);
        }
        for class in &self.classes {
            let _ = writeln!(out, "{}\t{}", class.name, class.bias);
            for w in &class.weights {
                let _ = writeln!(out, "{}", w);
            }
        }
        out
    }
}
