//! Labelled time intervals used for batch training

use crate::error::{Result, SigstreamError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationEntry {
    /// Interval start in seconds
    pub from: f64,
    /// Interval end in seconds
    pub to: f64,
    pub label: String,
}

/// Class list plus labelled intervals; every label belongs to the class list
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Annotation {
    classes: Vec<String>,
    entries: Vec<AnnotationEntry>,
}

impl Annotation {
    pub fn new(classes: Vec<String>) -> Self {
        Self {
            classes,
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, from: f64, to: f64, label: &str) -> Result<()> {
        if !self.classes.iter().any(|c| c == label) {
            return Err(SigstreamError::InvalidParameter {
                param: "label".to_string(),
                value: label.to_string(),
                expected: format!("one of {:?}", self.classes),
            });
        }
        if !(from.is_finite() && to.is_finite() && from < to) {
            return Err(SigstreamError::InvalidParameter {
                param: "interval".to_string(),
                value: format!("[{}, {})", from, to),
                expected: "finite bounds with from < to".to_string(),
            });
        }
        self.entries.push(AnnotationEntry {
            from,
            to,
            label: label.to_string(),
        });
        Ok(())
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn entries(&self) -> &[AnnotationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a JSON annotation, re-validating every entry
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| SigstreamError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: Annotation = serde_json::from_str(&text)?;
        let mut annotation = Annotation::new(raw.classes);
        for entry in raw.entries {
            annotation.add(entry.from, entry.to, &entry.label)?;
        }
        Ok(annotation)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
