//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;

use crate::consumer::{Classifier, ClassifierOptions, Consumer, EventData};
use crate::filter::{butterworth, frequency_response, FilterType};
use crate::model::{ModelDescriptor, ModelRegistry};
use crate::stream::{ChunkedSource, Provider, Stream};

/// Print a resolved model descriptor.
pub fn inspect(path: &Path) -> Result<()> {
    info!("Inspecting descriptor: {}", path.display());

    let descriptor = ModelDescriptor::from_file(path)
        .with_context(|| format!("Failed to read descriptor {}", path.display()))?;

    println!("Descriptor: {}", path.display());
    println!("{:-<60}", "");
    println!("Model:      {} (version {})", descriptor.kind, descriptor.version);
    println!("Trained:    {}", descriptor.trained);
    if let Some(date) = &descriptor.date {
        println!("Date:       {}", date);
    }
    for (i, stream) in descriptor.streams.iter().enumerate() {
        println!(
            "Stream {}:   dim {} @ {} Hz, {} ({} bytes)",
            i, stream.dim, stream.sr, stream.sample_type, stream.bytes
        );
    }
    println!("Input dim:  {}", descriptor.input_dim());
    if let Some(selection) = &descriptor.selection {
        println!("Selection:  {:?}", selection.indices);
    }
    println!("Classes:    {}", descriptor.classes.join(", "));
    println!("Parameters: {}", descriptor.model_path().display());
    if let Some(option) = descriptor.option_path() {
        println!("Options:    {}", option.display());
    }

    Ok(())
}

/// List descriptor files under a directory.
pub fn list(dir: &Path) -> Result<()> {
    info!("Listing descriptors under: {}", dir.display());

    let found = ModelDescriptor::discover(dir)
        .with_context(|| format!("Failed to search {}", dir.display()))?;

    if found.is_empty() {
        println!("No descriptors found.");
        return Ok(());
    }

    for path in found {
        match ModelDescriptor::from_file(&path) {
            Ok(d) => println!(
                "{}  {} classes={} dim={}",
                path.display(),
                d.kind,
                d.num_classes(),
                d.input_dim()
            ),
            Err(e) => println!("{}  (unreadable: {})", path.display(), e),
        }
    }

    Ok(())
}

/// Design a Butterworth filter and print its sections.
pub fn design(filter_type: FilterType, order: usize, low: f64, high: f64, points: usize) -> Result<()> {
    let sos = butterworth(filter_type, order, low, high).context("Filter design failed")?;

    println!("{:?} order {} ({} sections)", filter_type, order, sos.len());
    println!(
        "{:>14} {:>14} {:>14} {:>14} {:>14}",
        "b0", "b1", "b2", "a1", "a2"
    );
    for s in sos.sections() {
        println!(
            "{:>14.8} {:>14.8} {:>14.8} {:>14.8} {:>14.8}",
            s.b0, s.b1, s.b2, s.a1, s.a2
        );
    }

    if points > 1 {
        let freqs: Vec<f64> = (0..points)
            .map(|i| i as f64 / (points - 1) as f64)
            .collect();
        println!();
        println!("{:>10} {:>12}", "f/nyquist", "|H|");
        for (f, m) in freqs.iter().zip(frequency_response(&sos, &freqs)) {
            println!("{:>10.4} {:>12.6}", f, m);
        }
    }

    Ok(())
}

/// Classify whitespace-separated sample rows with a trained model.
pub fn classify(descriptor_path: &Path, samples_path: &Path, probabilities: bool) -> Result<()> {
    info!("Classifying {} with {}", samples_path.display(), descriptor_path.display());

    let registry = Arc::new(ModelRegistry::new());
    let handle = registry.create("cli")?;
    let descriptor = registry
        .resolve_file(handle, descriptor_path)
        .with_context(|| format!("Failed to resolve {}", descriptor_path.display()))?;

    let text = fs::read_to_string(samples_path)
        .with_context(|| format!("Failed to read {}", samples_path.display()))?;
    let rows = parse_rows(&text)?;
    let Some(dim) = rows.first().map(Vec::len) else {
        println!("No samples.");
        return Ok(());
    };

    let values: Vec<f64> = rows.into_iter().flatten().collect();
    let num = values.len() / dim;
    let mut stream = Stream::new(num, dim, descriptor.sample_rate(), 0.0, descriptor.sample_type());
    stream.copy_from_f64(&values)?;
    let mut source = ChunkedSource::uniform(stream, 1)?;

    let options = ClassifierOptions {
        best_match_only: !probabilities,
        ..Default::default()
    };
    let mut classifier = Classifier::new(options, registry, handle);
    classifier
        .enter(&[source.shape()])
        .context("Model rejected the sample layout")?;

    let mut row = 0;
    while let Some(chunk) = source.next_chunk() {
        for event in classifier.consume(&[&chunk])? {
            match &event.data {
                EventData::Classification { class, probability } => {
                    println!("{:>6}  {:<16} {:.4}", row, class, probability)
                }
                EventData::Probabilities(values) => {
                    let line: Vec<String> = values
                        .iter()
                        .map(|(c, p)| format!("{}={:.4}", c, p))
                        .collect();
                    println!("{:>6}  {}", row, line.join(" "));
                }
                _ => {}
            }
        }
        row += 1;
    }
    classifier.flush();

    Ok(())
}

fn parse_rows(text: &str) -> Result<Vec<Vec<f64>>> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Line {}: not a number", i + 1))?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                bail!("Line {}: expected {} values, found {}", i + 1, first.len(), row.len());
            }
        }
        rows.push(row);
    }
    Ok(rows)
}
