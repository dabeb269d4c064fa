//! Model descriptor files
//!
//! A descriptor (`<name>.trainer`) is a small XML document naming the input
//! streams a model expects, its classes, an optional channel selection and
//! the parameter files to load:
//!
//! ```xml
//! <trainer version="5">
//!     <info trained="true" date="2024-05-01T10:00:00+00:00"/>
//!     <streams>
//!         <item byte="4" dim="3" sr="50" type="FLOAT"/>
//!     </streams>
//!     <classes>
//!         <item name="rest"/>
//!         <item name="walk"/>
//!     </classes>
//!     <selection>
//!         <item stream="0" select="0,2"/>
//!     </selection>
//!     <model create="OnlineNaiveBayes" path="gait.OnlineNaiveBayes.model"
//!            option="gait.OnlineNaiveBayes.option"/>
//! </trainer>
//! ```
//!
//! Selection indices address channels of the merged input (all streams
//! concatenated in order).

use super::{Model, ModelKind};
use crate::error::{Result, SigstreamError};
use crate::stream::{SampleType, StreamShape};
use crate::transform::Merge;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Version written into new descriptors
pub const DESCRIPTOR_VERSION: u32 = 5;

/// File extension of descriptor files
pub const DESCRIPTOR_EXTENSION: &str = "trainer";

/// Channels of the merged input fed to the model
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub stream: usize,
    pub indices: Vec<usize>,
}

/// Parsed model descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Base name, the file stem for parsed descriptors
    pub name: String,
    /// File the descriptor was read from
    pub path: Option<PathBuf>,
    pub version: u32,
    pub trained: bool,
    pub date: Option<String>,
    pub streams: Vec<StreamShape>,
    pub classes: Vec<String>,
    pub selection: Option<Selection>,
    pub kind: ModelKind,
    /// Parameter file, relative to the descriptor's directory
    pub model_file: String,
    /// Option file, relative to the descriptor's directory
    pub option_file: Option<String>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Root,
    Streams,
    Classes,
    Selection,
}

impl ModelDescriptor {
    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    pub fn from_file(path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(path).map_err(|source| SigstreamError::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let mut descriptor = Self::parse(&xml, path)?;
        descriptor.path = Some(path.to_path_buf());
        log::info!(
            "[DESCRIPTOR] {} resolved: {} with {} classes",
            path.display(),
            descriptor.kind,
            descriptor.classes.len()
        );
        Ok(descriptor)
    }

    /// Parse descriptor XML; `path` names the source in errors and gives the
    /// default base name
    pub fn parse(xml: &str, path: &Path) -> Result<Self> {
        let fail = |reason: String| {
            log::error!("[DESCRIPTOR] {}: {}", path.display(), reason);
            SigstreamError::DescriptorParse {
                path: path.to_path_buf(),
                reason,
            }
        };

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut seen_root = false;
        let mut version = DESCRIPTOR_VERSION;
        let mut trained = false;
        let mut date = None;
        let mut streams = Vec::new();
        let mut classes = Vec::new();
        let mut selection = None;
        let mut model: Option<(ModelKind, String, Option<String>)> = None;
        let mut section = Section::Root;

        loop {
            let (element, is_start) = match reader.read_event() {
                Ok(Event::Start(e)) => (e, true),
                Ok(Event::Empty(e)) => (e, false),
                Ok(Event::End(e)) => {
                    if matches!(e.name().as_ref(), b"streams" | b"classes" | b"selection") {
                        section = Section::Root;
                    }
                    continue;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(fail(e.to_string())),
                _ => continue,
            };
            let attrs = attributes(&element);
            let attr = |key: &str| attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

            match element.name().as_ref() {
                b"trainer" => {
                    seen_root = true;
                    if let Some(v) = attr("version") {
                        version = v
                            .parse()
                            .map_err(|_| fail(format!("invalid version '{}'", v)))?;
                    }
                }
                _ if !seen_root => return Err(fail("root element must be <trainer>".to_string())),
                b"info" => {
                    trained = attr("trained").map(|t| t == "true").unwrap_or(false);
                    date = attr("date").map(str::to_string);
                }
                b"streams" if is_start => section = Section::Streams,
                b"classes" if is_start => section = Section::Classes,
                b"selection" if is_start => section = Section::Selection,
                b"item" => match section {
                    Section::Streams => streams.push(parse_stream(&attr, &fail)?),
                    Section::Classes => {
                        let name = attr("name").ok_or_else(|| fail("class without name".to_string()))?;
                        classes.push(name.to_string());
                    }
                    Section::Selection => {
                        let stream = attr("stream")
                            .map(|s| s.parse::<usize>().map_err(|_| fail(format!("invalid stream '{}'", s))))
                            .transpose()?
                            .unwrap_or(0);
                        let select = attr("select").unwrap_or_default();
                        let indices = parse_indices(select)
                            .map_err(|_| fail(format!("invalid selection '{}'", select)))?;
                        selection = Some(Selection { stream, indices });
                    }
                    Section::Root => return Err(fail("<item> outside a list".to_string())),
                },
                b"model" => {
                    let create = attr("create").ok_or_else(|| fail("model without create".to_string()))?;
                    let kind = ModelKind::from_name(create)?;
                    let file = attr("path").ok_or_else(|| fail("model without path".to_string()))?;
                    model = Some((kind, file.to_string(), attr("option").map(str::to_string)));
                }
                _ => {}
            }
        }

        if !seen_root {
            return Err(fail("missing <trainer> element".to_string()));
        }
        if streams.is_empty() {
            return Err(fail("no input streams declared".to_string()));
        }
        let (kind, model_file, option_file) =
            model.ok_or_else(|| fail("missing <model> element".to_string()))?;

        let descriptor = Self {
            name: base_name(path),
            path: None,
            version,
            trained,
            date,
            streams,
            classes,
            selection,
            kind,
            model_file,
            option_file,
        };
        descriptor.check_selection().map_err(|reason| fail(reason))?;
        Ok(descriptor)
    }

    fn check_selection(&self) -> std::result::Result<(), String> {
        let total: usize = self.streams.iter().map(|s| s.dim).sum();
        if let Some(selection) = &self.selection {
            if let Some(&bad) = selection.indices.iter().find(|&&i| i >= total) {
                return Err(format!("selected channel {} exceeds input dimension {}", bad, total));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Dimension of one model input sample
    pub fn input_dim(&self) -> usize {
        match &self.selection {
            Some(selection) => selection.indices.len(),
            None => self.streams.iter().map(|s| s.dim).sum(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn sample_rate(&self) -> f64 {
        self.streams.first().map(|s| s.sr).unwrap_or(0.0)
    }

    /// Element kind after merging the declared streams
    pub fn sample_type(&self) -> SampleType {
        match self.streams.as_slice() {
            [single] => single.sample_type,
            many => Merge::merged_type(many),
        }
    }

    pub fn bytes(&self) -> usize {
        match self.streams.as_slice() {
            [single] => single.bytes,
            _ => self.sample_type().size().unwrap_or(0),
        }
    }

    fn base_dir(&self) -> PathBuf {
        self.path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn model_path(&self) -> PathBuf {
        self.base_dir().join(&self.model_file)
    }

    pub fn option_path(&self) -> Option<PathBuf> {
        self.option_file.as_ref().map(|f| self.base_dir().join(f))
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// Descriptor for saving `model` under `name`
    pub fn for_model(
        model: &Model,
        name: &str,
        streams: Vec<StreamShape>,
        selection: Option<Selection>,
    ) -> Self {
        let kind = model.kind();
        Self {
            name: name.to_string(),
            path: None,
            version: DESCRIPTOR_VERSION,
            trained: model.is_trained(),
            date: Some(chrono::Local::now().to_rfc3339()),
            streams,
            classes: model.classes().to_vec(),
            selection,
            kind,
            model_file: format!("{}.{}.model", name, kind),
            option_file: Some(format!("{}.{}.option", name, kind)),
        }
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut buffer = Vec::new();
        let mut writer = Writer::new_with_indent(&mut buffer, b' ', 4);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;

        let version = self.version.to_string();
        let mut root = BytesStart::new("trainer");
        root.push_attribute(("version", version.as_str()));
        writer.write_event(Event::Start(root)).map_err(xml_error)?;

        let mut info = BytesStart::new("info");
        info.push_attribute(("trained", if self.trained { "true" } else { "false" }));
        if let Some(date) = &self.date {
            info.push_attribute(("date", date.as_str()));
        }
        writer.write_event(Event::Empty(info)).map_err(xml_error)?;

        write_list(&mut writer, "streams", self.streams.iter().map(|s| {
            vec![
                ("byte", s.bytes.to_string()),
                ("dim", s.dim.to_string()),
                ("sr", s.sr.to_string()),
                ("type", s.sample_type.name().to_string()),
            ]
        }))?;
        write_list(
            &mut writer,
            "classes",
            self.classes.iter().map(|c| vec![("name", c.clone())]),
        )?;
        if let Some(selection) = &self.selection {
            let select = selection
                .indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",");
            write_list(
                &mut writer,
                "selection",
                std::iter::once(vec![("stream", selection.stream.to_string()), ("select", select)]),
            )?;
        }

        let mut model = BytesStart::new("model");
        model.push_attribute(("create", self.kind.name()));
        model.push_attribute(("path", self.model_file.as_str()));
        if let Some(option) = &self.option_file {
            model.push_attribute(("option", option.as_str()));
        }
        writer.write_event(Event::Empty(model)).map_err(xml_error)?;
        writer
            .write_event(Event::End(BytesEnd::new("trainer")))
            .map_err(xml_error)?;

        String::from_utf8(buffer).map_err(xml_error)
    }

    /// Write `<dir>/<name>.trainer` plus the model's parameter and option
    /// files; returns the descriptor path
    pub fn save(&self, dir: &Path, model: &Model) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{}", self.name, DESCRIPTOR_EXTENSION));
        fs::write(&path, self.to_xml()?)?;
        model.save_params(&dir.join(&self.model_file))?;
        if let Some(option) = &self.option_file {
            model.save_options(&dir.join(option))?;
        }
        log::info!("[DESCRIPTOR] saved {} to {}", self.kind, path.display());
        Ok(path)
    }

    /// Descriptor files under `dir`, sorted by path
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut found: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry.path().extension().and_then(|e| e.to_str()) == Some(DESCRIPTOR_EXTENSION)
            })
            .map(|entry| entry.path().to_path_buf())
            .collect();
        found.sort();
        Ok(found)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn xml_error<E: Display>(e: E) -> SigstreamError {
    SigstreamError::Xml(e.to_string())
}

fn attributes(element: &BytesStart) -> Vec<(String, String)> {
    element
        .attributes()
        .flatten()
        .map(|a| {
            let raw = String::from_utf8_lossy(a.value.as_ref()).into_owned();
            let value = quick_xml::escape::unescape(&raw)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.clone());
            (String::from_utf8_lossy(a.key.as_ref()).into_owned(), value)
        })
        .collect()
}

fn parse_stream<'a>(
    attr: &impl Fn(&str) -> Option<&'a str>,
    fail: &impl Fn(String) -> SigstreamError,
) -> Result<StreamShape> {
    let raw = |key: &str| attr(key).ok_or_else(|| fail(format!("stream without '{}'", key)));
    let invalid = |key: &str, value: &str| fail(format!("invalid {} '{}'", key, value));
    let count = |key: &str| -> Result<usize> {
        let value = raw(key)?;
        value.parse().map_err(|_| invalid(key, value))
    };
    let sample_type: SampleType = attr("type")
        .ok_or_else(|| fail("stream without 'type'".to_string()))?
        .parse()
        .map_err(|e: SigstreamError| fail(e.to_string()))?;
    let dim = count("dim")?;
    let sr_raw = raw("sr")?;
    let sr: f64 = sr_raw.parse().map_err(|_| invalid("sr", sr_raw))?;
    let bytes = match attr("byte") {
        Some(_) => count("byte")?,
        None => sample_type.size().unwrap_or(1),
    };
    if let Some(size) = sample_type.size() {
        if size != bytes {
            return Err(fail(format!(
                "{} elements are {} bytes, descriptor says {}",
                sample_type, size, bytes
            )));
        }
    }
    Ok(StreamShape {
        num: 1,
        dim,
        bytes,
        sample_type,
        sr,
    })
}

fn parse_indices(select: &str) -> std::result::Result<Vec<usize>, std::num::ParseIntError> {
    select
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn write_list<W, I>(writer: &mut Writer<W>, tag: &str, items: I) -> Result<()>
where
    W: std::io::Write,
    I: IntoIterator<Item = Vec<(&'static str, String)>>,
{
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(xml_error)?;
    for attrs in items {
        let mut item = BytesStart::new("item");
        for (key, value) in &attrs {
            item.push_attribute((*key, value.as_str()));
        }
        writer.write_event(Event::Empty(item)).map_err(xml_error)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const GAIT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<trainer version="5">
    <info trained="true" date="2024-05-01T10:00:00+00:00"/>
    <streams>
        <item byte="4" dim="3" sr="50.0" type="FLOAT"/>
    </streams>
    <classes>
        <item name="rest"/>
        <item name="walk"/>
        <item name="run"/>
        <item name="stairs"/>
    </classes>
    <model create="NaiveBayes" path="gait.NaiveBayes.model" option="gait.NaiveBayes.option"/>
</trainer>"#;

    #[test]
    fn test_parse_shape_and_classes() {
        let d = ModelDescriptor::parse(GAIT, Path::new("models/gait.trainer")).unwrap();
        assert_eq!(d.input_dim(), 3);
        assert_eq!(d.num_classes(), 4);
        assert_eq!(d.sample_rate(), 50.0);
        assert_eq!(d.sample_type(), SampleType::Float);
        assert_eq!(d.bytes(), 4);
        assert_eq!(d.kind, ModelKind::NaiveBayes);
        assert_eq!(d.name, "gait");
        assert!(d.trained);
    }

    #[test]
    fn test_paths_resolve_next_to_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gait.trainer");
        fs::write(&path, GAIT).unwrap();
        let d = ModelDescriptor::from_file(&path).unwrap();
        assert_eq!(d.model_path(), dir.path().join("gait.NaiveBayes.model"));
        assert_eq!(d.option_path(), Some(dir.path().join("gait.NaiveBayes.option")));
    }

    #[test]
    fn test_selection_and_merged_streams() {
        let xml = r#"<trainer version="5">
            <streams>
                <item byte="4" dim="3" sr="50" type="FLOAT"/>
                <item byte="8" dim="2" sr="50" type="DOUBLE"/>
            </streams>
            <classes><item name="a"/><item name="b"/></classes>
            <selection><item stream="0" select="0, 2,4"/></selection>
            <model create="OnlineNaiveBayes" path="m.model"/>
        </trainer>"#;
        let d = ModelDescriptor::parse(xml, Path::new("m.trainer")).unwrap();
        assert_eq!(d.selection.as_ref().unwrap().indices, vec![0, 2, 4]);
        assert_eq!(d.input_dim(), 3);
        assert_eq!(d.sample_type(), SampleType::Double);
        assert_eq!(d.bytes(), 8);
        assert_eq!(d.option_path(), None);
    }

    #[test]
    fn test_malformed_descriptors() {
        let cases = [
            "<other/>",
            r#"<trainer><classes/><model create="NaiveBayes" path="m"/></trainer>"#,
            r#"<trainer><streams><item dim="1" sr="1" type="FLOAT"/></streams></trainer>"#,
            r#"<trainer><streams><item byte="8" dim="1" sr="1" type="FLOAT"/></streams><model create="NaiveBayes" path="m"/></trainer>"#,
            r#"<trainer><streams><item dim="2" sr="1" type="FLOAT"/></streams><selection><item select="5"/></selection><model create="NaiveBayes" path="m"/></trainer>"#,
        ];
        for xml in cases {
            assert!(
                matches!(
                    ModelDescriptor::parse(xml, Path::new("bad.trainer")),
                    Err(SigstreamError::DescriptorParse { .. })
                ),
                "accepted {}",
                xml
            );
        }
        assert!(matches!(
            ModelDescriptor::parse(
                r#"<trainer><streams><item dim="1" sr="1" type="FLOAT"/></streams><model create="Forest" path="m"/></trainer>"#,
                Path::new("bad.trainer")
            ),
            Err(SigstreamError::ModelNotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_non_integral_stream_counts() {
        let items = [
            r#"dim="-1" sr="1" type="FLOAT""#,
            r#"dim="2.7" sr="1" type="FLOAT""#,
            r#"dim="1e3" sr="1" type="FLOAT""#,
            r#"byte="4.0" dim="1" sr="1" type="FLOAT""#,
            r#"byte="-4" dim="1" sr="1" type="FLOAT""#,
        ];
        for item in items {
            let xml = format!(
                r#"<trainer><streams><item {}/></streams><model create="NaiveBayes" path="m"/></trainer>"#,
                item
            );
            assert!(
                matches!(
                    ModelDescriptor::parse(&xml, Path::new("bad.trainer")),
                    Err(SigstreamError::DescriptorParse { .. })
                ),
                "accepted {}",
                item
            );
        }
    }

    #[test]
    fn test_xml_round_trip() {
        let mut d = ModelDescriptor::parse(GAIT, Path::new("gait.trainer")).unwrap();
        d.classes[0] = "rest & idle".to_string();
        d.selection = Some(Selection {
            stream: 0,
            indices: vec![2, 0],
        });
        let back = ModelDescriptor::parse(&d.to_xml().unwrap(), Path::new("gait.trainer")).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_discover() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.trainer"), GAIT).unwrap();
        fs::write(dir.path().join("nested/a.trainer"), GAIT).unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        let found = ModelDescriptor::discover(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(ModelDescriptor::discover(&dir.path().join("missing")).unwrap().is_empty());
    }
}
