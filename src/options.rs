//! JSON option files
//!
//! Operator, consumer and model options are plain serde structs with
//! `#[serde(default)]`, so a partial file only overrides what it names.

use crate::error::{Result, SigstreamError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Read options from `path`, keeping defaults when the file does not exist
///
/// A file that exists but cannot be read or parsed is an error.
pub fn load_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::warn!(
            "[OPTIONS] {} not found, keeping defaults",
            path.display()
        );
        return Ok(T::default());
    }
    let text = fs::read_to_string(path).map_err(|source| SigstreamError::FileNotFound {
        path: path.to_path_buf(),
        source,
    })?;
    let options = serde_json::from_str(&text)?;
    log::debug!("[OPTIONS] loaded {}", path.display());
    Ok(options)
}

/// Write options to `path` as pretty JSON
pub fn save<T: Serialize>(path: &Path, options: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(options)?;
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{AvgVarFormat, MvgAvgVarOptions};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let options: MvgAvgVarOptions = load_or_default(&dir.path().join("none.option")).unwrap();
        assert_eq!(options, MvgAvgVarOptions::default());
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mvg.option");
        fs::write(&path, r#"{ "format": "both" }"#).unwrap();
        let options: MvgAvgVarOptions = load_or_default(&path).unwrap();
        assert_eq!(options.format, AvgVarFormat::Both);
        assert_eq!(options.window, MvgAvgVarOptions::default().window);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.option");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_or_default::<MvgAvgVarOptions>(&path).is_err());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mvg.option");
        let options = MvgAvgVarOptions {
            window: 2.5,
            ..Default::default()
        };
        save(&path, &options).unwrap();
        assert_eq!(load_or_default::<MvgAvgVarOptions>(&path).unwrap(), options);
    }
}
