//! Finding the dictionaries installed on a Mac.
//!
//! macOS keeps each dictionary as a bundle inside a MobileAsset directory:
//!
//! ```text
//! <base>/<asset>/AssetData/<name>.dictionary/Contents/Resources/Body.data
//! ```
//!
//! None of this is needed to decode a Body.data file;
//! it just saves callers from walking the tree themselves.

use camino::{Utf8Path, Utf8PathBuf};
use log::*;

use crate::result::*;

/// Where macOS keeps its dictionary assets
pub const DEFAULT_BASE: &str =
    "/System/Library/AssetsV2/com_apple_MobileAsset_DictionaryServices_dictionaryOSX/";

/// The name of the file holding a dictionary's entries
pub const BODY_DATA: &str = "Body.data";

/// A dictionary bundle and the resources inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    /// The bundle's name, minus its `.dictionary` extension
    pub name: String,

    /// The path of the bundle
    pub path: Utf8PathBuf,

    /// The bundle's resources (`Body.data`, `KeyText.index`, `DefaultStyle.css`, ...),
    /// not counting localization (`*.lproj`) directories, sorted by path.
    pub resources: Vec<Utf8PathBuf>,
}

impl Dictionary {
    /// Returns the path of the dictionary's Body.data, if it has one.
    pub fn body_data(&self) -> Option<&Utf8Path> {
        self.resources
            .iter()
            .map(Utf8PathBuf::as_path)
            .find(|path| path.file_name() == Some(BODY_DATA))
    }
}

/// Finds every dictionary under `base` (usually [`DEFAULT_BASE`]),
/// sorted by name.
///
/// Dictionaries without any resources are left out.
pub fn find_dictionaries(base: &Utf8Path) -> BodyResult<Vec<Dictionary>> {
    let mut dictionaries = Vec::new();

    for asset in base.read_dir_utf8()? {
        let asset = asset?;
        if !asset.path().is_dir() {
            continue;
        }
        let asset_data = asset.path().join("AssetData");
        if !asset_data.is_dir() {
            warn!("Skipping {}: no AssetData directory", asset.path());
            continue;
        }

        for bundle in asset_data.read_dir_utf8()? {
            let bundle = bundle?;
            let path = bundle.path();
            let name = path
                .file_stem()
                .ok_or_else(|| BodyError::InvalidPath(format!("{path} has no file name")))?;

            let resources = list_resources(&path.join("Contents").join("Resources"))?;
            if resources.is_empty() {
                debug!("Skipping {}: no resources", path);
                continue;
            }
            trace!("Found {} with {} resources", name, resources.len());

            dictionaries.push(Dictionary {
                name: name.to_owned(),
                path: path.to_owned(),
                resources,
            });
        }
    }

    dictionaries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(dictionaries)
}

fn list_resources(resources_dir: &Utf8Path) -> BodyResult<Vec<Utf8PathBuf>> {
    if !resources_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut resources = Vec::new();
    for resource in resources_dir.read_dir_utf8()? {
        let resource = resource?;
        if resource.path().extension() == Some("lproj") {
            continue;
        }
        resources.push(resource.path().to_owned());
    }
    resources.sort();
    Ok(resources)
}

/// Which dictionaries to work on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every dictionary found
    All,
    /// Only dictionaries with these names
    Named(Vec<String>),
}

impl Selection {
    /// Selects the given dictionary names,
    /// or all of them if there are none or one of them is `"all"`.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() || names.iter().any(|name| name == "all") {
            Selection::All
        } else {
            Selection::Named(names)
        }
    }

    pub fn selects(&self, name: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Named(names) => names.iter().any(|n| n == name),
        }
    }

    /// Returns the requested names that aren't among `dictionaries`.
    pub fn missing(&self, dictionaries: &[Dictionary]) -> Vec<&str> {
        match self {
            Selection::All => Vec::new(),
            Selection::Named(names) => names
                .iter()
                .filter(|name| !dictionaries.iter().any(|d| &d.name == *name))
                .map(String::as_str)
                .collect(),
        }
    }
}
