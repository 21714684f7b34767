use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;

/// Named byte blobs a style refers to: the style document itself, fonts and
/// images. Names use `/` as the separator.
pub trait AssetPackage: Send + Sync {
    fn asset_names(&self) -> Vec<String>;

    fn load_asset(&self, name: &str) -> Option<Arc<[u8]>>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryAssetPackage {
    assets: BTreeMap<String, Arc<[u8]>>,
}

impl MemoryAssetPackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: Into<String>, D: Into<Arc<[u8]>>>(&mut self, name: N, data: D) {
        self.assets.insert(name.into(), data.into());
    }

    pub fn with_asset<N: Into<String>, D: Into<Arc<[u8]>>>(mut self, name: N, data: D) -> Self {
        self.insert(name, data);
        self
    }
}

impl AssetPackage for MemoryAssetPackage {
    fn asset_names(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    fn load_asset(&self, name: &str) -> Option<Arc<[u8]>> {
        self.assets.get(name).cloned()
    }
}

/// Assets stored below a directory, indexed once when the package is opened.
#[derive(Debug, Clone)]
pub struct DirectoryAssetPackage {
    root: PathBuf,
    names: Vec<String>,
}

impl DirectoryAssetPackage {
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        let mut names = Vec::new();
        Self::scan(&root, "", &mut names)?;
        names.sort();

        Ok(Self { root, names })
    }

    fn scan(dir: &Path, prefix: &str, names: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(String::from) else {
                log::warn!("skipping asset with non utf-8 name in {}", dir.display());
                continue;
            };
            let name = format!("{prefix}{file_name}");

            if entry.file_type()?.is_dir() {
                Self::scan(&entry.path(), &format!("{name}/"), names)?;
            } else {
                names.push(name);
            }
        }

        Ok(())
    }
}

impl AssetPackage for DirectoryAssetPackage {
    fn asset_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn load_asset(&self, name: &str) -> Option<Arc<[u8]>> {
        if !self.names.iter().any(|n| n == name) {
            return None;
        }

        let mut path = self.root.clone();
        for seg in name.split('/') {
            path.push(seg);
        }

        match std::fs::read(&path) {
            Ok(data) => Some(data.into()),
            Err(e) => {
                log::error!("unable to read asset '{name}': {e}");
                None
            }
        }
    }
}

/// Directory part of an asset name including the trailing separator, empty
/// for root level assets.
pub fn file_path(name: &str) -> &str {
    match name.rfind('/') {
        Some(idx) => &name[..=idx],
        None => "",
    }
}

/// Collapses `.`, `..` and repeated separators, preserving a trailing `/`.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => (),
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            seg => parts.push(seg),
        }
    }

    let mut normalized = parts.join("/");
    if path.ends_with('/') && !normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}
