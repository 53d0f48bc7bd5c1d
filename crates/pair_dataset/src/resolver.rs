//! Index of location folders and their sequential images.

use crate::identifier::PairIdentifier;
use crate::types::{DatasetError, DatasetResult};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

/// One location folder with its images in sorted order.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub path: PathBuf,
    pub images: Vec<PathBuf>,
}

/// Two consecutive images of one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePairPaths {
    pub first: PathBuf,
    pub second: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct FolderIndex {
    folders: Vec<ImageFolder>,
}

impl FolderIndex {
    /// Index every subdirectory of `root`, ordered by name.
    pub fn scan(root: &Path, extensions: &[String]) -> DatasetResult<Self> {
        let mut folders: Vec<PathBuf> = dir_entries(root)?
            .into_iter()
            .filter(|path| path.is_dir())
            .collect();
        folders.sort();
        let index = Self::from_folders(folders, extensions)?;
        tracing::info!(
            root = %root.display(),
            folders = index.len(),
            images = index.total_images(),
            "indexed image folders"
        );
        Ok(index)
    }

    /// Index an explicit folder list; folder indices follow the given order.
    pub fn from_folders<I>(folders: I, extensions: &[String]) -> DatasetResult<Self>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let folders = folders
            .into_iter()
            .map(|path| {
                let images = list_images(&path, extensions)?;
                Ok(ImageFolder { path, images })
            })
            .collect::<DatasetResult<Vec<_>>>()?;
        Ok(Self { folders })
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }

    pub fn folders(&self) -> &[ImageFolder] {
        &self.folders
    }

    pub fn total_images(&self) -> usize {
        self.folders.iter().map(|f| f.images.len()).sum()
    }

    pub fn resolve(&self, id: &PairIdentifier) -> DatasetResult<ImagePairPaths> {
        let folder = self
            .folders
            .get(id.folder)
            .ok_or(DatasetError::FolderOutOfRange {
                index: id.folder,
                available: self.folders.len(),
            })?;
        let out_of_range = |index: usize| DatasetError::ImageOutOfRange {
            folder: folder.path.clone(),
            index,
            available: folder.images.len(),
        };
        let first = folder.images.get(id.image).ok_or_else(|| out_of_range(id.image))?;
        // Assumes consecutive files in a folder are consecutive captures of the location.
        let second = folder
            .images
            .get(id.successor())
            .ok_or_else(|| out_of_range(id.successor()))?;
        Ok(ImagePairPaths {
            first: first.clone(),
            second: second.clone(),
        })
    }

    pub fn resolve_str(&self, identifier: &str) -> DatasetResult<ImagePairPaths> {
        let id = PairIdentifier::decode(identifier).map_err(|source| DatasetError::Identifier {
            identifier: identifier.to_string(),
            source,
        })?;
        self.resolve(&id)
    }
}

pub fn default_extensions() -> Vec<String> {
    vec![DEFAULT_IMAGE_EXTENSION.to_string()]
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Every entry path of `dir`; listing and per-entry failures are both `DatasetError::Io`.
fn dir_entries(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let io_err = |source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    };
    fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()).map_err(io_err))
        .collect()
}

fn list_images(dir: &Path, extensions: &[String]) -> DatasetResult<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = dir_entries(dir)?
        .into_iter()
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();
    images.sort();
    Ok(images)
}
