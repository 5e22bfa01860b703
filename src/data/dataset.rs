use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::data::dataset::{Dataset, InMemDataset};

use crate::error::DataError;

use super::{attributes::Taxonomy, AttributeTable, Split};

const TAXONOMY_FILE: &str = "attributes.json";
const IMAGE_DIR: &str = "images";

#[derive(Debug, Clone)]
pub struct ImSituItem {
    pub image_path: PathBuf,
    /// Index into the split's label vocabulary.
    pub label: usize,
}

pub struct ImSituDataset {
    pub dataset: InMemDataset<ImSituItem>,
}

impl Dataset<ImSituItem> for ImSituDataset {
    fn get(&self, index: usize) -> Option<ImSituItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

/// One zero-shot split: its images and the attribute table of its labels.
pub struct ImSitu {
    pub dataset: ImSituDataset,
    pub attributes: AttributeTable,
}

impl ImSitu {
    /// Loads train, validation and test. The label vocabularies of the three
    /// splits are disjoint.
    pub fn splits(data_dir: &Path) -> Result<(Self, Self, Self), DataError> {
        let taxonomy = Taxonomy::load(&data_dir.join(TAXONOMY_FILE))?;

        Ok((
            Self::load(data_dir, &taxonomy, Split::Train)?,
            Self::load(data_dir, &taxonomy, Split::Valid)?,
            Self::load(data_dir, &taxonomy, Split::Test)?,
        ))
    }

    pub fn load(data_dir: &Path, taxonomy: &Taxonomy, split: Split) -> Result<Self, DataError> {
        let attributes = taxonomy.table(split)?;
        let list_path = data_dir.join(split.list_file());
        let list = fs::read_to_string(&list_path).map_err(|source| DataError::Read {
            path: list_path.clone(),
            source,
        })?;

        let items = parse_list(&list, &list_path, &data_dir.join(IMAGE_DIR), &attributes)?;

        if let Some(missing) = items.iter().find(|item| !item.image_path.is_file()) {
            return Err(DataError::MissingImage(missing.image_path.clone()));
        }

        tracing::info!(
            "{} split: {} images over {} labels",
            split,
            items.len(),
            attributes.num_labels()
        );

        Ok(Self {
            dataset: ImSituDataset {
                dataset: InMemDataset::new(items),
            },
            attributes,
        })
    }
}

/// Parses `<image>\t<verb>` lines, keeping rows whose verb belongs to the
/// split's vocabulary.
fn parse_list(
    list: &str,
    list_path: &Path,
    image_dir: &Path,
    attributes: &AttributeTable,
) -> Result<Vec<ImSituItem>, DataError> {
    let mut items = vec![];
    let mut dropped = 0;

    for (line_no, line) in list.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((image, verb)) = line.split_once('\t') else {
            return Err(DataError::Malformed {
                path: list_path.to_path_buf(),
                line: line_no + 1,
                message: "expected '<image>\\t<verb>'".to_string(),
            });
        };

        match attributes.label_index(verb.trim()) {
            Some(label) => items.push(ImSituItem {
                image_path: image_dir.join(image.trim()),
                label,
            }),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(
            "{}: dropped {} images of labels outside the split",
            list_path.display(),
            dropped
        );
    }

    Ok(items)
}
