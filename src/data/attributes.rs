use std::{fs, path::Path};

use burn::prelude::*;
use serde::Deserialize;

use crate::error::DataError;

use super::Split;

/// Marks a label whose value for an attribute is not annotated.
pub const UNKNOWN_VALUE: i64 = -1;

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    /// 1 for a binary presence attribute, otherwise the number of mutually
    /// exclusive values.
    pub domain: usize,
}

impl AttributeSpec {
    pub fn is_binary(&self) -> bool {
        self.domain == 1
    }

    /// Width of the attribute once gathered into label space: binary
    /// attributes expand to (present, absent).
    fn value_width(&self) -> usize {
        if self.is_binary() {
            2
        } else {
            self.domain
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerbEntry {
    pub name: String,
    pub split: String,
    pub values: Vec<i64>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Taxonomy {
    pub attributes: Vec<AttributeSpec>,
    pub verbs: Vec<VerbEntry>,
}

impl Taxonomy {
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let raw = fs::read_to_string(path).map_err(|source| DataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let taxonomy: Taxonomy =
            serde_json::from_str(&raw).map_err(|source| DataError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        taxonomy.validate()?;

        Ok(taxonomy)
    }

    fn validate(&self) -> Result<(), DataError> {
        if self.attributes.is_empty() {
            return Err(DataError::Taxonomy("no attributes declared".to_string()));
        }
        if let Some(att) = self.attributes.iter().find(|att| att.domain == 0) {
            return Err(DataError::Taxonomy(format!(
                "attribute '{}' has an empty domain",
                att.name
            )));
        }

        let embed_dim = self.verbs.first().map(|verb| verb.embedding.len());
        for verb in &self.verbs {
            if verb.split.parse::<Split>().is_err() {
                return Err(DataError::Taxonomy(format!(
                    "verb '{}' has unknown split '{}'",
                    verb.name, verb.split
                )));
            }
            if verb.values.len() != self.attributes.len() {
                return Err(DataError::Taxonomy(format!(
                    "verb '{}' has {} attribute values, expected {}",
                    verb.name,
                    verb.values.len(),
                    self.attributes.len()
                )));
            }
            if Some(verb.embedding.len()) != embed_dim || verb.embedding.is_empty() {
                return Err(DataError::Taxonomy(format!(
                    "verb '{}' has an embedding of dimension {}, expected {}",
                    verb.name,
                    verb.embedding.len(),
                    embed_dim.unwrap_or_default()
                )));
            }
            for (att, &value) in self.attributes.iter().zip(&verb.values) {
                let upper = if att.is_binary() { 2 } else { att.domain as i64 };
                if value != UNKNOWN_VALUE && !(0..upper).contains(&value) {
                    return Err(DataError::Taxonomy(format!(
                        "verb '{}' has value {} for attribute '{}' (domain {})",
                        verb.name, value, att.name, att.domain
                    )));
                }
            }
        }

        Ok(())
    }

    /// The label vocabulary of one split, in file order.
    pub fn table(&self, split: Split) -> Result<AttributeTable, DataError> {
        let verbs: Vec<&VerbEntry> = self
            .verbs
            .iter()
            .filter(|verb| verb.split.parse::<Split>().ok() == Some(split))
            .collect();

        if verbs.is_empty() {
            return Err(DataError::EmptySplit(split.to_string()));
        }

        Ok(AttributeTable {
            attributes: self.attributes.clone(),
            labels: verbs.iter().map(|verb| verb.name.clone()).collect(),
            values: verbs.iter().map(|verb| verb.values.clone()).collect(),
            embed_dim: verbs[0].embedding.len(),
            embeddings: verbs
                .iter()
                .flat_map(|verb| verb.embedding.iter().copied())
                .collect(),
        })
    }
}

/// Host-side attribute taxonomy of one split: what every candidate label looks
/// like in attribute space and in word-embedding space.
#[derive(Debug, Clone)]
pub struct AttributeTable {
    pub attributes: Vec<AttributeSpec>,
    pub labels: Vec<String>,
    /// `[label][attribute]` ground-truth values.
    pub values: Vec<Vec<i64>>,
    pub embed_dim: usize,
    /// Row-major `[label, embed_dim]`.
    pub embeddings: Vec<f32>,
}

impl AttributeTable {
    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn domains(&self) -> Vec<usize> {
        self.attributes.iter().map(|att| att.domain).collect()
    }

    /// Width of the model's attribute representation.
    pub fn attribute_width(&self) -> usize {
        self.attributes.iter().map(|att| att.domain).sum()
    }

    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|label| label == name)
    }

    /// Row-major `[value_width, labels]` matrix mapping attribute-space
    /// probabilities of attribute `att` onto labels. An unknown value is a
    /// uniform column, so the label receives the average over all values.
    pub fn label_encoding(&self, att: usize) -> (Vec<f32>, [usize; 2]) {
        let spec = &self.attributes[att];
        let width = spec.value_width();
        let num_labels = self.num_labels();
        let mut data = vec![0.0; width * num_labels];

        for (label, row) in self.values.iter().enumerate() {
            let value = row[att];
            if value == UNKNOWN_VALUE {
                for v in 0..width {
                    data[v * num_labels + label] = 1.0 / width as f32;
                }
            } else if spec.is_binary() {
                // row 0 is "present", row 1 is "absent"
                let present = value == 1;
                data[label] = if present { 1.0 } else { 0.0 };
                data[num_labels + label] = if present { 0.0 } else { 1.0 };
            } else {
                data[value as usize * num_labels + label] = 1.0;
            }
        }

        (data, [width, num_labels])
    }

    /// Row-major `[labels, value_width]` distribution of attribute `att` for
    /// each label, the transpose of [`Self::label_encoding`].
    pub fn value_distribution(&self, att: usize) -> (Vec<f32>, [usize; 2]) {
        let (encoding, [width, num_labels]) = self.label_encoding(att);
        let mut data = vec![0.0; num_labels * width];

        for label in 0..num_labels {
            for v in 0..width {
                data[label * width + v] = encoding[v * num_labels + label];
            }
        }

        (data, [num_labels, width])
    }

    pub fn to_device<B: Backend>(&self, device: &B::Device) -> LabelSpace<B> {
        let embeddings = float_tensor(
            self.embeddings.clone(),
            [self.num_labels(), self.embed_dim],
            device,
        );
        let encodings = (0..self.attributes.len())
            .map(|att| {
                let (data, shape) = self.label_encoding(att);
                float_tensor(data, shape, device)
            })
            .collect();

        LabelSpace {
            embeddings,
            encodings,
            domains: self.domains(),
        }
    }
}

/// Device-resident view of an [`AttributeTable`] used by scoring and losses.
#[derive(Debug, Clone)]
pub struct LabelSpace<B: Backend> {
    /// `[labels, embed_dim]`.
    pub embeddings: Tensor<B, 2>,
    /// Per attribute, `[value_width, labels]`.
    pub encodings: Vec<Tensor<B, 2>>,
    pub domains: Vec<usize>,
}

impl<B: Backend> LabelSpace<B> {
    pub fn num_labels(&self) -> usize {
        self.embeddings.dims()[0]
    }
}

pub(crate) fn float_tensor<B: Backend>(
    data: Vec<f32>,
    shape: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(data, shape).convert::<B::FloatElem>(), device)
}
