pub mod attributes;
pub mod batcher;
pub mod dataset;

use std::{fmt, str::FromStr};

pub use attributes::{AttributeTable, LabelSpace, Taxonomy};
pub use batcher::{ImSituBatch, ImSituBatcher};
pub use dataset::{ImSitu, ImSituDataset, ImSituItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub fn list_file(&self) -> &'static str {
        match self {
            Split::Train => "train.tsv",
            Split::Valid => "val.tsv",
            Split::Test => "test.tsv",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Split::Train => "train",
            Split::Valid => "val",
            Split::Test => "test",
        })
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Valid),
            "test" => Ok(Split::Test),
            other => Err(other.to_string()),
        }
    }
}
