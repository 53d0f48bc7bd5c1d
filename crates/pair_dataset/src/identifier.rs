//! Pair identifiers of the form `<folder>-<image>[-<rest>]`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DELIMITER: char = '-';

/// Location of a pair: folder index in the image root, and index of the first image.
/// The second image of the pair is always the next one in the folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairIdentifier {
    pub folder: usize,
    pub image: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("missing '-' after the folder field")]
    MissingDelimiter,
    #[error("{field} field {value:?} is not a non-negative integer")]
    InvalidField { field: &'static str, value: String },
}

impl PairIdentifier {
    pub fn new(folder: usize, image: usize) -> Self {
        Self { folder, image }
    }

    /// Decode the first two delimited fields; anything after a second delimiter is ignored.
    pub fn decode(identifier: &str) -> Result<Self, IdentifierError> {
        let mut fields = identifier.splitn(3, DELIMITER);
        let folder = fields.next().unwrap_or_default();
        let image = fields.next().ok_or(IdentifierError::MissingDelimiter)?;
        Ok(Self {
            folder: parse_field("folder", folder)?,
            image: parse_field("image", image)?,
        })
    }

    pub fn successor(&self) -> usize {
        self.image + 1
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<usize, IdentifierError> {
    let invalid = || IdentifierError::InvalidField {
        field,
        value: value.to_string(),
    };
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    value.parse::<usize>().map_err(|_| invalid())
}

impl FromStr for PairIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Display for PairIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{DELIMITER}{}", self.folder, self.image)
    }
}
