//! Persisted dictionary images.
//!
//! An image is a fixed header followed by the dictionary cells, encoded with
//! `postcard`. Only cells below the high-water mark are stored; everything
//! above it is zero until appended to.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::{
    dictionary::Dictionary,
    word::{Cell, DICT_CELL_BYTES},
};

/// Bumped whenever the opcode numbering or header layout changes.
pub const DICT_VERSION: u16 = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub version: u16,
    pub word_size: u16,
    pub max_cells: u32,
    pub here: u32,
    pub last_word: u32,
    pub var_idx: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub header: ImageHeader,
    pub cells: Vec<Cell>,
}

#[derive(Debug, PartialEq)]
pub enum ImageError {
    Encode,
    Decode,
    /// Built for a different dictionary layout or capacity.
    Incompatible,
    Malformed,
}

impl Image {
    pub fn from_dictionary(dict: &Dictionary) -> Self {
        Self {
            header: ImageHeader {
                version: DICT_VERSION,
                word_size: DICT_CELL_BYTES as u16,
                max_cells: dict.max_cells() as u32,
                here: dict.here() as u32,
                last_word: dict.last_word() as u32,
                var_idx: dict.var_idx(),
            },
            cells: dict.cells().to_vec(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        postcard::to_allocvec(self).map_err(|_| ImageError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        postcard::from_bytes(bytes).map_err(|_| ImageError::Decode)
    }

    /// Whether this image was written by a build with the same layout and a
    /// dictionary of `max_cells` cells.
    pub fn is_compatible(&self, max_cells: usize) -> bool {
        self.header.version == DICT_VERSION
            && self.header.word_size == DICT_CELL_BYTES as u16
            && self.header.max_cells as usize == max_cells
    }

    pub fn into_dictionary(self, max_cells: usize) -> Result<Dictionary, ImageError> {
        if !self.is_compatible(max_cells) {
            return Err(ImageError::Incompatible);
        }
        if self.cells.len() != self.header.here as usize {
            return Err(ImageError::Malformed);
        }
        Dictionary::from_parts(
            self.cells,
            max_cells,
            self.header.last_word as usize,
            self.header.var_idx,
        )
        .ok_or(ImageError::Malformed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Dictionary {
        let mut dict = Dictionary::new(256);
        dict.define(b"one").unwrap();
        dict.append(3).unwrap();
        dict.define(b"two").unwrap();
        dict.append(4).unwrap();
        dict
    }

    #[test]
    fn survives_encoding() {
        let dict = sample();
        let bytes = Image::from_dictionary(&dict).to_bytes().unwrap();
        let image = Image::from_bytes(&bytes).unwrap();
        assert_eq!(image.header.here as usize, dict.here());
        let loaded = image.into_dictionary(256).unwrap();
        assert_eq!(loaded.cells(), dict.cells());
        for name in [&b"one"[..], b"two"] {
            assert_eq!(loaded.find(name), dict.find(name));
        }
    }

    #[test]
    fn mismatches_are_rejected() {
        let image = Image::from_dictionary(&sample());
        assert_eq!(image.clone().into_dictionary(512), Err(ImageError::Incompatible));

        let mut old = image.clone();
        old.header.version = DICT_VERSION - 1;
        assert!(!old.is_compatible(256));

        let mut short = image;
        short.cells.pop();
        assert_eq!(short.into_dictionary(256), Err(ImageError::Malformed));

        assert_eq!(Image::from_bytes(&[0xFF, 0xFF]), Err(ImageError::Decode));
    }
}
