use alloc::vec::Vec;

use crate::word::{Cell, WordId, DICT_CELL_BYTES};

/// Longest name a header can carry.
pub const MAX_NAME_LEN: usize = 0x3F;

pub(crate) const IMMEDIATE_BIT: Cell = 1 << 7;
pub(crate) const PRIMITIVE_BIT: Cell = 1 << 6;
const NAME_LEN_BITS: Cell = 0x3F;

#[derive(Debug, PartialEq)]
pub enum DictError {
    Full,
    EmptyName,
    NameTooLong(usize),
    OutOfBounds(usize),
}

/// The result of a successful [`Dictionary::find`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Found {
    /// First cell of the word's body.
    pub body: usize,
    pub header: WordId,
    pub immediate: bool,
    pub primitive: bool,
}

/// The code store.
///
/// Every entry in the dictionary is laid out as:
///
/// ```text
/// [index of previous header]
/// [flags | name length]
/// [name, two bytes per cell, zero padded]...
/// [body]...
/// ```
///
/// Cell 0 is never handed out, so a previous-header index of 0 ends the
/// chain. Nothing is ever removed; redefining a name only shadows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    cells: Vec<Cell>,
    max_cells: usize,
    last_word: usize,
    var_idx: u16,
}

impl Dictionary {
    pub fn new(max_cells: usize) -> Self {
        let mut cells = Vec::with_capacity(max_cells.min(4096));
        cells.push(0);
        Self {
            cells,
            max_cells,
            last_word: 0,
            var_idx: 0,
        }
    }

    /// Rebuilds a dictionary from persisted parts. Returns `None` if the
    /// parts do not describe a well formed dictionary.
    pub fn from_parts(
        cells: Vec<Cell>,
        max_cells: usize,
        last_word: usize,
        var_idx: u16,
    ) -> Option<Self> {
        if cells.is_empty() || cells.len() > max_cells || last_word >= cells.len() {
            return None;
        }
        let dict = Self {
            cells,
            max_cells,
            last_word,
            var_idx,
        };
        // Every link has to point strictly backwards, or `find` could spin.
        let mut idx = dict.last_word;
        while idx != 0 {
            let prev = dict.cells[idx] as usize;
            if prev >= idx || idx + 1 >= dict.cells.len() {
                return None;
            }
            idx = prev;
        }
        Some(dict)
    }

    #[inline]
    pub fn here(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn max_cells(&self) -> usize {
        self.max_cells
    }

    #[inline]
    pub fn last_word(&self) -> usize {
        self.last_word
    }

    #[inline]
    pub fn var_idx(&self) -> u16 {
        self.var_idx
    }

    #[inline]
    pub(crate) fn set_var_idx(&mut self, idx: u16) {
        self.var_idx = idx;
    }

    #[inline]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<Cell> {
        self.cells.get(idx).copied()
    }

    pub fn append(&mut self, cell: Cell) -> Result<(), DictError> {
        if self.cells.len() >= self.max_cells {
            return Err(DictError::Full);
        }
        self.cells.push(cell);
        Ok(())
    }

    /// Appends `bytes` two to a cell, first byte in the low half.
    pub fn append_packed(&mut self, bytes: &[u8]) -> Result<(), DictError> {
        if self.cells.len() + cells_for(bytes.len()) > self.max_cells {
            return Err(DictError::Full);
        }
        for pair in bytes.chunks(DICT_CELL_BYTES) {
            let lo = pair[0] as Cell;
            let hi = pair.get(1).copied().unwrap_or(0) as Cell;
            self.cells.push(lo | (hi << 8));
        }
        Ok(())
    }

    /// Writes a header for `name` and makes it the most recent word.
    pub fn define(&mut self, name: &[u8]) -> Result<WordId, DictError> {
        if name.is_empty() {
            return Err(DictError::EmptyName);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(DictError::NameTooLong(name.len()));
        }
        if self.here() + 2 + cells_for(name.len()) > self.max_cells {
            return Err(DictError::Full);
        }
        let header = self.here();
        self.append(self.last_word as Cell)?;
        self.append(name.len() as Cell)?;
        self.append_packed(name)?;
        self.last_word = header;
        Ok(WordId(header))
    }

    pub fn mark_immediate(&mut self) {
        self.set_flag(IMMEDIATE_BIT);
    }

    pub(crate) fn mark_primitive(&mut self) {
        self.set_flag(PRIMITIVE_BIT);
    }

    fn set_flag(&mut self, flag: Cell) {
        if self.last_word != 0 {
            self.cells[self.last_word + 1] |= flag;
        }
    }

    /// Overwrites an already allocated cell.
    pub fn write(&mut self, idx: usize, cell: Cell) -> Result<(), DictError> {
        match self.cells.get_mut(idx) {
            Some(slot) if idx != 0 => {
                *slot = cell;
                Ok(())
            }
            _ => Err(DictError::OutOfBounds(idx)),
        }
    }

    pub fn byte(&self, idx: usize, which: usize) -> Option<u8> {
        let cell = self.get(idx)?;
        Some((cell >> (8 * which)) as u8)
    }

    pub fn set_byte(&mut self, idx: usize, which: usize, byte: u8) -> Result<(), DictError> {
        let cell = self.get(idx).ok_or(DictError::OutOfBounds(idx))?;
        let shift = 8 * which;
        let cell = (cell & !(0xFF << shift)) | ((byte as Cell) << shift);
        self.write(idx, cell)
    }

    /// Looks `name` up, newest definition first.
    pub fn find(&self, name: &[u8]) -> Option<Found> {
        self.headers().find_map(|header| {
            let flags = self.get(header.0 + 1)?;
            let len = (flags & NAME_LEN_BITS) as usize;
            if len != name.len() || !self.name_matches(header, name) {
                return None;
            }
            Some(Found {
                body: header.0 + 2 + cells_for(len),
                header,
                immediate: flags & IMMEDIATE_BIT != 0,
                primitive: flags & PRIMITIVE_BIT != 0,
            })
        })
    }

    fn name_matches(&self, header: WordId, name: &[u8]) -> bool {
        name.chunks(DICT_CELL_BYTES).enumerate().all(|(i, pair)| {
            let cell = self.cells.get(header.0 + 2 + i).copied().unwrap_or(0);
            pair[0] == cell as u8 && pair.get(1).map_or(true, |b| *b == (cell >> 8) as u8)
        })
    }

    /// Body address of the word whose header is at `header`.
    pub fn body_of(&self, header: WordId) -> Option<usize> {
        let flags = self.get(header.0 + 1)?;
        Some(header.0 + 2 + cells_for((flags & NAME_LEN_BITS) as usize))
    }

    /// The name stored in a header.
    pub fn name_of(&self, header: WordId) -> Option<Vec<u8>> {
        let len = (self.get(header.0 + 1)? & NAME_LEN_BITS) as usize;
        let start = header.0 + 2;
        let cells = self.cells.get(start..start + cells_for(len))?;
        let mut name: Vec<u8> = cells
            .iter()
            .flat_map(|c| [*c as u8, (*c >> 8) as u8])
            .collect();
        name.truncate(len);
        Some(name)
    }

    /// Walks the headers from the most recent one back to the sentinel.
    pub fn headers(&self) -> Headers<'_> {
        Headers {
            cells: &self.cells,
            next: self.last_word,
        }
    }
}

pub struct Headers<'a> {
    cells: &'a [Cell],
    next: usize,
}

impl Iterator for Headers<'_> {
    type Item = WordId;

    fn next(&mut self) -> Option<WordId> {
        if self.next == 0 {
            return None;
        }
        let cur = self.next;
        let prev = self.cells.get(cur).copied().unwrap_or(0) as usize;
        // a link that doesn't point backwards ends the walk
        self.next = if prev < cur { prev } else { 0 };
        Some(WordId(cur))
    }
}

#[inline]
pub(crate) fn cells_for(bytes: usize) -> usize {
    (bytes + DICT_CELL_BYTES - 1) / DICT_CELL_BYTES
}
