//! Volatile working memory.
//!
//! The arena is a flat run of 32-bit cells. It starts with the interpreter
//! control block, followed by task blocks, and ends with the scratch pad.
//! Variables are allotted downwards from just below the pad.
//!
//! ```text
//! [0, IRAM_CELLS)             control block + input line
//! [IRAM_CELLS, ...)           task 0, then any other tasks
//! ...                         variables, growing down
//! [len - PAD_CELLS, len)      pad (counted string)
//! ```

use alloc::{vec, vec::Vec};

use crate::{
    config::Params,
    number::MAX_FIXED_POINT_PLACES,
    word::{RamCell, ARENA_CELL_BYTES},
    Error, Mode,
};

/// Size of the input line buffer, in bytes.
pub const TIB_BYTES: usize = 160;
/// Size of the pad's string area, in bytes.
pub const PAD_BYTES: usize = 160;

pub(crate) const TIB_CELLS: usize = TIB_BYTES / ARENA_CELL_BYTES;
/// The pad's count cell plus its bytes.
pub const PAD_CELLS: usize = 1 + PAD_BYTES / ARENA_CELL_BYTES;

// Control block fields.
pub(crate) const STATE: usize = 0;
pub(crate) const TOTAL_RAM: usize = 1;
pub(crate) const COMPILING_WORD: usize = 2;
pub(crate) const CUR_TASK: usize = 3;
pub(crate) const TIB_IDX: usize = 4;
pub(crate) const TIB_WORD_IDX: usize = 5;
pub(crate) const TIB_WORD_LEN: usize = 6;
pub(crate) const TIB_LEN: usize = 7;
pub(crate) const TIB: usize = 8;

/// Cells used by the control block, including the input line.
pub const IRAM_CELLS: usize = TIB + TIB_CELLS;

// Task block fields, relative to the start of a task. Cell 0 holds the
// block's total length.
pub(crate) const TASK_BASE: usize = 1;
pub(crate) const TASK_FIXEDP: usize = 2;
pub(crate) const TASK_DIDX: usize = 3;
pub(crate) const TASK_RIDX: usize = 4;
pub(crate) const TASK_DSIZE: usize = 5;
pub(crate) const TASK_RSIZE: usize = 6;
pub(crate) const TASK_STACKS: usize = 7;

/// Cells of a task block before its stack array.
pub const TASK_HEADER_CELLS: usize = TASK_STACKS;

#[derive(Debug, Clone)]
pub struct Arena {
    cells: Vec<RamCell>,
}

impl Arena {
    pub fn new(params: &Params) -> Self {
        let mut arena = Self {
            cells: vec![0; params.arena_cells],
        };
        arena.cold(params);
        arena
    }

    /// Wipes the arena and sets up task 0 from `params`.
    pub fn cold(&mut self, params: &Params) {
        self.cells.iter_mut().for_each(|c| *c = 0);
        self.cells[TOTAL_RAM] = self.cells.len() as RamCell;
        self.init_task0(params);
    }

    pub(crate) fn init_task0(&mut self, params: &Params) {
        // `Params::validate` guarantees task 0 fits, so this can't fail.
        let _ = self.make_task(
            0,
            params.task0_cells,
            params.data_stack_cells,
            params.return_stack_cells,
        );
        self.cells[CUR_TASK] = 0;
        self.cells[TASK_FIXEDP + IRAM_CELLS] = params.fixed_point_places as RamCell;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Result<RamCell, Error> {
        self.cells.get(idx).copied().ok_or(Error::BadArenaAddress(idx))
    }

    #[inline]
    pub fn set(&mut self, idx: usize, val: RamCell) -> Result<(), Error> {
        let slot = self.cells.get_mut(idx).ok_or(Error::BadArenaAddress(idx))?;
        *slot = val;
        Ok(())
    }

    pub fn byte(&self, idx: usize, which: usize) -> Result<u8, Error> {
        Ok(self.get(idx)?.to_le_bytes()[which])
    }

    pub fn set_byte(&mut self, idx: usize, which: usize, byte: u8) -> Result<(), Error> {
        let mut bytes = self.get(idx)?.to_le_bytes();
        bytes[which] = byte;
        self.set(idx, RamCell::from_le_bytes(bytes))
    }

    // Control block fields are always in range, the arena is never smaller
    // than `IRAM_CELLS`.
    #[inline]
    pub(crate) fn field(&self, idx: usize) -> RamCell {
        self.cells[idx]
    }

    #[inline]
    pub(crate) fn set_field(&mut self, idx: usize, val: RamCell) {
        self.cells[idx] = val;
    }

    pub fn mode(&self) -> Mode {
        if self.field(STATE) == 0 {
            Mode::Interpret
        } else {
            Mode::Compile
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        let state = match mode {
            Mode::Interpret => 0,
            Mode::Compile => 1,
        };
        self.set_field(STATE, state);
    }

    /// Header index of the word being compiled, 0 if none.
    pub fn compiling_word(&self) -> usize {
        self.field(COMPILING_WORD) as usize
    }

    pub(crate) fn set_compiling_word(&mut self, header: usize) {
        self.set_field(COMPILING_WORD, header as RamCell);
    }

    /// First cell of the pad, which holds the count.
    #[inline]
    pub fn pad(&self) -> usize {
        self.cells.len() - PAD_CELLS
    }

    /// Arena index of the task block at `offset`.
    #[inline]
    pub(crate) fn task_start(offset: usize) -> usize {
        IRAM_CELLS.saturating_add(offset)
    }

    /// Arena index of the selected task block.
    #[inline]
    pub fn task(&self) -> usize {
        Self::task_start(self.field(CUR_TASK) as u32 as usize)
    }

    /// Reads a field of the selected task.
    pub(crate) fn task_field(&self, field: usize) -> Result<RamCell, Error> {
        self.get(self.task().saturating_add(field))
    }

    /// Numeric base of the selected task.
    pub fn base(&self) -> u32 {
        self.task_field(TASK_BASE).unwrap_or(10) as u32
    }

    /// Fixed-point places of the selected task. Out of range values read as
    /// the nearest valid count.
    pub fn fixed_point_places(&self) -> u32 {
        let places = self.task_field(TASK_FIXEDP).unwrap_or(0);
        u32::try_from(places)
            .unwrap_or(0)
            .min(MAX_FIXED_POINT_PLACES)
    }

    /// Lays out a task block at `offset` cells past the control block.
    pub fn make_task(
        &mut self,
        offset: usize,
        total: usize,
        dsize: usize,
        rsize: usize,
    ) -> Result<(), Error> {
        let start = Self::task_start(offset);
        if dsize == 0
            || rsize == 0
            || TASK_HEADER_CELLS + dsize + rsize > total
            || start.saturating_add(total) > self.pad()
        {
            return Err(Error::BadTask);
        }
        let header = [
            total as RamCell,
            10,
            self.fixed_point_places() as RamCell,
            -1,
            (dsize + rsize) as RamCell,
            dsize as RamCell,
            rsize as RamCell,
        ];
        self.cells[start..start + TASK_HEADER_CELLS].copy_from_slice(&header);
        Ok(())
    }

    pub fn select_task(&mut self, offset: usize) -> Result<(), Error> {
        let start = Self::task_start(offset);
        let dsize = self.get(start.saturating_add(TASK_DSIZE))?;
        let rsize = self.get(start.saturating_add(TASK_RSIZE))?;
        if dsize <= 0 || rsize <= 0 {
            return Err(Error::BadTask);
        }
        self.set_field(CUR_TASK, offset as RamCell);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout() {
        let params = Params::default();
        let arena = Arena::new(&params);
        assert_eq!(arena.len(), 2048);
        assert_eq!(IRAM_CELLS, 48);
        assert_eq!(arena.pad(), 2048 - 41);
        assert_eq!(arena.task(), IRAM_CELLS);
        assert_eq!(arena.field(TOTAL_RAM), 2048);
        assert_eq!(arena.base(), 10);
        assert_eq!(arena.mode(), Mode::Interpret);
        assert_eq!(arena.task_field(TASK_DIDX), Ok(-1));
        assert_eq!(arena.task_field(TASK_RIDX), Ok(250));
    }

    #[test]
    fn bytes_are_little_endian() {
        let mut arena = Arena::new(&Params::default());
        arena.set(100, 0x0403_0201).unwrap();
        assert_eq!(arena.byte(100, 0), Ok(1));
        assert_eq!(arena.byte(100, 3), Ok(4));
        arena.set_byte(100, 1, 0xFF).unwrap();
        assert_eq!(arena.get(100), Ok(0x0403_FF01));
        assert_eq!(arena.get(4096), Err(Error::BadArenaAddress(4096)));
    }

    #[test]
    fn tasks() {
        let mut arena = Arena::new(&Params::default());
        assert_eq!(arena.make_task(500, 100, 50, 40), Ok(()));
        assert_eq!(arena.make_task(500, 10, 50, 40), Err(Error::BadTask));
        assert_eq!(arena.make_task(1990, 100, 50, 40), Err(Error::BadTask));
        arena.select_task(500).unwrap();
        assert_eq!(arena.task(), IRAM_CELLS + 500);
        assert_eq!(arena.select_task(700), Err(Error::BadTask));
        assert_eq!(arena.task(), IRAM_CELLS + 500);
    }

    #[test]
    fn fixed_point_places_are_clamped() {
        let mut arena = Arena::new(&Params::default());
        let field = arena.task() + TASK_FIXEDP;
        arena.set(field, -1).unwrap();
        assert_eq!(arena.fixed_point_places(), 0);
        arena.set(field, 50).unwrap();
        assert_eq!(arena.fixed_point_places(), MAX_FIXED_POINT_PLACES);
        arena.set(field, 3).unwrap();
        assert_eq!(arena.fixed_point_places(), 3);
    }
}
