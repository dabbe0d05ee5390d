use core::fmt;

/// One cell of the dictionary.
pub type Cell = u16;

/// One cell of the arena. Stack slots, variables and the pad all live in
/// cells of this width.
pub type RamCell = i32;

/// Bytes packed into a single dictionary cell.
pub const DICT_CELL_BYTES: usize = core::mem::size_of::<Cell>();

/// Bytes packed into a single arena cell.
pub const ARENA_CELL_BYTES: usize = core::mem::size_of::<RamCell>();

const ARENA_TAG: u32 = 0x8000_0000;

/// An address in one of the two spaces a program can touch.
///
/// On the data stack an address is a plain [`RamCell`], with bit 31 selecting
/// the arena. [`Addr::decode`] and [`Addr::encode`] are the only places that
/// know about that bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Addr {
    Dict(usize),
    Arena(usize),
}

impl Addr {
    #[inline]
    pub fn decode(raw: RamCell) -> Self {
        let raw = raw as u32;
        if raw & ARENA_TAG != 0 {
            Addr::Arena((raw & !ARENA_TAG) as usize)
        } else {
            Addr::Dict(raw as usize)
        }
    }

    #[inline]
    pub fn encode(self) -> RamCell {
        match self {
            Addr::Dict(idx) => idx as u32 as RamCell,
            Addr::Arena(idx) => ((idx as u32 & !ARENA_TAG) | ARENA_TAG) as RamCell,
        }
    }

    /// Moves the address forward by `cells` cells of its own space.
    #[inline]
    pub fn offset(self, cells: usize) -> Self {
        match self {
            Addr::Dict(idx) => Addr::Dict(idx + cells),
            Addr::Arena(idx) => Addr::Arena(idx + cells),
        }
    }

    /// Cell and byte-in-cell for byte `n` counted from this address.
    #[inline]
    pub(crate) fn byte_position(self, n: usize) -> (Self, usize) {
        let per_cell = match self {
            Addr::Dict(_) => DICT_CELL_BYTES,
            Addr::Arena(_) => ARENA_CELL_BYTES,
        };
        (self.offset(n / per_cell), n % per_cell)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Dict(idx) => write!(f, "dict[{idx}]"),
            Addr::Arena(idx) => write!(f, "arena[{idx}]"),
        }
    }
}

/// Identifies a word by the dictionary index of its header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WordId(pub(crate) usize);

impl WordId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}
