use serde::{Deserialize, Serialize};

use crate::{
    arena::{IRAM_CELLS, PAD_CELLS, TASK_HEADER_CELLS},
    number::MAX_FIXED_POINT_PLACES,
    Error,
};

/// Sizing of a [`Forth`](crate::Forth) instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Params {
    /// Dictionary capacity, in 16-bit cells.
    #[serde(default = "Params::default_dict_cells")]
    pub dict_cells: usize,
    /// Arena size, in 32-bit cells.
    #[serde(default = "Params::default_arena_cells")]
    pub arena_cells: usize,
    /// Data stack depth of task 0.
    #[serde(default = "Params::default_data_stack_cells")]
    pub data_stack_cells: usize,
    /// Return stack depth of task 0.
    #[serde(default = "Params::default_return_stack_cells")]
    pub return_stack_cells: usize,
    /// Total cells of task 0's block, header and stacks included.
    #[serde(default = "Params::default_task0_cells")]
    pub task0_cells: usize,
    /// Decimal places kept by fixed-point literals.
    #[serde(default = "Params::default_fixed_point_places")]
    pub fixed_point_places: u32,
}

impl Params {
    pub const DEFAULT_DICT_CELLS: usize = 65535;
    pub const DEFAULT_ARENA_CELLS: usize = 2048;
    pub const DEFAULT_DATA_STACK_CELLS: usize = 150;
    pub const DEFAULT_RETURN_STACK_CELLS: usize = 100;
    pub const DEFAULT_TASK0_CELLS: usize = 500;
    pub const DEFAULT_FIXED_POINT_PLACES: u32 = 5;

    const fn default_dict_cells() -> usize {
        Self::DEFAULT_DICT_CELLS
    }
    const fn default_arena_cells() -> usize {
        Self::DEFAULT_ARENA_CELLS
    }
    const fn default_data_stack_cells() -> usize {
        Self::DEFAULT_DATA_STACK_CELLS
    }
    const fn default_return_stack_cells() -> usize {
        Self::DEFAULT_RETURN_STACK_CELLS
    }
    const fn default_task0_cells() -> usize {
        Self::DEFAULT_TASK0_CELLS
    }
    const fn default_fixed_point_places() -> u32 {
        Self::DEFAULT_FIXED_POINT_PLACES
    }

    pub const fn new() -> Self {
        Self {
            dict_cells: Self::DEFAULT_DICT_CELLS,
            arena_cells: Self::DEFAULT_ARENA_CELLS,
            data_stack_cells: Self::DEFAULT_DATA_STACK_CELLS,
            return_stack_cells: Self::DEFAULT_RETURN_STACK_CELLS,
            task0_cells: Self::DEFAULT_TASK0_CELLS,
            fixed_point_places: Self::DEFAULT_FIXED_POINT_PLACES,
        }
    }

    /// Checks that the pieces fit together.
    pub fn validate(&self) -> Result<(), Error> {
        if self.dict_cells < 2 || self.dict_cells > usize::from(u16::MAX) {
            return Err(Error::BadParams("dict_cells must be between 2 and 65535"));
        }
        if self.data_stack_cells == 0 || self.return_stack_cells == 0 {
            return Err(Error::BadParams("task 0 needs a data and a return stack"));
        }
        if TASK_HEADER_CELLS + self.data_stack_cells + self.return_stack_cells > self.task0_cells {
            return Err(Error::BadParams("task0_cells is too small for its stacks"));
        }
        if IRAM_CELLS + self.task0_cells + PAD_CELLS > self.arena_cells {
            return Err(Error::BadParams("arena_cells is too small for task 0"));
        }
        if self.fixed_point_places > MAX_FIXED_POINT_PLACES {
            return Err(Error::BadParams("fixed_point_places must be at most 9"));
        }
        Ok(())
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::Params;

    #[test]
    fn defaults_are_valid() {
        assert!(Params::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_sizes() {
        let tiny_task = Params {
            task0_cells: 100,
            ..Params::default()
        };
        assert!(tiny_task.validate().is_err());

        let tiny_arena = Params {
            arena_cells: 500,
            ..Params::default()
        };
        assert!(tiny_arena.validate().is_err());

        let huge_dict = Params {
            dict_cells: 70000,
            ..Params::default()
        };
        assert!(huge_dict.validate().is_err());
    }
}
