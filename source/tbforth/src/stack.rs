//! The selected task's combined data/return stack.
//!
//! Both stacks share one array inside the task block. The data stack grows
//! up from index -1, the return stack grows down from `dsize + rsize` and may
//! not cross below `dsize`.

use alloc::vec::Vec;

use crate::{
    arena::{Arena, TASK_DIDX, TASK_DSIZE, TASK_RIDX, TASK_RSIZE, TASK_STACKS},
    word::RamCell,
};

#[derive(Debug, PartialEq)]
pub enum StackError {
    DataUnderflow,
    DataOverflow,
    ReturnUnderflow,
    ReturnOverflow,
    /// The task block's indices or sizes no longer make sense.
    Corrupt,
}

#[derive(Copy, Clone)]
struct Frame {
    stacks: usize,
    didx: i64,
    ridx: i64,
    dsize: i64,
    rsize: i64,
}

impl Arena {
    fn frame(&self) -> Result<Frame, StackError> {
        let read = |field| {
            self.task_field(field)
                .map(i64::from)
                .map_err(|_| StackError::Corrupt)
        };
        let frame = Frame {
            stacks: self.task() + TASK_STACKS,
            didx: read(TASK_DIDX)?,
            ridx: read(TASK_RIDX)?,
            dsize: read(TASK_DSIZE)?,
            rsize: read(TASK_RSIZE)?,
        };
        if frame.dsize <= 0
            || frame.rsize <= 0
            || frame.stacks as i64 + frame.dsize + frame.rsize > self.len() as i64
        {
            return Err(StackError::Corrupt);
        }
        Ok(frame)
    }

    #[inline]
    fn slot(frame: &Frame, idx: i64) -> usize {
        frame.stacks + idx as usize
    }

    #[inline]
    pub fn push(&mut self, val: RamCell) -> Result<(), StackError> {
        let frame = self.frame()?;
        let next = frame.didx + 1;
        if next < 0 || next >= frame.dsize {
            return Err(StackError::DataOverflow);
        }
        self.set_field(Self::slot(&frame, next), val);
        self.set_field(frame.stacks - TASK_STACKS + TASK_DIDX, next as RamCell);
        Ok(())
    }

    #[inline]
    pub fn try_pop(&mut self) -> Result<RamCell, StackError> {
        let frame = self.frame()?;
        let val = self.try_peek_back_n(0)?;
        self.set_field(frame.stacks - TASK_STACKS + TASK_DIDX, (frame.didx - 1) as RamCell);
        Ok(val)
    }

    #[inline]
    pub fn try_peek(&self) -> Result<RamCell, StackError> {
        self.try_peek_back_n(0)
    }

    /// Reads the item `n` below the top of the data stack.
    pub fn try_peek_back_n(&self, n: usize) -> Result<RamCell, StackError> {
        let frame = self.frame()?;
        let idx = frame.didx - n as i64;
        if idx < 0 || frame.didx >= frame.dsize {
            return Err(StackError::DataUnderflow);
        }
        Ok(self.field(Self::slot(&frame, idx)))
    }

    pub fn overwrite_back_n(&mut self, n: usize, val: RamCell) -> Result<(), StackError> {
        let frame = self.frame()?;
        let idx = frame.didx - n as i64;
        if idx < 0 || frame.didx >= frame.dsize {
            return Err(StackError::DataUnderflow);
        }
        self.set_field(Self::slot(&frame, idx), val);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        match self.frame() {
            Ok(frame) if frame.didx >= 0 => (frame.didx + 1) as usize,
            _ => 0,
        }
    }

    /// The data stack, bottom first.
    pub fn data_stack(&self) -> Vec<RamCell> {
        (0..self.depth())
            .rev()
            .filter_map(|n| self.try_peek_back_n(n).ok())
            .collect()
    }

    pub fn rpush(&mut self, val: RamCell) -> Result<(), StackError> {
        let frame = self.frame()?;
        let next = frame.ridx - 1;
        if next < frame.dsize || next >= frame.dsize + frame.rsize {
            return Err(StackError::ReturnOverflow);
        }
        self.set_field(Self::slot(&frame, next), val);
        self.set_field(frame.stacks - TASK_STACKS + TASK_RIDX, next as RamCell);
        Ok(())
    }

    pub fn try_rpop(&mut self) -> Result<RamCell, StackError> {
        let frame = self.frame()?;
        let val = self.try_rpick(0)?;
        self.set_field(frame.stacks - TASK_STACKS + TASK_RIDX, (frame.ridx + 1) as RamCell);
        Ok(val)
    }

    /// Reads the item `n` below the top of the return stack.
    pub fn try_rpick(&self, n: usize) -> Result<RamCell, StackError> {
        let frame = self.frame()?;
        let idx = frame.ridx + n as i64;
        if frame.ridx < frame.dsize || idx >= frame.dsize + frame.rsize {
            return Err(StackError::ReturnUnderflow);
        }
        Ok(self.field(Self::slot(&frame, idx)))
    }

    /// Raw return stack index. Smaller is deeper.
    pub fn ridx(&self) -> Result<i64, StackError> {
        Ok(self.frame()?.ridx)
    }

    pub fn rdepth(&self) -> usize {
        match self.frame() {
            Ok(frame) => (frame.dsize + frame.rsize - frame.ridx).max(0) as usize,
            Err(_) => 0,
        }
    }

    /// Empties both stacks of the selected task.
    pub fn clear_stacks(&mut self) -> Result<(), StackError> {
        let frame = self.frame()?;
        let header = frame.stacks - TASK_STACKS;
        self.set_field(header + TASK_DIDX, -1);
        self.set_field(header + TASK_RIDX, (frame.dsize + frame.rsize) as RamCell);
        Ok(())
    }
}

/// The data stack, as handed to a host operation.
pub struct DataStack<'a> {
    arena: &'a mut Arena,
}

impl<'a> DataStack<'a> {
    pub(crate) fn new(arena: &'a mut Arena) -> Self {
        Self { arena }
    }

    #[inline]
    pub fn push(&mut self, val: RamCell) -> Result<(), StackError> {
        self.arena.push(val)
    }

    #[inline]
    pub fn try_pop(&mut self) -> Result<RamCell, StackError> {
        self.arena.try_pop()
    }

    #[inline]
    pub fn try_peek(&self) -> Result<RamCell, StackError> {
        self.arena.try_peek()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.arena.depth()
    }
}

#[cfg(test)]
pub mod test {
    use super::StackError;
    use crate::{arena::Arena, config::Params};

    fn small() -> Arena {
        let params = Params {
            data_stack_cells: 16,
            return_stack_cells: 4,
            task0_cells: 40,
            ..Params::default()
        };
        Arena::new(&params)
    }

    #[test]
    fn stack() {
        const ITEMS: i32 = 16;
        let mut arena = small();

        for _ in 0..3 {
            for i in 0..ITEMS {
                assert!(arena.push(i).is_ok());
            }
            assert_eq!(arena.push(100), Err(StackError::DataOverflow));
            assert_eq!(arena.depth(), ITEMS as usize);
            for i in (0..ITEMS).rev() {
                assert_eq!(arena.try_pop(), Ok(i));
            }
            assert_eq!(arena.try_pop(), Err(StackError::DataUnderflow));
            assert_eq!(arena.depth(), 0);
        }
    }

    #[test]
    fn peeking() {
        let mut arena = small();
        for i in 1..=3 {
            arena.push(i).unwrap();
        }
        assert_eq!(arena.data_stack(), vec![1, 2, 3]);
        assert_eq!(arena.try_peek(), Ok(3));
        assert_eq!(arena.try_peek_back_n(2), Ok(1));
        assert_eq!(arena.try_peek_back_n(3), Err(StackError::DataUnderflow));
        arena.overwrite_back_n(1, 20).unwrap();
        assert_eq!(arena.data_stack(), vec![1, 20, 3]);
    }

    #[test]
    fn return_stack_stays_above_data() {
        let mut arena = small();
        assert_eq!(arena.ridx(), Ok(20));
        for i in 0..4 {
            arena.rpush(i).unwrap();
        }
        assert_eq!(arena.ridx(), Ok(16));
        assert_eq!(arena.rpush(9), Err(StackError::ReturnOverflow));
        assert_eq!(arena.try_rpick(3), Ok(0));
        assert_eq!(arena.rdepth(), 4);
        for i in (0..4).rev() {
            assert_eq!(arena.try_rpop(), Ok(i));
        }
        assert_eq!(arena.try_rpop(), Err(StackError::ReturnUnderflow));

        // filling the data stack never disturbs the return stack
        arena.rpush(77).unwrap();
        for i in 0..16 {
            arena.push(i).unwrap();
        }
        assert_eq!(arena.try_rpop(), Ok(77));
        arena.clear_stacks().unwrap();
        assert_eq!(arena.depth(), 0);
        assert_eq!(arena.rdepth(), 0);
    }
}
