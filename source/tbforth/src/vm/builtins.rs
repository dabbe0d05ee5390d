use alloc::vec::Vec;

use crate::{
    abort::AbortReason,
    arena::PAD_BYTES,
    dictionary::cells_for,
    host::{Host, HostOp, OpenFlags},
    number::{self, FORMAT_BUF_LEN},
    stack::DataStack,
    word::{Addr, Cell, RamCell},
    Error, Forth, Mode, ReplaceErr, Status,
};

/// Primitive opcodes. A body cell at or below [`Opcode::LAST`] is one of
/// these; anything larger is the body address of a word to call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Lit = 1,
    Dlit,
    Slit,
    Abort,
    Def,
    Create,
    Immediate,
    Uram,
    Iram,
    Rpick,
    Rtop,
    Here,
    Incr,
    Decr,
    Add,
    Sub,
    Mul,
    Div,
    MulDiv,
    Mod,
    And,
    Or,
    Xor,
    Invert,
    Lshift,
    Rshift,
    Jmp,
    JmpIfZero,
    SkipIfZero,
    Exit,
    EqZero,
    GtZero,
    LtZero,
    Eq,
    Lt,
    Gt,
    Ge,
    Drop,
    Dup,
    Swap,
    Over,
    Rot,
    NextWord,
    NextChar,
    Exec,
    Comma,
    DComma,
    RPush,
    RPop,
    Fetch,
    Store,
    CommaString,
    VarAllot,
    CallC,
    FindCode,
    FindHead,
    CharAppend,
    CharStore,
    CharFetch,
    Postpone,
    ParseNum,
    Interp,
    NumToStr,
    UNumToStr,
    Substr,
    MakeTask,
    SelectTask,
    Cold,
    ByteCopy,
    ByteCmp,
}

impl Opcode {
    /// Every opcode, in numbering order.
    const ALL: &'static [Opcode] = &[
        Opcode::Lit,
        Opcode::Dlit,
        Opcode::Slit,
        Opcode::Abort,
        Opcode::Def,
        Opcode::Create,
        Opcode::Immediate,
        Opcode::Uram,
        Opcode::Iram,
        Opcode::Rpick,
        Opcode::Rtop,
        Opcode::Here,
        Opcode::Incr,
        Opcode::Decr,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::MulDiv,
        Opcode::Mod,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Invert,
        Opcode::Lshift,
        Opcode::Rshift,
        Opcode::Jmp,
        Opcode::JmpIfZero,
        Opcode::SkipIfZero,
        Opcode::Exit,
        Opcode::EqZero,
        Opcode::GtZero,
        Opcode::LtZero,
        Opcode::Eq,
        Opcode::Lt,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::Drop,
        Opcode::Dup,
        Opcode::Swap,
        Opcode::Over,
        Opcode::Rot,
        Opcode::NextWord,
        Opcode::NextChar,
        Opcode::Exec,
        Opcode::Comma,
        Opcode::DComma,
        Opcode::RPush,
        Opcode::RPop,
        Opcode::Fetch,
        Opcode::Store,
        Opcode::CommaString,
        Opcode::VarAllot,
        Opcode::CallC,
        Opcode::FindCode,
        Opcode::FindHead,
        Opcode::CharAppend,
        Opcode::CharStore,
        Opcode::CharFetch,
        Opcode::Postpone,
        Opcode::ParseNum,
        Opcode::Interp,
        Opcode::NumToStr,
        Opcode::UNumToStr,
        Opcode::Substr,
        Opcode::MakeTask,
        Opcode::SelectTask,
        Opcode::Cold,
        Opcode::ByteCopy,
        Opcode::ByteCmp,
    ];

    pub const LAST: Cell = Opcode::ByteCmp as Cell;

    #[inline]
    pub fn from_cell(cell: Cell) -> Option<Self> {
        Self::ALL.get(usize::from(cell).checked_sub(1)?).copied()
    }
}

/// A decoded body cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    Op(Opcode),
    Call(usize),
}

impl Instr {
    pub fn decode(cell: Cell) -> Option<Self> {
        match cell {
            0 => None,
            c if c <= Opcode::LAST => Opcode::from_cell(c).map(Instr::Op),
            c => Some(Instr::Call(usize::from(c))),
        }
    }
}

/// A dictionary resident primitive word.
pub struct Primitive {
    pub name: &'static str,
    pub op: Opcode,
    pub immediate: bool,
}

macro_rules! prim {
    ($name:literal, $op:ident) => {
        Primitive {
            name: $name,
            op: Opcode::$op,
            immediate: false,
        }
    };
    ($name:literal, $op:ident, immediate) => {
        Primitive {
            name: $name,
            op: Opcode::$op,
            immediate: true,
        }
    };
}

/// The words registered for primitives at bootstrap, in registration order.
pub const PRIMITIVES: &[Primitive] = &[
    prim!("lit", Lit),
    prim!("dlit", Dlit),
    prim!("(slit)", Slit),
    prim!("drop", Drop),
    prim!("rot", Rot),
    prim!("dup", Dup),
    prim!("swap", Swap),
    prim!("over", Over),
    prim!("jmp", Jmp),
    prim!("0jmp?", JmpIfZero),
    prim!("0skip?", SkipIfZero),
    prim!(",", Comma),
    prim!("d,", DComma),
    prim!("1+", Incr),
    prim!("1-", Decr),
    prim!("+", Add),
    prim!("-", Sub),
    prim!("and", And),
    prim!("or", Or),
    prim!("xor", Xor),
    prim!("invert", Invert),
    prim!("lshift", Lshift),
    prim!("rshift", Rshift),
    prim!("*", Mul),
    prim!("/", Div),
    prim!("*/", MulDiv),
    prim!("mod", Mod),
    prim!("0=", EqZero),
    prim!("0>", GtZero),
    prim!("0<", LtZero),
    prim!("=", Eq),
    prim!("<", Lt),
    prim!(">", Gt),
    prim!(">=", Ge),
    prim!("r@", Rtop),
    prim!("rpick", Rpick),
    prim!(">r", RPush),
    prim!("r>", RPop),
    prim!("!", Store),
    prim!("@", Fetch),
    prim!(",\"", CommaString, immediate),
    prim!("+c!", CharStore),
    prim!("c!+", CharAppend),
    prim!("+c@", CharFetch),
    prim!(":", Def),
    prim!("(create)", Create),
    prim!("next-word", NextWord),
    prim!("next-char", NextChar),
    prim!(";", Exit),
    prim!("exit", Exit),
    prim!("immediate", Immediate),
    prim!("postpone", Postpone, immediate),
    prim!("(allot1)", VarAllot),
    prim!("(find-code)", FindCode),
    prim!("(find-head)", FindHead),
    prim!("cold", Cold),
    prim!("abort", Abort),
    prim!("bcopy", ByteCopy),
    prim!("bstr=", ByteCmp),
    prim!(">string", NumToStr),
    prim!("u>string", UNumToStr),
    prim!(">num", ParseNum),
    prim!("substr", Substr),
    prim!("exec", Exec),
    prim!("uram", Uram),
    prim!("iram", Iram),
    prim!("make-task", MakeTask),
    prim!("select-task", SelectTask),
    prim!("interpret", Interp),
    prim!("cf", CallC),
    prim!("here", Here),
];

/// What the dispatch loop does after an opcode.
pub(crate) enum Flow {
    Next,
    Return,
}

#[inline]
fn flag(b: bool) -> RamCell {
    if b {
        -1
    } else {
        0
    }
}

impl<H: Host> Forth<H> {
    /// Runs the code at `start` until it exits back past the return depth it
    /// started at. With `single`, only the first instruction runs, except
    /// for `exec`, which runs the word it calls to completion.
    ///
    /// The abort register is checked after every instruction. If it is set,
    /// the engine recovers and the line's error is returned.
    pub(crate) fn exec(&mut self, start: usize, single: bool) -> Result<(), Error> {
        let single = single && self.dict.get(start) != Some(Opcode::Exec as Cell);
        let base = self.arena.ridx()?;
        let mut ip = start;
        loop {
            let res = self.step(&mut ip, base);
            if let Err(ref err) = res {
                self.abort.request(err.abort_reason());
            }
            if let Some(reason) = self.abort.take() {
                self.recover();
                return Err(res.err().unwrap_or(Error::Abort(reason)));
            }
            match res {
                Ok(Flow::Return) => return Ok(()),
                Ok(Flow::Next) if single => return Ok(()),
                Ok(Flow::Next) => {}
                Err(err) => {
                    self.recover();
                    return Err(err);
                }
            }
        }
    }

    fn step(&mut self, ip: &mut usize, base: i64) -> Result<Flow, Error> {
        let cell = match self.dict.get(*ip) {
            Some(cell) if *ip != 0 => cell,
            _ => return Err(Error::IllegalOpcode { ip: *ip }),
        };
        *ip += 1;
        match Instr::decode(cell) {
            Some(Instr::Op(op)) => self.dispatch(op, ip, base),
            Some(Instr::Call(target)) => {
                if target >= self.dict.here() {
                    return Err(Error::BadCallTarget(target));
                }
                self.arena.rpush(*ip as RamCell)?;
                *ip = target;
                Ok(Flow::Next)
            }
            None => Err(Error::IllegalOpcode { ip: *ip - 1 }),
        }
    }

    fn operand(&self, ip: &mut usize) -> Result<Cell, Error> {
        let cell = self.dict.get(*ip).ok_or(Error::IllegalOpcode { ip: *ip })?;
        *ip += 1;
        Ok(cell)
    }

    fn dispatch(&mut self, op: Opcode, ip: &mut usize, base: i64) -> Result<Flow, Error> {
        match op {
            Opcode::Lit => {
                let val = self.operand(ip)?;
                self.arena.push(RamCell::from(val))?;
            }
            Opcode::Dlit => {
                let hi = self.operand(ip)?;
                let lo = self.operand(ip)?;
                self.arena.push(((u32::from(hi) << 16) | u32::from(lo)) as RamCell)?;
            }
            Opcode::Slit => self.string_literal(ip)?,
            Opcode::Abort => self.abort.request(AbortReason::Word),
            Opcode::Def => self.colon()?,
            Opcode::Create => {
                let name = self.next_name()?;
                self.dict.define(&name)?;
            }
            Opcode::Immediate => self.dict.mark_immediate(),
            Opcode::Uram => self.arena.push(Addr::Arena(self.arena.task()).encode())?,
            Opcode::Iram => self.arena.push(Addr::Arena(0).encode())?,
            Opcode::Rpick => {
                let n = self.arena.try_pop()?;
                let n = usize::try_from(n)
                    .replace_err(Error::Stack(crate::stack::StackError::ReturnUnderflow))?;
                let val = self.arena.try_rpick(n)?;
                self.arena.push(val)?;
            }
            Opcode::Rtop => {
                let val = self.arena.try_rpick(0)?;
                self.arena.push(val)?;
            }
            Opcode::Here => self.arena.push(self.dict.here() as RamCell)?,
            Opcode::Incr => self.unary(|a| a.wrapping_add(1))?,
            Opcode::Decr => self.unary(|a| a.wrapping_sub(1))?,
            Opcode::Add => self.binary(|a, b| a.wrapping_add(b))?,
            Opcode::Sub => self.binary(|a, b| a.wrapping_sub(b))?,
            Opcode::Mul => self.binary(|a, b| a.wrapping_mul(b))?,
            Opcode::Div => self.checked_binary(|a, b| {
                a.checked_div(b)
                    .or_else(|| (b != 0).then(|| a.wrapping_div(b)))
            })?,
            Opcode::Mod => self.checked_binary(|a, b| {
                a.checked_rem(b)
                    .or_else(|| (b != 0).then(|| a.wrapping_rem(b)))
            })?,
            Opcode::MulDiv => {
                let c = self.arena.try_pop()?;
                let b = self.arena.try_pop()?;
                let a = self.arena.try_pop()?;
                if c == 0 {
                    return Err(Error::DivideByZero);
                }
                let val = (i64::from(a) * i64::from(b)).wrapping_div(i64::from(c));
                self.arena.push(val as RamCell)?;
            }
            Opcode::And => self.binary(|a, b| a & b)?,
            Opcode::Or => self.binary(|a, b| a | b)?,
            Opcode::Xor => self.binary(|a, b| a ^ b)?,
            Opcode::Invert => self.unary(|a| !a)?,
            Opcode::Lshift => self.binary(|a, b| a.checked_shl(b as u32).unwrap_or(0))?,
            Opcode::Rshift => {
                self.binary(|a, b| a.checked_shr(b as u32).unwrap_or(if a < 0 { -1 } else { 0 }))?
            }
            Opcode::Jmp => {
                let target = self.arena.try_pop()?;
                *ip = code_addr(target)?;
            }
            Opcode::JmpIfZero => {
                let target = self.arena.try_pop()?;
                let cond = self.arena.try_pop()?;
                if cond == 0 {
                    *ip = code_addr(target)?;
                }
            }
            Opcode::SkipIfZero => {
                let n = self.arena.try_pop()?;
                let cond = self.arena.try_pop()?;
                if cond == 0 {
                    *ip = ip.wrapping_add(n as isize as usize);
                }
            }
            Opcode::Exit => {
                if self.arena.ridx()? >= base {
                    return Ok(Flow::Return);
                }
                *ip = self.arena.try_rpop()? as u32 as usize;
            }
            Opcode::EqZero => self.unary(|a| flag(a == 0))?,
            Opcode::GtZero => self.unary(|a| flag(a > 0))?,
            Opcode::LtZero => self.unary(|a| flag(a < 0))?,
            Opcode::Eq => self.binary(|a, b| flag(a == b))?,
            Opcode::Lt => self.binary(|a, b| flag(a < b))?,
            Opcode::Gt => self.binary(|a, b| flag(a > b))?,
            Opcode::Ge => self.binary(|a, b| flag(a >= b))?,
            Opcode::Drop => {
                self.arena.try_pop()?;
            }
            Opcode::Dup => {
                let a = self.arena.try_peek()?;
                self.arena.push(a)?;
            }
            Opcode::Swap => {
                let b = self.arena.try_peek_back_n(0)?;
                let a = self.arena.try_peek_back_n(1)?;
                self.arena.overwrite_back_n(0, a)?;
                self.arena.overwrite_back_n(1, b)?;
            }
            Opcode::Over => {
                let a = self.arena.try_peek_back_n(1)?;
                self.arena.push(a)?;
            }
            Opcode::Rot => {
                let c = self.arena.try_peek_back_n(0)?;
                let b = self.arena.try_peek_back_n(1)?;
                let a = self.arena.try_peek_back_n(2)?;
                self.arena.overwrite_back_n(2, b)?;
                self.arena.overwrite_back_n(1, c)?;
                self.arena.overwrite_back_n(0, a)?;
            }
            Opcode::NextWord => {
                let name = self.arena.next_word().map(|tok| {
                    let mut buf = [0u8; crate::arena::TIB_BYTES];
                    self.arena.token_bytes(tok, &mut buf).to_vec()
                });
                let addr = self.write_pad(name.as_deref().unwrap_or_default())?;
                self.arena.push(addr.encode())?;
            }
            Opcode::NextChar => {
                let c = self.arena.next_char().unwrap_or(0);
                self.arena.push(RamCell::from(c))?;
            }
            Opcode::Exec => {
                let target = code_addr(self.arena.try_pop()?)?;
                self.arena.rpush(*ip as RamCell)?;
                *ip = target;
            }
            Opcode::Comma => {
                let val = self.arena.try_pop()?;
                self.dict.append(val as Cell)?;
            }
            Opcode::DComma => {
                let val = self.arena.try_pop()?;
                self.append_dlit_operands(val)?;
            }
            Opcode::RPush => {
                let val = self.arena.try_pop()?;
                self.arena.rpush(val)?;
            }
            Opcode::RPop => {
                let val = self.arena.try_rpop()?;
                self.arena.push(val)?;
            }
            Opcode::Fetch => {
                let addr = Addr::decode(self.arena.try_pop()?);
                let val = self.fetch(addr)?;
                self.arena.push(val)?;
            }
            Opcode::Store => {
                let addr = Addr::decode(self.arena.try_pop()?);
                let val = self.arena.try_pop()?;
                self.store(addr, val)?;
            }
            Opcode::CommaString => self.comma_string()?,
            Opcode::VarAllot => {
                let addr = self.allot_var()?;
                self.arena.push(addr.encode())?;
            }
            Opcode::CallC => self.call_host()?,
            Opcode::FindCode | Opcode::FindHead => {
                let addr = Addr::decode(self.arena.try_pop()?);
                let name = self.counted(addr)?;
                let val = match self.dict.find(&name) {
                    Some(found) if op == Opcode::FindCode => found.body,
                    Some(found) => found.header.index(),
                    None => 0,
                };
                self.arena.push(val as RamCell)?;
            }
            Opcode::CharAppend => {
                let addr = Addr::decode(self.arena.try_pop()?);
                let byte = self.arena.try_pop()?;
                let Addr::Arena(idx) = addr else {
                    return Err(Error::BadCodeAddress(addr.encode()));
                };
                let count = self.arena.get(idx)?;
                let count = usize::try_from(count).replace_err(Error::StringTooLong(0))?;
                self.set_byte_at(addr.offset(1), count, byte as u8)?;
                self.arena.set(idx, count as RamCell + 1)?;
            }
            Opcode::CharStore => {
                let n = self.arena.try_pop()?;
                let addr = Addr::decode(self.arena.try_pop()?);
                let byte = self.arena.try_pop()?;
                self.set_byte_at(addr, byte_index(n)?, byte as u8)?;
            }
            Opcode::CharFetch => {
                let n = self.arena.try_pop()?;
                let addr = Addr::decode(self.arena.try_pop()?);
                let byte = self.byte_at(addr, byte_index(n)?)?;
                self.arena.push(RamCell::from(byte))?;
            }
            Opcode::Postpone => {
                let name = self.next_name()?;
                let found = self.dict.find(&name).ok_or(Error::NotAWord)?;
                if found.primitive {
                    let op = self.dict.get(found.body).ok_or(Error::BadCallTarget(found.body))?;
                    self.dict.append(op)?;
                } else {
                    self.dict.append(body_cell(found.body)?)?;
                }
            }
            Opcode::ParseNum => {
                let addr = Addr::decode(self.arena.try_pop()?);
                let text = self.counted(addr)?;
                let val = number::parse(&text, self.arena.base(), self.arena.fixed_point_places())
                    .ok_or(Error::NotANumber)?;
                self.arena.push(val)?;
            }
            Opcode::Interp => {
                let status = match self.interpret_input() {
                    Ok(mode) => Status::from(mode),
                    Err(err) => err.status(),
                };
                self.arena.push(status as RamCell)?;
            }
            Opcode::NumToStr | Opcode::UNumToStr => {
                let val = self.arena.try_pop()?;
                let base = self.arena.base();
                let mut buf = [0u8; FORMAT_BUF_LEN];
                let text = if op == Opcode::NumToStr {
                    number::format(val, base, &mut buf)
                } else {
                    number::format_unsigned(val as u32, base, &mut buf)
                };
                let text = text.ok_or(Error::BadBase(base))?;
                let addr = self.write_pad(text)?;
                self.arena.push(addr.encode())?;
            }
            Opcode::Substr => {
                let addr = Addr::decode(self.arena.try_pop()?);
                let len = byte_index(self.arena.try_pop()?)?;
                let start = byte_index(self.arena.try_pop()?)?;
                let text = self.counted(addr)?;
                let start = start.min(text.len());
                let end = start.saturating_add(len).min(text.len());
                let addr = self.write_pad(&text[start..end])?;
                self.arena.push(addr.encode())?;
            }
            Opcode::MakeTask => {
                let offset = self.arena.try_pop()?;
                let dsize = self.arena.try_pop()?;
                let rsize = self.arena.try_pop()?;
                let total = self.arena.try_pop()?;
                let [offset_u, dsize, rsize, total] = [offset, dsize, rsize, total]
                    .map(|v| usize::try_from(v).unwrap_or(0));
                if offset < 0 {
                    return Err(Error::BadTask);
                }
                self.arena.make_task(offset_u, total, dsize, rsize)?;
                self.arena.push(offset)?;
            }
            Opcode::SelectTask => {
                let offset = self.arena.try_pop()?;
                let offset = usize::try_from(offset).replace_err(Error::BadTask)?;
                self.arena.select_task(offset)?;
            }
            Opcode::Cold => {
                self.arena.cold(&self.params);
                tracing::debug!("arena reinitialized");
            }
            Opcode::ByteCopy | Opcode::ByteCmp => {
                let count = byte_index(self.arena.try_pop()?)?;
                let didx = byte_index(self.arena.try_pop()?)?;
                let dest = Addr::decode(self.arena.try_pop()?);
                let fidx = byte_index(self.arena.try_pop()?)?;
                let from = Addr::decode(self.arena.try_pop()?);
                if op == Opcode::ByteCopy {
                    let bytes = (0..count)
                        .map(|i| self.byte_at(from, fidx + i))
                        .collect::<Result<Vec<u8>, Error>>()?;
                    for (i, byte) in bytes.into_iter().enumerate() {
                        self.set_byte_at(dest, didx + i, byte)?;
                    }
                } else {
                    let mut same = true;
                    for i in 0..count {
                        same &= self.byte_at(from, fidx + i)? == self.byte_at(dest, didx + i)?;
                    }
                    self.arena.push(flag(same))?;
                }
            }
        }
        Ok(Flow::Next)
    }

    #[inline]
    fn unary(&mut self, f: impl FnOnce(RamCell) -> RamCell) -> Result<(), Error> {
        let a = self.arena.try_peek()?;
        self.arena.overwrite_back_n(0, f(a))?;
        Ok(())
    }

    #[inline]
    fn binary(&mut self, f: impl FnOnce(RamCell, RamCell) -> RamCell) -> Result<(), Error> {
        self.checked_binary(|a, b| Some(f(a, b)))
    }

    /// `( a b -- f(a, b) )`, failing with a division by zero on `None`.
    #[inline]
    fn checked_binary(
        &mut self,
        f: impl FnOnce(RamCell, RamCell) -> Option<RamCell>,
    ) -> Result<(), Error> {
        let b = self.arena.try_peek_back_n(0)?;
        let a = self.arena.try_peek_back_n(1)?;
        let val = f(a, b).ok_or(Error::DivideByZero)?;
        self.arena.try_pop()?;
        self.arena.overwrite_back_n(0, val)?;
        Ok(())
    }

    /// `:` reads a name, writes its header and switches to compiling.
    fn colon(&mut self) -> Result<(), Error> {
        let name = self.next_name()?;
        let header = self.dict.define(&name)?;
        self.arena.set_mode(Mode::Compile);
        self.arena.set_compiling_word(header.index());
        tracing::trace!(word = %alloc::string::String::from_utf8_lossy(&name), "compiling");
        Ok(())
    }

    fn next_name(&mut self) -> Result<Vec<u8>, Error> {
        let tok = self.arena.next_word().ok_or(Error::MissingName)?;
        let mut buf = [0u8; crate::arena::TIB_BYTES];
        Ok(self.arena.token_bytes(tok, &mut buf).to_vec())
    }

    pub(crate) fn append_dlit_operands(&mut self, val: RamCell) -> Result<(), Error> {
        let val = val as u32;
        self.dict.append((val >> 16) as Cell)?;
        self.dict.append(val as Cell)?;
        Ok(())
    }

    /// `(slit)`: copies the inline counted string to the pad and skips it.
    fn string_literal(&mut self, ip: &mut usize) -> Result<(), Error> {
        let count_at = *ip;
        let text = self.counted(Addr::Dict(count_at))?;
        *ip = count_at + 1 + cells_for(text.len());
        let addr = self.write_pad(&text)?;
        self.arena.push(addr.encode())?;
        Ok(())
    }

    /// `,"` reads up to the closing quote. While compiling it lays the text
    /// down behind a `(slit)`; otherwise the text goes straight to the pad.
    fn comma_string(&mut self) -> Result<(), Error> {
        let mut text = Vec::new();
        while let Some(c) = self.arena.next_char() {
            if c == b'"' {
                break;
            }
            text.push(c);
        }
        if text.len() > PAD_BYTES {
            return Err(Error::StringTooLong(text.len()));
        }
        match self.arena.mode() {
            Mode::Compile => {
                self.dict.append(Opcode::Slit as Cell)?;
                self.dict.append(text.len() as Cell)?;
                self.dict.append_packed(&text)?;
            }
            Mode::Interpret => {
                let addr = self.write_pad(&text)?;
                self.arena.push(addr.encode())?;
            }
        }
        Ok(())
    }

    fn call_host(&mut self) -> Result<(), Error> {
        let id = self.arena.try_pop()?;
        let Some(op) = HostOp::from_id(id) else {
            let mut stack = DataStack::new(&mut self.arena);
            self.host.other(id, &mut stack)?;
            return Ok(());
        };
        tracing::trace!(?op, "host call");
        match op {
            HostOp::Emit => {
                let c = self.arena.try_pop()?;
                self.host.emit(c as u8)?;
            }
            HostOp::Key => {
                let c = self.host.key()?;
                self.arena.push(RamCell::from(c))?;
            }
            HostOp::SaveImage => {
                let image = self.image();
                self.host.save_image(&image)?;
            }
            HostOp::Include => {
                let path = self.next_name()?;
                let source = self.host.include(&path)?;
                self.include(&path, &source)?;
            }
            HostOp::Open => {
                let flags = OpenFlags::from_bits(self.arena.try_pop()?);
                let addr = Addr::decode(self.arena.try_pop()?);
                let path = self.counted(addr)?;
                let fd = self.host.open(&path, flags)?;
                self.arena.push(fd)?;
            }
            HostOp::Close => {
                let fd = self.arena.try_pop()?;
                self.host.close(fd)?;
            }
            HostOp::ReadByte => {
                let fd = self.arena.try_pop()?;
                let byte = self.host.read_byte(fd)?;
                self.arena.push(byte.map_or(-1, RamCell::from))?;
            }
            HostOp::WriteByte => {
                let fd = self.arena.try_pop()?;
                let byte = self.arena.try_pop()?;
                self.host.write_byte(fd, byte as u8)?;
            }
            HostOp::Millis => {
                let ms = self.host.millis()?;
                self.arena.push(ms as RamCell)?;
            }
            HostOp::Secs => {
                let secs = self.host.secs()?;
                self.arena.push(secs as RamCell)?;
            }
            HostOp::GpioMode => {
                let pin = self.arena.try_pop()?;
                let mode = self.arena.try_pop()?;
                self.host.gpio_mode(pin as u32, mode as u32)?;
            }
            HostOp::GpioRead => {
                let pin = self.arena.try_pop()?;
                let high = self.host.gpio_read(pin as u32)?;
                self.arena.push(flag(high))?;
            }
            HostOp::GpioWrite => {
                let pin = self.arena.try_pop()?;
                let level = self.arena.try_pop()?;
                self.host.gpio_write(pin as u32, level != 0)?;
            }
            HostOp::DelayMs => {
                let ms = self.arena.try_pop()?;
                self.host.delay_ms(ms as u32)?;
            }
            HostOp::WatchdogFeed => self.host.watchdog_feed()?,
            HostOp::Restart => self.host.restart()?,
        }
        Ok(())
    }

    fn fetch(&self, addr: Addr) -> Result<RamCell, Error> {
        match addr {
            Addr::Dict(idx) => self
                .dict
                .get(idx)
                .map(RamCell::from)
                .ok_or(Error::BadCodeAddress(addr.encode())),
            Addr::Arena(idx) => self.arena.get(idx),
        }
    }

    fn store(&mut self, addr: Addr, val: RamCell) -> Result<(), Error> {
        match addr {
            Addr::Dict(idx) => Ok(self.dict.write(idx, val as Cell)?),
            Addr::Arena(idx) => self.arena.set(idx, val),
        }
    }

    /// Byte `n` counted from `addr`.
    fn byte_at(&self, addr: Addr, n: usize) -> Result<u8, Error> {
        match addr.byte_position(n) {
            (Addr::Dict(idx), which) => self
                .dict
                .byte(idx, which)
                .ok_or(Error::BadCodeAddress(addr.encode())),
            (Addr::Arena(idx), which) => self.arena.byte(idx, which),
        }
    }

    fn set_byte_at(&mut self, addr: Addr, n: usize, byte: u8) -> Result<(), Error> {
        match addr.byte_position(n) {
            (Addr::Dict(idx), which) => Ok(self.dict.set_byte(idx, which, byte)?),
            (Addr::Arena(idx), which) => self.arena.set_byte(idx, which, byte),
        }
    }

    /// Reads the counted string at `addr`: a count cell, then its bytes
    /// packed into the following cells.
    pub(crate) fn counted(&self, addr: Addr) -> Result<Vec<u8>, Error> {
        let count = self.fetch(addr)?;
        let count = usize::try_from(count)
            .ok()
            .filter(|n| *n <= PAD_BYTES)
            .ok_or(Error::StringTooLong(count as u32 as usize))?;
        (0..count).map(|i| self.byte_at(addr.offset(1), i)).collect()
    }

    /// Replaces the pad's contents with `text`.
    pub(crate) fn write_pad(&mut self, text: &[u8]) -> Result<Addr, Error> {
        if text.len() > PAD_BYTES {
            return Err(Error::StringTooLong(text.len()));
        }
        let pad = Addr::Arena(self.arena.pad());
        self.store(pad, text.len() as RamCell)?;
        for (i, byte) in text.iter().enumerate() {
            self.set_byte_at(pad.offset(1), i, *byte)?;
        }
        Ok(pad)
    }
}

/// Turns a data stack value into an instruction pointer.
fn code_addr(raw: RamCell) -> Result<usize, Error> {
    match Addr::decode(raw) {
        Addr::Dict(idx) if idx != 0 => Ok(idx),
        _ => Err(Error::BadCodeAddress(raw)),
    }
}

fn byte_index(raw: RamCell) -> Result<usize, Error> {
    usize::try_from(raw).replace_err(Error::BadCodeAddress(raw))
}

/// The cell that calls the word whose body starts at `body`.
pub(crate) fn body_cell(body: usize) -> Result<Cell, Error> {
    match Cell::try_from(body) {
        Ok(cell) if cell > Opcode::LAST => Ok(cell),
        _ => Err(Error::BadCallTarget(body)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opcodes_are_numbered_in_order() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i + 1, "{op:?}");
            assert_eq!(Opcode::from_cell(*op as Cell), Some(*op));
        }
        assert_eq!(Opcode::Lit as Cell, 1);
        assert_eq!(Opcode::LAST as usize, Opcode::ALL.len());
        assert_eq!(Opcode::from_cell(0), None);
        assert_eq!(Opcode::from_cell(Opcode::LAST + 1), None);
    }

    #[test]
    fn decodes_instructions() {
        assert_eq!(Instr::decode(0), None);
        assert_eq!(Instr::decode(1), Some(Instr::Op(Opcode::Lit)));
        assert_eq!(Instr::decode(Opcode::LAST), Some(Instr::Op(Opcode::ByteCmp)));
        assert_eq!(Instr::decode(Opcode::LAST + 1), Some(Instr::Call(Opcode::LAST as usize + 1)));
    }

    #[test]
    fn every_primitive_has_a_unique_name() {
        for (i, a) in PRIMITIVES.iter().enumerate() {
            assert!(PRIMITIVES[i + 1..].iter().all(|b| a.name != b.name), "{}", a.name);
        }
        for op in Opcode::ALL {
            assert!(PRIMITIVES.iter().any(|p| p.op == *op), "{op:?} has no word");
        }
    }

    #[test]
    fn code_addresses() {
        assert_eq!(code_addr(300), Ok(300));
        assert!(code_addr(0).is_err());
        assert!(code_addr(Addr::Arena(5).encode()).is_err());
        assert_eq!(body_cell(1000), Ok(1000));
        assert!(body_cell(3).is_err());
        assert!(body_cell(70000).is_err());
    }
}
