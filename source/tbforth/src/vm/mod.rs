use alloc::{string::String, vec::Vec};

use tracing::{debug, info, trace, warn};

use crate::{
    abort::AbortHandle,
    arena::{Arena, IRAM_CELLS, TIB_BYTES},
    config::Params,
    dictionary::{Dictionary, Found},
    host::{Host, HostOp},
    image::Image,
    input::Token,
    number,
    prelude::PRELUDE,
    word::{Addr, Cell, RamCell},
    Error, Mode,
};

pub mod builtins;

/// How many `include`s may be in progress at once.
pub const MAX_INCLUDE_DEPTH: u8 = 8;

use self::builtins::{body_cell, Opcode, PRIMITIVES};

/// Forth is the "context" of the VM/interpreter.
///
/// It owns the dictionary, the arena holding the stacks and input line, the
/// abort register, and the host that `cf` calls out to.
pub struct Forth<H> {
    pub(crate) dict: Dictionary,
    pub(crate) arena: Arena,
    params: Params,
    abort: AbortHandle,
    includes: u8,
    pub host: H,
}

/// How [`Forth::boot`] obtained its dictionary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Boot {
    /// Loaded from a compatible image.
    Image,
    /// Built from the primitive table and prelude.
    Fresh,
}

impl<H: Host> Forth<H> {
    /// Builds a fresh VM.
    pub fn new(params: Params, host: H) -> Result<Self, Error> {
        Self::boot(params, host, None).map(|(forth, _)| forth)
    }

    /// Builds a VM, reusing `image` if it was written by a compatible build.
    ///
    /// An image that doesn't fit is discarded with a warning and the VM is
    /// bootstrapped from scratch, as if no image had been given.
    #[tracing::instrument(level = "debug", skip_all, fields(dict_cells = params.dict_cells))]
    pub fn boot(params: Params, host: H, image: Option<Image>) -> Result<(Self, Boot), Error> {
        params.validate()?;
        let mut forth = Self {
            dict: Dictionary::new(params.dict_cells),
            arena: Arena::new(&params),
            params,
            abort: AbortHandle::new(),
            includes: 0,
            host,
        };

        if let Some(image) = image {
            match image.into_dictionary(forth.params.dict_cells) {
                Ok(dict) => {
                    forth.dict = dict;
                    info!(here = forth.dict.here(), "loaded dictionary image");
                    return Ok((forth, Boot::Image));
                }
                Err(err) => warn!(?err, "ignoring dictionary image"),
            }
        }

        forth.bootstrap()?;
        info!(here = forth.dict.here(), "bootstrapped dictionary");
        Ok((forth, Boot::Fresh))
    }

    fn bootstrap(&mut self) -> Result<(), Error> {
        for prim in PRIMITIVES {
            self.dict.define(prim.name.as_bytes())?;
            self.dict.append(prim.op as Cell)?;
            self.dict.append(Opcode::Exit as Cell)?;
            self.dict.mark_primitive();
            if prim.immediate {
                self.dict.mark_immediate();
            }
        }
        for (name, op) in HostOp::WORDS {
            self.define_host_word(name, op.id())?;
        }
        for line in PRELUDE {
            self.interpret(line)?;
        }
        Ok(())
    }

    /// Defines `name` as a word that calls host operation `id`.
    pub fn define_host_word(&mut self, name: &str, id: i32) -> Result<(), Error> {
        self.dict.define(name.as_bytes())?;
        self.dict.append(Opcode::Dlit as Cell)?;
        self.append_dlit_operands(id)?;
        self.dict.append(Opcode::CallC as Cell)?;
        self.dict.append(Opcode::Exit as Cell)?;
        debug!(name, id, "host word");
        Ok(())
    }

    /// Interprets one line of input.
    ///
    /// Returns the mode the interpreter is left in, so a caller can tell a
    /// finished line from one that continues a definition.
    pub fn interpret(&mut self, line: &str) -> Result<Mode, Error> {
        self.arena.fill_input(line)?;
        self.process_line()
    }

    /// Interprets whatever is left in the input buffer.
    pub fn process_line(&mut self) -> Result<Mode, Error> {
        let res = self.interpret_input();
        if let Err(ref err) = res {
            warn!(?err, token = ?self.arena.token(), "line aborted");
        }
        res
    }

    pub(crate) fn interpret_input(&mut self) -> Result<Mode, Error> {
        match self.interpret_tokens() {
            Ok(()) => Ok(self.arena.mode()),
            Err(err) => {
                self.recover();
                Err(err)
            }
        }
    }

    fn interpret_tokens(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; TIB_BYTES];
        while let Some(tok) = self.arena.next_word() {
            let word = self.arena.token_bytes(tok, &mut buf);
            let mode = self.arena.mode();
            trace!(?tok, ?mode);

            let Some(found) = self.dict.find(word) else {
                self.literal(word)?;
                continue;
            };

            match mode {
                Mode::Interpret => self.exec(found.body, found.primitive)?,
                Mode::Compile if word.first() == Some(&b';') => self.end_definition()?,
                Mode::Compile if found.immediate => self.exec(found.body, found.primitive)?,
                Mode::Compile => self.compile_call(found)?,
            }
        }
        Ok(())
    }

    fn literal(&mut self, word: &[u8]) -> Result<(), Error> {
        let val = number::parse(word, self.arena.base(), self.arena.fixed_point_places())
            .ok_or(Error::NotAWord)?;
        match self.arena.mode() {
            Mode::Interpret => self.arena.push(val)?,
            Mode::Compile => {
                self.dict.append(Opcode::Dlit as Cell)?;
                self.append_dlit_operands(val)?;
            }
        }
        Ok(())
    }

    fn compile_call(&mut self, found: Found) -> Result<(), Error> {
        if found.primitive {
            let op = self
                .dict
                .get(found.body)
                .ok_or(Error::BadCallTarget(found.body))?;
            self.dict.append(op)?;
        } else if found.header.index() == self.arena.compiling_word() {
            // A call to ourselves becomes a jump, so the return stack
            // doesn't grow.
            let body = body_cell(found.body)?;
            self.dict.append(Opcode::Lit as Cell)?;
            self.dict.append(body)?;
            self.dict.append(Opcode::Jmp as Cell)?;
        } else if self.dict.get(found.body) == Some(Opcode::Exit as Cell) {
            trace!(body = found.body, "eliding empty word");
        } else {
            self.dict.append(body_cell(found.body)?)?;
        }
        Ok(())
    }

    fn end_definition(&mut self) -> Result<(), Error> {
        self.dict.append(Opcode::Exit as Cell)?;
        let header = self.arena.compiling_word();
        self.arena.set_mode(Mode::Interpret);
        self.arena.set_compiling_word(0);
        debug!(header, here = self.dict.here(), "defined word");
        Ok(())
    }

    /// Interprets `source` line by line, then resumes the line that included
    /// it. The first failing line aborts the include.
    pub(crate) fn include(&mut self, path: &[u8], source: &[u8]) -> Result<(), Error> {
        if self.includes >= MAX_INCLUDE_DEPTH {
            return Err(Error::IncludeTooDeep);
        }
        let saved = self.arena.save_input();
        self.includes += 1;
        let res = self.interpret_source(path, source);
        self.includes -= 1;
        self.arena.restore_input(&saved);
        res
    }

    fn interpret_source(&mut self, path: &[u8], source: &[u8]) -> Result<(), Error> {
        let path = String::from_utf8_lossy(path);
        debug!(%path, depth = self.includes, "including");
        for (n, line) in source.split(|b| *b == b'\n').enumerate() {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            self.arena.fill_input_bytes(line)?;
            if let Err(err) = self.interpret_input() {
                warn!(%path, line = n + 1, ?err, "include aborted");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Allots one variable cell just below the pad, or below the last one.
    pub(crate) fn allot_var(&mut self) -> Result<Addr, Error> {
        let next = self
            .dict
            .var_idx()
            .checked_add(1)
            .ok_or(Error::NoVariableSpace)?;
        let floor = IRAM_CELLS + self.params.task0_cells;
        let cell = self
            .arena
            .pad()
            .checked_sub(usize::from(next))
            .filter(|cell| *cell >= floor)
            .ok_or(Error::NoVariableSpace)?;
        self.dict.set_var_idx(next);
        self.arena.set(cell, 0)?;
        Ok(Addr::Arena(cell))
    }

    /// The one recovery path: abandon any definition in progress, empty the
    /// stacks and clear the abort register.
    pub(crate) fn recover(&mut self) {
        if self.arena.mode() == Mode::Compile {
            // A half built word aborts if anyone calls it.
            let _ = self.dict.append(Opcode::Abort as Cell);
        }
        self.arena.set_mode(Mode::Interpret);
        self.arena.set_compiling_word(0);
        if self.arena.clear_stacks().is_err() {
            self.arena.init_task0(&self.params);
        }
        self.abort.clear();
    }

    pub fn mode(&self) -> Mode {
        self.arena.mode()
    }

    /// The data stack, bottom first.
    pub fn stack(&self) -> Vec<RamCell> {
        self.arena.data_stack()
    }

    pub fn push(&mut self, val: RamCell) -> Result<(), Error> {
        Ok(self.arena.push(val)?)
    }

    pub fn pop(&mut self) -> Result<RamCell, Error> {
        Ok(self.arena.try_pop()?)
    }

    pub fn rdepth(&self) -> usize {
        self.arena.rdepth()
    }

    /// Location of the last token read, which is the failing one after an
    /// error.
    pub fn token(&self) -> Token {
        self.arena.token()
    }

    /// A handle that can abort the running line from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn image(&self) -> Image {
        Image::from_dictionary(&self.dict)
    }

    pub fn find(&self, name: &str) -> Option<Found> {
        self.dict.find(name.as_bytes())
    }

    /// Names of every word, newest first.
    pub fn words(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.dict
            .headers()
            .filter_map(|header| self.dict.name_of(header))
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn release(self) -> H {
        self.host
    }
}

#[cfg(test)]
mod test {
    use crate::{
        abort::AbortReason,
        dictionary::DictError,
        stack::StackError,
        testutil::{blocking_runtest, blocking_runtest_with, TestHost},
        vm::builtins::Opcode,
        word::Cell,
        Boot, Error, Forth, Mode, Params,
    };

    fn forth() -> Forth<TestHost> {
        Forth::new(Params::default(), TestHost::default()).unwrap()
    }

    #[test]
    fn numbers_push_in_order() {
        let mut forth = forth();
        forth.interpret("1 2 3").unwrap();
        assert_eq!(forth.stack(), vec![1, 2, 3]);
        forth.interpret("-4 $10 %101 #9 0x1f").unwrap();
        assert_eq!(forth.stack(), vec![1, 2, 3, -4, 16, 5, 9, 31]);
    }

    #[test]
    fn prefix_is_per_token() {
        let mut forth = forth();
        forth.interpret("$FF . 10 .").unwrap();
        assert_eq!(forth.host.output, "255 10 ");
    }

    #[test]
    fn square_and_redefinition() {
        let mut forth = forth();
        forth.interpret(": square dup * ;").unwrap();
        forth.interpret("5 square").unwrap();
        assert_eq!(forth.stack(), vec![25]);
        forth.pop().unwrap();

        forth.interpret(": sq+1 square 1+ ;").unwrap();
        let old = forth.find("square").unwrap();
        forth.interpret(": square drop 7 ;").unwrap();
        let new = forth.find("square").unwrap();
        assert_ne!(old.body, new.body);

        forth.interpret("3 sq+1 3 square").unwrap();
        assert_eq!(forth.stack(), vec![10, 7]);
    }

    #[test]
    fn tail_calls_dont_grow_the_return_stack() {
        let mut forth = forth();
        forth
            .interpret(": countdown dup 0= if drop exit then 1- countdown ;")
            .unwrap();
        let before = forth.rdepth();
        forth.interpret("1000 countdown").unwrap();
        assert_eq!(forth.rdepth(), before);
        assert!(forth.stack().is_empty());
    }

    #[test]
    fn primitives_inline_and_empty_words_vanish() {
        let mut forth = forth();
        forth.interpret(": nop ;").unwrap();
        forth.interpret(": f nop dup nop ;").unwrap();
        let body = forth.find("f").unwrap().body;
        let dict = forth.dictionary();
        assert_eq!(dict.get(body), Some(Opcode::Dup as Cell));
        assert_eq!(dict.get(body + 1), Some(Opcode::Exit as Cell));
        assert_eq!(dict.here(), body + 2);
    }

    #[test]
    fn return_stack_at_the_prompt() {
        let mut forth = forth();
        forth.interpret("1 >r r> .").unwrap();
        assert_eq!(forth.host.output, "1 ");
        forth.interpret("-1 >r 5").unwrap();
        assert_eq!(forth.rdepth(), 1);
        forth.interpret("r> .").unwrap();
        assert_eq!(forth.host.output, "1 -1 ");
        assert_eq!(forth.stack(), vec![5]);
        assert_eq!(forth.rdepth(), 0);
    }

    #[test]
    #[cfg(feature = "fixed-point")]
    fn negative_fixed_point_places_read_as_zero() {
        let mut forth = forth();
        forth.interpret("-1 uram 2 + !").unwrap();
        forth.interpret("1.5 .").unwrap();
        assert_eq!(forth.host.output, "1 ");
    }

    #[test]
    fn underflow_is_reported() {
        let mut forth = forth();
        assert_eq!(
            forth.interpret("drop"),
            Err(Error::Stack(StackError::DataUnderflow))
        );
        assert_eq!(
            forth.interpret("1 +"),
            Err(Error::Stack(StackError::DataUnderflow))
        );
        // the failed line leaves nothing behind
        assert!(forth.stack().is_empty());
        assert_eq!(forth.interpret("1 2 + ."), Ok(Mode::Interpret));
        assert_eq!(forth.host.output, "3 ");
    }

    #[test]
    fn failed_definition_is_kept_but_aborts() {
        let mut forth = forth();
        assert_eq!(forth.interpret(": half 2 nope ;"), Err(Error::NotAWord));
        assert_eq!(forth.mode(), Mode::Interpret);
        let found = forth.find("half").unwrap();
        let here = forth.dictionary().here();
        assert_eq!(forth.dictionary().get(here - 1), Some(Opcode::Abort as Cell));
        assert!(found.body < here);

        assert_eq!(forth.interpret("half"), Err(Error::Abort(AbortReason::Word)));
        assert!(forth.stack().is_empty());
        assert_eq!(forth.rdepth(), 0);
    }

    #[test]
    fn failing_token_is_located() {
        let mut forth = forth();
        let line = "1 2 frob 3";
        assert_eq!(forth.interpret(line), Err(Error::NotAWord));
        assert_eq!(forth.token().text(line), Some("frob"));
    }

    #[test]
    fn multi_line_definitions() {
        let mut forth = forth();
        assert_eq!(forth.interpret(": three"), Ok(Mode::Compile));
        assert_eq!(forth.interpret("1 2"), Ok(Mode::Compile));
        assert_eq!(forth.interpret("+ ;"), Ok(Mode::Interpret));
        forth.interpret("three .").unwrap();
        assert_eq!(forth.host.output, "3 ");
    }

    #[test]
    fn pending_abort_stops_the_next_word() {
        let mut forth = forth();
        forth.interpret(": spin begin again ;").unwrap();
        let handle = forth.abort_handle();
        handle.request(AbortReason::CtrlC);
        assert_eq!(forth.interpret("spin"), Err(Error::Abort(AbortReason::CtrlC)));
        assert!(!handle.is_pending());
        assert_eq!(forth.interpret("1 ."), Ok(Mode::Interpret));
    }

    #[test]
    fn image_reload_keeps_words() {
        let mut forth = forth();
        forth.interpret(": square dup * ;").unwrap();
        forth.interpret("variable v 3 v !").unwrap();
        let image = forth.image();
        let names = ["square", "v", "dup", "type", "emit"];
        let before: Vec<_> = names.iter().map(|n| forth.find(n)).collect();

        let (mut loaded, boot) =
            Forth::boot(Params::default(), TestHost::default(), Some(image.clone())).unwrap();
        assert_eq!(boot, Boot::Image);
        let after: Vec<_> = names.iter().map(|n| loaded.find(n)).collect();
        assert_eq!(before, after);
        loaded.interpret("6 square . v @ .").unwrap();
        // variables are volatile, only their slots survive
        assert_eq!(loaded.host.output, "36 0 ");

        let small = Params {
            dict_cells: 30000,
            ..Params::default()
        };
        let (fresh, boot) = Forth::boot(small, TestHost::default(), Some(image)).unwrap();
        assert_eq!(boot, Boot::Fresh);
        assert!(fresh.find("square").is_none());
    }

    #[test]
    fn full_dictionary_aborts() {
        let forth = forth();
        let here = forth.dictionary().here();
        let tight = Params {
            dict_cells: here + 8,
            ..Params::default()
        };
        let mut forth2 = Forth::new(tight, TestHost::default()).unwrap();
        assert_eq!(
            forth2.interpret(": long 1 2 3 4 ;"),
            Err(Error::Dict(DictError::Full))
        );
        assert_eq!(forth2.mode(), Mode::Interpret);
        forth2.interpret("1 .").unwrap();
        assert_eq!(forth2.host.output, "1 ");
    }

    #[test]
    fn words_lists_newest_first() {
        let mut forth = forth();
        forth.interpret(": zzz ;").unwrap();
        let mut words = forth.words();
        assert_eq!(words.next().as_deref(), Some(&b"zzz"[..]));
        assert!(forth.words().any(|w| w == b"dup"));
    }

    #[test]
    fn control_flow() {
        blocking_runtest(
            r#"
            > : sign dup 0< if drop -1 else 0> if 1 else 0 then then ;
            > -5 sign . 0 sign . 9 sign .
            < -1 0 1
            > : count-up 0 begin dup . 1+ dup 3 = until drop ;
            > count-up
            < 0 1 2
            > 1 2 2dup . . . .
            < 2 1 2 1
            x 1 0 /
            x 1 0 mod
            > 7 2 / . 7 2 mod . 2 3 4 */ .
            < 3 1 1
        "#,
        );
    }

    #[test]
    fn strings_and_pad() {
        blocking_runtest(
            r#"
            > : greet ," hi there" type ;
            > greet
            < hi there
            > ," abc" count . drop
            < 3
            > ," hello world" 6 5 rot substr type
            < world
            > 255 hex . decimal
            < ff
            > -1 u>string type
            < 4294967295
            > ," 42" >num 1+ .
            < 43
            x ," 4x2" >num
        "#,
        );
    }

    #[test]
    fn postpone_and_immediate() {
        blocking_runtest(
            r#"
            > : my-if postpone if ; immediate
            > : test my-if 1 . else 2 . then ;
            > 1 test 0 test
            < 1 2
            > : now 42 emit ; immediate
            > : later now ;
            < *
            > later 1 .
            < 1
        "#,
        );
    }

    #[test]
    fn lookup_and_exec() {
        blocking_runtest(
            r#"
            > : hi 72 emit 105 emit ;
            > ' hi exec
            < Hi
            > ' nothing-here .
            < 0
            > ," hi" (find-head) 0= .
            < 0
        "#,
        );
    }

    #[test]
    fn interpret_pushes_status() {
        let mut forth = forth();
        forth.interpret("interpret 1 2").unwrap();
        assert_eq!(forth.stack(), vec![1, 2, 0]);
        forth.pop().unwrap();
        forth.pop().unwrap();
        forth.pop().unwrap();
        forth.interpret("interpret : part").unwrap();
        // the nested interpreter ran the rest of the line and left us compiling
        assert_eq!(forth.mode(), Mode::Compile);
        forth.interpret(";").unwrap();
        assert_eq!(forth.stack(), vec![1]);
    }

    #[test]
    fn host_words() {
        blocking_runtest(
            r#"
            > 65 emit 66 emit
            < AB
            x 1 2 gpio!
            x 999 cf
        "#,
        );

        let mut forth = forth();
        forth.host.push_keys(b"z");
        forth.interpret("key emit ms secs").unwrap();
        assert_eq!(forth.host.output, "z");
        assert_eq!(forth.stack().len(), 2);

        forth.interpret("save-image").unwrap();
        let saved = forth.host.saved.clone().unwrap();
        assert_eq!(saved, forth.image());

        forth.define_host_word("beep", 7).unwrap();
        assert_eq!(
            forth.interpret("beep"),
            Err(Error::Host(crate::HostError::Unsupported(7)))
        );
    }

    #[test]
    fn include_resumes_the_line() {
        let mut forth = forth();
        forth
            .host
            .add_file("lib.fs", ": twice dup +\r\n;\n21 twice .\n");
        assert_eq!(forth.interpret("1 include lib.fs 2 ."), Ok(Mode::Interpret));
        assert_eq!(forth.host.output, "42 2 ");
        assert_eq!(forth.stack(), vec![1]);
        assert!(forth.find("twice").is_some());
    }

    #[test]
    fn include_failures_abort_the_line() {
        let mut forth = forth();
        forth.host.add_file("bad.fs", "1 2\n3 frob\n4\n");
        assert_eq!(forth.interpret("include bad.fs 5"), Err(Error::NotAWord));
        assert!(forth.stack().is_empty());
        assert_eq!(forth.mode(), Mode::Interpret);

        assert_eq!(
            forth.interpret("include missing.fs"),
            Err(Error::Host(crate::HostError::Failed))
        );

        forth.host.add_file("loop.fs", "include loop.fs");
        assert_eq!(forth.interpret("include loop.fs"), Err(Error::IncludeTooDeep));
        forth.host.add_file("ok.fs", "7");
        forth.interpret("include ok.fs").unwrap();
        assert_eq!(forth.stack(), vec![7]);
    }

    #[test]
    fn file_words() {
        let mut forth = forth();
        blocking_runtest_with(
            &mut forth,
            r#"
            > ," out.txt" $241 open-file
            > 104 over write-byte 105 over write-byte close-file
            > ," out.txt" 0 open-file
            > dup read-byte emit dup read-byte emit dup read-byte . close-file
            < hi-1
            x ," nope.txt" 0 open-file
            x 99 close-file
        "#,
        );
        assert_eq!(forth.host.files.get(&b"out.txt"[..]), Some(&b"hi".to_vec()));
        assert_eq!(forth.host.open_files(), 0);
    }

    #[test]
    fn bytes_across_spaces() {
        blocking_runtest(
            r#"
            > variable spare variable buf
            > 104 buf c!+ 105 buf c!+ buf type
            < hi
            > buf 4 +c@ emit
            < h
            > 73 buf 4 +c! buf type
            < Ii
            > ," Ii" 4 buf 4 2 bstr= .
            < -1
            > ," Ix" 4 buf 4 2 bstr= .
            < 0
            > ," zz" 4 buf 4 2 bcopy buf type
            < zz
        "#,
        );
    }

    #[test]
    fn tasks_and_cold() {
        let mut forth = forth();
        forth.interpret("100 20 20 600 make-task select-task").unwrap();
        forth.interpret("1 2 3").unwrap();
        assert_eq!(forth.stack(), vec![1, 2, 3]);
        forth.interpret("0 select-task").unwrap();
        assert!(forth.stack().is_empty());
        forth.interpret("600 select-task").unwrap();
        assert_eq!(forth.stack(), vec![1, 2, 3]);
        forth.interpret("cold").unwrap();
        assert!(forth.stack().is_empty());
        assert_eq!(forth.arena.task(), crate::arena::IRAM_CELLS);
        assert!(forth.interpret("5000 select-task").is_err());
    }
}
