//! # Test Utilities
//!
//! For now, mostly just helpers for running "ui tests", or executing forth code at
//! test time.
//!
//! ## UI Tests
//!
//! Generally, forth code provided as a str will have one of the following things
//! for each line:
//!
//! * Configuration values for the VM, specified as "frontmatter comments".
//!   These must appear before any other non-comment lines. Currently accepted:
//!     * `( dict_cells USIZE )`
//!     * `( arena_cells USIZE )`
//!     * `( data_stack_cells USIZE )`
//!     * `( return_stack_cells USIZE )`
//!     * `( task0_cells USIZE )`
//!     * `( fixed_point_places U32 )`
//! * Comment lines. These are any lines just containing a `( ... )` style forth comment.
//! * Successful input lines, starting with `> ...`.
//! * Successful output lines, starting with `< ...`.
//!     * Any successful input line can have zero or more output lines
//!     * If *no* output lines are specified, ANY successful output is accepted/ignored.
//! * Unsuccessful input lines, starting with `x ...`.
//!     * This line is expected to abort - basically `interpret` returns an `Err()`.
//!     * There is no way to specify which error yet
//!     * Unsuccessful input lines may not have any successful output
//!
//! ### Example
//!
//! This is a forth ui-test doctest. It will be run with `cargo test --all-features`.
//!
//! ```rust
//! # #[cfg(feature = "use-std")]
//! # fn main() {
//! # tbforth::testutil::blocking_runtest(r#"
//! ( specify VM settings with frontmatter )
//! ( data_stack_cells 4 )
//!
//! ( specify input with no output )
//! > : star 42 emit ;
//!
//! ( specify input and output )
//! > star star
//! < **
//!
//! ( specify lines that cause aborts )
//! x starb
//! # "#)
//! # }
//! # #[cfg(not(feature = "use-std"))]
//! # fn main() {}
//! ```

use std::collections::{BTreeMap, VecDeque};

use crate::{
    host::{Host, HostError, OpenFlags},
    image::Image,
    Error, Forth, Mode, Params,
};

/// A host that records everything it is asked to do.
#[derive(Debug, Default)]
pub struct TestHost {
    /// Everything emitted so far.
    pub output: String,
    /// The last image passed to `save-image`.
    pub saved: Option<Image>,
    /// An in-memory filesystem for `include` and the file words.
    pub files: BTreeMap<Vec<u8>, Vec<u8>>,
    open: Vec<Option<OpenFile>>,
    keys: VecDeque<u8>,
    millis: u32,
}

#[derive(Debug)]
struct OpenFile {
    name: Vec<u8>,
    pos: usize,
    flags: OpenFlags,
}

/// Descriptors below this are taken by stdio.
const FIRST_FD: i32 = 3;

impl TestHost {
    /// Queues bytes for `key` to return.
    pub fn push_keys(&mut self, keys: &[u8]) {
        self.keys.extend(keys.iter().copied());
    }

    pub fn add_file(&mut self, name: &str, contents: &str) {
        self.files
            .insert(name.as_bytes().to_vec(), contents.as_bytes().to_vec());
    }

    /// How many files are open right now.
    pub fn open_files(&self) -> usize {
        self.open.iter().flatten().count()
    }

    fn open_file(&mut self, fd: i32) -> Result<&mut OpenFile, HostError> {
        let idx = fd
            .checked_sub(FIRST_FD)
            .and_then(|idx| usize::try_from(idx).ok())
            .ok_or(HostError::Failed)?;
        self.open
            .get_mut(idx)
            .and_then(Option::as_mut)
            .ok_or(HostError::Failed)
    }
}

impl Host for TestHost {
    fn emit(&mut self, byte: u8) -> Result<(), HostError> {
        self.output.push(byte as char);
        Ok(())
    }

    fn key(&mut self) -> Result<u8, HostError> {
        self.keys.pop_front().ok_or(HostError::Failed)
    }

    fn save_image(&mut self, image: &Image) -> Result<(), HostError> {
        self.saved = Some(image.clone());
        Ok(())
    }

    fn include(&mut self, path: &[u8]) -> Result<Vec<u8>, HostError> {
        self.files.get(path).cloned().ok_or(HostError::Failed)
    }

    fn open(&mut self, path: &[u8], flags: OpenFlags) -> Result<i32, HostError> {
        if !self.files.contains_key(path) {
            if !flags.create {
                return Err(HostError::Failed);
            }
            self.files.insert(path.to_vec(), Vec::new());
        }
        if flags.truncate {
            if let Some(contents) = self.files.get_mut(path) {
                contents.clear();
            }
        }
        let file = OpenFile {
            name: path.to_vec(),
            pos: 0,
            flags,
        };
        let idx = match self.open.iter().position(Option::is_none) {
            Some(idx) => {
                self.open[idx] = Some(file);
                idx
            }
            None => {
                self.open.push(Some(file));
                self.open.len() - 1
            }
        };
        Ok(idx as i32 + FIRST_FD)
    }

    fn close(&mut self, fd: i32) -> Result<(), HostError> {
        self.open_file(fd)?;
        self.open[(fd - FIRST_FD) as usize] = None;
        Ok(())
    }

    fn read_byte(&mut self, fd: i32) -> Result<Option<u8>, HostError> {
        let file = self.open_file(fd)?;
        if !file.flags.read {
            return Err(HostError::Failed);
        }
        let (name, pos) = (file.name.clone(), file.pos);
        let byte = self.files.get(&name).and_then(|c| c.get(pos)).copied();
        if byte.is_some() {
            self.open_file(fd)?.pos += 1;
        }
        Ok(byte)
    }

    fn write_byte(&mut self, fd: i32, byte: u8) -> Result<(), HostError> {
        let file = self.open_file(fd)?;
        if !file.flags.write {
            return Err(HostError::Failed);
        }
        let (name, pos, append) = (file.name.clone(), file.pos, file.flags.append);
        let contents = self.files.get_mut(&name).ok_or(HostError::Failed)?;
        let pos = if append { contents.len() } else { pos };
        match contents.get_mut(pos) {
            Some(slot) => *slot = byte,
            None => contents.push(byte),
        }
        self.open_file(fd)?.pos = pos + 1;
        Ok(())
    }

    // A clock that ticks once per read.
    fn millis(&mut self) -> Result<u32, HostError> {
        self.millis = self.millis.wrapping_add(1);
        Ok(self.millis)
    }

    fn secs(&mut self) -> Result<u32, HostError> {
        Ok(self.millis / 1000)
    }
}

/// Run the given forth ui test against a fresh VM
///
/// Does accept any/all/none of the configuration frontmatter (see above for
/// listing of frontmatter kinds)
pub fn blocking_runtest(contents: &str) {
    let tokd = tokenize(contents, true).unwrap();
    let mut forth = Forth::new(tokd.settings, TestHost::default()).unwrap();
    blocking_steps_with(tokd.steps.as_slice(), &mut forth);
}

/// Run the given forth ui-test against the given forth vm.
///
/// Does not accept ui-tests with frontmatter configuration (will panic)
pub fn blocking_runtest_with(forth: &mut Forth<TestHost>, contents: &str) {
    let tokd = tokenize(contents, false).unwrap();
    blocking_steps_with(tokd.steps.as_slice(), forth);
}

fn check_output(res: Result<Mode, Error>, outcome: &Outcome, output: &str) {
    println!("< {output}");
    match (res, outcome) {
        (Ok(_), Outcome::OkAnyOutput) => {}
        (Ok(_), Outcome::OkWithOutput(exp)) => {
            let act_lines = output.lines().collect::<Vec<&str>>();
            assert_eq!(act_lines.len(), exp.len());
            act_lines.iter().zip(exp.iter()).for_each(|(a, e)| {
                assert_eq!(a.trim_end(), e.trim_end());
            })
        }
        (Err(_e), Outcome::FatalError) => {}
        (res, exp) => {
            eprintln!("Error!");
            eprintln!("Expected: {exp:?}");
            eprintln!("Got: {res:?}");
            if res.is_ok() {
                eprintln!("Output:\n{}", output);
            }
            panic!();
        }
    }
}

// Runs the given steps against the given forth VM.
//
// Panics on any mismatch
fn blocking_steps_with(steps: &[Step], forth: &mut Forth<TestHost>) {
    for Step { input, output: outcome } in steps {
        println!("> {input}");
        let res = forth.interpret(input);
        check_output(res, outcome, forth.host.output.as_str());
        forth.host.output.clear();
    }
}

#[derive(Debug)]
enum Outcome {
    OkAnyOutput,
    OkWithOutput(Vec<String>),
    FatalError,
}

#[derive(Debug)]
struct Step {
    input: String,
    output: Outcome,
}

#[derive(Default, Debug)]
struct Tokenized {
    settings: Params,
    steps: Vec<Step>,
}

fn tokenize(contents: &str, allow_frontmatter: bool) -> Result<Tokenized, ()> {
    let mut output = Tokenized::default();
    let mut frontmatter_done = !allow_frontmatter;

    for line in contents.lines() {
        let (tok, remain) = if let Some(t) = line.trim_start().split_once(' ') {
            t
        } else {
            continue;
        };

        match tok {
            ">" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: Outcome::OkAnyOutput,
                });
            }
            "<" => {
                frontmatter_done = true;
                let cur_step = output.steps.last_mut().ok_or(())?;
                match &mut cur_step.output {
                    Outcome::OkAnyOutput => {
                        cur_step.output = Outcome::OkWithOutput(vec![remain.to_string()]);
                    }
                    Outcome::OkWithOutput(o) => {
                        o.push(remain.to_string());
                    }
                    Outcome::FatalError => panic!("Fatal error can't set output"),
                }
            }
            "x" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: Outcome::FatalError,
                });
            }
            "(" => {
                let mut split = remain.split_whitespace();
                let key = split.next();
                let settings = &mut output.settings;
                let slot = match key {
                    Some("dict_cells") => Some(&mut settings.dict_cells),
                    Some("arena_cells") => Some(&mut settings.arena_cells),
                    Some("data_stack_cells") => Some(&mut settings.data_stack_cells),
                    Some("return_stack_cells") => Some(&mut settings.return_stack_cells),
                    Some("task0_cells") => Some(&mut settings.task0_cells),
                    Some("fixed_point_places") => None,
                    Some(_) => continue,
                    None => panic!(),
                };
                assert!(!frontmatter_done, "Unexpected frontmatter settings!");
                let value = split.next().ok_or(())?;
                match slot {
                    Some(slot) => *slot = value.parse::<usize>().map_err(drop)?,
                    None => settings.fixed_point_places = value.parse::<u32>().map_err(drop)?,
                }
                assert_eq!(Some(")"), split.next());
            }
            _ => {}
        }
    }

    Ok(output)
}

#[cfg(test)]
mod test {
    use super::{blocking_runtest, blocking_runtest_with, tokenize, Outcome, TestHost};
    use crate::{Forth, Params};

    #[test]
    fn frontmatter() {
        let tokd = tokenize(
            r#"
            ( a comment )
            ( data_stack_cells 8 )
            ( fixed_point_places 2 )
            > 1 2
            < out
            x nope
        "#,
            true,
        )
        .unwrap();
        assert_eq!(tokd.settings.data_stack_cells, 8);
        assert_eq!(tokd.settings.fixed_point_places, 2);
        assert_eq!(tokd.steps.len(), 2);
        assert!(matches!(tokd.steps[0].output, Outcome::OkWithOutput(_)));
        assert!(matches!(tokd.steps[1].output, Outcome::FatalError));
    }

    #[test]
    fn small_stacks() {
        blocking_runtest(
            r#"
            ( data_stack_cells 4 )
            > 1 2 3 4
            x 5
            > 1 2 + .
            < 3
        "#,
        );
    }

    #[test]
    #[cfg(feature = "fixed-point")]
    fn fixed_point_literals() {
        blocking_runtest(
            r#"
            ( fixed_point_places 2 )
            > 1.5 .
            < 150
            > -0.25 .
            < -25
        "#,
        );
    }

    #[test]
    fn reuse_a_vm() {
        let mut forth = Forth::new(Params::default(), TestHost::default()).unwrap();
        blocking_runtest_with(&mut forth, "> : twice dup + ;");
        blocking_runtest_with(&mut forth, "> 21 twice .\n< 42");
    }
}
