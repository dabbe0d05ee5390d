#![cfg_attr(not(any(test, feature = "use-std")), no_std)]

extern crate alloc;

pub mod abort;
pub mod arena;
pub mod config;
pub mod dictionary;
pub mod host;
pub mod image;
pub mod input;
pub mod number;
pub mod stack;
pub mod vm;
pub mod word;

mod prelude;

#[cfg(any(test, feature = "use-std"))]
pub mod testutil;

pub use crate::{
    abort::{AbortHandle, AbortReason},
    config::Params,
    host::{Host, HostError, HostOp, OpenFlags},
    image::Image,
    vm::{Boot, Forth},
};
use crate::{dictionary::DictError, image::ImageError, stack::StackError};

/// What the line interpreter is doing between tokens.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Interpret,
    Compile,
}

#[derive(Debug, PartialEq)]
pub enum Error {
    Stack(StackError),
    Dict(DictError),
    Host(HostError),
    Image(ImageError),
    /// The pending-abort register was set while a word ran.
    Abort(AbortReason),
    NotAWord,
    NotANumber,
    IllegalOpcode { ip: usize },
    BadCallTarget(usize),
    BadCodeAddress(i32),
    BadArenaAddress(usize),
    DivideByZero,
    MissingName,
    InputTooLong(usize),
    StringTooLong(usize),
    BadBase(u32),
    BadTask,
    NoVariableSpace,
    /// `include` nested deeper than the engine allows.
    IncludeTooDeep,
    BadParams(&'static str),
}

/// Numeric status codes, as pushed by `interpret`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Compiling = 1,
    NotAWord = 2,
    StackUnderflow = 3,
    ReturnStackOverflow = 4,
    DataStackOverflow = 5,
    Abort = 6,
    NotANumber = 7,
    Other = 8,
}

impl From<Mode> for Status {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Interpret => Status::Ok,
            Mode::Compile => Status::Compiling,
        }
    }
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::NotAWord => Status::NotAWord,
            Error::NotANumber => Status::NotANumber,
            Error::Stack(StackError::DataUnderflow) => Status::StackUnderflow,
            Error::Stack(StackError::DataOverflow) => Status::DataStackOverflow,
            Error::Stack(StackError::ReturnOverflow) => Status::ReturnStackOverflow,
            Error::Abort(_) | Error::IllegalOpcode { .. } | Error::BadCallTarget(_) => {
                Status::Abort
            }
            _ => Status::Other,
        }
    }

    /// The reason recorded in the abort register for this error.
    pub fn abort_reason(&self) -> AbortReason {
        match self {
            Error::Abort(reason) => *reason,
            Error::NotAWord | Error::NotANumber => AbortReason::NotAWord,
            _ => AbortReason::Illegal,
        }
    }
}

impl From<StackError> for Error {
    fn from(se: StackError) -> Self {
        Error::Stack(se)
    }
}

impl From<DictError> for Error {
    fn from(de: DictError) -> Self {
        Error::Dict(de)
    }
}

impl From<HostError> for Error {
    fn from(he: HostError) -> Self {
        Error::Host(he)
    }
}

impl From<ImageError> for Error {
    fn from(ie: ImageError) -> Self {
        Error::Image(ie)
    }
}

trait ReplaceErr {
    type OK;
    fn replace_err<NE>(self, t: NE) -> Result<Self::OK, NE>;
}

impl<T, OE> ReplaceErr for Result<T, OE> {
    type OK = T;
    #[inline]
    fn replace_err<NE>(self, e: NE) -> Result<Self::OK, NE> {
        match self {
            Ok(t) => Ok(t),
            Err(_e) => Err(e),
        }
    }
}

#[cfg(test)]
pub mod test {
    use crate::{testutil::TestHost, Error, Forth, Mode, Params};

    #[test]
    fn forth() {
        let mut forth = Forth::new(Params::default(), TestHost::default()).unwrap();
        let lines = &[
            ("2 3 + .", "5 "),
            (": yay 2 3 + . ;", ""),
            ("yay yay yay", "5 5 5 "),
            (": boop yay yay ;", ""),
            ("boop", "5 5 "),
            (": err if boop boop boop else yay yay then ;", ""),
            (": erf if boop boop boop then yay yay ;", ""),
            ("0 err", "5 5 "),
            ("1 err", "5 5 5 5 5 5 "),
            ("0 erf", "5 5 "),
            ("1 erf", "5 5 5 5 5 5 5 5 "),
            (": one 1 . ;", ""),
            (": two 2 . ;", ""),
            (": six 6 . ;", ""),
            (": nif if one if two two else six then one then ;", ""),
            ("  0 nif", ""),
            ("0 1 nif", "1 6 1 "),
            ("1 1 nif", "1 2 2 1 "),
            ("42 emit", "*"),
            (": star 42 emit ;", ""),
            ("star star star", "***"),
            (": stars dup 0= if drop exit then star 1- stars ;", ""),
            ("5 stars", "*****"),
            (": beep ,\" hello, world!\" type ;", ""),
            ("beep", "hello, world!"),
            ("123 constant x", ""),
            ("x .", "123 "),
            ("4 x + .", "127 "),
            ("variable y", ""),
            ("y @ .", "0 "),
            ("10 y !", ""),
            ("y @ .", "10 "),
            ("y @ 5 + y ! y @ .", "15 "),
        ];

        for (line, out) in lines {
            println!("{}", line);
            assert_eq!(forth.interpret(line), Ok(Mode::Interpret));
            print!(" => {}", forth.host.output);
            assert_eq!(forth.host.output, *out);
            forth.host.output.clear();
        }

        assert_eq!(forth.interpret(": derp boop yay"), Ok(Mode::Compile));
        assert_eq!(forth.interpret("yaay"), Err(Error::NotAWord));
        assert_eq!(forth.mode(), Mode::Interpret);

        forth.host.output.clear();
        forth.interpret("boop yay").unwrap();
        assert_eq!(forth.host.output, "5 5 5 ");
        assert!(forth.stack().is_empty());
        assert_eq!(forth.rdepth(), 0);

        let host = forth.release();
        assert_eq!(host.output, "5 5 5 ");
    }
}
