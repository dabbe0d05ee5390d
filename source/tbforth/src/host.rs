//! The host callback bridge.
//!
//! The `cf` opcode pops an operation id off the data stack and hands control
//! to the [`Host`] the engine was built with. Arguments and results travel on
//! the data stack. Any error a host method returns aborts the current line.
//!
//! Ids form one flat namespace: 1..=99 are host level operations, 100..=199
//! are peripherals. Ids the engine doesn't know go to [`Host::other`].

use alloc::vec::Vec;

use crate::{image::Image, stack::DataStack};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HostError {
    /// The host doesn't provide this operation.
    Unsupported(i32),
    /// The operation was attempted and failed.
    Failed,
}

/// Operations the engine knows the stack effects of.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum HostOp {
    /// `( c -- )`
    Emit = 1,
    /// `( -- c )`
    Key = 2,
    /// `( -- )`
    SaveImage = 3,
    /// `( "path" -- )` interprets a source file, then the rest of the line.
    Include = 4,
    /// `( path flags -- fd )`
    Open = 5,
    /// `( fd -- )`
    Close = 6,
    /// `( fd -- c )`, or -1 at end of file.
    ReadByte = 7,
    /// `( c fd -- )`
    WriteByte = 8,
    /// `( -- ms )`
    Millis = 9,
    /// `( -- secs )`
    Secs = 10,
    /// `( mode pin -- )`
    GpioMode = 100,
    /// `( pin -- level )`
    GpioRead = 101,
    /// `( level pin -- )`
    GpioWrite = 102,
    /// `( ms -- )`
    DelayMs = 103,
    /// `( -- )`
    WatchdogFeed = 104,
    /// `( -- )`
    Restart = 105,
}

impl HostOp {
    /// Every known operation, with the word bootstrap defines for it.
    pub const WORDS: &'static [(&'static str, HostOp)] = &[
        ("emit", HostOp::Emit),
        ("key", HostOp::Key),
        ("save-image", HostOp::SaveImage),
        ("include", HostOp::Include),
        ("open-file", HostOp::Open),
        ("close-file", HostOp::Close),
        ("read-byte", HostOp::ReadByte),
        ("write-byte", HostOp::WriteByte),
        ("ms", HostOp::Millis),
        ("secs", HostOp::Secs),
        ("gpio-mode", HostOp::GpioMode),
        ("gpio@", HostOp::GpioRead),
        ("gpio!", HostOp::GpioWrite),
        ("delay", HostOp::DelayMs),
        ("wdt-feed", HostOp::WatchdogFeed),
        ("restart", HostOp::Restart),
    ];

    pub fn from_id(id: i32) -> Option<Self> {
        Self::WORDS
            .iter()
            .map(|(_, op)| *op)
            .find(|op| *op as i32 == id)
    }

    #[inline]
    pub fn id(self) -> i32 {
        self as i32
    }
}

/// How `open-file` opens a file.
///
/// Programs pass the bits with the POSIX `O_*` numbering used on Linux: the
/// access mode in the low two bits, then create, truncate and append.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub const READ_ONLY: i32 = 0;
    pub const WRITE_ONLY: i32 = 1;
    pub const READ_WRITE: i32 = 2;
    pub const CREATE: i32 = 0o100;
    pub const TRUNCATE: i32 = 0o1000;
    pub const APPEND: i32 = 0o2000;

    pub fn from_bits(bits: i32) -> Self {
        let access = bits & 0b11;
        Self {
            read: access != Self::WRITE_ONLY,
            write: access == Self::WRITE_ONLY || access == Self::READ_WRITE,
            create: bits & Self::CREATE != 0,
            truncate: bits & Self::TRUNCATE != 0,
            append: bits & Self::APPEND != 0,
        }
    }
}

/// Platform services available to a running program.
///
/// Every method defaults to [`HostError::Unsupported`], so a host only
/// implements what its platform has.
#[allow(unused_variables)]
pub trait Host {
    fn emit(&mut self, byte: u8) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::Emit.id()))
    }

    fn key(&mut self) -> Result<u8, HostError> {
        Err(HostError::Unsupported(HostOp::Key.id()))
    }

    fn save_image(&mut self, image: &Image) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::SaveImage.id()))
    }

    /// The text of the source file `path`, for `include`.
    fn include(&mut self, path: &[u8]) -> Result<Vec<u8>, HostError> {
        Err(HostError::Unsupported(HostOp::Include.id()))
    }

    /// Opens `path` and returns a descriptor for the other file operations.
    fn open(&mut self, path: &[u8], flags: OpenFlags) -> Result<i32, HostError> {
        Err(HostError::Unsupported(HostOp::Open.id()))
    }

    fn close(&mut self, fd: i32) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::Close.id()))
    }

    /// The next byte of `fd`, or `None` at end of file.
    fn read_byte(&mut self, fd: i32) -> Result<Option<u8>, HostError> {
        Err(HostError::Unsupported(HostOp::ReadByte.id()))
    }

    fn write_byte(&mut self, fd: i32, byte: u8) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::WriteByte.id()))
    }

    /// Milliseconds since some fixed point, wrapping.
    fn millis(&mut self) -> Result<u32, HostError> {
        Err(HostError::Unsupported(HostOp::Millis.id()))
    }

    fn secs(&mut self) -> Result<u32, HostError> {
        Err(HostError::Unsupported(HostOp::Secs.id()))
    }

    fn gpio_mode(&mut self, pin: u32, mode: u32) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::GpioMode.id()))
    }

    fn gpio_read(&mut self, pin: u32) -> Result<bool, HostError> {
        Err(HostError::Unsupported(HostOp::GpioRead.id()))
    }

    fn gpio_write(&mut self, pin: u32, high: bool) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::GpioWrite.id()))
    }

    fn delay_ms(&mut self, ms: u32) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::DelayMs.id()))
    }

    fn watchdog_feed(&mut self) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::WatchdogFeed.id()))
    }

    fn restart(&mut self) -> Result<(), HostError> {
        Err(HostError::Unsupported(HostOp::Restart.id()))
    }

    /// Any id without a typed method.
    fn other(&mut self, id: i32, stack: &mut DataStack<'_>) -> Result<(), HostError> {
        Err(HostError::Unsupported(id))
    }
}

/// A host with no services at all.
impl Host for () {}

#[cfg(test)]
mod test {
    use super::{HostOp, OpenFlags};

    #[test]
    fn ids_round_trip() {
        for (_, op) in HostOp::WORDS {
            assert_eq!(HostOp::from_id(op.id()), Some(*op));
        }
        assert_eq!(HostOp::from_id(0), None);
        assert_eq!(HostOp::from_id(200), None);
    }

    #[test]
    fn open_flags() {
        let read = OpenFlags::from_bits(OpenFlags::READ_ONLY);
        assert!(read.read && !read.write && !read.create);

        let create = OpenFlags::from_bits(
            OpenFlags::WRITE_ONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        );
        assert_eq!(
            create,
            OpenFlags {
                read: false,
                write: true,
                create: true,
                truncate: true,
                append: false,
            }
        );

        let both = OpenFlags::from_bits(OpenFlags::READ_WRITE | OpenFlags::APPEND);
        assert!(both.read && both.write && both.append);
    }
}
