use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use tbforth::{Host, HostError, HostOp, Image, OpenFlags};

/// Platform services for a forth VM running in a terminal.
pub struct StdHost {
    out: io::Stdout,
    image_path: Option<PathBuf>,
    started: Instant,
    files: BTreeMap<i32, File>,
    next_fd: i32,
}

impl StdHost {
    pub fn new(image_path: Option<PathBuf>) -> Self {
        Self {
            out: io::stdout(),
            image_path,
            started: Instant::now(),
            files: BTreeMap::new(),
            // 0, 1 and 2 belong to stdio
            next_fd: 3,
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    fn file(&mut self, fd: i32) -> Result<&mut File, HostError> {
        self.files.get_mut(&fd).ok_or(HostError::Failed)
    }
}

fn path_of(bytes: &[u8]) -> Result<&Path, HostError> {
    std::str::from_utf8(bytes)
        .map(Path::new)
        .map_err(|_| HostError::Failed)
}

impl Host for StdHost {
    fn emit(&mut self, byte: u8) -> Result<(), HostError> {
        self.out.write_all(&[byte]).map_err(|_| HostError::Failed)
    }

    fn key(&mut self) -> Result<u8, HostError> {
        let _ = self.out.flush();
        let mut byte = [0u8; 1];
        match io::stdin().lock().read(&mut byte) {
            Ok(1) => Ok(byte[0]),
            _ => Err(HostError::Failed),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(path = ?self.image_path))]
    fn save_image(&mut self, image: &Image) -> Result<(), HostError> {
        let path = self
            .image_path
            .as_ref()
            .ok_or(HostError::Unsupported(HostOp::SaveImage.id()))?;
        let bytes = image.to_bytes().map_err(|_| HostError::Failed)?;
        fs::write(path, &bytes).map_err(|error| {
            tracing::error!(%error, "failed to write image");
            HostError::Failed
        })?;
        tracing::info!(bytes = bytes.len(), "saved image");
        Ok(())
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(path = %String::from_utf8_lossy(path))
    )]
    fn include(&mut self, path: &[u8]) -> Result<Vec<u8>, HostError> {
        fs::read(path_of(path)?).map_err(|error| {
            tracing::warn!(%error, "failed to read source file");
            HostError::Failed
        })
    }

    fn open(&mut self, path: &[u8], flags: OpenFlags) -> Result<i32, HostError> {
        let path = path_of(path)?;
        let file = OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .create(flags.create)
            .truncate(flags.truncate)
            .append(flags.append)
            .open(path)
            .map_err(|error| {
                tracing::debug!(%error, path = %path.display(), "open failed");
                HostError::Failed
            })?;
        let fd = self.next_fd;
        self.next_fd = self.next_fd.checked_add(1).ok_or(HostError::Failed)?;
        self.files.insert(fd, file);
        Ok(fd)
    }

    fn close(&mut self, fd: i32) -> Result<(), HostError> {
        self.files.remove(&fd).map(drop).ok_or(HostError::Failed)
    }

    fn read_byte(&mut self, fd: i32) -> Result<Option<u8>, HostError> {
        let mut byte = [0u8; 1];
        match self.file(fd)?.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(_) => Err(HostError::Failed),
        }
    }

    fn write_byte(&mut self, fd: i32, byte: u8) -> Result<(), HostError> {
        self.file(fd)?
            .write_all(&[byte])
            .map_err(|_| HostError::Failed)
    }

    fn millis(&mut self) -> Result<u32, HostError> {
        Ok(self.started.elapsed().as_millis() as u32)
    }

    fn secs(&mut self) -> Result<u32, HostError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .map_err(|_| HostError::Failed)
    }

    fn delay_ms(&mut self, ms: u32) -> Result<(), HostError> {
        let _ = self.out.flush();
        thread::sleep(Duration::from_millis(u64::from(ms)));
        Ok(())
    }

    // nothing to feed on a desktop
    fn watchdog_feed(&mut self) -> Result<(), HostError> {
        Ok(())
    }
}
