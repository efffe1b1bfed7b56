//! Plain "archive": the single input copied verbatim.
//!
//! Used for publishing a raw binary under the archive naming scheme, the
//! way standalone executables are attached to releases.

use std::fs::File;
use std::io;

use super::{ArchiveError, Archiver};

pub struct PlainArchiver {
    out: Option<File>,
    wrote: bool,
}

impl PlainArchiver {
    pub fn new(out: File) -> PlainArchiver {
        PlainArchiver {
            out: Some(out),
            wrote: false,
        }
    }
}

impl Archiver for PlainArchiver {
    fn add_and_close(
        &mut self,
        _target_path: &str,
        mut file: File,
        _mode: u32,
    ) -> Result<(), ArchiveError> {
        let out = self.out.as_mut().ok_or(ArchiveError::AlreadyFinalized)?;
        if self.wrote {
            return Err(ArchiveError::TooManyFiles);
        }
        self.wrote = true;
        io::copy(&mut file, out)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ArchiveError> {
        let mut out = self.out.take().ok_or(ArchiveError::AlreadyFinalized)?;
        io::Write::flush(&mut out)?;
        Ok(())
    }
}
