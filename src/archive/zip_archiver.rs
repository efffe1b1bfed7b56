//! zip encoder.

use std::fs::File;
use std::io;

use zip::write::FileOptions;
use zip::ZipWriter;

use super::{ArchiveError, Archiver};

pub struct ZipArchiver {
    writer: Option<ZipWriter<File>>,
}

impl ZipArchiver {
    pub fn new(out: File) -> ZipArchiver {
        ZipArchiver {
            writer: Some(ZipWriter::new(out)),
        }
    }
}

impl Archiver for ZipArchiver {
    fn add_and_close(
        &mut self,
        target_path: &str,
        mut file: File,
        mode: u32,
    ) -> Result<(), ArchiveError> {
        let writer = self.writer.as_mut().ok_or(ArchiveError::AlreadyFinalized)?;
        let options = FileOptions::default().unix_permissions(mode);
        writer.start_file(target_path, options)?;
        io::copy(&mut file, writer)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ArchiveError> {
        let mut writer = self.writer.take().ok_or(ArchiveError::AlreadyFinalized)?;
        let mut out = writer.finish()?;
        io::Write::flush(&mut out)?;
        Ok(())
    }
}
