//! tar.gz encoder.

use std::fs::File;
use std::io;

use flate2::write::GzEncoder;
use flate2::Compression;

use super::{ArchiveError, Archiver};

pub struct TarGzArchiver {
    builder: Option<tar::Builder<GzEncoder<File>>>,
}

impl TarGzArchiver {
    pub fn new(out: File) -> TarGzArchiver {
        let encoder = GzEncoder::new(out, Compression::default());
        TarGzArchiver {
            builder: Some(tar::Builder::new(encoder)),
        }
    }
}

impl Archiver for TarGzArchiver {
    fn add_and_close(
        &mut self,
        target_path: &str,
        file: File,
        mode: u32,
    ) -> Result<(), ArchiveError> {
        let builder = self.builder.as_mut().ok_or(ArchiveError::AlreadyFinalized)?;

        let metadata = file.metadata()?;
        let mut header = tar::Header::new_gnu();
        header.set_size(metadata.len());
        header.set_mode(mode);
        header.set_mtime(
            metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0),
        );

        // append_data sets the entry path and checksum, and consumes the
        // reader, closing the file handle.
        builder.append_data(&mut header, target_path, file)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ArchiveError> {
        let builder = self.builder.take().ok_or(ArchiveError::AlreadyFinalized)?;
        let encoder = builder.into_inner()?;
        let mut out = encoder.finish()?;
        io::Write::flush(&mut out)?;
        Ok(())
    }
}
