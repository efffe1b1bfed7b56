//! Mach-O universal ("fat") binary fuser.
//!
//! Fuses single-architecture Mach-O executables into one fat binary, used
//! for the pseudo-architecture `universal` (darwin arm64 + amd64). Self
//! contained: the fat header is written by hand, big-endian regardless of
//! the endianness of the contained slices.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::BuildError;

/// Pseudo arch id meaning "darwin arm64 + amd64 fused into one binary".
pub const UNIVERSAL_ARCH: &str = "universal";

const MAGIC_FAT: u32 = 0xcafe_babe;
const MAGIC_MACHO_32: u32 = 0xfeed_face;
const MAGIC_MACHO_64: u32 = 0xfeed_facf;

// amd64 needs 12 bits of alignment, arm64 needs 14; use the max.
const ALIGN_BITS: u32 = 14;
const ALIGN: u64 = 1 << ALIGN_BITS;

struct Slice {
    data: Vec<u8>,
    cpu: u32,
    subcpu: u32,
    offset: u64,
}

/// Fuse the given Mach-O files into a fat binary at `out_filename`.
pub fn create_universal_binary(
    out_filename: &Path,
    input_filenames: &[PathBuf],
) -> Result<(), BuildError> {
    if input_filenames.is_empty() {
        return Err(BuildError::Universal("no input files".to_string()));
    }

    let mut slices = Vec::with_capacity(input_filenames.len());
    let mut offset = ALIGN;
    for input in input_filenames {
        let data = std::fs::read(input)?;
        if data.len() < 12 {
            return Err(BuildError::Universal(format!(
                "{}: too small",
                input.display()
            )));
        }
        // All supported darwin architectures are little endian.
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if magic != MAGIC_MACHO_32 && magic != MAGIC_MACHO_64 {
            return Err(BuildError::Universal(format!(
                "{}: not a mach-o file, magic={magic:#x}",
                input.display()
            )));
        }
        let cpu = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let subcpu = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let len = data.len() as u64;
        slices.push(Slice {
            data,
            cpu,
            subcpu,
            offset,
        });
        offset = (offset + len + ALIGN - 1) / ALIGN * ALIGN;
    }

    // fat64 binaries do not load; refuse rather than emit a broken file.
    if let Some(last) = slices.last() {
        if last.offset >= 1 << 32 || last.data.len() as u64 >= 1 << 32 {
            return Err(BuildError::Universal(
                "files too large to fit into a fat binary".to_string(),
            ));
        }
    }

    let mut header: Vec<u32> = Vec::with_capacity(2 + slices.len() * 5);
    header.push(MAGIC_FAT);
    header.push(slices.len() as u32);
    for slice in &slices {
        header.push(slice.cpu);
        header.push(slice.subcpu);
        header.push(slice.offset as u32);
        header.push(slice.data.len() as u32);
        header.push(ALIGN_BITS);
    }

    let mut out = File::create(out_filename)?;
    // The fat header is big-endian regardless of the slices.
    for word in &header {
        out.write_all(&word.to_be_bytes())?;
    }

    let mut written = (4 * header.len()) as u64;
    for slice in &slices {
        if written < slice.offset {
            out.write_all(&vec![0u8; (slice.offset - written) as usize])?;
            written = slice.offset;
        }
        out.write_all(&slice.data)?;
        written += slice.data.len() as u64;
    }
    out.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(out_filename, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(())
}
