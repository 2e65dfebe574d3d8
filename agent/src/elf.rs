//! Degenerate ELF verification.
//!
//! Library opens go through the dynamic linker; the only parsing done here is
//! checking the ident on files we can actually read: magic plus the 32/64
//! class byte. Symbol lookups never touch the on-disk tables.

use std::io::Read;

use crate::error::EngineError;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const EI_CLASS: usize = 4;
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const EI_NIDENT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    Elf32,
    Elf64,
}

fn bad(path: &str, reason: &str) -> EngineError {
    EngineError::BadElf {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Verify the ELF ident of the file at `path` and report its class.
pub fn verify(path: &str) -> Result<ElfClass, EngineError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| bad(path, &format!("cannot open: {e}")))?;

    let mut ident = [0u8; EI_NIDENT];
    file.read_exact(&mut ident)
        .map_err(|_| bad(path, "shorter than the ELF ident"))?;

    if ident[..4] != ELF_MAGIC {
        return Err(bad(path, "bad magic"));
    }

    match ident[EI_CLASS] {
        ELFCLASS32 => Ok(ElfClass::Elf32),
        ELFCLASS64 => Ok(ElfClass::Elf64),
        other => Err(bad(path, &format!("unknown ELF class {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_binary_verifies_with_matching_class() {
        let exe = std::fs::read_link("/proc/self/exe").expect("read exe link");
        let class = verify(exe.to_str().unwrap()).expect("verify test binary");
        #[cfg(target_pointer_width = "64")]
        assert_eq!(class, ElfClass::Elf64);
        #[cfg(target_pointer_width = "32")]
        assert_eq!(class, ElfClass::Elf32);
    }

    #[test]
    fn non_elf_file_is_rejected() {
        assert!(verify("/etc/hostname").is_err() || verify("/etc/hosts").is_err());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let path = "/tmp/vspace_elf_truncated_test";
        std::fs::write(path, b"\x7fELF").expect("write temp file");
        let err = verify(path).expect_err("4 bytes is not an ident");
        std::fs::remove_file(path).ok();
        assert!(matches!(err, EngineError::BadElf { .. }));
    }

    #[test]
    fn missing_file_is_rejected() {
        assert!(verify("/tmp/vspace_no_such_file_xyz").is_err());
    }
}
