//! Shared process/exec contracts for ELF32 user-mode program loading.

use core::fmt;

use crate::memory::vmm;

/// Single page reserved for the initial user stack, directly below the
/// kernel's direct-map window.
pub const USER_STACK_PAGES: u32 = 1;

/// One-past-the-top address of the initial user stack; `esp` starts here,
/// matching `Pcb::stack_top`'s "address one past the mapped region"
/// convention. The stack itself occupies the page(s) immediately below.
pub const USER_STACK_TOP: u32 = vmm::DIRECT_MAP_BASE;

/// Lowest virtual address the user stack's mapped pages start at.
pub const USER_STACK_BASE: u32 = USER_STACK_TOP - USER_STACK_PAGES * vmm::PAGE_SIZE;

/// Maximum total size (sum of `PT_LOAD` segment memory sizes) accepted from
/// an ELF32 image, chosen to comfortably fit below the user stack while
/// leaving room for multiple segments.
pub const USER_PROGRAM_MAX_IMAGE_SIZE: usize = 16 * 1024 * 1024;

/// Error space for process exec/load operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Program name is invalid or not representable for the selected loader path.
    InvalidName,

    /// Program was not found in backing storage.
    NotFound,

    /// Entry exists but is a directory rather than a regular executable file.
    IsDirectory,

    /// Program image is empty and therefore has no executable payload.
    EmptyImage,

    /// Program image does not fit inside the user executable window.
    FileTooLarge,

    /// Image is not a valid little-endian ELF32 executable this loader
    /// understands (bad magic, wrong class/endianness/type/machine).
    NotAnElfExecutable,

    /// A `PT_LOAD` segment's virtual address range falls inside kernel
    /// space, overlaps another segment, or would overlap the user stack.
    SegmentOutOfBounds,

    /// Physical-frame allocation failed while preparing code/stack pages.
    OutOfMemory,

    /// Mapping code/stack pages into user space failed.
    MappingFailed,

    /// Spawning the scheduler task for the process failed.
    SpawnFailed,

    /// Generic storage or transport I/O failure.
    Io,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => {
                f.write_str("invalid file name (expected FAT12 8.3 format)")
            }
            Self::NotFound => f.write_str("file not found"),
            Self::IsDirectory => {
                f.write_str("path points to a directory, not a program file")
            }
            Self::EmptyImage => f.write_str("program image is empty"),
            Self::FileTooLarge => {
                f.write_str("program image exceeds user code size limit")
            }
            Self::NotAnElfExecutable => {
                f.write_str("file is not a recognized 32-bit little-endian ELF executable")
            }
            Self::SegmentOutOfBounds => {
                f.write_str("program segment falls outside the valid user address range")
            }
            Self::OutOfMemory => {
                f.write_str("out of memory while allocating program pages")
            }
            Self::MappingFailed => {
                f.write_str("failed to map program into user address space")
            }
            Self::SpawnFailed => f.write_str("failed to start user task"),
            Self::Io => f.write_str("I/O error while loading program"),
        }
    }
}

/// Shared result alias for process exec/load operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Outcome of successfully loading an ELF32 image into a page directory:
/// everything `lifecycle::exec` needs to set up the target task's initial
/// register state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedProgram {
    /// Entry point from the ELF header, validated to lie in user space.
    pub entry_point: u32,

    /// Initial ring-3 stack pointer (top of the mapped user stack).
    pub user_esp: u32,
}
