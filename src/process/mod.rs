//! Process loading/execution contracts.
//!
//! `pcb` owns the process table and context-switchable task state;
//! `loader` turns a FAT12 file into a mapped ELF32 address space;
//! `lifecycle` implements the process operations (`fork`, `clone`, `exec`,
//! `exit`, `wait`) syscall dispatch calls into.

pub mod lifecycle;
mod loader;
pub mod pcb;
mod types;

pub use loader::{load_elf_into, load_program_image};
#[allow(unused_imports)]
pub use types::{
    ExecError, ExecResult, LoadedProgram, USER_PROGRAM_MAX_IMAGE_SIZE, USER_STACK_BASE,
    USER_STACK_PAGES, USER_STACK_TOP,
};
