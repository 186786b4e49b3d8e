//! Physical/virtual memory management and boot-time memory map parsing.

pub mod bios;
pub mod heap;
pub mod pmm;
pub mod vmm;
