//! Hardware drivers for KAOS kernel

pub mod ata;
pub mod keyboard;
pub mod screen;
pub mod serial;
