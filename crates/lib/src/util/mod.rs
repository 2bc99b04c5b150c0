pub mod fs;
pub mod hash;
pub mod process;
