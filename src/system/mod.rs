pub mod collector;
pub mod cpu;
pub mod decode;
pub mod history;
pub mod memory;
pub mod platform;
pub mod process;
pub mod snapshot;
pub mod source;
pub mod subtree;
