pub mod memory;
pub mod midir;

pub use self::memory::MemoryTransport;
pub use self::midir::MidirTransport;
