pub mod builder;
pub mod reader;

pub use builder::BlockBuilder;
pub use reader::{Block, BlockEntry, BlockIterator};

/// Per-entry header: key_len(4B) + val_len(4B) + sequence(8B) + type(1B).
pub(crate) const ENTRY_HEADER_SIZE: usize = 4 + 4 + 8 + 1;

/// Width of one slot in the offset array and of the trailing entry count.
pub(crate) const OFFSET_SIZE: usize = 4;
