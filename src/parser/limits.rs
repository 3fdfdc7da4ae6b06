//! Implementation limits applied while decoding.
//!
//! Counts in a binary are attacker-controlled; these caps stop a malformed
//! module from claiming an unrealistic number of entries and forcing huge
//! allocations before the bytes run out. Values follow the limits used by
//! mainstream engines.

/// Maximum number of type definitions in a module
pub const MAX_TYPES: u32 = 1_000_000;

/// Maximum number of defined functions in a module
pub const MAX_FUNCTIONS: u32 = 1_000_000;

/// Maximum number of imports in a module
pub const MAX_IMPORTS: u32 = 100_000;

/// Maximum number of exports in a module
pub const MAX_EXPORTS: u32 = 100_000;

/// Maximum number of tables in a module
pub const MAX_TABLES: u32 = 100;

/// Maximum number of memories in a module
pub const MAX_MEMORIES: u32 = 100;

/// Maximum number of globals in a module
pub const MAX_GLOBALS: u32 = 1_000_000;

/// Maximum number of data segments in a module
pub const MAX_DATA_SEGMENTS: u32 = 100_000;

/// Maximum number of element segments in a module
pub const MAX_ELEMENT_SEGMENTS: u32 = 100_000;

/// Maximum number of function parameters or results
pub const MAX_FUNCTION_ARITY: u32 = 1_000;

/// Maximum number of local variables in a function
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;

/// Maximum number of labels in a br_table instruction
pub const MAX_BR_TABLE_LABELS: u32 = 65_536;

/// Maximum table size (number of elements)
pub const MAX_TABLE_SIZE: u32 = 10_000_000;

/// Maximum memory pages for 32-bit addressing (4 GiB)
pub const MAX_MEMORY_PAGES: u32 = 65_536;
