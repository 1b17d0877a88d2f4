//! Filesystem side of a session: input discovery, path validation and
//! temporary resource bookkeeping.

pub mod discovery;
pub mod registry;
pub mod validation;

pub use discovery::{Entry, list_entries, total_size};
pub use registry::TempRegistry;
pub use validation::{archive_name, validate_decryption, validate_encryption, validate_password};
