//! Cached reference data kept fresh by bus invalidation events.
//!
//! - [`permissions`]: role name to permission set.
//! - [`dictionary`]: dictionary code to value/label entries.

pub mod dictionary;
pub mod permissions;

pub use dictionary::{Dictionary, DictionaryEntry, DictionarySource, DictionaryTranslator};
pub use permissions::{PermissionCatalog, PermissionSet, PermissionSource};
