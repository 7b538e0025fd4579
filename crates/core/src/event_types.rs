//! Well-known event type name constants.
//!
//! Publishers and the cache invalidation binders must agree on these names;
//! a typo on either side silently disables invalidation for that dataset.

/// Fired when dictionary rows change. Payload is an invalidation event whose
/// keys are dictionary codes.
pub const DICTIONARY_INVALIDATED: &str = "dictionary.invalidated";

/// Fired when role/permission assignments change. Payload is an invalidation
/// event whose keys are role names.
pub const PERMISSIONS_INVALIDATED: &str = "rbac.permissions.invalidated";
