//! Well-known role name constants.

/// The superuser role. Permission checks short-circuit to "allowed" for it.
pub const ROLE_ADMIN: &str = "admin";
