//! Scopes understood by the gateway's own endpoints.
//!
//! Scopes are plain strings; any value configured for a user is carried through tokens and
//! sessions unchanged. The ones below additionally unlock the administrative routes.

/// Full administrative access
pub const ADM: &str = "adm";
/// Read-only administrative access
pub const ADM_READ: &str = "adm.read";
/// Manage access keys
pub const ADM_ACCESSKEY: &str = "adm.accesskey";
/// List and inspect access keys
pub const ADM_ACCESSKEY_READ: &str = "adm.accesskey.read";

/// Every scope with a meaning to the gateway, in ascending order.
pub const DECLARED_SCOPES: [&str; 4] = [ADM, ADM_ACCESSKEY, ADM_ACCESSKEY_READ, ADM_READ];

/// Scopes allowed to create, renew, restore and remove access keys.
pub const ACCESS_KEY_WRITE_SCOPES: [&str; 2] = [ADM, ADM_ACCESSKEY];
/// Scopes allowed to list, inspect and validate access keys.
pub const ACCESS_KEY_READ_SCOPES: [&str; 4] = [ADM, ADM_READ, ADM_ACCESSKEY, ADM_ACCESSKEY_READ];
/// Scopes allowed to read the login audit log.
pub const AUDIT_READ_SCOPES: [&str; 2] = [ADM, ADM_READ];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_scopes_are_sorted_and_unique() {
        assert!(DECLARED_SCOPES.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
