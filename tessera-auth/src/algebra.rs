// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-key permission algebra.
//!
//! Merging and subtracting are applied atomically to a single entry of the permission store. Both
//! are commutative and associative for the same key, concurrent writers converge to the same
//! entry independent of the order in which their changes were applied.
use tessera_core::{AceValue, NEVER_EXPIRES, Permissions, SecurableObjectType, Timestamp};

/// Unites the given permissions with the current ones, the later expiration wins.
///
/// An entry which already expired at `now` holds nothing anymore and is replaced.
pub fn merge(
    current: Option<AceValue>,
    permissions: Permissions,
    object_type: SecurableObjectType,
    expiration: Timestamp,
    now: Timestamp,
) -> AceValue {
    match current {
        Some(mut value) if !value.is_expired(now) => {
            value.permissions |= permissions;
            value.expiration = value.expiration.max(expiration.min(NEVER_EXPIRES));
            value.object_type = object_type;
            value
        }
        _ => AceValue::new(permissions, object_type).with_expiration(expiration),
    }
}

/// Removes the given permissions from the current ones.
///
/// Returns `None` if no permission remains, the entry is deleted in that case.
pub fn subtract(current: Option<AceValue>, permissions: Permissions) -> Option<AceValue> {
    let mut value = current?;
    value.permissions.remove(permissions);
    if value.permissions.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Replaces the current permissions.
///
/// Setting an empty permission set deletes the entry.
pub fn overwrite(
    permissions: Permissions,
    object_type: SecurableObjectType,
    expiration: Timestamp,
) -> Option<AceValue> {
    if permissions.is_empty() {
        None
    } else {
        Some(AceValue::new(permissions, object_type).with_expiration(expiration))
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::{NEVER_EXPIRES, Permissions, SecurableObjectType};

    use super::{merge, overwrite, subtract};

    const ENTITY_SET: SecurableObjectType = SecurableObjectType::EntitySet;

    #[test]
    fn merge_is_commutative() {
        let a = Permissions::READ | Permissions::DISCOVER;
        let b = Permissions::WRITE | Permissions::READ;

        let ab = merge(
            Some(merge(None, a, ENTITY_SET, 500, 0)),
            b,
            ENTITY_SET,
            NEVER_EXPIRES,
            0,
        );
        let ba = merge(
            Some(merge(None, b, ENTITY_SET, NEVER_EXPIRES, 0)),
            a,
            ENTITY_SET,
            500,
            0,
        );

        assert_eq!(ab, ba);
        assert_eq!(ab.permissions, a | b);
        assert_eq!(ab.expiration, NEVER_EXPIRES);
    }

    #[test]
    fn merge_is_idempotent() {
        let once = merge(None, Permissions::READ, ENTITY_SET, 1_000, 0);
        let twice = merge(Some(once.clone()), Permissions::READ, ENTITY_SET, 1_000, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_replaces_expired_entries() {
        let expired = merge(None, Permissions::OWNER, ENTITY_SET, 100, 0);
        let merged = merge(Some(expired), Permissions::READ, ENTITY_SET, 1_000, 100);
        assert_eq!(merged.permissions, Permissions::READ);
        assert_eq!(merged.expiration, 1_000);
    }

    #[test]
    fn subtract_removes_empty_entries() {
        let value = merge(
            None,
            Permissions::READ | Permissions::WRITE,
            ENTITY_SET,
            NEVER_EXPIRES,
            0,
        );

        let value = subtract(Some(value), Permissions::WRITE | Permissions::OWNER);
        assert_eq!(value.as_ref().map(|value| value.permissions), Some(Permissions::READ));

        assert_eq!(subtract(value, Permissions::READ), None);
        assert_eq!(subtract(None, Permissions::READ), None);
    }

    #[test]
    fn overwrite_with_nothing_deletes() {
        assert_eq!(overwrite(Permissions::empty(), ENTITY_SET, NEVER_EXPIRES), None);
        assert_eq!(
            overwrite(Permissions::OWNER, ENTITY_SET, NEVER_EXPIRES).map(|value| value.permissions),
            Some(Permissions::OWNER)
        );
    }
}
