//! Identity assignment for index records.
//!
//! A caller-supplied id is used verbatim so that re-runs land on the same
//! record directory. Otherwise a random v4 UUID is rendered as 32 hex
//! characters without hyphens.

use uuid::Uuid;

/// Return `custom` verbatim when present, otherwise a fresh random id.
pub fn resolve(custom: Option<&str>) -> String {
    match custom {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => new_id(),
    }
}

/// A fresh 128-bit random identifier as lower-case hex.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Sub-record identity for the `sequence`-th accepted candidate of a work.
pub fn compose(work_id: &str, sequence: usize) -> String {
    format!("{}_{}", work_id, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_custom_id_verbatim() {
        assert_eq!(resolve(Some("abc_0")), "abc_0");
    }

    #[test]
    fn test_generated_id_shape() {
        let id = resolve(None);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!id.contains('-'));
    }

    #[test]
    fn test_empty_custom_id_generates() {
        assert_eq!(resolve(Some("")).len(), 32);
    }

    #[test]
    fn test_generated_ids_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_compose() {
        assert_eq!(compose("63e7f0", 2), "63e7f0_2");
    }
}
