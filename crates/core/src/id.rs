//! Unique identifiers for Strata entities.
//!
//! Each identifier is a [`domain-key`](https://crates.io/crates/domain-key)
//! `Uuid<D>` wrapper parameterized by its own domain marker, so a [`NodeId`]
//! can never be passed where a [`RunId`] is expected.
//!
//! All ID types are `Copy` and support `v4()`, `nil()`, `parse(&str)`, serde
//! (as a UUID string), `Display`, `FromStr`, `Eq`, `Ord` and `Hash`.

use domain_key::define_uuid;

pub use domain_key::UuidParseError;

define_uuid!(pub WorkflowIdDomain => WorkflowId);
define_uuid!(pub NodeIdDomain => NodeId);
define_uuid!(pub RunIdDomain => RunId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_creates_non_nil_ids() {
        assert!(!WorkflowId::v4().is_nil());
        assert!(!NodeId::v4().is_nil());
        assert!(!RunId::v4().is_nil());
    }

    #[test]
    fn nil_is_zero_valued() {
        let id = RunId::nil();
        assert!(id.is_nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn parse_valid_uuid_string() {
        let id = NodeId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn parse_invalid_string_fails() {
        assert!(NodeId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn serde_uses_plain_uuid_string() {
        let id = NodeId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"550e8400-e29b-41d4-a716-446655440000\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ordering_is_consistent() {
        let a = NodeId::nil();
        let b = NodeId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert!(a < b);
    }

    #[test]
    fn domain_names_the_type() {
        assert_eq!(RunId::nil().domain(), "RunId");
    }
}
