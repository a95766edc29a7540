//! Identifier definitions.

use crate::define_id;

// =============================================================================
// Resource IDs
// =============================================================================

define_id!(
    /// A provisioned stack of machine instances.
    StackId,
    "stk"
);
define_id!(
    /// The container-orchestrated management cluster running on a stack.
    ClusterId,
    "cls"
);
define_id!(
    /// One execution of a flow (provision, start, scale, ...).
    FlowId,
    "flow"
);
define_id!(
    /// Correlates an asynchronous cloud request with its result.
    RequestId,
    "req"
);

// =============================================================================
// Instance template identity
// =============================================================================

/// Numeric identity of a requested instance template.
///
/// Assigned when the instance request is recorded and echoed back by the
/// cloud layer in every per-instance result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PrivateId(u64);

impl PrivateId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for PrivateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PrivateId {
    type Err = crate::IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| crate::IdError::InvalidPrivateId(s.to_string()))
    }
}

impl From<u64> for PrivateId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<PrivateId> for u64 {
    fn from(id: PrivateId) -> Self {
        id.0
    }
}

impl TryFrom<i64> for PrivateId {
    type Error = crate::IdError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        u64::try_from(id)
            .map(Self)
            .map_err(|_| crate::IdError::InvalidPrivateId(id.to_string()))
    }
}

impl serde::Serialize for PrivateId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PrivateId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_stack_id_roundtrip() {
        let id = StackId::new();
        let parsed: StackId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("stk_"));
    }

    #[test]
    fn test_stack_id_rejects_cluster_prefix() {
        let cluster = ClusterId::new().to_string();
        let result: Result<StackId, _> = cluster.parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { expected: "stk", .. }
        ));
    }

    #[test]
    fn test_missing_separator_and_empty() {
        assert_eq!(
            "stk01HV4Z2WQXKJNM8GPQY6VBKC3D".parse::<StackId>().unwrap_err(),
            crate::IdError::MissingSeparator
        );
        assert_eq!("".parse::<StackId>().unwrap_err(), crate::IdError::Empty);
        assert!(matches!(
            "stk_invalid".parse::<StackId>().unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_flow_id_json_roundtrip() {
        let id = FlowId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: FlowId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_private_id_parsing() {
        assert_eq!("42".parse::<PrivateId>().unwrap(), PrivateId::new(42));
        assert!("-1".parse::<PrivateId>().is_err());
        assert!(PrivateId::try_from(-3_i64).is_err());
        assert_eq!(PrivateId::new(7).next(), PrivateId::new(8));
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            StackId::PREFIX,
            ClusterId::PREFIX,
            FlowId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn prop_private_id_display_parses_back(raw in any::<u64>()) {
            let id = PrivateId::new(raw);
            prop_assert_eq!(id.to_string().parse::<PrivateId>().unwrap(), id);
        }
    }
}
