use serde::{
    Deserialize,
    Serialize,
};

/// A group or shard identifier made safe for use as a view-element key.
///
/// Host identifiers carry `.` and group identifiers carry `:`; both are
/// replaced with `-`. The mapping is deterministic and idempotent but not
/// injective, so the registry refuses to install two distinct raw
/// identifiers that collide on the same token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(derive_more::Display, derive_more::Deref)]
pub struct ViewToken(String);

/// Map a raw identifier to its view token.
pub fn normalize(id: &str) -> ViewToken {
    ViewToken(id.replace(['.', ':'], "-"))
}

impl ViewToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
