//! Capability checks supplied by the host's identity/session context.
//!
//! The crate never caches a decision; every field consults the check again.

use std::collections::HashSet;

/// Answers whether the current user holds a capability.
pub trait Capabilities {
    fn can(&self, capability: &str) -> bool;
}

impl<F> Capabilities for F
where
    F: Fn(&str) -> bool,
{
    fn can(&self, capability: &str) -> bool {
        self(capability)
    }
}

/// Grants everything. For trusted contexts such as imports and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Capabilities for AllowAll {
    fn can(&self, _capability: &str) -> bool {
        true
    }
}

/// A fixed set of granted capabilities.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    granted: HashSet<String>,
}

impl CapabilitySet {
    pub fn new<I, S>(granted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granted: granted.into_iter().map(Into::into).collect(),
        }
    }
}

impl Capabilities for CapabilitySet {
    fn can(&self, capability: &str) -> bool {
        self.granted.contains(capability)
    }
}
