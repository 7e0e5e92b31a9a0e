//! Request attributes consulted for eligibility checks

use std::fmt::Debug;

/// Capability exposed by the caller's request to the trial.
pub trait RequestContext: Send + Sync + Debug {
    /// Visitor's user agent, if known
    fn user_agent(&self) -> Option<&str> {
        None
    }

    /// Visitor's network address, if known
    fn ip_address(&self) -> Option<&str> {
        None
    }

    /// Caller-defined exclusion predicate
    fn is_excluded(&self) -> bool {
        false
    }
}

/// Plain request attributes
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    user_agent: Option<String>,
    ip_address: Option<String>,
    excluded: bool,
}

impl RequestInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_excluded(mut self, excluded: bool) -> Self {
        self.excluded = excluded;
        self
    }
}

impl RequestContext for RequestInfo {
    fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    fn is_excluded(&self) -> bool {
        self.excluded
    }
}
