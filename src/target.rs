//! Remote host identities
//!
//! A [`Target`] is fixed once a dispatch begins; every component receives it
//! by reference and never mutates it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Credentials and endpoint details used to reach a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Login user; `None` defers to the transport's default
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
}

/// Privilege escalation settings for remote commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub enabled: bool,
    pub user: String,
}

impl Default for Escalation {
    fn default() -> Self {
        Self {
            enabled: false,
            user: "root".to_string(),
        }
    }
}

impl Escalation {
    pub fn to(user: impl Into<String>) -> Self {
        Self {
            enabled: true,
            user: user.into(),
        }
    }
}

/// One remote host plus the auth and privilege context to reach it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Unique name; keys the dispatch report
    pub name: String,
    /// Hostname or IP the transport connects to
    pub address: String,
    #[serde(default)]
    pub auth: AuthContext,
    #[serde(default)]
    pub escalation: Escalation,
    /// Per-target template variables, overlaid on the global bag
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            address: name.clone(),
            name,
            auth: AuthContext::default(),
            escalation: Escalation::default(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.auth.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.auth.port = Some(port);
        self
    }

    pub fn with_escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// `user@address` when a login user is known, else the bare address
    pub fn destination(&self) -> String {
        match &self.auth.user {
            Some(user) => format!("{user}@{}", self.address),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_defaults_to_name() {
        let target = Target::new("db1.example.com");
        assert_eq!(target.address, "db1.example.com");
        assert_eq!(target.destination(), "db1.example.com");
    }

    #[test]
    fn test_destination_includes_user() {
        let target = Target::new("web").with_address("10.0.0.4").with_user("deploy");
        assert_eq!(target.destination(), "deploy@10.0.0.4");
    }

    #[test]
    fn test_escalation_disabled_by_default() {
        let target = Target::new("web");
        assert!(!target.escalation.enabled);
        assert_eq!(target.escalation.user, "root");
    }
}
