//! Load balancer upstream pool management
//!
//! This module provides:
//! - A parser and dumper for nginx configuration files
//! - Server add/remove operations on the first upstream group
//! - The reconciler that persists a change and signals the load balancer

pub mod nginx;
mod reconciler;

pub use nginx::{Directive, NginxConfig, Node, ParseError};
pub use reconciler::{default_reload_command, UpstreamReconciler};

use crate::error::ReconcileError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named upstream group with its server addresses in file order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamGroup {
    pub name: String,
    pub servers: Vec<String>,
}

/// Load balancer configuration with upstream editing operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    document: NginxConfig,
}

fn server_address(node: &Node) -> Option<&str> {
    match node {
        Node::Directive(d) if d.name == "server" && d.block.is_none() => {
            d.args.first().map(String::as_str)
        }
        _ => None,
    }
}

impl UpstreamConfig {
    pub fn parse(text: &str) -> Result<Self, ReconcileError> {
        let document =
            NginxConfig::parse(text).map_err(|e| ReconcileError::InvalidConfig(e.to_string()))?;
        Ok(Self { document })
    }

    pub fn document(&self) -> &NginxConfig {
        &self.document
    }

    /// Every upstream group in the file
    pub fn groups(&self) -> Vec<UpstreamGroup> {
        self.document
            .upstreams()
            .into_iter()
            .map(|directive| UpstreamGroup {
                name: directive.args.first().cloned().unwrap_or_default(),
                servers: directive
                    .block
                    .iter()
                    .flatten()
                    .filter_map(server_address)
                    .map(str::to_string)
                    .collect(),
            })
            .collect()
    }

    /// Servers of the first upstream group
    pub fn servers(&self) -> Result<Vec<String>, ReconcileError> {
        self.groups()
            .into_iter()
            .next()
            .map(|group| group.servers)
            .ok_or(ReconcileError::NoUpstreamGroup)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.servers()
            .map(|servers| servers.iter().any(|s| s == address))
            .unwrap_or(false)
    }

    /// Append `server <address>;` to the first upstream group
    pub fn add_server(&mut self, address: &str) -> Result<(), ReconcileError> {
        let group = self
            .document
            .first_upstream_mut()
            .ok_or(ReconcileError::NoUpstreamGroup)?;
        let block = group.block.get_or_insert_with(Vec::new);

        if block.iter().any(|node| server_address(node) == Some(address)) {
            return Err(ReconcileError::DuplicateServer(address.to_string()));
        }

        // New entries go right after the last server so trailing directives
        // such as `keepalive` stay at the end of the block
        let position = block
            .iter()
            .rposition(|node| server_address(node).is_some())
            .map(|i| i + 1)
            .unwrap_or(block.len());

        block.insert(
            position,
            Node::Directive(Directive::simple("server", vec![address.to_string()])),
        );
        Ok(())
    }

    /// Remove `address` from the first upstream group.
    ///
    /// The entry is swapped with the last server entry and the list is
    /// truncated, so the order of the remaining servers may change. On error
    /// the configuration is left untouched.
    pub fn remove_server(&mut self, address: &str) -> Result<(), ReconcileError> {
        let group = self
            .document
            .first_upstream_mut()
            .ok_or(ReconcileError::NoUpstreamGroup)?;
        let block = group.block.get_or_insert_with(Vec::new);

        let positions: Vec<usize> = block
            .iter()
            .enumerate()
            .filter(|(_, node)| server_address(node).is_some())
            .map(|(i, _)| i)
            .collect();

        let target = positions
            .iter()
            .copied()
            .find(|&i| server_address(&block[i]) == Some(address))
            .ok_or_else(|| ReconcileError::ServerNotFound(address.to_string()))?;

        if let Some(&last) = positions.last() {
            block.swap(target, last);
            block.remove(last);
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        self.document.dump()
    }
}

impl fmt::Display for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const CONF: &str = "\
events {
    worker_connections 1024;
}

http {
    upstream load_balancer {
        server web_1:80;
        server web_2:80;
        server web_3:80;
        keepalive 16;
    }

    server {
        listen 80;

        location / {
            proxy_pass http://load_balancer;
        }
    }
}
";

    fn as_set(config: &UpstreamConfig) -> BTreeSet<String> {
        config.servers().unwrap().into_iter().collect()
    }

    #[test]
    fn test_groups_and_servers() {
        let config = UpstreamConfig::parse(CONF).unwrap();
        let groups = config.groups();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "load_balancer");
        assert_eq!(groups[0].servers, vec!["web_1:80", "web_2:80", "web_3:80"]);
        assert!(config.contains("web_2:80"));
        assert!(!config.contains("web_9:80"));
    }

    #[test]
    fn test_add_server_appends_after_servers() {
        let mut config = UpstreamConfig::parse(CONF).unwrap();
        config.add_server("web_4:80").unwrap();

        assert_eq!(
            config.servers().unwrap(),
            vec!["web_1:80", "web_2:80", "web_3:80", "web_4:80"]
        );
        let text = config.to_text();
        assert!(text.contains("        server web_4:80;\n        keepalive 16;\n"));
    }

    #[test]
    fn test_add_duplicate_server() {
        let mut config = UpstreamConfig::parse(CONF).unwrap();
        let before = config.clone();

        let err = config.add_server("web_2:80").unwrap_err();
        assert_eq!(err, ReconcileError::DuplicateServer("web_2:80".into()));
        assert_eq!(config, before);
    }

    #[test]
    fn test_remove_swaps_with_last() {
        let mut config = UpstreamConfig::parse(CONF).unwrap();
        config.remove_server("web_1:80").unwrap();

        assert_eq!(config.servers().unwrap(), vec!["web_3:80", "web_2:80"]);
    }

    #[test]
    fn test_remove_last_entry() {
        let mut config = UpstreamConfig::parse(CONF).unwrap();
        config.remove_server("web_3:80").unwrap();

        assert_eq!(config.servers().unwrap(), vec!["web_1:80", "web_2:80"]);
    }

    #[test]
    fn test_remove_absent_server_leaves_text_unchanged() {
        let mut config = UpstreamConfig::parse(CONF).unwrap();
        let before = config.to_text();

        let err = config.remove_server("web_9:80").unwrap_err();
        assert_eq!(err, ReconcileError::ServerNotFound("web_9:80".into()));
        assert_eq!(config.to_text(), before);
    }

    #[test]
    fn test_add_then_remove_round_trip() {
        let original = UpstreamConfig::parse(CONF).unwrap();
        let mut config = original.clone();

        config.add_server("web_4:80").unwrap();
        let reparsed = UpstreamConfig::parse(&config.to_text()).unwrap();
        let mut config = reparsed;
        config.remove_server("web_4:80").unwrap();

        assert_eq!(as_set(&config), as_set(&original));
    }

    #[test]
    fn test_missing_upstream_group() {
        let mut config = UpstreamConfig::parse("events {}\nhttp { server { listen 80; } }\n").unwrap();

        assert_eq!(config.servers().unwrap_err(), ReconcileError::NoUpstreamGroup);
        assert_eq!(
            config.add_server("web_1:80").unwrap_err(),
            ReconcileError::NoUpstreamGroup
        );
        assert_eq!(
            config.remove_server("web_1:80").unwrap_err(),
            ReconcileError::NoUpstreamGroup
        );
    }

    #[test]
    fn test_empty_upstream_group() {
        let mut config = UpstreamConfig::parse("http { upstream pool { } }").unwrap();
        assert!(config.servers().unwrap().is_empty());

        config.add_server("web_1:80").unwrap();
        assert_eq!(config.servers().unwrap(), vec!["web_1:80"]);
    }

    #[test]
    fn test_invalid_config() {
        let err = UpstreamConfig::parse("http { upstream pool {").unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidConfig(_)));
    }
}
