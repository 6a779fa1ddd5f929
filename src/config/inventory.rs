//! Target inventory loading
//!
//! `.yaml`, `.yml` and `.json` files hold a list of entries, either bare or
//! under a `targets` key. Any other file is read as one `[user@]host[:port]`
//! per line, with `#` starting a comment.

use crate::error::{Error, Result};
use crate::target::{AuthContext, Escalation, Target};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InventoryEntry {
    name: String,
    address: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
    #[serde(default)]
    r#become: bool,
    become_user: Option<String>,
    #[serde(default)]
    vars: BTreeMap<String, Value>,
}

impl From<InventoryEntry> for Target {
    fn from(entry: InventoryEntry) -> Self {
        let escalation = Escalation {
            enabled: entry.r#become || entry.become_user.is_some(),
            user: entry
                .become_user
                .unwrap_or_else(|| Escalation::default().user),
        };

        Target {
            address: entry.address.unwrap_or_else(|| entry.name.clone()),
            name: entry.name,
            auth: AuthContext {
                user: entry.user,
                port: entry.port,
                identity_file: entry.identity_file,
            },
            escalation,
            vars: entry.vars,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InventoryDocument {
    List(Vec<InventoryEntry>),
    Wrapped { targets: Vec<InventoryEntry> },
}

impl InventoryDocument {
    fn into_entries(self) -> Vec<InventoryEntry> {
        match self {
            InventoryDocument::List(entries) | InventoryDocument::Wrapped { targets: entries } => {
                entries
            }
        }
    }
}

/// Load and validate the target list
///
/// An empty inventory and duplicate target names are both configuration
/// errors.
pub fn load_targets(path: &Path) -> Result<Vec<Target>> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let targets = match extension.as_deref() {
        Some("yaml") | Some("yml") => {
            let document: InventoryDocument =
                serde_yaml::from_str(&content).map_err(|source| Error::Inventory {
                    path: path.to_path_buf(),
                    source,
                })?;
            targets_from(document)?
        }
        Some("json") => {
            let document: InventoryDocument =
                serde_json::from_str(&content).map_err(|source| Error::InventoryJson {
                    path: path.to_path_buf(),
                    source,
                })?;
            targets_from(document)?
        }
        _ => parse_host_lines(&content)?,
    };

    if targets.is_empty() {
        return Err(Error::config(format!(
            "inventory {} lists no targets",
            path.display()
        )));
    }
    check_unique(&targets)?;

    tracing::debug!("Loaded {} targets from {}", targets.len(), path.display());
    Ok(targets)
}

fn targets_from(document: InventoryDocument) -> Result<Vec<Target>> {
    document
        .into_entries()
        .into_iter()
        .map(|entry| {
            check_not_option("name", &entry.name)?;
            if let Some(address) = &entry.address {
                check_not_option("address", address)?;
            }
            if let Some(user) = &entry.user {
                check_not_option("user", user)?;
            }
            Ok(Target::from(entry))
        })
        .collect()
}

/// Values that end up on the `ssh` command line must not look like options
fn check_not_option(field: &str, value: &str) -> Result<()> {
    if value.starts_with('-') {
        return Err(Error::config(format!(
            "{field} '{value}' must not start with '-'"
        )));
    }
    Ok(())
}

/// Parse a plain host list
pub fn parse_host_lines(content: &str) -> Result<Vec<Target>> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.split('#').next().unwrap_or_default().trim();
            (!line.is_empty()).then_some((index + 1, line))
        })
        .map(|(lineno, line)| {
            parse_host(line).map_err(|msg| Error::config(format!("line {lineno}: {msg}")))
        })
        .collect()
}

fn parse_host(raw: &str) -> std::result::Result<Target, String> {
    let (user, rest) = match raw.rsplit_once('@') {
        Some((user, _)) if user.is_empty() => return Err(format!("empty user in '{raw}'")),
        Some((user, rest)) => (Some(user), rest),
        None => (None, raw),
    };

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        // [2001:db8::1]:2222
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| format!("unterminated '[' in '{raw}'"))?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(format!("unexpected '{tail}' after address in '{raw}'")),
            },
        }
    } else {
        match rest.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (rest, None),
        }
    };

    if host.is_empty() {
        return Err(format!("missing host in '{raw}'"));
    }
    if host.starts_with('-') || user.is_some_and(|u| u.starts_with('-')) {
        return Err(format!("'{raw}' must not start with '-'"));
    }

    let mut target = Target::new(host);
    if let Some(user) = user {
        target = target.with_user(user);
    }
    if let Some(port) = port {
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid port '{port}' in '{raw}'"))?;
        target = target.with_port(port);
    }
    Ok(target)
}

fn check_unique(targets: &[Target]) -> Result<()> {
    let mut seen = HashSet::new();
    for target in targets {
        if !seen.insert(target.name.as_str()) {
            return Err(Error::config(format!(
                "duplicate target name '{}'",
                target.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_host_lines() {
        let targets = parse_host_lines(
            "# hypervisors\nkvm1\ndeploy@kvm2:2222  # spare\n\n[2001:db8::1]:22\n",
        )
        .unwrap();

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].name, "kvm1");
        assert_eq!(targets[0].auth.user, None);
        assert_eq!(targets[1].name, "kvm2");
        assert_eq!(targets[1].auth.user.as_deref(), Some("deploy"));
        assert_eq!(targets[1].auth.port, Some(2222));
        assert_eq!(targets[2].address, "2001:db8::1");
        assert_eq!(targets[2].auth.port, Some(22));
    }

    #[test]
    fn test_host_line_errors_carry_line_number() {
        let err = parse_host_lines("kvm1\nkvm2:notaport\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse_host_lines("@kvm1").is_err());
        assert!(parse_host_lines("[::1").is_err());
    }

    #[test]
    fn test_option_like_hosts_rejected() {
        let err = parse_host_lines("kvm1\n-oProxyCommand=touch${IFS}/tmp/owned\n").unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("line 2"));
        assert!(parse_host_lines("-p@kvm1").is_err());
    }

    #[test]
    fn test_option_like_yaml_fields_rejected() {
        let dir = TempDir::new().unwrap();
        for body in [
            "- name: -oProxyCommand=id\n",
            "- name: kvm1\n  address: -oProxyCommand=id\n",
            "- name: kvm1\n  user: -lroot\n",
        ] {
            let path = write(&dir, "hosts.yml", body);
            let err = load_targets(&path).unwrap_err();
            assert_eq!(err.exit_code(), 2, "{body}");
            assert!(err.to_string().contains("must not start with '-'"), "{body}");
        }
    }

    #[test]
    fn test_malformed_json_keeps_parser_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "hosts.json", "[{\"name\": \"a\",]");

        let err = load_targets(&path).unwrap_err();
        assert!(matches!(err, Error::InventoryJson { .. }));
        assert_eq!(err.exit_code(), 2);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_yaml_inventory() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "hosts.yaml",
            r#"
targets:
  - name: kvm1
    address: 10.0.0.11
    user: deploy
    become: true
    vars:
      bridge: br0
  - name: kvm2
    become_user: qemu
"#,
        );

        let targets = load_targets(&path).unwrap();
        assert_eq!(targets.len(), 2);

        let kvm1 = &targets[0];
        assert_eq!(kvm1.destination(), "deploy@10.0.0.11");
        assert!(kvm1.escalation.enabled);
        assert_eq!(kvm1.escalation.user, "root");
        assert_eq!(kvm1.vars["bridge"], "br0");

        let kvm2 = &targets[1];
        assert_eq!(kvm2.address, "kvm2");
        assert_eq!(kvm2.escalation, Escalation::to("qemu"));
    }

    #[test]
    fn test_json_list_inventory() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "hosts.json", r#"[{"name": "a"}, {"name": "b", "port": 2200}]"#);

        let targets = load_targets(&path).unwrap();
        assert_eq!(targets[1].auth.port, Some(2200));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "hosts", "kvm1\nroot@kvm1\n");

        let err = load_targets(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("duplicate target name 'kvm1'"));
    }

    #[test]
    fn test_empty_inventory_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "hosts", "# nothing here\n");
        assert!(load_targets(&path).is_err());
    }

    #[test]
    fn test_unknown_yaml_field_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "hosts.yml", "- name: a\n  adress: 10.0.0.1\n");
        assert!(load_targets(&path).is_err());
    }
}
