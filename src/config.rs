use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::VmctlError;

#[derive(Debug, Clone, Facet)]
#[facet(deny_unknown_fields)]
pub struct Config {
    pub defaults: DefaultsConfig,
    pub nodes: BTreeMap<String, NodeConfig>,
}

#[derive(Debug, Clone, Facet)]
#[facet(deny_unknown_fields)]
pub struct DefaultsConfig {
    #[facet(default = 22)]
    pub port: u16,
    /// Upper bound for one SSH invocation, connection included.
    #[facet(default = 30)]
    pub timeout_s: u64,
    #[facet(default)]
    pub ssh_options: Vec<String>,
    pub user: UserConfig,
}

#[derive(Debug, Clone, Facet)]
#[facet(deny_unknown_fields)]
pub struct UserConfig {
    pub name: String,
    pub identity_file: String,
    #[facet(default)]
    pub identities_only: bool,
}

/// One hypervisor node. Every SSH setting left out falls back to `defaults`.
#[derive(Debug, Clone, Facet)]
#[facet(deny_unknown_fields)]
pub struct NodeConfig {
    pub host: String,
    #[facet(default)]
    pub port: Option<u16>,
    #[facet(default)]
    pub user: Option<UserConfig>,
    #[facet(default)]
    pub ssh_options: Option<Vec<String>>,
    #[facet(default)]
    pub vms: BTreeMap<String, u32>,
    #[facet(default)]
    pub lxcs: BTreeMap<String, u32>,
}

impl Config {
    pub fn port_for(&self, node: &NodeConfig) -> u16 {
        node.port.unwrap_or(self.defaults.port)
    }

    pub fn user_for<'a>(&'a self, node: &'a NodeConfig) -> &'a UserConfig {
        node.user.as_ref().unwrap_or(&self.defaults.user)
    }

    pub fn ssh_options_for<'a>(&'a self, node: &'a NodeConfig) -> &'a [String] {
        node.ssh_options
            .as_deref()
            .unwrap_or(&self.defaults.ssh_options)
    }
}

// ── validation ────────────────────────────────────────────

/// SSH key settings that used to sit directly on `defaults` and on each
/// node before they moved under `user`. Read leniently, before the strict
/// parse, so old configs get a migration hint instead of a field error.
#[derive(Debug, Default, Facet)]
struct LegacyKeys {
    #[facet(default)]
    defaults: LegacyBlock,
    #[facet(default)]
    nodes: BTreeMap<String, LegacyBlock>,
}

#[derive(Debug, Default, Facet)]
struct LegacyBlock {
    #[facet(default)]
    identity_file: Option<String>,
    #[facet(default)]
    identities_only: Option<bool>,
}

impl LegacyBlock {
    fn is_present(&self) -> bool {
        self.identity_file.is_some() || self.identities_only.is_some()
    }
}

fn reject_legacy_keys(contents: &str) -> Result<(), VmctlError> {
    let Ok(legacy) = facet_yaml::from_str::<LegacyKeys>(contents) else {
        return Ok(());
    };
    if legacy.defaults.is_present() {
        return Err(VmctlError::Validation {
            message: "defaults.identity_file and defaults.identities_only are no longer \
                      supported; use defaults.user"
                .into(),
        });
    }
    if let Some((name, _)) = legacy.nodes.iter().find(|(_, block)| block.is_present()) {
        return Err(VmctlError::Validation {
            message: format!(
                "nodes.{name} uses deprecated keys identity_file/identities_only; \
                 use user.name/user.identity_file/user.identities_only"
            ),
        });
    }
    Ok(())
}

fn require_non_empty(value: &str, label: &str) -> Result<(), VmctlError> {
    if value.trim().is_empty() {
        return Err(VmctlError::Validation {
            message: format!("{label} must be a non-empty string"),
        });
    }
    Ok(())
}

fn validate_user(user: &UserConfig, label: &str) -> Result<(), VmctlError> {
    require_non_empty(&user.name, &format!("{label}.name"))?;
    require_non_empty(&user.identity_file, &format!("{label}.identity_file"))
}

fn validate_ssh_options(options: &[String], label: &str) -> Result<(), VmctlError> {
    if options.iter().any(|o| o.trim().is_empty()) {
        return Err(VmctlError::Validation {
            message: format!("{label} entries must be non-empty strings"),
        });
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<(), VmctlError> {
    validate_user(&config.defaults.user, "defaults.user")?;
    validate_ssh_options(&config.defaults.ssh_options, "defaults.ssh_options")?;
    if config.defaults.timeout_s == 0 {
        return Err(VmctlError::Validation {
            message: "defaults.timeout_s must be at least 1".into(),
        });
    }

    if config.nodes.is_empty() {
        return Err(VmctlError::Validation {
            message: "no nodes configured".into(),
        });
    }

    // Guest names are unique across every node and both guest kinds.
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (node_name, node) in &config.nodes {
        require_non_empty(node_name, "node names")?;
        require_non_empty(&node.host, &format!("nodes.{node_name}.host"))?;
        if let Some(user) = &node.user {
            validate_user(user, &format!("nodes.{node_name}.user"))?;
        }
        if let Some(options) = &node.ssh_options {
            validate_ssh_options(options, &format!("nodes.{node_name}.ssh_options"))?;
        }

        for guest_name in node.vms.keys().chain(node.lxcs.keys()) {
            require_non_empty(guest_name, &format!("nodes.{node_name} guest names"))?;
            if let Some(prev) = seen.insert(guest_name.as_str(), node_name.as_str()) {
                return Err(VmctlError::Validation {
                    message: format!(
                        "guest name '{guest_name}' is duplicated in nodes '{prev}' and '{node_name}'"
                    ),
                });
            }
        }
    }

    Ok(())
}

// ── helpers ───────────────────────────────────────────────

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

/// Config locations searched when `--config` is not given, in order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("vmctl.yaml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("vmctl-ng").join("config.yaml"));
    }
    paths
}

// ── public API ────────────────────────────────────────────

pub fn find_config_path(explicit: Option<&Path>) -> Result<PathBuf, VmctlError> {
    if let Some(path) = explicit {
        let path = expand_home(&path.to_string_lossy());
        if !path.is_file() {
            return Err(VmctlError::ConfigNotFound {
                tried: path.display().to_string(),
            });
        }
        return Ok(path);
    }

    let candidates = default_config_paths();
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }
    Err(VmctlError::ConfigNotFound {
        tried: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, VmctlError> {
    if contents.trim().is_empty() {
        return Err(VmctlError::ConfigParse {
            path: path.display().to_string(),
            message: "config is empty".into(),
        });
    }
    reject_legacy_keys(contents)?;
    let config: Config = facet_yaml::from_str(contents).map_err(|e| VmctlError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config, VmctlError> {
    let contents = std::fs::read_to_string(path).map_err(|source| VmctlError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    let config = parse_config(&contents, path)?;
    tracing::debug!(path = %path.display(), nodes = config.nodes.len(), "config loaded");
    Ok(config)
}
