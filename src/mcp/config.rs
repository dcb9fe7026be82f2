use anyhow::{Context, bail};
use serde::{Deserialize, Deserializer, Serialize, de};
use std::{collections::HashMap, fmt, fs, path::Path};

/// Tool-server configuration (`mcp-config.json`).
///
/// Servers keep the order in which they appear in the document. That order is
/// the discovery order used for capability designation and conflict
/// resolution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", deserialize_with = "ordered_servers")]
    pub mcp_servers: Vec<(String, McpServerConfig)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Capability tags such as `filesystem`, `search`, or `booking`.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// What a transport needs to launch one tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl McpServerConfig {
    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
        }
    }
}

impl McpConfig {
    /// Read, expand, and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path)
            .with_context(|| format!("config file not found at: {}", path.display()))?;
        Self::from_json(&txt).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse, expand, and validate a configuration document.
    pub fn from_json(txt: &str) -> anyhow::Result<Self> {
        let mut cfg: Self = serde_json::from_str(txt).context("invalid JSON in config")?;
        for (server_id, server) in &mut cfg.mcp_servers {
            server.command = expand_env_placeholders(&server.command);
            server.args = server
                .args
                .iter()
                .map(|a| expand_env_placeholders(a))
                .collect();
            server.env = expand_env_map(&server.env);

            if server.command.trim().is_empty() {
                bail!("invalid server configuration for \"{server_id}\": missing command");
            }
            tracing::debug!(
                server_id = %server_id,
                command = %server.command,
                args = ?server.args,
                capabilities = ?server.capabilities,
                "Processed tool server configuration"
            );
        }
        Ok(cfg)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mcp_servers.is_empty()
    }
}

fn ordered_servers<'de, D>(deserializer: D) -> Result<Vec<(String, McpServerConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ServersVisitor;

    impl<'de> de::Visitor<'de> for ServersVisitor {
        type Value = Vec<(String, McpServerConfig)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object mapping server ids to server configurations")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: de::MapAccess<'de>,
        {
            let mut out: Vec<(String, McpServerConfig)> = Vec::new();
            while let Some((id, server)) = map.next_entry::<String, McpServerConfig>()? {
                if out.iter().any(|(existing, _)| *existing == id) {
                    return Err(de::Error::custom(format!("duplicate server id '{id}'")));
                }
                out.push((id, server));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(ServersVisitor)
}

/// Expand `${NAME}` placeholders from the process environment.
///
/// Unknown variables leave the placeholder unchanged.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        match std::env::var(name) {
            Ok(value) if valid => out.push_str(&value),
            _ => {
                if valid {
                    tracing::warn!(variable = %name, "Environment variable not found");
                }
                out.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}
