//! Tool manager: starts adapters, merges their tools into one namespace, and
//! routes results back to the adapter that owns each tool name.
//!
//! # Conflict resolution
//!
//! When several adapters expose the same tool name, the first candidate (in
//! discovery order) whose adapter is the designated server for any entry of
//! [`PRIORITY_CAPABILITIES`] wins. Without a designated candidate the first
//! discovered candidate wins. Every contested name is recorded as a
//! [`ToolConflict`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::ToolManagerError;
use crate::llm::{GenerationResult, ToolInvocationResult};

use super::adapter::ToolAdapter;
use super::definition::{ToolDefinition, ToolNamespace};

/// Capability tags used to break ties, in priority order.
pub const PRIORITY_CAPABILITIES: [&str; 3] = ["filesystem", "search", "booking"];

/// Separator placed between rendered tool results.
pub const RESULT_SEPARATOR: &str = "\n\n";

/// The seam the provider pipeline drives tools through.
#[async_trait]
pub trait ToolLifecycle: Send + Sync {
    /// Start every provider and return the merged namespace.
    async fn setup_tools(&self) -> Result<ToolNamespace, ToolManagerError>;

    /// Stop every provider. Always safe to call.
    async fn cleanup_tools(&self);

    /// Turn a generation result into display text.
    fn parse_tool_results(&self, result: &GenerationResult) -> String;
}

/// Lifecycle of a [`ToolManager`]. `CleanedUp` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    ToolsSetUp,
    CleanedUp,
}

impl ManagerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ToolsSetUp => "tools-set-up",
            Self::CleanedUp => "cleaned-up",
        }
    }
}

/// How a contested tool name was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Exactly one candidate came from a designated server.
    Designated,
    /// Several designated servers offered the name; the first was kept.
    MultipleDesignated,
    /// No candidate was designated; the first discovered was kept.
    FirstDiscovered,
}

/// A tool name exposed by more than one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConflict {
    pub tool_name: String,
    /// Candidate server ids in discovery order.
    pub candidates: Vec<String>,
    pub chosen: String,
    pub resolution: ConflictResolution,
}

#[derive(Default)]
struct Routing {
    namespace: ToolNamespace,
    /// tool name -> index into `adapters`
    owners: HashMap<String, usize>,
    conflicts: Vec<ToolConflict>,
}

/// Owns the adapters of one conversation turn.
pub struct ToolManager {
    adapters: Vec<Arc<dyn ToolAdapter>>,
    /// priority capability -> index of the designated adapter
    designated: RwLock<HashMap<&'static str, usize>>,
    routing: RwLock<Routing>,
    state: RwLock<ManagerState>,
}

impl fmt::Debug for ToolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolManager")
            .field(
                "adapters",
                &self.adapters.iter().map(|a| a.server_id()).collect::<Vec<_>>(),
            )
            .field("state", &self.state())
            .finish()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ToolManager {
    /// Create a manager over `adapters`, whose order is the discovery order.
    #[must_use]
    pub fn new(adapters: Vec<Arc<dyn ToolAdapter>>) -> Self {
        let designated = find_designated_servers(&adapters);
        Self {
            adapters,
            designated: RwLock::new(designated),
            routing: RwLock::new(Routing::default()),
            state: RwLock::new(ManagerState::Idle),
        }
    }

    #[must_use]
    pub fn state(&self) -> ManagerState {
        *read(&self.state)
    }

    #[must_use]
    pub fn adapters(&self) -> &[Arc<dyn ToolAdapter>] {
        &self.adapters
    }

    /// Server designated for a priority capability, if any.
    #[must_use]
    pub fn designated_server(&self, capability: &str) -> Option<String> {
        read(&self.designated)
            .get(capability)
            .map(|&idx| self.adapters[idx].server_id().to_string())
    }

    /// Server that owns `tool_name` in the current namespace.
    #[must_use]
    pub fn routing_owner(&self, tool_name: &str) -> Option<String> {
        read(&self.routing)
            .owners
            .get(tool_name)
            .map(|&idx| self.adapters[idx].server_id().to_string())
    }

    /// Conflicts found by the last `setup_tools` call.
    #[must_use]
    pub fn conflicts(&self) -> Vec<ToolConflict> {
        read(&self.routing).conflicts.clone()
    }

    /// The merged namespace; empty before setup and after cleanup.
    #[must_use]
    pub fn namespace(&self) -> ToolNamespace {
        read(&self.routing).namespace.clone()
    }

    fn is_designated(designated: &HashMap<&'static str, usize>, idx: usize) -> bool {
        PRIORITY_CAPABILITIES
            .iter()
            .any(|cap| designated.get(cap) == Some(&idx))
    }

    fn resolve(
        &self,
        tool_name: &str,
        candidates: Vec<(usize, ToolDefinition)>,
        designated: &HashMap<&'static str, usize>,
        conflicts: &mut Vec<ToolConflict>,
    ) -> Option<(usize, ToolDefinition)> {
        if candidates.len() <= 1 {
            let (idx, def) = candidates.into_iter().next()?;
            tracing::debug!(
                tool = %tool_name,
                server_id = %self.adapters[idx].server_id(),
                "Adding uncontested tool"
            );
            return Some((idx, def));
        }

        let candidate_ids: Vec<String> = candidates
            .iter()
            .map(|(idx, _)| self.adapters[*idx].server_id().to_string())
            .collect();
        tracing::warn!(
            tool = %tool_name,
            candidates = ?candidate_ids,
            "Conflict detected for tool, resolving by capability priority"
        );

        let designated_positions: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, (idx, _))| Self::is_designated(designated, *idx))
            .map(|(pos, _)| pos)
            .collect();

        let (pos, resolution) = match designated_positions.as_slice() {
            [] => {
                tracing::warn!(
                    tool = %tool_name,
                    server_id = %candidate_ids[0],
                    "No designated server provided tool, using first discovered instance"
                );
                (0, ConflictResolution::FirstDiscovered)
            }
            [only] => {
                tracing::info!(
                    tool = %tool_name,
                    server_id = %candidate_ids[*only],
                    "Priority given to designated server"
                );
                (*only, ConflictResolution::Designated)
            }
            [first, ..] => {
                tracing::error!(
                    tool = %tool_name,
                    server_id = %candidate_ids[*first],
                    "Multiple designated servers offer tool, keeping the first designated one"
                );
                (*first, ConflictResolution::MultipleDesignated)
            }
        };

        conflicts.push(ToolConflict {
            tool_name: tool_name.to_string(),
            chosen: candidate_ids[pos].clone(),
            candidates: candidate_ids,
            resolution,
        });

        candidates.into_iter().nth(pos)
    }

    fn parse_single(&self, result: &ToolInvocationResult) -> String {
        if result.tool_name.is_empty() {
            tracing::warn!(call_id = %result.tool_call_id, "Received malformed tool result");
            let call_id = if result.tool_call_id.is_empty() {
                "unknown"
            } else {
                &result.tool_call_id
            };
            return format!("[Received malformed tool result for call ID: {call_id}]");
        }

        let owner = read(&self.routing).owners.get(&result.tool_name).copied();
        let Some(idx) = owner else {
            tracing::warn!(
                tool = %result.tool_name,
                "No owning server for tool result, serializing raw result"
            );
            return result.raw_result.to_string();
        };

        let adapter = &self.adapters[idx];
        tracing::debug!(
            tool = %result.tool_name,
            server_id = %adapter.server_id(),
            "Parsing tool result"
        );
        match adapter.parse_result(&result.raw_result) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    tool = %result.tool_name,
                    error = %e,
                    "Failed to parse tool result, serializing raw result"
                );
                result.raw_result.to_string()
            }
        }
    }
}

/// First adapter declaring each priority capability.
fn find_designated_servers(adapters: &[Arc<dyn ToolAdapter>]) -> HashMap<&'static str, usize> {
    let mut designated = HashMap::new();
    for capability in PRIORITY_CAPABILITIES {
        match adapters.iter().position(|a| a.has_capability(capability)) {
            Some(idx) => {
                tracing::info!(
                    capability = %capability,
                    server_id = %adapters[idx].server_id(),
                    "Designated server for capability"
                );
                designated.insert(capability, idx);
            }
            None => {
                tracing::debug!(capability = %capability, "No designated server for capability");
            }
        }
    }
    designated
}

#[async_trait]
impl ToolLifecycle for ToolManager {
    async fn setup_tools(&self) -> Result<ToolNamespace, ToolManagerError> {
        {
            let mut state = write(&self.state);
            if *state != ManagerState::Idle {
                return Err(ToolManagerError::InvalidState(state.as_str()));
            }
            *state = ManagerState::ToolsSetUp;
        }

        tracing::info!(adapter_count = self.adapters.len(), "Setting up tools");

        let started = join_all(self.adapters.iter().map(|a| a.start())).await;

        let mut discovered: BTreeMap<String, Vec<(usize, ToolDefinition)>> = BTreeMap::new();
        for (idx, outcome) in started.into_iter().enumerate() {
            match outcome {
                Ok(tools) => {
                    for def in tools {
                        tracing::debug!(
                            tool = %def.name,
                            server_id = %self.adapters[idx].server_id(),
                            "Discovered tool"
                        );
                        discovered.entry(def.name.clone()).or_default().push((idx, def));
                    }
                }
                Err(e) => {
                    tracing::error!(
                        server_id = %e.server_id,
                        error = %e,
                        "Failed to set up tools for server"
                    );
                }
            }
        }

        tracing::info!(
            unique_tools = discovered.len(),
            "Tool discovery complete"
        );

        let designated = read(&self.designated).clone();
        let mut tools = BTreeMap::new();
        let mut owners = HashMap::new();
        let mut conflicts = Vec::new();

        for (name, candidates) in discovered {
            if let Some((idx, def)) = self.resolve(&name, candidates, &designated, &mut conflicts) {
                owners.insert(name.clone(), idx);
                tools.insert(name, def);
            }
        }

        let namespace = ToolNamespace::new(tools);
        tracing::info!(
            tools = ?namespace.names().collect::<Vec<_>>(),
            "Final tool namespace constructed"
        );

        *write(&self.routing) = Routing {
            namespace: namespace.clone(),
            owners,
            conflicts,
        };

        Ok(namespace)
    }

    async fn cleanup_tools(&self) {
        {
            let mut state = write(&self.state);
            if *state == ManagerState::CleanedUp {
                tracing::debug!("Tools already cleaned up");
                return;
            }
            *state = ManagerState::CleanedUp;
        }

        tracing::info!("Cleaning up all tool instances");
        let stopped = join_all(self.adapters.iter().map(|a| a.stop())).await;
        for outcome in stopped {
            if let Err(e) = outcome {
                tracing::error!(server_id = %e.server_id, error = %e, "Failed to stop tool server");
            }
        }

        {
            let mut routing = write(&self.routing);
            routing.owners.clear();
            routing.namespace = ToolNamespace::default();
        }
        write(&self.designated).clear();
        tracing::info!("Cleanup complete");
    }

    fn parse_tool_results(&self, result: &GenerationResult) -> String {
        if let Some(text) = result.text.as_deref().filter(|t| !t.trim().is_empty()) {
            return text.to_string();
        }

        if result.tool_results.is_empty() {
            tracing::debug!("No tool results found in the generation result");
            return String::new();
        }

        tracing::debug!(count = result.tool_results.len(), "Parsing tool results");
        result
            .tool_results
            .iter()
            .map(|r| self.parse_single(r))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(RESULT_SEPARATOR)
    }
}
