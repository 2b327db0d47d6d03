//! Tool Registry — owns the set of callable tools and their dependency graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sa_domain::tool::{ToolDefinition, ToolResult};

/// A callable capability exposed to the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-Schema-shaped parameter description, surfaced to the LLM oracle.
    fn parameters(&self) -> serde_json::Value;
    /// Names of tools that must be registered (and satisfiable) before this
    /// one can run.
    fn required_tools(&self) -> &[String] {
        &[]
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            parameters: self.parameters(),
        }
    }
}

/// Raised when registering a tool would introduce a cycle in the dependency
/// graph, or when `execution_order` is asked to sort a graph that has one.
#[derive(Debug, thiserror::Error)]
#[error("dependency cycle detected involving tool \"{0}\"")]
pub struct CycleError(pub String);

#[derive(Default)]
struct Inner {
    tools: HashMap<String, Arc<dyn Tool>>,
}

/// Owns all registered tools. Read-heavy after startup: lookups take a
/// shared read lock; `register` takes an exclusive write lock.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool. Rejects (leaving the registry unchanged) if doing so
    /// would introduce a cycle in the dependency graph.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), CycleError> {
        let mut inner = self.inner.write();
        let name = tool.name().to_owned();

        let mut candidate: HashMap<String, Arc<dyn Tool>> = inner.tools.clone();
        candidate.insert(name.clone(), tool);
        detect_cycle(&candidate)?;

        inner.tools = candidate;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.read().tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().tools.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.inner.read().tools.values().map(|t| t.definition()).collect()
    }

    /// All unmet `required_tools` in the transitive closure of `name`.
    /// `ok` is true iff the set is empty (or `name` itself is unregistered,
    /// in which case `name` itself is the sole missing dependency).
    pub fn validate_dependencies(&self, name: &str) -> (bool, Vec<String>) {
        let inner = self.inner.read();
        let Some(root) = inner.tools.get(name) else {
            return (false, vec![name.to_owned()]);
        };

        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root.clone()];

        while let Some(tool) = stack.pop() {
            for dep in tool.required_tools() {
                if !seen.insert(dep.clone()) {
                    continue;
                }
                match inner.tools.get(dep) {
                    Some(dep_tool) => stack.push(dep_tool.clone()),
                    None => missing.push(dep.clone()),
                }
            }
        }

        (missing.is_empty(), missing)
    }

    /// Topologically sorted tool names. Errors if the dependency graph (as
    /// currently registered) contains a cycle — should not happen in
    /// practice since `register` refuses cycle-introducing tools, but
    /// `missing` dependencies are tolerated here (they're reported by
    /// `validate_dependencies`, not treated as graph edges to nowhere).
    pub fn execution_order(&self) -> Result<Vec<String>, CycleError> {
        let inner = self.inner.read();
        toposort(&inner.tools)
    }
}

fn detect_cycle(tools: &HashMap<String, Arc<dyn Tool>>) -> Result<(), CycleError> {
    toposort(tools).map(|_| ())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn toposort(tools: &HashMap<String, Arc<dyn Tool>>) -> Result<Vec<String>, CycleError> {
    let mut order = Vec::with_capacity(tools.len());
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    // Deterministic traversal order for reproducible sorts.
    let mut names: Vec<&String> = tools.keys().collect();
    names.sort();

    for name in names {
        visit(name, tools, &mut marks, &mut order)?;
    }

    Ok(order)
}

fn visit<'a>(
    name: &'a str,
    tools: &'a HashMap<String, Arc<dyn Tool>>,
    marks: &mut HashMap<&'a str, Mark>,
    order: &mut Vec<String>,
) -> Result<(), CycleError> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => return Err(CycleError(name.to_owned())),
        None => {}
    }

    marks.insert(name, Mark::Visiting);

    if let Some(tool) = tools.get(name) {
        let mut deps: Vec<&String> = tool.required_tools().iter().collect();
        deps.sort();
        for dep in deps {
            // Dependencies that aren't registered yet are not graph edges —
            // `validate_dependencies` reports those separately.
            if tools.contains_key(dep.as_str()) {
                visit(dep, tools, marks, order)?;
            }
        }
    }

    marks.insert(name, Mark::Done);
    order.push(name.to_owned());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTool {
        name: String,
        required: Vec<String>,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn required_tools(&self) -> &[String] {
            &self.required
        }
        async fn execute(&self, _args: serde_json::Value) -> ToolResult {
            ToolResult::ok("stub")
        }
    }

    fn stub(name: &str, required: &[&str]) -> Arc<dyn Tool> {
        Arc::new(StubTool {
            name: name.to_owned(),
            required: required.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn register_and_get() {
        let reg = ToolRegistry::new();
        reg.register(stub("a", &[])).unwrap();
        assert!(reg.get("a").is_some());
        assert!(reg.get("b").is_none());
    }

    #[test]
    fn validate_dependencies_reports_missing() {
        let reg = ToolRegistry::new();
        reg.register(stub("a", &["b", "c"])).unwrap();
        let (ok, missing) = reg.validate_dependencies("a");
        assert!(!ok);
        assert_eq!(missing.len(), 2);
    }

    #[test]
    fn validate_dependencies_ok_when_satisfied() {
        let reg = ToolRegistry::new();
        reg.register(stub("b", &[])).unwrap();
        reg.register(stub("a", &["b"])).unwrap();
        let (ok, missing) = reg.validate_dependencies("a");
        assert!(ok);
        assert!(missing.is_empty());
    }

    #[test]
    fn unregistered_tool_is_its_own_missing_dependency() {
        let reg = ToolRegistry::new();
        let (ok, missing) = reg.validate_dependencies("ghost");
        assert!(!ok);
        assert_eq!(missing, vec!["ghost".to_string()]);
    }

    #[test]
    fn execution_order_respects_dependencies() {
        let reg = ToolRegistry::new();
        reg.register(stub("c", &[])).unwrap();
        reg.register(stub("b", &["c"])).unwrap();
        reg.register(stub("a", &["b"])).unwrap();

        let order = reg.execution_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("c") < pos("b"));
        assert!(pos("b") < pos("a"));
    }

    #[test]
    fn register_rejects_direct_cycle() {
        let reg = ToolRegistry::new();
        reg.register(stub("a", &["b"])).unwrap();
        let result = reg.register(stub("b", &["a"]));
        assert!(result.is_err());
        // Registry unchanged: "b" must not have been inserted.
        assert!(reg.get("b").is_none());
    }

    #[test]
    fn register_rejects_self_cycle() {
        let reg = ToolRegistry::new();
        let result = reg.register(stub("a", &["a"]));
        assert!(result.is_err());
        assert!(reg.get("a").is_none());
    }

    #[test]
    fn definitions_lists_all_registered() {
        let reg = ToolRegistry::new();
        reg.register(stub("a", &[])).unwrap();
        reg.register(stub("b", &[])).unwrap();
        assert_eq!(reg.definitions().len(), 2);
    }
}
