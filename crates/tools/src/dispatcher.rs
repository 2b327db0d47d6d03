//! Tool Dispatcher — invokes a tool, normalizes its result envelope, and
//! brackets the call with a timeline event.

use std::time::Duration;

use sa_domain::timeline::{EventStatus, EventType, TimelineHandle};
use sa_domain::tool::ToolResult;

use crate::registry::ToolRegistry;

/// Default per-call timeout when the caller doesn't override it (spec.md
/// §4.H: 30s general, 60s for model-load-heavy tools — the longer figure is
/// passed explicitly by callers that need it).
pub const DEFAULT_TOOL_TIMEOUT_SEC: u64 = 30;

/// Dispatch `name(args)` through `registry`, bracketing the call with a
/// `tool_call` timeline event under `parent` (if any).
///
/// Never returns an `Err` — dispatch failures (missing tool, unmet
/// dependency, timeout, panic) are all normalized into `ToolResult.error`.
pub async fn dispatch(
    registry: &ToolRegistry,
    name: &str,
    args: serde_json::Value,
    check_deps: bool,
    timeout: Duration,
    timeline: &TimelineHandle,
    parent: Option<sa_domain::timeline::EventId>,
) -> ToolResult {
    let event_id = {
        let mut tl = timeline.lock();
        tl.add_event(
            EventType::ToolCall,
            name,
            format!("dispatching {name}"),
            parent,
            Some(args_metadata(name, &args)),
        )
    };

    let result = dispatch_inner(registry, name, args, check_deps, timeout).await;

    {
        let mut tl = timeline.lock();
        let mut meta = serde_json::Map::new();
        match &result.output {
            Some(output) => {
                meta.insert("output".into(), serde_json::Value::String(output.clone()));
            }
            None => {
                meta.insert(
                    "error".into(),
                    serde_json::Value::String(result.error.clone().unwrap_or_default()),
                );
            }
        }
        let status = if result.is_error() {
            EventStatus::Error
        } else {
            EventStatus::Success
        };
        tl.close_event(event_id, status, Some(meta));
    }

    result
}

fn args_metadata(name: &str, args: &serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let mut meta = serde_json::Map::new();
    meta.insert("tool_name".into(), serde_json::Value::String(name.to_owned()));
    meta.insert("args".into(), args.clone());
    meta
}

async fn dispatch_inner(
    registry: &ToolRegistry,
    name: &str,
    args: serde_json::Value,
    check_deps: bool,
    timeout: Duration,
) -> ToolResult {
    let Some(tool) = registry.get(name) else {
        return ToolResult::err(format!("tool {name} invalid"));
    };

    if check_deps {
        let (ok, missing) = registry.validate_dependencies(name);
        if !ok {
            return ToolResult::err(format!("missing dependencies: {}", missing.join(", ")));
        }
    }

    match tokio::time::timeout(timeout, tool.execute(args)).await {
        Ok(result) => result,
        Err(_) => ToolResult::err("timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Tool;
    use async_trait::async_trait;
    use sa_domain::timeline::Timeline;
    use std::sync::Arc;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn execute(&self, args: serde_json::Value) -> ToolResult {
            ToolResult::ok(args.to_string())
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn execute(&self, _args: serde_json::Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ToolResult::ok("too late")
        }
    }

    fn handle() -> TimelineHandle {
        Arc::new(parking_lot::Mutex::new(Timeline::new("c1")))
    }

    #[tokio::test]
    async fn dispatch_missing_tool_is_error() {
        let registry = ToolRegistry::new();
        let tl = handle();
        let result = dispatch(&registry, "ghost", serde_json::json!({}), true, Duration::from_secs(1), &tl, None).await;
        assert_eq!(result.error.as_deref(), Some("tool ghost invalid"));
    }

    #[tokio::test]
    async fn dispatch_success_closes_event() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let tl = handle();

        let result = dispatch(&registry, "echo", serde_json::json!({"a": 1}), true, Duration::from_secs(1), &tl, None).await;
        assert!(result.output.is_some());

        let events = tl.lock().get_events(&Default::default()).len();
        assert_eq!(events, 1);
    }

    #[tokio::test]
    async fn dispatch_timeout_is_error() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool)).unwrap();
        let tl = handle();

        let result = dispatch(&registry, "slow", serde_json::json!({}), true, Duration::from_millis(20), &tl, None).await;
        assert_eq!(result.error.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn dispatch_missing_dependency_is_error() {
        struct NeedsGhost;
        #[async_trait]
        impl Tool for NeedsGhost {
            fn name(&self) -> &str {
                "needs_ghost"
            }
            fn description(&self) -> &str {
                "depends on a tool that doesn't exist"
            }
            fn parameters(&self) -> serde_json::Value {
                serde_json::json!({})
            }
            fn required_tools(&self) -> &[String] {
                static REQ: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
                REQ.get_or_init(|| vec!["ghost".to_string()])
            }
            async fn execute(&self, _args: serde_json::Value) -> ToolResult {
                ToolResult::ok("should not run")
            }
        }

        let registry = ToolRegistry::new();
        registry.register(Arc::new(NeedsGhost)).unwrap();
        let tl = handle();

        let result = dispatch(&registry, "needs_ghost", serde_json::json!({}), true, Duration::from_secs(1), &tl, None).await;
        assert!(result.error.unwrap().contains("missing dependencies"));
    }
}
