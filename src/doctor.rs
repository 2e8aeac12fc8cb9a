use std::path::{Path, PathBuf};

use graphrun_core::config::AppConfig;
use graphrun_core::graph::{Graph, NodeKind};

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub fn run_doctor(config: &AppConfig, graph: Option<&Graph>) {
    let mut checks = vec![
        check_credentials(config),
        check_base_url(config),
        check_sandbox(config),
        check_log_dir(config),
    ];
    if let Some(graph) = graph {
        checks.push(check_graph(graph));
        checks.push(check_custom_tools(config, graph));
    }

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn is_set(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.is_empty() && !v.starts_with("${"))
}

fn check_credentials(config: &AppConfig) -> CheckResult {
    let service = &config.service;
    let (ok, detail) = if is_set(service.access_token.as_ref()) {
        (true, "Using fixed access token".to_string())
    } else if is_set(service.api_key.as_ref()) {
        (
            true,
            format!("API key set, tokens cached for {}s", service.token_ttl_secs),
        )
    } else {
        (false, "Neither service.api_key nor service.access_token is set".to_string())
    };
    CheckResult {
        label: "Credentials".into(),
        ok,
        detail,
    }
}

fn check_base_url(config: &AppConfig) -> CheckResult {
    let url = &config.service.base_url;
    let ok = url.starts_with("http://") || url.starts_with("https://");
    CheckResult {
        label: "Service URL".into(),
        ok,
        detail: if ok {
            url.clone()
        } else {
            format!("'{}' is not an http(s) URL", url)
        },
    }
}

/// Resolve `program` the way a child process spawn would: as a path when it
/// contains a separator, otherwise through `PATH`.
fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

fn check_sandbox(config: &AppConfig) -> CheckResult {
    let (ok, detail) = match &config.sandbox {
        None => (true, "Not configured (custom tools disabled)".to_string()),
        Some(sandbox) => match find_program(&sandbox.program) {
            Some(path) => (
                true,
                format!("{} (timeout {}s)", path.display(), sandbox.timeout_secs),
            ),
            None => (false, format!("Program '{}' not found", sandbox.program)),
        },
    };
    CheckResult {
        label: "Sandbox".into(),
        ok,
        detail,
    }
}

fn check_log_dir(config: &AppConfig) -> CheckResult {
    let Some(log) = config.log.as_ref().filter(|l| l.enabled) else {
        return CheckResult {
            label: "Run logs".into(),
            ok: true,
            detail: "Disabled".into(),
        };
    };
    let dir = PathBuf::from(log.log_dir.as_deref().unwrap_or("logs"));
    let test_file = dir.join(".doctor_test");
    let writable = std::fs::create_dir_all(&dir)
        .and_then(|_| std::fs::write(&test_file, "test"))
        .is_ok();
    std::fs::remove_file(&test_file).ok();
    CheckResult {
        label: "Run logs".into(),
        ok: writable,
        detail: if writable {
            format!("{} is writable", dir.display())
        } else {
            format!("Cannot write to {}", dir.display())
        },
    }
}

fn check_graph(graph: &Graph) -> CheckResult {
    let has_end = graph.nodes().iter().any(|n| n.kind == NodeKind::End);
    CheckResult {
        label: "Graph".into(),
        ok: has_end,
        detail: if has_end {
            format!("{} nodes, {} edges", graph.nodes().len(), graph.edges().len())
        } else {
            "No end node, runs will produce no result".into()
        },
    }
}

fn check_custom_tools(config: &AppConfig, graph: &Graph) -> CheckResult {
    let count = graph.custom_tools().len();
    let ok = count == 0 || config.sandbox.is_some();
    CheckResult {
        label: "Custom tools".into(),
        ok,
        detail: match (count, ok) {
            (0, _) => "None".into(),
            (n, true) => format!("{} custom tool(s), sandbox configured", n),
            (n, false) => format!("{} custom tool(s) but no [sandbox] section", n),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrun_core::config::SandboxConfig;
    use graphrun_core::graph::Node;

    #[test]
    fn test_credentials_ignore_unexpanded_env() {
        let mut config = AppConfig::default();
        config.service.api_key = Some("${GRAPHRUN_KEY}".into());
        assert!(!check_credentials(&config).ok);
        config.service.api_key = Some("key".into());
        assert!(check_credentials(&config).ok);
    }

    #[test]
    fn test_custom_tools_need_sandbox() {
        let graph = Graph::new(
            vec![
                Node::new("s", NodeKind::Start, "Start"),
                Node::new("t", NodeKind::Tool, "Mine").with_payload(serde_json::json!({
                    "type": "custom",
                    "tool": { "name": "mine", "function_body": "return 1" }
                })),
            ],
            vec![],
        )
        .unwrap();
        let mut config = AppConfig::default();
        assert!(!check_custom_tools(&config, &graph).ok);
        config.sandbox = Some(SandboxConfig {
            program: "node".into(),
            args: vec![],
            timeout_secs: 30,
            max_output_bytes: 1024,
        });
        assert!(check_custom_tools(&config, &graph).ok);
    }

    #[test]
    fn test_missing_program() {
        assert!(find_program("graphrun-no-such-interpreter").is_none());
    }
}
