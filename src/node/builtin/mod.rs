//! Built-in node behaviors
//!
//! The catalog the registry ships with: HTTP, shell, file I/O, LLM, plus
//! test-only nodes gated behind the `test_nodes_enabled` setting.

pub mod file;
pub mod http;
pub mod llm;
pub mod shell;

use std::sync::Arc;

use crate::registry::{InterfaceField, NodeEntry, NodeFactory, NodeInterface};

use super::NodeBehavior;

fn factory<B: NodeBehavior + Default + 'static>() -> NodeFactory {
    Arc::new(|| Arc::new(B::default()) as Arc<dyn NodeBehavior>)
}

/// All built-in entries with their factories, in catalog order
pub fn builtin_entries() -> Vec<(NodeEntry, NodeFactory)> {
    vec![
        (
            NodeEntry {
                key: "http".to_string(),
                class_name: "HttpNode".to_string(),
                module_path: "pflow::node::builtin::http".to_string(),
                file_path: "src/node/builtin/http.rs".to_string(),
                interface: NodeInterface {
                    description: "Perform an HTTP request and store the response".to_string(),
                    inputs: vec![],
                    params: vec![
                        InterfaceField::required("url", "string", "Request URL"),
                        InterfaceField::optional("method", "string", "HTTP method (default GET)"),
                        InterfaceField::optional("headers", "map", "Request headers"),
                        InterfaceField::optional("body", "string", "Request body"),
                        InterfaceField::optional(
                            "timeout_secs",
                            "int",
                            "Per-request timeout (default 30)",
                        ),
                    ],
                    outputs: vec![
                        InterfaceField::required(
                            "response",
                            "any",
                            "Response body (text, JSON, or bytes)",
                        ),
                        InterfaceField::required("status_code", "int", "HTTP status code"),
                    ],
                    actions: vec!["default".to_string()],
                },
            },
            factory::<http::HttpNode>(),
        ),
        (
            NodeEntry {
                key: "shell".to_string(),
                class_name: "ShellNode".to_string(),
                module_path: "pflow::node::builtin::shell".to_string(),
                file_path: "src/node/builtin/shell.rs".to_string(),
                interface: NodeInterface {
                    description: "Run a shell command and capture its output".to_string(),
                    inputs: vec![],
                    params: vec![
                        InterfaceField::required("command", "string", "Command line (sh -c)"),
                        InterfaceField::optional("stdin", "any", "Data piped to stdin"),
                        InterfaceField::optional(
                            "timeout_secs",
                            "int",
                            "Command timeout (default 60)",
                        ),
                    ],
                    outputs: vec![
                        InterfaceField::required("stdout", "string", "Captured stdout, trimmed"),
                        InterfaceField::required("stderr", "string", "Captured stderr"),
                        InterfaceField::required("exit_code", "int", "Process exit code"),
                    ],
                    actions: vec!["default".to_string()],
                },
            },
            factory::<shell::ShellNode>(),
        ),
        (
            NodeEntry {
                key: "read-file".to_string(),
                class_name: "ReadFileNode".to_string(),
                module_path: "pflow::node::builtin::file".to_string(),
                file_path: "src/node/builtin/file.rs".to_string(),
                interface: NodeInterface {
                    description: "Read a file into the store (text or bytes)".to_string(),
                    inputs: vec![],
                    params: vec![InterfaceField::required("path", "string", "File path")],
                    outputs: vec![
                        InterfaceField::required("content", "any", "File content"),
                        InterfaceField::required("size_bytes", "int", "File size"),
                    ],
                    actions: vec!["default".to_string()],
                },
            },
            factory::<file::ReadFileNode>(),
        ),
        (
            NodeEntry {
                key: "write-file".to_string(),
                class_name: "WriteFileNode".to_string(),
                module_path: "pflow::node::builtin::file".to_string(),
                file_path: "src/node/builtin/file.rs".to_string(),
                interface: NodeInterface {
                    description: "Write content (text or bytes) to a file".to_string(),
                    inputs: vec![],
                    params: vec![
                        InterfaceField::required("path", "string", "Destination path"),
                        InterfaceField::required("content", "any", "Content to write"),
                    ],
                    outputs: vec![
                        InterfaceField::required("path", "string", "Path written"),
                        InterfaceField::required("bytes_written", "int", "Bytes written"),
                    ],
                    actions: vec!["default".to_string()],
                },
            },
            factory::<file::WriteFileNode>(),
        ),
        (
            NodeEntry {
                key: "llm".to_string(),
                class_name: "LlmNode".to_string(),
                module_path: "pflow::node::builtin::llm".to_string(),
                file_path: "src/node/builtin/llm.rs".to_string(),
                interface: NodeInterface {
                    description: "Complete a prompt with the configured LLM client".to_string(),
                    inputs: vec![],
                    params: vec![
                        InterfaceField::required("prompt", "string", "Prompt text"),
                        InterfaceField::optional("model", "string", "Model override"),
                    ],
                    outputs: vec![
                        InterfaceField::required("response", "string", "Model response text"),
                        InterfaceField::required("model", "string", "Model that answered"),
                    ],
                    actions: vec!["default".to_string()],
                },
            },
            factory::<llm::LlmNode>(),
        ),
        (
            NodeEntry {
                key: "echo".to_string(),
                class_name: "EchoNode".to_string(),
                module_path: "pflow::node::builtin::test".to_string(),
                file_path: "src/node/builtin/test.rs".to_string(),
                interface: NodeInterface {
                    description: "Test node: store the given value unchanged".to_string(),
                    inputs: vec![],
                    params: vec![InterfaceField::required("value", "any", "Value to store")],
                    outputs: vec![InterfaceField::required("value", "any", "The value")],
                    actions: vec!["default".to_string()],
                },
            },
            factory::<test::EchoNode>(),
        ),
        (
            NodeEntry {
                key: "fail-n-times".to_string(),
                class_name: "FailNTimesNode".to_string(),
                module_path: "pflow::node::builtin::test".to_string(),
                file_path: "src/node/builtin/test.rs".to_string(),
                interface: NodeInterface {
                    description: "Test node: fail the first N exec attempts, then succeed"
                        .to_string(),
                    inputs: vec![],
                    params: vec![InterfaceField::required(
                        "fail_times",
                        "int",
                        "Attempts to fail before succeeding",
                    )],
                    outputs: vec![InterfaceField::required("result", "string", "Fixed marker")],
                    actions: vec!["default".to_string()],
                },
            },
            factory::<test::FailNTimesNode>(),
        ),
    ]
}

/// Type ids of test-only nodes, filtered unless `test_nodes_enabled`
pub const TEST_NODE_KEYS: &[&str] = &["echo", "fail-n-times"];
