#![allow(dead_code)]

use std::path::Path;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tower_lsp_server::{LspService, Server};

use dtls::lsp::Backend;

/// In-process client driving a real server over LSP framing.
///
/// The server half runs as a background task on the test runtime, wired up
/// through in-memory pipes, so paused-clock tests control its timers too.
/// Everything goes through two primitives: [`TestClient::notify`] for
/// one-way messages and [`TestClient::request`] for calls that expect a
/// response; the per-method helpers below are thin wrappers over them.
pub struct TestClient {
    to_server: DuplexStream,
    from_server: BufReader<DuplexStream>,
    _server: tokio::task::JoinHandle<()>,
    next_id: i64,
}

impl TestClient {
    pub fn spawn() -> Self {
        let (to_server, server_stdin) = tokio::io::duplex(64 * 1024);
        let (server_stdout, from_server) = tokio::io::duplex(64 * 1024);

        let (service, socket) = LspService::new(Backend::new);
        let server = tokio::spawn(async move {
            Server::new(server_stdin, server_stdout, socket)
                .serve(service)
                .await;
        });

        Self {
            to_server,
            from_server: BufReader::new(from_server),
            _server: server,
            next_id: 0,
        }
    }

    async fn write_frame(&mut self, body: Value) {
        let payload = body.to_string();
        let frame = format!("Content-Length: {}\r\n\r\n{payload}", payload.len());
        self.to_server.write_all(frame.as_bytes()).await.unwrap();
        self.to_server.flush().await.unwrap();
    }

    async fn read_frame(&mut self) -> Value {
        let mut length: Option<usize> = None;
        let mut header = String::new();
        loop {
            header.clear();
            self.from_server.read_line(&mut header).await.unwrap();
            let line = header.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some(rest) = line.strip_prefix("Content-Length:") {
                length = rest.trim().parse().ok();
            }
        }
        let mut body = vec![0u8; length.expect("frame without Content-Length")];
        self.from_server.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Send a notification.
    pub async fn notify(&mut self, method: &str, params: Value) {
        self.write_frame(json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        }))
        .await;
    }

    /// Send a request and return its id without waiting for the response.
    /// Tests that must inspect the messages arriving in between (e.g. to
    /// prove no diagnostics push happened) pair this with `next_message`.
    pub async fn begin_request(&mut self, method: &str, params: Value) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.write_frame(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }))
        .await;
        id
    }

    /// The next message from the server. Server-to-client requests (watcher
    /// registration and friends) are acknowledged on the spot so the server
    /// never blocks waiting on us.
    pub async fn next_message(&mut self) -> Value {
        loop {
            let msg = self.read_frame().await;
            if msg.get("method").is_some() && msg.get("id").is_some() {
                let id = msg["id"].clone();
                self.write_frame(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": null
                }))
                .await;
                continue;
            }
            return msg;
        }
    }

    /// Whether `msg` is the response to request `id`.
    pub fn is_response_to(msg: &Value, id: i64) -> bool {
        msg.get("method").is_none() && msg.get("id") == Some(&json!(id))
    }

    /// Send a request and block for its result, skipping notifications.
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.begin_request(method, params).await;
        loop {
            let msg = self.next_message().await;
            if Self::is_response_to(&msg, id) {
                return msg["result"].clone();
            }
        }
    }

    /// Drain messages until one carries the wanted notification method.
    pub async fn recv_notification(&mut self, method: &str) -> Value {
        loop {
            let msg = self.next_message().await;
            if msg["method"].as_str() == Some(method) {
                return msg;
            }
        }
    }

    /// Wait for a `window/logMessage` whose message contains `needle`.
    pub async fn wait_for_log(&mut self, needle: &str) -> String {
        loop {
            let msg = self.recv_notification("window/logMessage").await;
            let text = msg["params"]["message"].as_str().unwrap_or("").to_string();
            if text.contains(needle) {
                return text;
            }
        }
    }

    /// `initialize` + `initialized` against a workspace root, with custom
    /// client capabilities and optional `initializationOptions`.
    pub async fn initialize_workspace(
        &mut self,
        root: &Path,
        capabilities: Value,
        initialization_options: Option<Value>,
    ) -> Value {
        let root_uri = super::file_uri(root);
        let mut params = json!({
            "capabilities": capabilities,
            "processId": null,
            "rootUri": root_uri,
            "workspaceFolders": [{"uri": root_uri, "name": "fixture"}]
        });
        if let Some(options) = initialization_options {
            params["initializationOptions"] = options;
        }
        let result = self.request("initialize", params).await;
        self.notify("initialized", json!({})).await;
        result
    }

    /// Initialize against a workspace and block until the initial token
    /// discovery pass has completed.
    pub async fn initialize_and_load(
        &mut self,
        root: &Path,
        capabilities: Value,
        initialization_options: Option<Value>,
    ) -> Value {
        let result = self
            .initialize_workspace(root, capabilities, initialization_options)
            .await;
        self.wait_for_log("loaded").await;
        result
    }

    pub async fn did_open(&mut self, uri: &str, language_id: &str, version: i32, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": version,
                    "text": text
                }
            }),
        )
        .await;
    }

    /// `didChange` replacing the whole document.
    pub async fn did_change_full(&mut self, uri: &str, version: i32, text: &str) {
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{"text": text}]
            }),
        )
        .await;
    }

    /// Incremental `didChange` splicing one range.
    pub async fn did_change_range(
        &mut self,
        uri: &str,
        version: i32,
        range: Value,
        text: &str,
    ) {
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{"range": range, "text": text}]
            }),
        )
        .await;
    }

    pub async fn did_close(&mut self, uri: &str) {
        self.notify(
            "textDocument/didClose",
            json!({"textDocument": {"uri": uri}}),
        )
        .await;
    }

    /// Kind: 1 created, 2 changed, 3 deleted.
    pub async fn did_change_watched_files(&mut self, changes: &[(&str, u32)]) {
        let changes: Vec<Value> = changes
            .iter()
            .map(|(uri, kind)| json!({"uri": uri, "type": kind}))
            .collect();
        self.notify(
            "workspace/didChangeWatchedFiles",
            json!({"changes": changes}),
        )
        .await;
    }

    pub async fn did_change_configuration(&mut self, settings: Value) {
        self.notify(
            "workspace/didChangeConfiguration",
            json!({"settings": settings}),
        )
        .await;
    }

    pub async fn hover(&mut self, uri: &str, line: u32, character: u32) -> Value {
        self.request(
            "textDocument/hover",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": line, "character": character}
            }),
        )
        .await
    }

    pub async fn completion(&mut self, uri: &str, line: u32, character: u32) -> Value {
        self.request(
            "textDocument/completion",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": line, "character": character}
            }),
        )
        .await
    }

    pub async fn shutdown(&mut self) {
        self.request("shutdown", Value::Null).await;
    }
}
