//! LSP backend: handler dispatch over the shared state tuple
//! (token index, document store, config state).
//!
//! Handlers never hold a lock across I/O: discovery and CDN fetches run in
//! `spawn_blocking` against private buffers, and only the final index swap
//! takes a write lock. Push diagnostics are debounced and version-guarded;
//! pull-diagnostics clients get no pushes at all.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tower_lsp_server::jsonrpc::Result;
use tower_lsp_server::ls_types::*;
use tower_lsp_server::{Client, LanguageServer, LspService, Server};

use crate::analysis;
use crate::capabilities::ClientCaps;
use crate::config::{
    ConfigState, WorkspaceRoot, layer_from_value, load_alt_config, load_package_manifest,
};
use crate::css;
use crate::diagnostics;
use crate::documents::{Document, DocumentStore};
use crate::token_file;
use crate::tokens::{Token, TokenIndex};
use crate::workspace::{LoadReport, Workspace};

const DEBOUNCE: Duration = Duration::from_millis(200);

/// LSP server backend.
pub struct Backend {
    client: Client,
    documents: Arc<DocumentStore>,
    index: Arc<TokenIndex>,
    config: Arc<ConfigState>,
    workspace: Arc<Workspace>,
    /// Messages produced before `initialized` (no log channel yet).
    pending_logs: Mutex<Vec<String>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish()
    }
}

impl Backend {
    pub fn new(client: Client) -> Self {
        let index = Arc::new(TokenIndex::new());
        let config = Arc::new(ConfigState::new());
        let workspace = Arc::new(Workspace::new(Arc::clone(&index), Arc::clone(&config)));
        Self {
            client,
            documents: Arc::new(DocumentStore::new()),
            index,
            config,
            workspace,
            pending_logs: Mutex::new(Vec::new()),
        }
    }

    /// Run a synchronous analysis body with panic isolation: a panicking
    /// handler logs and returns an internal error instead of killing the
    /// server.
    fn guarded<T>(&self, method: &'static str, f: impl FnOnce() -> T) -> Result<T> {
        match std::panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Ok(value),
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let client = self.client.clone();
                tokio::spawn(async move {
                    client
                        .log_message(
                            MessageType::ERROR,
                            format!("design-tokens: {method} panicked: {detail}"),
                        )
                        .await;
                });
                Err(tower_lsp_server::jsonrpc::Error::internal_error())
            }
        }
    }

    async fn log_report(&self, report: &LoadReport) {
        for warning in &report.warnings {
            self.client
                .log_message(MessageType::WARNING, format!("design-tokens: {warning}"))
                .await;
        }
        for error in &report.errors {
            self.client
                .log_message(MessageType::ERROR, format!("design-tokens: {error}"))
                .await;
        }
    }

    /// Register file watchers for the resolved source patterns. Dispatched
    /// to a worker task: awaiting the client's response inline would wedge
    /// the notification handler behind the reader loop.
    fn register_watchers(&self, patterns: Vec<String>) {
        if patterns.is_empty() {
            return;
        }
        let watchers = patterns
            .into_iter()
            .map(|pattern| FileSystemWatcher {
                glob_pattern: GlobPattern::String(pattern),
                kind: Some(WatchKind::Create | WatchKind::Change | WatchKind::Delete),
            })
            .collect();
        let registration = Registration {
            id: "design-tokens-watch".to_string(),
            method: "workspace/didChangeWatchedFiles".to_string(),
            register_options: Some(
                serde_json::to_value(DidChangeWatchedFilesRegistrationOptions { watchers })
                    .unwrap(),
            ),
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.register_capability(vec![registration]).await {
                client
                    .log_message(
                        MessageType::WARNING,
                        format!(
                            "design-tokens: failed to register file watcher ({e}); \
                             token file edits won't be picked up"
                        ),
                    )
                    .await;
            }
        });
    }

    /// Fire-and-forget task: debounce, compute diagnostics, publish.
    ///
    /// Captures the document version at spawn time so a task superseded by
    /// a newer edit discards itself instead of publishing stale results.
    /// Pull-diagnostics clients never receive pushes.
    fn spawn_diagnostics(&self, uri: Uri) {
        if self.config.caps().pull_diagnostics {
            return;
        }
        let spawn_version = match self.documents.get(&uri) {
            Some(doc) => doc.version,
            None => return,
        };

        let client = self.client.clone();
        let documents = Arc::clone(&self.documents);
        let index = Arc::clone(&self.index);
        let config = Arc::clone(&self.config);

        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;

            // Snapshot after the sleep; stale content must not pass the
            // version guard.
            let Some(doc) = documents.get(&uri) else {
                return; // closed during the debounce window
            };
            if doc.version != spawn_version {
                return; // superseded by a newer edit
            }
            if !css::is_css_capable(&doc.language_id) {
                return;
            }

            let caps = config.caps();
            let items = diagnostics::compute(&doc, &index, &caps);

            // Post-computation guard: discard if the document moved on.
            let still_current = documents
                .get(&uri)
                .map(|d| d.version == spawn_version)
                .unwrap_or(false);
            if !still_current {
                return;
            }

            client
                .publish_diagnostics(uri, items, Some(spawn_version))
                .await;
        });
    }

    /// Re-publish diagnostics for every open CSS-capable document after a
    /// reload that may have changed the index.
    fn republish_all(&self) {
        for doc in self.documents.all() {
            if css::is_css_capable(&doc.language_id) {
                self.spawn_diagnostics(doc.uri.clone());
            }
        }
    }

    /// Full discovery on a worker thread, then watcher registration and
    /// diagnostics refresh.
    async fn reload_and_register(&self, register: bool) {
        let workspace = Arc::clone(&self.workspace);
        let report = match tokio::task::spawn_blocking(move || workspace.reload_all()).await {
            Ok(report) => report,
            Err(e) => {
                self.client
                    .log_message(
                        MessageType::ERROR,
                        format!("design-tokens: token discovery panicked: {e}"),
                    )
                    .await;
                return;
            }
        };
        self.log_report(&report).await;
        self.client
            .log_message(
                MessageType::INFO,
                format!(
                    "design-tokens: loaded {} tokens from {} files",
                    self.index.count(),
                    report.loaded_files
                ),
            )
            .await;
        if register {
            self.register_watchers(report.watch_patterns);
        }
        self.republish_all();
    }

    fn doc_path(uri: &Uri) -> Option<PathBuf> {
        uri.to_file_path().map(|p| p.into_owned())
    }

    /// Whether an open document is a recognized token file.
    fn is_token_doc(&self, doc: &Document) -> bool {
        if !token_file::is_token_file_language(&doc.language_id) {
            return false;
        }
        let path = Self::doc_path(&doc.uri);
        token_file::is_token_file(path.as_deref(), &doc.text, &self.workspace.loaded_paths())
    }

    /// Resolve the token under a position in a token file: a `{a.b.c}`
    /// reference, or the defining key itself.
    fn token_at_in_token_file(
        &self,
        doc: &Document,
        position: Position,
    ) -> Option<(Arc<Token>, Range)> {
        let offset = doc.offset_at(position);
        let refs = token_file::token_references(&doc.text);
        if let Some(reference) = token_file::reference_at(&refs, offset) {
            let token = self.index.get(&reference.key)?;
            return Some((token, doc.range_of(reference.range.clone())));
        }
        // On a defining key of a token from this file.
        let uri_str = doc.uri.as_str();
        self.index
            .snapshot()
            .into_iter()
            .filter(|t| t.definition_uri == uri_str)
            .find_map(|t| {
                let span = t.def_span?;
                let range = Range::new(
                    Position::new(span.start_line, span.start_char),
                    Position::new(span.end_line, span.end_char),
                );
                let contains = (position.line > range.start.line
                    || (position.line == range.start.line
                        && position.character >= range.start.character))
                    && (position.line < range.end.line
                        || (position.line == range.end.line
                            && position.character < range.end.character));
                contains.then_some((t, range))
            })
    }
}

impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        // Capability snapshot from the raw (re-serialized) JSON, so fields
        // the typed structs model loosely are still visible.
        let raw = serde_json::to_value(&params.capabilities).unwrap_or_default();
        let caps = ClientCaps::detect(&raw);
        self.config.set_caps(caps.clone());

        // Workspace root: first folder, else the deprecated rootUri.
        #[allow(deprecated)]
        let root_uri = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .map(|folder| folder.uri.clone())
            .or(params.root_uri);
        if let Some(uri) = root_uri
            && let Some(path) = uri.to_file_path()
        {
            self.config.set_root(WorkspaceRoot {
                path: path.into_owned(),
                uri,
            });
        }

        // initializationOptions is the client's first settings push.
        if let Some(options) = params.initialization_options {
            match layer_from_value(&options, "initializationOptions") {
                Ok((layer, warnings)) => {
                    self.config.set_client(layer);
                    self.pending_logs
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend(warnings);
                }
                Err(e) => {
                    self.pending_logs
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(e.to_string());
                }
            }
        }

        let diagnostic_provider = caps.pull_diagnostics.then(|| {
            DiagnosticServerCapabilities::Options(DiagnosticOptions {
                identifier: Some(diagnostics::SOURCE.to_string()),
                inter_file_dependencies: true,
                workspace_diagnostics: false,
                ..Default::default()
            })
        });

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "dtls".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            offset_encoding: None,
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::INCREMENTAL),
                        ..Default::default()
                    },
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                completion_provider: Some(CompletionOptions {
                    resolve_provider: Some(true),
                    trigger_characters: Some(vec!["-".to_string(), "(".to_string()]),
                    ..Default::default()
                }),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                color_provider: Some(ColorProviderCapability::Simple(true)),
                code_action_provider: Some(CodeActionProviderCapability::Options(
                    CodeActionOptions {
                        code_action_kinds: Some(vec![CodeActionKind::QUICKFIX]),
                        resolve_provider: Some(true),
                        ..Default::default()
                    },
                )),
                semantic_tokens_provider: Some(
                    SemanticTokensServerCapabilities::SemanticTokensOptions(
                        SemanticTokensOptions {
                            legend: token_file::semantic_tokens_legend(),
                            full: Some(SemanticTokensFullOptions::Bool(true)),
                            range: Some(true),
                            ..Default::default()
                        },
                    ),
                ),
                diagnostic_provider,
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        let pending: Vec<String> = std::mem::take(
            &mut *self.pending_logs.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for message in pending {
            self.client
                .log_message(MessageType::WARNING, format!("design-tokens: {message}"))
                .await;
        }

        // Workspace manifest layers: package.json over the .config fallback.
        if let Some(root) = self.config.root() {
            let root_path = root.path.clone();
            let manifest = tokio::task::spawn_blocking(move || {
                let alt = load_alt_config(&root_path);
                let pkg = load_package_manifest(&root_path);
                (alt, pkg)
            })
            .await;
            if let Ok((alt, pkg)) = manifest {
                let mut layer = crate::config::ConfigLayer::default();
                match alt {
                    Ok(Some(alt_layer)) => layer = alt_layer,
                    Ok(None) => {}
                    Err(e) => {
                        self.client
                            .log_message(MessageType::ERROR, format!("design-tokens: {e}"))
                            .await;
                    }
                }
                match pkg {
                    Ok(Some((pkg_layer, warnings))) => {
                        layer = layer.overlaid(&pkg_layer);
                        for warning in warnings {
                            self.client
                                .log_message(
                                    MessageType::WARNING,
                                    format!("design-tokens: {warning}"),
                                )
                                .await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Invalid manifest: log and keep the previous layer.
                        self.client
                            .log_message(MessageType::ERROR, format!("design-tokens: {e}"))
                            .await;
                    }
                }
                self.config.set_manifest(layer);
            }
        }

        self.reload_and_register(true).await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.open(
            uri.clone(),
            params.text_document.language_id,
            params.text_document.version,
            params.text_document.text,
        );
        self.spawn_diagnostics(uri);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents
            .change(&uri, params.text_document.version, params.content_changes);
        self.spawn_diagnostics(uri);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.close(&uri);
        if !self.config.caps().pull_diagnostics {
            self.client.publish_diagnostics(uri, vec![], None).await;
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let settings = params
            .settings
            .get("designTokensLanguageServer")
            .cloned()
            .unwrap_or(params.settings);
        match layer_from_value(&settings, "didChangeConfiguration") {
            Ok((layer, warnings)) => {
                self.config.set_client(layer);
                for warning in warnings {
                    self.client
                        .log_message(MessageType::WARNING, format!("design-tokens: {warning}"))
                        .await;
                }
            }
            Err(e) => {
                // Configuration cannot apply: keep the previous config.
                self.client
                    .log_message(MessageType::ERROR, format!("design-tokens: {e}"))
                    .await;
                return;
            }
        }
        self.reload_and_register(false).await;
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        let workspace = Arc::clone(&self.workspace);
        let changes: Vec<(Option<PathBuf>, FileChangeType)> = params
            .changes
            .iter()
            .map(|c| (Self::doc_path(&c.uri), c.typ))
            .collect();

        let reports = tokio::task::spawn_blocking(move || {
            let mut reports = Vec::new();
            for (path, kind) in changes {
                let Some(path) = path else { continue };
                let report = if kind == FileChangeType::CREATED {
                    workspace.handle_created(&path)
                } else if kind == FileChangeType::CHANGED {
                    workspace.handle_changed(&path)
                } else if kind == FileChangeType::DELETED {
                    workspace.handle_deleted(&path);
                    None
                } else {
                    None
                };
                if let Some(report) = report {
                    reports.push(report);
                }
            }
            reports
        })
        .await;

        if let Ok(reports) = reports {
            for report in &reports {
                self.log_report(report).await;
            }
        }
        self.republish_all();
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(doc) = self.documents.get(&uri) else {
            return Ok(None);
        };
        let caps = self.config.caps();

        if css::is_css_capable(&doc.language_id) {
            return self.guarded("textDocument/hover", || {
                analysis::hover(&doc, &self.index, &caps, position)
            });
        }
        if self.is_token_doc(&doc) {
            return self.guarded("textDocument/hover", || {
                let offset = doc.offset_at(position);
                let refs = token_file::token_references(&doc.text);
                let reference = token_file::reference_at(&refs, offset)?;
                let value = match self.index.get(&reference.key) {
                    Some(token) => {
                        let resolved = self.index.resolve_value(&token);
                        crate::hover::render_token(&token, &resolved, caps.markup)
                    }
                    None => crate::hover::render_unknown(&reference.key, caps.markup),
                };
                let kind = match caps.markup {
                    crate::capabilities::Markup::Markdown => MarkupKind::Markdown,
                    crate::capabilities::Markup::PlainText => MarkupKind::PlainText,
                };
                Some(Hover {
                    contents: HoverContents::Markup(MarkupContent { kind, value }),
                    range: Some(doc.range_of(reference.range.clone())),
                })
            });
        }
        Ok(None)
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let Some(doc) = self.documents.get(&uri) else {
            return Ok(None);
        };
        if !css::is_css_capable(&doc.language_id) {
            return Ok(None);
        }
        let caps = self.config.caps();
        self.guarded("textDocument/completion", || {
            analysis::completions(&doc, &self.index, &caps, position)
        })
    }

    async fn completion_resolve(&self, item: CompletionItem) -> Result<CompletionItem> {
        let caps = self.config.caps();
        self.guarded("completionItem/resolve", || {
            analysis::resolve_completion(item, &self.index, &caps)
        })
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(doc) = self.documents.get(&uri) else {
            return Ok(None);
        };
        let caps = self.config.caps();

        if css::is_css_capable(&doc.language_id) {
            return self.guarded("textDocument/definition", || {
                analysis::definition(&doc, &self.index, &caps, position)
            });
        }
        if self.is_token_doc(&doc) {
            return self.guarded("textDocument/definition", || {
                let (token, origin) = self.token_at_in_token_file(&doc, position)?;
                analysis::token_definition(&token, &caps, Some(origin))
            });
        }
        Ok(None)
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        let include_declaration = params.context.include_declaration;
        let Some(doc) = self.documents.get(&uri) else {
            return Ok(None);
        };
        // CSS documents defer to a general CSS language server.
        if css::is_css_capable(&doc.language_id) {
            return Ok(None);
        }
        if !self.is_token_doc(&doc) {
            return Ok(None);
        }
        self.guarded("textDocument/references", || {
            let (token, _) = self.token_at_in_token_file(&doc, position)?;
            let locations = token_file::find_references(
                &token,
                &self.documents.all(),
                &self.workspace.loaded_paths(),
                include_declaration,
            );
            Some(locations)
        })
    }

    async fn document_color(&self, params: DocumentColorParams) -> Result<Vec<ColorInformation>> {
        let Some(doc) = self.documents.get(&params.text_document.uri) else {
            return Ok(vec![]);
        };
        if !css::is_css_capable(&doc.language_id) {
            return Ok(vec![]);
        }
        self.guarded("textDocument/documentColor", || {
            analysis::document_colors(&doc, &self.index)
        })
    }

    async fn color_presentation(
        &self,
        params: ColorPresentationParams,
    ) -> Result<Vec<ColorPresentation>> {
        self.guarded("textDocument/colorPresentation", || {
            analysis::color_presentations(&self.index, &params.color)
        })
    }

    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let Some(doc) = self.documents.get(&params.text_document.uri) else {
            return Ok(None);
        };
        if !css::is_css_capable(&doc.language_id) {
            return Ok(None);
        }
        let caps = self.config.caps();
        self.guarded("textDocument/codeAction", || {
            Some(analysis::code_actions(&doc, &self.index, &caps, params.range))
        })
    }

    async fn code_action_resolve(&self, params: CodeAction) -> Result<CodeAction> {
        // Edits are populated eagerly; resolution is the identity.
        Ok(params)
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        let Some(doc) = self.documents.get(&params.text_document.uri) else {
            return Ok(None);
        };
        if !self.is_token_doc(&doc) {
            return Ok(None);
        }
        self.guarded("textDocument/semanticTokens/full", || {
            let refs = token_file::token_references(&doc.text);
            let data = token_file::encode_semantic_tokens(&doc, &refs);
            Some(SemanticTokensResult::Tokens(SemanticTokens {
                result_id: None,
                data,
            }))
        })
    }

    async fn semantic_tokens_range(
        &self,
        params: SemanticTokensRangeParams,
    ) -> Result<Option<SemanticTokensRangeResult>> {
        let Some(doc) = self.documents.get(&params.text_document.uri) else {
            return Ok(None);
        };
        if !self.is_token_doc(&doc) {
            return Ok(None);
        }
        self.guarded("textDocument/semanticTokens/range", || {
            let start = doc.offset_at(params.range.start);
            let end = doc.offset_at(params.range.end);
            let refs: Vec<_> = token_file::token_references(&doc.text)
                .into_iter()
                .filter(|r| start <= r.range.start && r.range.start < end)
                .collect();
            let data = token_file::encode_semantic_tokens(&doc, &refs);
            Some(SemanticTokensRangeResult::Tokens(SemanticTokens {
                result_id: None,
                data,
            }))
        })
    }

    async fn diagnostic(
        &self,
        params: DocumentDiagnosticParams,
    ) -> Result<DocumentDiagnosticReportResult> {
        let items = match self.documents.get(&params.text_document.uri) {
            Some(doc) if css::is_css_capable(&doc.language_id) => {
                let caps = self.config.caps();
                self.guarded("textDocument/diagnostic", || {
                    diagnostics::compute(&doc, &self.index, &caps)
                })?
            }
            _ => vec![],
        };
        Ok(DocumentDiagnosticReportResult::Report(
            DocumentDiagnosticReport::Full(RelatedFullDocumentDiagnosticReport {
                related_documents: None,
                full_document_diagnostic_report: FullDocumentDiagnosticReport {
                    result_id: None,
                    items,
                },
            }),
        ))
    }
}

/// Start the LSP server over stdio.
pub async fn run_server() {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;
}
