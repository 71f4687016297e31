use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{
    IntegrityReport, LinkedExport, Manifest, NewThought, NoopEvents, SaveOutcome, Session,
    ThoughtData, ThoughtEvents, ThoughtNode, ThoughtStore,
};
use crate::chain::{self, GENESIS_HASH};
use crate::config::ExportConfig;
use crate::error::{StoreError, StoreResult};

/// File-backed thought store.
///
/// Layout per session, partitioned by creation month:
///
/// ```text
/// {root}/{YYYY-MM}/{sessionId}/
///   manifest.json
///   001.json, 002.json, ...
///   branches/{branchId}/001.json, ...
/// ```
///
/// Every write goes through a temp-file-then-rename step, so a crash never
/// leaves a partially written node visible. A per-session `RwLock`
/// serializes the read-compute-write append sequence; sessions are fully
/// independent and proceed in parallel.
pub struct FileThoughtStore {
    root: PathBuf,
    export: ExportConfig,
    events: Arc<dyn ThoughtEvents>,
    sessions: Mutex<HashMap<String, Arc<RwLock<SessionState>>>>,
}

/// In-memory state of one open session.
struct SessionState {
    partition: String,
    manifest: Manifest,
    main: Vec<ThoughtNode>,
    branches: BTreeMap<String, Vec<ThoughtNode>>,
}

impl SessionState {
    fn main_tail(&self) -> Option<&ThoughtNode> {
        self.main.last()
    }

    fn main_by_number(&self, number: u32) -> Option<&ThoughtNode> {
        self.main.iter().find(|n| n.data.thought_number == number)
    }

    fn next_main_number(&self) -> u32 {
        self.main
            .iter()
            .map(|n| n.data.thought_number)
            .max()
            .map_or(1, |max| max + 1)
    }

    fn next_branch_number(&self, branch_id: &str) -> u32 {
        self.branches
            .get(branch_id)
            .into_iter()
            .flatten()
            .map(|n| n.data.thought_number)
            .max()
            .map_or(1, |max| max + 1)
    }
}

impl FileThoughtStore {
    /// Open a store rooted at the given directory, creating it if needed
    pub async fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Thought store opened");
        Ok(Self {
            root,
            export: ExportConfig::default(),
            events: Arc::new(NoopEvents),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Set the export configuration
    pub fn with_export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    /// Register a fire-and-forget event sink
    pub fn with_events(mut self, events: Arc<dyn ThoughtEvents>) -> Self {
        self.events = events;
        self
    }

    fn session_dir(&self, partition: &str, session_id: &str) -> PathBuf {
        self.root.join(partition).join(session_id)
    }

    /// Get the session's in-memory handle, loading it from disk on first
    /// access. A session whose manifest disagrees with its file set is
    /// refused here and never admitted to the registry.
    async fn handle(&self, session_id: &str) -> StoreResult<Arc<RwLock<SessionState>>> {
        let mut registry = self.sessions.lock().await;
        if let Some(handle) = registry.get(session_id) {
            return Ok(handle.clone());
        }

        let state = self.load_session(session_id).await?;
        let handle = Arc::new(RwLock::new(state));
        registry.insert(session_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Locate and load a session from disk, checking the manifest against
    /// the actual file set before admitting it.
    async fn load_session(&self, session_id: &str) -> StoreResult<SessionState> {
        validate_id("sessionId", session_id)?;

        let Some((partition, dir)) = self.find_session_dir(session_id).await? else {
            return Err(StoreError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        };

        let manifest_raw = fs::read(dir.join("manifest.json")).await?;
        let manifest: Manifest = serde_json::from_slice(&manifest_raw)?;
        if manifest.id != session_id {
            return Err(StoreError::integrity(
                session_id,
                format!("manifest identifies a different session: {}", manifest.id),
            ));
        }

        let issues = file_set_issues(&dir, &manifest).await?;
        if !issues.is_empty() {
            // Refuse to load rather than compound corruption; files are
            // left untouched for manual recovery.
            return Err(StoreError::integrity(session_id, issues.join("; ")));
        }

        let mut main = Vec::with_capacity(manifest.thought_files.len());
        for file in &manifest.thought_files {
            main.push(read_node(&dir.join(file)).await?);
        }

        let mut branches = BTreeMap::new();
        for (branch_id, files) in &manifest.branch_files {
            let branch_dir = dir.join("branches").join(branch_id);
            let mut nodes = Vec::with_capacity(files.len());
            for file in files {
                nodes.push(read_node(&branch_dir.join(file)).await?);
            }
            branches.insert(branch_id.clone(), nodes);
        }

        info!(
            session_id,
            thoughts = main.len(),
            branches = branches.len(),
            "Session loaded"
        );

        Ok(SessionState {
            partition,
            manifest,
            main,
            branches,
        })
    }

    /// Scan partition directories for the session.
    async fn find_session_dir(&self, session_id: &str) -> StoreResult<Option<(String, PathBuf)>> {
        let mut partitions = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = partitions.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let candidate = entry.path().join(session_id);
            if fs::try_exists(candidate.join("manifest.json")).await? {
                let partition = entry.file_name().to_string_lossy().into_owned();
                return Ok(Some((partition, candidate)));
            }
        }
        Ok(None)
    }

    /// Persist the manifest for the given state.
    async fn write_manifest(&self, state: &SessionState) -> StoreResult<()> {
        let dir = self.session_dir(&state.partition, &state.manifest.id);
        write_json_atomic(&dir.join("manifest.json"), &state.manifest).await
    }

    /// Rewrite a node file in place (linkage updates only; hashed content
    /// never changes after creation).
    async fn rewrite_node(&self, state: &SessionState, node: &ThoughtNode) -> StoreResult<()> {
        let dir = self.session_dir(&state.partition, &state.manifest.id);
        let path = match &node.data.branch_id {
            Some(branch_id) => dir
                .join("branches")
                .join(branch_id)
                .join(node_file_name(node.data.thought_number)),
            None => dir.join(node_file_name(node.data.thought_number)),
        };
        write_json_atomic(&path, node).await
    }

    /// Close the session if the appended thought was terminal, attempting
    /// the automatic export. Export failure leaves the session open so the
    /// caller can retry manually; the node itself is already durable.
    async fn finish_append(
        &self,
        state: &mut SessionState,
        node: ThoughtNode,
    ) -> StoreResult<SaveOutcome> {
        let terminal = !node.data.next_thought_needed;
        let mut export_error = None;

        if terminal && self.export.auto_export {
            match self.write_export(state).await {
                Ok(path) => {
                    state.manifest.metadata.open = false;
                    info!(
                        session_id = %state.manifest.id,
                        path = %path.display(),
                        "Session closed and exported"
                    );
                }
                Err(e) => {
                    warn!(
                        session_id = %state.manifest.id,
                        error = %e,
                        "Auto-export failed; session left open"
                    );
                    export_error = Some(e.to_string());
                }
            }
        } else if terminal {
            state.manifest.metadata.open = false;
        } else {
            state.manifest.metadata.open = true;
        }

        self.write_manifest(state).await?;

        Ok(SaveOutcome {
            session_closed: !state.manifest.metadata.open,
            export_error,
            node,
        })
    }

    /// Serialize the linked export for a session the caller holds a lock on.
    async fn write_export(&self, state: &SessionState) -> StoreResult<PathBuf> {
        let export = linked_export_from(state);
        fs::create_dir_all(&self.export.dir).await?;
        let path = self.export.dir.join(format!("{}.json", state.manifest.id));
        write_json_atomic(&path, &export).await?;
        Ok(path)
    }

    /// Write the linked export for a session on demand (manual retry path).
    pub async fn export_session(&self, session_id: &str) -> StoreResult<PathBuf> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;
        self.write_export(&state).await
    }

    async fn append_main(&self, session_id: &str, input: NewThought) -> StoreResult<SaveOutcome> {
        let handle = self.handle(session_id).await?;
        let mut state = handle.write().await;

        let number = input.thought_number.unwrap_or_else(|| state.next_main_number());
        let id = format!("{}:{}", session_id, number);
        if state.main.iter().any(|n| n.id == id) {
            return Err(StoreError::DuplicateThought { thought_id: id });
        }

        // Revisions point at the node they supersede; the original is never
        // mutated.
        let revises_node = match input.revises_thought {
            Some(revised) => Some(
                state
                    .main_by_number(revised)
                    .map(|n| n.id.clone())
                    .ok_or_else(|| StoreError::ThoughtNotFound {
                        thought_id: format!("{}:{}", session_id, revised),
                    })?,
            ),
            None => None,
        };

        let parent_hash = state
            .main_tail()
            .map(|n| n.content_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let prev = state.main_tail().map(|n| n.id.clone());

        let inherited_total = state
            .main_tail()
            .map(|n| n.data.total_thoughts)
            .unwrap_or(number);
        let total = input.total_thoughts.unwrap_or(inherited_total).max(number);

        let timestamp = input.timestamp.unwrap_or_else(Utc::now);
        let content_hash = chain::compute_hash(
            &input.thought,
            number,
            &parent_hash,
            input.agent_id.as_deref(),
            timestamp,
        );

        let node = ThoughtNode {
            id: id.clone(),
            data: ThoughtData {
                thought: input.thought,
                thought_number: number,
                total_thoughts: total,
                next_thought_needed: input.next_thought_needed,
                is_revision: input.is_revision.or(revises_node.as_ref().map(|_| true)),
                revises_thought: input.revises_thought,
                branch_from_thought: None,
                branch_id: None,
                agent_id: input.agent_id,
                timestamp,
            },
            prev: prev.clone(),
            next: Vec::new(),
            revises_node: revises_node.clone(),
            branch_origin: None,
            parent_hash,
            content_hash,
        };

        // Persist the node first, then linkage and manifest. Each step is
        // individually atomic.
        let dir = self.session_dir(&state.partition, session_id);
        write_json_atomic(&dir.join(node_file_name(number)), &node).await?;

        if let Some(prev_id) = &prev {
            if let Some(tail) = state.main.iter_mut().find(|n| &n.id == prev_id) {
                tail.next.push(id.clone());
                let tail = tail.clone();
                self.rewrite_node(&state, &tail).await?;
            }
        }

        state.manifest.thought_files.push(node_file_name(number));
        state.manifest.metadata.thought_count += 1;
        let now = Utc::now();
        state.manifest.metadata.updated_at = now;
        state.manifest.metadata.last_accessed_at = now;

        state.main.push(node.clone());

        debug!(session_id, thought_number = number, "Thought appended");

        let outcome = self.finish_append(&mut state, node).await?;
        match &outcome.node.revises_node {
            Some(revised) => self.events.on_revise(session_id, &outcome.node, revised),
            None => self.events.on_append(session_id, &outcome.node),
        }
        Ok(outcome)
    }

    async fn append_branch(
        &self,
        session_id: &str,
        branch_id: &str,
        input: NewThought,
    ) -> StoreResult<SaveOutcome> {
        validate_id("branchId", branch_id)?;
        let Some(fork_number) = input.branch_from_thought else {
            return Err(StoreError::validation(
                "branchFromThought",
                "required when branchId is set",
            ));
        };

        let handle = self.handle(session_id).await?;
        let mut state = handle.write().await;

        let is_new_branch = !state.branches.contains_key(branch_id);

        // First branch thought chains off the fork node's hash; later ones
        // chain off the branch's own tail.
        let (parent_hash, prev, branch_origin) = if is_new_branch {
            let origin = state.main_by_number(fork_number).ok_or_else(|| {
                StoreError::ThoughtNotFound {
                    thought_id: format!("{}:{}", session_id, fork_number),
                }
            })?;
            (origin.content_hash.clone(), None, Some(origin.id.clone()))
        } else {
            let tail = state
                .branches
                .get(branch_id)
                .and_then(|nodes| nodes.last())
                .ok_or_else(|| StoreError::BranchNotFound {
                    branch_id: branch_id.to_string(),
                })?;
            (tail.content_hash.clone(), Some(tail.id.clone()), None)
        };

        let number = input
            .thought_number
            .unwrap_or_else(|| state.next_branch_number(branch_id));
        let id = format!("{}:{}:{}", session_id, branch_id, number);
        if state
            .branches
            .get(branch_id)
            .is_some_and(|nodes| nodes.iter().any(|n| n.id == id))
        {
            return Err(StoreError::DuplicateThought { thought_id: id });
        }

        let inherited_total = state
            .branches
            .get(branch_id)
            .and_then(|nodes| nodes.last())
            .map(|n| n.data.total_thoughts)
            .unwrap_or(number);
        let total = input.total_thoughts.unwrap_or(inherited_total).max(number);

        let timestamp = input.timestamp.unwrap_or_else(Utc::now);
        let content_hash = chain::compute_hash(
            &input.thought,
            number,
            &parent_hash,
            input.agent_id.as_deref(),
            timestamp,
        );

        let node = ThoughtNode {
            id: id.clone(),
            data: ThoughtData {
                thought: input.thought,
                thought_number: number,
                total_thoughts: total,
                next_thought_needed: input.next_thought_needed,
                is_revision: input.is_revision,
                revises_thought: input.revises_thought,
                branch_from_thought: Some(fork_number),
                branch_id: Some(branch_id.to_string()),
                agent_id: input.agent_id,
                timestamp,
            },
            prev,
            next: Vec::new(),
            revises_node: None,
            branch_origin: branch_origin.clone(),
            parent_hash,
            content_hash,
        };

        let dir = self.session_dir(&state.partition, session_id);
        let branch_dir = dir.join("branches").join(branch_id);
        fs::create_dir_all(&branch_dir).await?;
        write_json_atomic(&branch_dir.join(node_file_name(number)), &node).await?;

        if is_new_branch {
            // The fork node gains a second child: the branch root.
            if let Some(origin_id) = &branch_origin {
                if let Some(origin) = state.main.iter_mut().find(|n| &n.id == origin_id) {
                    origin.next.push(id.clone());
                    let origin = origin.clone();
                    self.rewrite_node(&state, &origin).await?;
                }
            }
            state.manifest.metadata.branch_count += 1;
        } else if let Some(prev_id) = &node.prev {
            if let Some(tail) = state
                .branches
                .get_mut(branch_id)
                .and_then(|nodes| nodes.iter_mut().find(|n| &n.id == prev_id))
            {
                tail.next.push(id.clone());
                let tail = tail.clone();
                self.rewrite_node(&state, &tail).await?;
            }
        }

        state
            .manifest
            .branch_files
            .entry(branch_id.to_string())
            .or_default()
            .push(node_file_name(number));
        state.manifest.metadata.thought_count += 1;
        let now = Utc::now();
        state.manifest.metadata.updated_at = now;
        state.manifest.metadata.last_accessed_at = now;

        state
            .branches
            .entry(branch_id.to_string())
            .or_default()
            .push(node.clone());

        debug!(
            session_id,
            branch_id,
            thought_number = number,
            new_branch = is_new_branch,
            "Branch thought appended"
        );

        let outcome = self.finish_append(&mut state, node).await?;
        self.events.on_branch(session_id, branch_id, &outcome.node);
        Ok(outcome)
    }
}

#[async_trait]
impl ThoughtStore for FileThoughtStore {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        validate_id("sessionId", &session.id)?;
        if self.find_session_dir(&session.id).await?.is_some() {
            return Err(StoreError::validation(
                "sessionId",
                format!("session {} already exists", session.id),
            ));
        }

        let partition = session.created_at.format("%Y-%m").to_string();
        let dir = self.session_dir(&partition, &session.id);
        fs::create_dir_all(&dir).await?;

        let manifest = Manifest::new(session.clone());
        write_json_atomic(&dir.join("manifest.json"), &manifest).await?;

        let state = SessionState {
            partition,
            manifest,
            main: Vec::new(),
            branches: BTreeMap::new(),
        };
        self.sessions
            .lock()
            .await
            .insert(session.id.clone(), Arc::new(RwLock::new(state)));

        info!(session_id = %session.id, "Session created");
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Session> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;
        Ok(state.manifest.metadata.clone())
    }

    async fn save_thought(&self, session_id: &str, input: NewThought) -> StoreResult<SaveOutcome> {
        // The branch invariant is checked before any mutation, whichever
        // entry point the caller used.
        if input.branch_id.is_some() && input.branch_from_thought.is_none() {
            return Err(StoreError::validation(
                "branchFromThought",
                "required when branchId is set",
            ));
        }

        match input.branch_id.clone() {
            Some(branch_id) => self.append_branch(session_id, &branch_id, input).await,
            None => self.append_main(session_id, input).await,
        }
    }

    async fn save_branch_thought(
        &self,
        session_id: &str,
        branch_id: &str,
        input: NewThought,
    ) -> StoreResult<SaveOutcome> {
        self.append_branch(session_id, branch_id, input).await
    }

    async fn get_thoughts(&self, session_id: &str) -> StoreResult<Vec<ThoughtNode>> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;
        Ok(state.main.clone())
    }

    async fn get_thought(&self, session_id: &str, thought_number: u32) -> StoreResult<ThoughtNode> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;
        state
            .main_by_number(thought_number)
            .cloned()
            .ok_or_else(|| StoreError::ThoughtNotFound {
                thought_id: format!("{}:{}", session_id, thought_number),
            })
    }

    async fn get_branch(&self, session_id: &str, branch_id: &str) -> StoreResult<Vec<ThoughtNode>> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;
        state
            .branches
            .get(branch_id)
            .cloned()
            .ok_or_else(|| StoreError::BranchNotFound {
                branch_id: branch_id.to_string(),
            })
    }

    async fn list_branches(&self, session_id: &str) -> StoreResult<Vec<String>> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;
        Ok(state.branches.keys().cloned().collect())
    }

    async fn validate_session_integrity(&self, session_id: &str) -> StoreResult<IntegrityReport> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;

        let dir = self.session_dir(&state.partition, session_id);
        let mut issues = file_set_issues(&dir, &state.manifest).await?;

        let main_chain = chain::verify_chain(&state.main);
        if let Some(failure) = &main_chain.failure {
            issues.push(format!("main chain: {}", failure));
        }

        let mut branches = BTreeMap::new();
        for (branch_id, nodes) in &state.branches {
            let verification = match nodes.first().and_then(|n| n.data.branch_from_thought) {
                Some(fork) => match state.main_by_number(fork) {
                    Some(origin) => chain::verify_chain_from(nodes, &origin.content_hash),
                    None => {
                        issues.push(format!(
                            "branch {}: fork thought {} missing from main chain",
                            branch_id, fork
                        ));
                        chain::verify_chain_from(nodes, GENESIS_HASH)
                    }
                },
                None => chain::verify_chain_from(nodes, GENESIS_HASH),
            };
            if let Some(failure) = &verification.failure {
                issues.push(format!("branch {}: {}", branch_id, failure));
            }
            branches.insert(branch_id.clone(), verification);
        }

        let valid = issues.is_empty();
        Ok(IntegrityReport {
            session_id: session_id.to_string(),
            valid,
            issues,
            main_chain,
            branches,
        })
    }

    async fn linked_export(&self, session_id: &str) -> StoreResult<LinkedExport> {
        let handle = self.handle(session_id).await?;
        let state = handle.read().await;
        Ok(linked_export_from(&state))
    }
}

/// All nodes in creation order: timestamps first, ids as the deterministic
/// tiebreak for same-instant writes from concurrent branch authors.
fn linked_export_from(state: &SessionState) -> LinkedExport {
    let mut nodes: Vec<ThoughtNode> = state
        .main
        .iter()
        .chain(state.branches.values().flatten())
        .cloned()
        .collect();
    nodes.sort_by(|a, b| {
        a.data
            .timestamp
            .cmp(&b.data.timestamp)
            .then_with(|| a.id.cmp(&b.id))
    });
    LinkedExport {
        session: state.manifest.metadata.clone(),
        nodes,
    }
}

fn node_file_name(thought_number: u32) -> String {
    format!("{:03}.json", thought_number)
}

/// Ids become path components; restrict to filesystem-safe characters and
/// reject traversal outright.
fn validate_id(field: &str, id: &str) -> StoreResult<()> {
    if id.is_empty() {
        return Err(StoreError::validation(field, "must not be empty"));
    }
    if id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(StoreError::validation(
            field,
            "only alphanumeric characters, '-' and '_' are allowed",
        ))
    }
}

/// Serialize to a temp file in the target directory, then rename into place.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_node(path: &Path) -> StoreResult<ThoughtNode> {
    let raw = fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Compare the manifest's file list against what is actually on disk, in
/// both directions. Temp files from interrupted writes are ignored.
async fn file_set_issues(dir: &Path, manifest: &Manifest) -> StoreResult<Vec<String>> {
    let mut issues = Vec::new();

    let on_disk = list_node_files(dir).await?;
    for file in &manifest.thought_files {
        if !on_disk.contains(file) {
            issues.push(format!("manifest lists missing file {}", file));
        }
    }
    for file in &on_disk {
        if !manifest.thought_files.contains(file) {
            issues.push(format!("unmanifested file {}", file));
        }
    }

    for (branch_id, files) in &manifest.branch_files {
        let branch_dir = dir.join("branches").join(branch_id);
        let on_disk = list_node_files(&branch_dir).await?;
        for file in files {
            if !on_disk.contains(file) {
                issues.push(format!(
                    "manifest lists missing file branches/{}/{}",
                    branch_id, file
                ));
            }
        }
        for file in &on_disk {
            if !files.contains(file) {
                issues.push(format!("unmanifested file branches/{}/{}", branch_id, file));
            }
        }
    }

    Ok(issues)
}

/// Node files in a directory: `*.json` except the manifest itself.
async fn list_node_files(dir: &Path) -> StoreResult<Vec<String>> {
    let mut files = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") && name != "manifest.json" {
            files.push(name);
        }
    }
    Ok(files)
}
