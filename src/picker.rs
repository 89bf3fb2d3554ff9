//! Knowledge-base picker workflow.
//!
//! One explicit state machine replaces the scattered flags a UI would
//! otherwise juggle: authentication, folder navigation over a back-stack,
//! multi-select with folder/descendant warnings, pure search/sort views,
//! and a two-phase create-then-sync commit.
//!
//! ```text
//! Idle ──connect()──▶ Authenticating ──▶ Browsing ◀──▶ (enter/back)
//!                          │                │
//!                          │            commit()
//!                          ▼                ▼
//!                        Failed ◀────── Committing ──▶ Done
//! ```
//!
//! Design points:
//! - The navigation stack holds **resolved folder ids**, so `back()` never
//!   re-derives a parent from a display path.
//! - Listings carry a generation number; a response from a superseded
//!   request is dropped instead of overwriting newer state.
//! - Create failure never triggers sync, and any commit failure leaves the
//!   selection intact for retry.
//! - Selecting a directory whose descendants are already individually
//!   selected records a non-blocking warning and still adds the directory.
//! - Search and sort are re-derived views over the loaded listing; they
//!   never touch the network.
//!
//! The backend is a trait seam ([`PickerBackend`]) so the workflow can be
//! driven against [`KbClient`](crate::client::KbClient) or a scripted test
//! double.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

use crate::client::KbClient;
use crate::error::ClientResult;
use crate::models::{FileNode, KnowledgeBase, SortField, SortKey, SyncOutcome};

/// The subset of client operations the picker needs.
#[async_trait]
pub trait PickerBackend: Send {
    async fn login(&mut self, email: &str, password: &str) -> ClientResult<()>;
    async fn list_files(&mut self, parent_id: Option<&str>) -> ClientResult<Vec<FileNode>>;
    async fn create_knowledge_base(
        &mut self,
        resource_ids: &[String],
    ) -> ClientResult<KnowledgeBase>;
    async fn sync_knowledge_base(&mut self, kb_id: &str) -> ClientResult<SyncOutcome>;
}

#[async_trait]
impl PickerBackend for KbClient {
    async fn login(&mut self, email: &str, password: &str) -> ClientResult<()> {
        KbClient::login(self, email, password).await
    }

    async fn list_files(&mut self, parent_id: Option<&str>) -> ClientResult<Vec<FileNode>> {
        KbClient::list_files(self, parent_id).await
    }

    async fn create_knowledge_base(
        &mut self,
        resource_ids: &[String],
    ) -> ClientResult<KnowledgeBase> {
        KbClient::create_knowledge_base(self, resource_ids).await
    }

    async fn sync_knowledge_base(&mut self, kb_id: &str) -> ClientResult<SyncOutcome> {
        KbClient::sync_knowledge_base(self, kb_id).await
    }
}

/// Workflow state. Exactly one of these holds at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerState {
    /// Nothing connected yet.
    Idle,
    /// Login and connection resolution in flight.
    Authenticating,
    /// Listing loaded; navigation and selection available.
    Browsing,
    /// Create-then-sync in flight.
    Committing,
    /// Commit finished; the knowledge base exists and indexing was
    /// triggered.
    Done {
        kb_id: String,
        task_id: Option<String>,
    },
    /// Authentication or commit failed. The selection survives so the
    /// operation can be retried.
    Failed { message: String },
}

/// One resolved entry of the navigation stack.
#[derive(Debug, Clone)]
pub struct Crumb {
    pub resource_id: String,
    pub label: String,
}

/// How a finished listing updates the navigation stack.
#[derive(Debug)]
pub enum NavMove {
    /// Push the entered folder.
    Enter(Crumb),
    /// Pop the current folder.
    Back,
    /// Leave the stack as is.
    Refresh,
}

/// The picker workflow over some backend.
pub struct Picker<B: PickerBackend> {
    backend: B,
    state: PickerState,
    files: Vec<FileNode>,
    crumbs: Vec<Crumb>,
    selection: HashSet<String>,
    query: String,
    sort: SortKey,
    warning: Option<String>,
    last_error: Option<String>,
    generation: u64,
}

impl<B: PickerBackend> Picker<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: PickerState::Idle,
            files: Vec::new(),
            crumbs: Vec::new(),
            selection: HashSet::new(),
            query: String::new(),
            sort: SortKey::default(),
            warning: None,
            last_error: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> &PickerState {
        &self.state
    }

    pub fn selection(&self) -> &HashSet<String> {
        &self.selection
    }

    /// The most recent non-terminal error (navigation, empty commit), if
    /// any. Cleared by the next successful operation.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The most recent selection warning, if any.
    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn breadcrumb(&self) -> String {
        self.crumbs
            .iter()
            .map(|c| c.label.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Authenticate and load the root listing.
    ///
    /// Allowed from `Idle` and `Failed` (retry). Login failure transitions
    /// to `Failed` without issuing the listing call.
    pub async fn connect(&mut self, email: &str, password: &str) {
        if !matches!(self.state, PickerState::Idle | PickerState::Failed { .. }) {
            self.last_error = Some("already connected".to_string());
            return;
        }
        self.state = PickerState::Authenticating;

        if let Err(e) = self.backend.login(email, password).await {
            self.state = PickerState::Failed {
                message: format!("Failed to connect: {}", e),
            };
            return;
        }

        let token = self.begin_listing();
        match self.backend.list_files(None).await {
            Ok(files) => {
                self.finish_listing(token, Ok(files), NavMove::Refresh);
                self.state = PickerState::Browsing;
            }
            Err(e) => {
                self.state = PickerState::Failed {
                    message: format!("Failed to load files: {}", e),
                };
            }
        }
    }

    /// Enter a folder from the current listing and load its children.
    pub async fn enter(&mut self, resource_id: &str) {
        let Some(node) = self.files.iter().find(|f| f.resource_id == resource_id) else {
            self.last_error = Some(format!("no such entry in this folder: {}", resource_id));
            return;
        };
        if !node.is_directory() {
            self.last_error = Some(format!("{} is not a folder", node.name()));
            return;
        }
        let crumb = Crumb {
            resource_id: node.resource_id.clone(),
            label: node.name().to_string(),
        };

        let token = self.begin_listing();
        let result = self.backend.list_files(Some(&crumb.resource_id)).await;
        self.finish_listing(token, result, NavMove::Enter(crumb));
    }

    /// Pop the navigation stack and reload the parent's children, resolved
    /// by the stored folder id rather than by display path.
    pub async fn back(&mut self) {
        if self.crumbs.is_empty() {
            return;
        }
        let parent_id = if self.crumbs.len() >= 2 {
            Some(self.crumbs[self.crumbs.len() - 2].resource_id.clone())
        } else {
            None
        };

        let token = self.begin_listing();
        let result = self.backend.list_files(parent_id.as_deref()).await;
        self.finish_listing(token, result, NavMove::Back);
    }

    /// Starts a listing request and returns its generation token.
    ///
    /// Exposed together with [`finish_listing`](Self::finish_listing) so a
    /// driver that overlaps requests can apply responses out of band; a
    /// response whose token has been superseded is dropped.
    pub fn begin_listing(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Applies a finished listing, unless a newer request has started since
    /// `token` was issued.
    pub fn finish_listing(
        &mut self,
        token: u64,
        result: ClientResult<Vec<FileNode>>,
        nav: NavMove,
    ) {
        if token != self.generation {
            debug!(token, current = self.generation, "dropping stale listing");
            return;
        }
        match result {
            Ok(files) => {
                match nav {
                    NavMove::Enter(crumb) => self.crumbs.push(crumb),
                    NavMove::Back => {
                        self.crumbs.pop();
                    }
                    NavMove::Refresh => {}
                }
                self.files = files;
                self.last_error = None;
            }
            Err(e) => {
                self.last_error = Some(format!("Failed to load folder contents: {}", e));
            }
        }
    }

    /// Toggle a resource id in the selection set. Returns the new
    /// membership state.
    ///
    /// Selecting a directory whose descendants in the current listing are
    /// already individually selected records a warning; the directory is
    /// added regardless.
    pub fn toggle(&mut self, resource_id: &str) -> bool {
        self.warning = None;

        if self.selection.remove(resource_id) {
            return false;
        }

        if let Some(node) = self.files.iter().find(|f| f.resource_id == resource_id) {
            if node.is_directory() {
                let prefix = format!("{}/", node.inode_path.path);
                let conflicting = self
                    .files
                    .iter()
                    .any(|f| f.inode_path.path.starts_with(&prefix) && self.selection.contains(&f.resource_id));
                if conflicting {
                    self.warning = Some(format!(
                        "Some files inside \"{}\" are already selected individually",
                        node.name()
                    ));
                }
            }
        }

        self.selection.insert(resource_id.to_string());
        true
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
    }

    /// The current listing filtered by the search query and ordered by the
    /// sort key. Pure view; never triggers a network call.
    pub fn visible(&self) -> Vec<&FileNode> {
        let mut nodes = filter_by_name(&self.files, &self.query);
        sort_nodes(&mut nodes, self.sort);
        nodes
    }

    /// Create a knowledge base from the selection, then trigger its sync.
    ///
    /// Create failure short-circuits: sync is never invoked and the failure
    /// names the creation phase. Either failure leaves the selection intact
    /// for retry; success clears the transient state and reaches `Done`.
    pub async fn commit(&mut self) {
        if !matches!(
            self.state,
            PickerState::Browsing | PickerState::Failed { .. }
        ) {
            self.last_error = Some("nothing to commit in this state".to_string());
            return;
        }
        if self.selection.is_empty() {
            self.last_error = Some("no files selected".to_string());
            return;
        }

        self.state = PickerState::Committing;
        let mut resource_ids: Vec<String> = self.selection.iter().cloned().collect();
        resource_ids.sort();

        let kb = match self.backend.create_knowledge_base(&resource_ids).await {
            Ok(kb) => kb,
            Err(e) => {
                self.state = PickerState::Failed {
                    message: format!("Failed to create knowledge base: {}", e),
                };
                return;
            }
        };

        match self.backend.sync_knowledge_base(&kb.knowledge_base_id).await {
            Ok(outcome) => {
                self.selection.clear();
                self.query.clear();
                self.warning = None;
                self.last_error = None;
                self.state = PickerState::Done {
                    kb_id: kb.knowledge_base_id,
                    task_id: outcome.upsert_group_task_id,
                };
            }
            Err(e) => {
                self.state = PickerState::Failed {
                    message: format!("Failed to sync knowledge base: {}", e),
                };
            }
        }
    }

    /// Reset all transient workflow state. The backend (and its session)
    /// is untouched.
    pub fn close(&mut self) {
        self.state = PickerState::Idle;
        self.files.clear();
        self.crumbs.clear();
        self.selection.clear();
        self.query.clear();
        self.sort = SortKey::default();
        self.warning = None;
        self.last_error = None;
    }
}

/// Case-insensitive substring filter on the display name (last path
/// segment). An empty query returns the listing unchanged.
pub fn filter_by_name<'a>(files: &'a [FileNode], query: &str) -> Vec<&'a FileNode> {
    if query.is_empty() {
        return files.iter().collect();
    }
    let needle = query.to_lowercase();
    files
        .iter()
        .filter(|f| f.name().to_lowercase().contains(&needle))
        .collect()
}

/// Stable in-place sort by the given key. Directories and files are not
/// segregated; ties keep their listing order, which makes repeated sorting
/// idempotent.
pub fn sort_nodes(nodes: &mut Vec<&FileNode>, key: SortKey) {
    nodes.sort_by(|a, b| {
        let ord = match key.field {
            SortField::Name => a.name().to_lowercase().cmp(&b.name().to_lowercase()),
            SortField::ModifiedAt => a.updated_at.cmp(&b.updated_at),
        };
        if key.ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::models::{InodePath, InodeType};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn file(id: &str, path: &str) -> FileNode {
        node(id, path, InodeType::File)
    }

    fn dir(id: &str, path: &str) -> FileNode {
        node(id, path, InodeType::Directory)
    }

    fn node(id: &str, path: &str, kind: InodeType) -> FileNode {
        FileNode {
            resource_id: id.to_string(),
            inode_type: kind,
            inode_path: InodePath {
                path: path.to_string(),
            },
            status: None,
            created_at: None,
            updated_at: None,
            size: None,
            mime_type: None,
        }
    }

    #[derive(Default)]
    struct MockBackend {
        reject_login: bool,
        fail_create: bool,
        fail_sync: bool,
        /// Listings keyed by parent id; `"root"` for the connection root.
        listings: HashMap<String, Vec<FileNode>>,
        calls: Vec<String>,
    }

    impl MockBackend {
        fn with_root(files: Vec<FileNode>) -> Self {
            let mut listings = HashMap::new();
            listings.insert("root".to_string(), files);
            MockBackend {
                listings,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PickerBackend for MockBackend {
        async fn login(&mut self, _email: &str, _password: &str) -> ClientResult<()> {
            self.calls.push("login".to_string());
            if self.reject_login {
                Err(ClientError::Authentication("invalid_grant".to_string()))
            } else {
                Ok(())
            }
        }

        async fn list_files(&mut self, parent_id: Option<&str>) -> ClientResult<Vec<FileNode>> {
            let key = parent_id.unwrap_or("root").to_string();
            self.calls.push(format!("list:{}", key));
            self.listings
                .get(&key)
                .cloned()
                .ok_or_else(|| ClientError::Upstream {
                    status: 404,
                    detail: format!("no listing for {}", key),
                })
        }

        async fn create_knowledge_base(
            &mut self,
            resource_ids: &[String],
        ) -> ClientResult<KnowledgeBase> {
            self.calls.push(format!("create:{}", resource_ids.join(",")));
            if self.fail_create {
                return Err(ClientError::Upstream {
                    status: 500,
                    detail: "boom".to_string(),
                });
            }
            Ok(KnowledgeBase {
                knowledge_base_id: "kb-1".to_string(),
                connection_id: None,
                name: None,
                description: None,
                connection_source_ids: resource_ids.to_vec(),
                indexing_params: None,
                org_id: None,
                is_empty: None,
                created_at: None,
                updated_at: None,
            })
        }

        async fn sync_knowledge_base(&mut self, kb_id: &str) -> ClientResult<SyncOutcome> {
            self.calls.push(format!("sync:{}", kb_id));
            if self.fail_sync {
                return Err(ClientError::Upstream {
                    status: 500,
                    detail: "sync down".to_string(),
                });
            }
            Ok(SyncOutcome {
                upsert_group_task_id: Some("task-9".to_string()),
                raw: r#"{"upsert_group_task_id":"task-9"}"#.to_string(),
            })
        }
    }

    fn browsing_picker(files: Vec<FileNode>) -> Picker<MockBackend> {
        let mut p = Picker::new(MockBackend::with_root(files.clone()));
        p.state = PickerState::Browsing;
        p.files = files;
        p
    }

    #[tokio::test]
    async fn rejected_login_fails_without_listing() {
        let mut backend = MockBackend::with_root(vec![file("f1", "a.txt")]);
        backend.reject_login = true;
        let mut p = Picker::new(backend);

        p.connect("a@b.c", "nope").await;

        assert!(matches!(p.state(), PickerState::Failed { .. }));
        assert_eq!(p.backend().calls, vec!["login"]);
    }

    #[tokio::test]
    async fn connect_loads_root_listing() {
        let mut p = Picker::new(MockBackend::with_root(vec![
            file("f1", "a.txt"),
            dir("d1", "docs"),
        ]));

        p.connect("a@b.c", "pw").await;

        assert_eq!(*p.state(), PickerState::Browsing);
        assert_eq!(p.visible().len(), 2);
        assert_eq!(p.backend().calls, vec!["login", "list:root"]);
    }

    #[tokio::test]
    async fn toggle_is_an_involution() {
        let mut p = browsing_picker(vec![file("f1", "a.txt")]);

        assert!(!p.selection().contains("f1"));
        assert!(p.toggle("f1"));
        assert!(p.selection().contains("f1"));
        assert!(!p.toggle("f1"));
        assert!(!p.selection().contains("f1"));
    }

    #[tokio::test]
    async fn selecting_directory_with_selected_descendant_warns_but_adds() {
        let mut p = browsing_picker(vec![
            dir("d1", "docs"),
            file("f1", "docs/plan.md"),
            file("f2", "notes.txt"),
        ]);

        p.toggle("f1");
        assert!(p.warning().is_none());

        assert!(p.toggle("d1"));
        assert!(p.warning().unwrap().contains("docs"));
        // the warning is non-blocking: both ids are now selected
        assert!(p.selection().contains("d1"));
        assert!(p.selection().contains("f1"));
    }

    #[tokio::test]
    async fn sibling_selection_does_not_warn() {
        let mut p = browsing_picker(vec![dir("d1", "docs"), file("f2", "notes.txt")]);
        p.toggle("f2");
        p.toggle("d1");
        assert!(p.warning().is_none());
    }

    #[test]
    fn empty_query_is_identity() {
        let files = vec![file("f1", "a.txt"), file("f2", "b.txt")];
        let filtered = filter_by_name(&files, "");
        let ids: Vec<_> = filtered.iter().map(|f| f.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2"]);
    }

    #[test]
    fn filter_matches_last_segment_case_insensitively() {
        let files = vec![
            file("f1", "docs/Quarterly-Report.PDF"),
            file("f2", "docs/readme.md"),
            // directory part matches, name does not: must be excluded
            file("f3", "reports/summary.txt"),
        ];
        let ids: Vec<_> = filter_by_name(&files, "report")
            .iter()
            .map(|f| f.resource_id.as_str())
            .collect();
        assert_eq!(ids, vec!["f1"]);
    }

    #[test]
    fn sorting_is_idempotent() {
        let files = vec![
            file("f1", "zulu.txt"),
            file("f2", "Alpha.txt"),
            file("f3", "mike.txt"),
        ];
        let key: SortKey = "name_asc".parse().unwrap();

        let mut once = filter_by_name(&files, "");
        sort_nodes(&mut once, key);
        let mut twice = once.clone();
        sort_nodes(&mut twice, key);

        let a: Vec<_> = once.iter().map(|f| f.resource_id.as_str()).collect();
        let b: Vec<_> = twice.iter().map(|f| f.resource_id.as_str()).collect();
        assert_eq!(a, b);
        assert_eq!(a, vec!["f2", "f3", "f1"]);
    }

    #[test]
    fn sort_by_date_descending() {
        let mut old = file("f1", "old.txt");
        old.updated_at = Some(chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut new = file("f2", "new.txt");
        new.updated_at = Some(chrono::Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        let files = vec![old, new];
        let mut nodes = filter_by_name(&files, "");
        sort_nodes(&mut nodes, "date_desc".parse().unwrap());
        let ids: Vec<_> = nodes.iter().map(|f| f.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["f2", "f1"]);
    }

    #[tokio::test]
    async fn create_failure_short_circuits_sync() {
        let mut p = browsing_picker(vec![file("f1", "a.txt"), file("f2", "b.txt")]);
        p.backend.fail_create = true;
        p.toggle("f1");
        p.toggle("f2");

        p.commit().await;

        match p.state() {
            PickerState::Failed { message } => assert!(message.contains("create")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(p.backend().calls.iter().any(|c| c.starts_with("create:")));
        assert!(!p.backend().calls.iter().any(|c| c.starts_with("sync:")));
        // selection survives for retry
        assert_eq!(p.selection().len(), 2);
    }

    #[tokio::test]
    async fn sync_failure_reports_sync_and_keeps_selection() {
        let mut p = browsing_picker(vec![file("f1", "a.txt")]);
        p.backend.fail_sync = true;
        p.toggle("f1");

        p.commit().await;

        match p.state() {
            PickerState::Failed { message } => assert!(message.contains("sync")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(p.selection().contains("f1"));
    }

    #[tokio::test]
    async fn commit_success_reaches_done_and_clears_selection() {
        let mut p = browsing_picker(vec![file("f1", "a.txt"), file("f2", "b.txt")]);
        p.toggle("f1");
        p.toggle("f2");

        p.commit().await;

        match p.state() {
            PickerState::Done { kb_id, task_id } => {
                assert_eq!(kb_id, "kb-1");
                assert_eq!(task_id.as_deref(), Some("task-9"));
            }
            other => panic!("expected Done, got {:?}", other),
        }
        assert!(p.selection().is_empty());
        assert_eq!(
            p.backend().calls.last().unwrap(),
            "sync:kb-1"
        );
        // create saw the ids in deterministic order
        assert!(p.backend().calls.contains(&"create:f1,f2".to_string()));
    }

    #[tokio::test]
    async fn commit_with_empty_selection_is_rejected_locally() {
        let mut p = browsing_picker(vec![file("f1", "a.txt")]);
        p.commit().await;
        assert_eq!(*p.state(), PickerState::Browsing);
        assert!(p.last_error().unwrap().contains("selected"));
        assert!(p.backend().calls.is_empty());
    }

    #[tokio::test]
    async fn stale_listing_is_dropped() {
        let mut p = browsing_picker(vec![file("f1", "a.txt")]);

        let stale = p.begin_listing();
        let _newer = p.begin_listing();
        p.finish_listing(stale, Ok(vec![file("f9", "z.txt")]), NavMove::Refresh);

        // the superseded response did not overwrite the listing
        let ids: Vec<_> = p.visible().iter().map(|f| f.resource_id.clone()).collect();
        assert_eq!(ids, vec!["f1"]);
    }

    #[tokio::test]
    async fn back_uses_resolved_parent_id() {
        let mut backend = MockBackend::with_root(vec![dir("d-a", "alpha")]);
        backend
            .listings
            .insert("d-a".to_string(), vec![dir("d-b", "alpha/beta")]);
        backend
            .listings
            .insert("d-b".to_string(), vec![file("f1", "alpha/beta/deep.txt")]);

        let mut p = Picker::new(backend);
        p.connect("a@b.c", "pw").await;
        p.enter("d-a").await;
        p.enter("d-b").await;
        assert_eq!(p.breadcrumb(), "alpha / beta");

        p.back().await;

        assert_eq!(p.breadcrumb(), "alpha");
        assert_eq!(p.backend().calls.last().unwrap(), "list:d-a");
        let ids: Vec<_> = p.visible().iter().map(|f| f.resource_id.clone()).collect();
        assert_eq!(ids, vec!["d-b"]);
    }

    #[tokio::test]
    async fn entering_a_file_sets_an_error_without_a_network_call() {
        let mut p = browsing_picker(vec![file("f1", "a.txt")]);
        p.enter("f1").await;
        assert!(p.last_error().unwrap().contains("not a folder"));
        assert!(p.backend().calls.is_empty());
    }

    #[tokio::test]
    async fn close_resets_transient_state() {
        let mut p = browsing_picker(vec![dir("d1", "docs"), file("f1", "docs/a.txt")]);
        p.toggle("f1");
        p.set_query("doc");

        p.close();

        assert_eq!(*p.state(), PickerState::Idle);
        assert!(p.selection().is_empty());
        assert!(p.visible().is_empty());
        assert_eq!(p.breadcrumb(), "");
    }
}
