//! Typed client for the knowledge-base proxy surface.
//!
//! [`KbClient`] owns one [`Session`] and talks to the proxy's `/api`
//! endpoints. Every operation returns `Result<_, ClientError>` — the sync
//! trigger included — so callers see one error contract across the board.
//!
//! # Login sequence
//!
//! `login` performs three upstream calls in order:
//!
//! 1. `POST /auth` — exchange email/password for an access token.
//! 2. `GET /organizations/me/current` — resolve the caller's org id.
//! 3. `GET /connections?connection_provider=<p>&limit=1` — resolve the first
//!    storage connection for the configured provider.
//!
//! A rejected credential exchange leaves the session untouched. An empty
//! connection list fails with [`ClientError::NoConnection`].
//!
//! # Preconditions
//!
//! Operations that need a session field check it before any network I/O:
//! `list_files` and `create_knowledge_base` require the connection id,
//! `sync_knowledge_base` requires the token and resolves the org id lazily
//! if a prior login did not.

use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, IndexingConfig};
use crate::error::{ClientError, ClientResult};
use crate::models::{
    Connection, FileNode, IndexingParams, KnowledgeBase, KnowledgeBaseListing, Organization,
    SyncOutcome,
};
use crate::session::Session;

/// Client for the proxy's `/api` surface, holding the session it resolved
/// at login.
///
/// One client instance is one session; it is not meant to be shared across
/// concurrent workflows.
pub struct KbClient {
    http: reqwest::Client,
    /// Proxy base, e.g. `http://127.0.0.1:7431/api`.
    base: String,
    provider: String,
    indexing: IndexingConfig,
    session: Session,
}

impl KbClient {
    pub fn new(config: &Config) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base: config.proxy.base.trim_end_matches('/').to_string(),
            provider: config.upstream.connection_provider.clone(),
            indexing: config.indexing.clone(),
            session: Session::new(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Exchange credentials for a token, then resolve the org id and the
    /// first storage connection for the configured provider.
    ///
    /// No session field is mutated unless the credential exchange succeeds.
    pub async fn login(&mut self, email: &str, password: &str) -> ClientResult<()> {
        let resp = self
            .http
            .post(format!("{}/auth", self.base))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ClientError::Authentication(format!(
                "{}: {}",
                status, detail
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))?;
        let token = body
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ClientError::Parse("auth response missing access_token".to_string()))?;

        self.session.set_token(token);
        self.resolve_org().await?;
        self.resolve_connection().await?;
        debug!("login complete, session resolved");
        Ok(())
    }

    async fn resolve_org(&mut self) -> ClientResult<()> {
        let org: Organization = self.get_json("/organizations/me/current", &[]).await?;
        self.session.set_org(org.org_id);
        Ok(())
    }

    async fn resolve_connection(&mut self) -> ClientResult<()> {
        let connections: Vec<Connection> = self
            .get_json(
                "/connections",
                &[
                    ("connection_provider", self.provider.clone()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        match connections.into_iter().next() {
            Some(c) => {
                self.session.set_connection(c.connection_id);
                Ok(())
            }
            None => Err(ClientError::NoConnection {
                provider: self.provider.clone(),
            }),
        }
    }

    /// List immediate children of the connection root (`parent_id = None`)
    /// or of the given folder.
    pub async fn list_files(&mut self, parent_id: Option<&str>) -> ClientResult<Vec<FileNode>> {
        let connection_id = self.session.connection()?.to_string();
        let mut query = vec![("connectionId", connection_id)];
        if let Some(parent) = parent_id {
            query.push(("resourceId", parent.to_string()));
        }
        self.get_json("/files", &query).await
    }

    /// List knowledge bases the caller administers.
    pub async fn list_knowledge_bases(&mut self) -> ClientResult<Vec<KnowledgeBase>> {
        let listing: KnowledgeBaseListing = self.get_json("/knowledge-bases", &[]).await?;
        Ok(listing.admin)
    }

    /// Create a knowledge base from the given resource ids, with the
    /// configured default indexing parameters.
    pub async fn create_knowledge_base(
        &mut self,
        resource_ids: &[String],
    ) -> ClientResult<KnowledgeBase> {
        let connection_id = self.session.connection()?.to_string();
        let token = self.session.token()?.to_string();

        let body = json!({
            "connection_id": connection_id,
            "connection_source_ids": resource_ids,
            "indexing_params": self.default_indexing_params(),
            "org_level_role": null,
            "cron_job_id": null,
        });

        let resp = self
            .http
            .post(format!("{}/knowledge-bases", self.base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                detail: text,
            });
        }

        let kb: KnowledgeBase =
            serde_json::from_str(&text).map_err(|e| ClientError::Parse(e.to_string()))?;
        if kb.knowledge_base_id.is_empty() {
            return Err(ClientError::Parse(
                "knowledge base creation returned no id".to_string(),
            ));
        }
        debug!(kb_id = %kb.knowledge_base_id, "knowledge base created");
        Ok(kb)
    }

    /// Trigger asynchronous indexing for a knowledge base.
    ///
    /// Resolves the org id lazily if a prior call has not. The task handle
    /// is extracted when the upstream returns one; the raw body is kept
    /// either way.
    pub async fn sync_knowledge_base(&mut self, kb_id: &str) -> ClientResult<SyncOutcome> {
        let token = self.session.token()?.to_string();
        if !self.session.has_org() {
            self.resolve_org().await?;
        }
        let org_id = self.session.org()?.to_string();

        debug!(kb_id, org_id = %org_id, "triggering sync");
        let resp = self
            .http
            .get(format!("{}/knowledge-bases/sync", self.base))
            .bearer_auth(token)
            .query(&[("knowledgeBaseId", kb_id), ("orgId", org_id.as_str())])
            .send()
            .await?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                detail: raw,
            });
        }

        let upsert_group_task_id = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .and_then(|v| {
                v.get("upsert_group_task_id")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
            });

        Ok(SyncOutcome {
            upsert_group_task_id,
            raw,
        })
    }

    /// List indexed resources under a path of an existing knowledge base.
    pub async fn get_knowledge_base_resources(
        &mut self,
        kb_id: &str,
        resource_path: &str,
    ) -> ClientResult<Vec<FileNode>> {
        self.get_json(
            &format!("/knowledge-bases/{}/resources/children", kb_id),
            &[("resource_path", resource_path.to_string())],
        )
        .await
    }

    /// Replace the source resource id set of an existing knowledge base.
    pub async fn update_knowledge_base(
        &mut self,
        kb_id: &str,
        resource_ids: &[String],
    ) -> ClientResult<KnowledgeBase> {
        let token = self.session.token()?.to_string();
        let resp = self
            .http
            .patch(format!("{}/knowledge-bases/{}", self.base, kb_id))
            .bearer_auth(token)
            .json(&json!({ "connection_source_ids": resource_ids }))
            .send()
            .await?;
        Self::expect_json(resp).await
    }

    /// Detach a single resource from a knowledge base by its path.
    pub async fn detach_resource(
        &mut self,
        kb_id: &str,
        resource_path: &str,
    ) -> ClientResult<()> {
        let token = self.session.token()?.to_string();
        let resp = self
            .http
            .delete(format!("{}/knowledge-bases/{}", self.base, kb_id))
            .bearer_auth(token)
            .query(&[("resourcePath", resource_path)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                detail,
            });
        }
        Ok(())
    }

    fn default_indexing_params(&self) -> IndexingParams {
        IndexingParams {
            ocr: self.indexing.ocr,
            unstructured: self.indexing.unstructured,
            embedding_params: crate::models::EmbeddingParams {
                embedding_model: self.indexing.embedding_model.clone(),
                api_key: None,
            },
            chunker_params: crate::models::ChunkerParams {
                chunk_size: self.indexing.chunk_size,
                chunk_overlap: self.indexing.chunk_overlap,
                chunker: self.indexing.chunker.clone(),
            },
        }
    }

    /// Authenticated GET returning a deserialized JSON body. Non-2xx maps
    /// to [`ClientError::Upstream`] with the body text as detail.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ClientResult<T> {
        let token = self.session.token()?.to_string();
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;
        Self::expect_json(resp).await
    }

    async fn expect_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> ClientResult<T> {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ClientError::Upstream {
                status: status.as_u16(),
                detail: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| ClientError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> KbClient {
        KbClient::new(&Config::minimal()).unwrap()
    }

    // Precondition failures must surface before any network call; a fresh
    // client has no server to talk to, so a transport error here would mean
    // a request was actually issued.

    #[tokio::test]
    async fn list_files_without_connection_is_a_precondition_error() {
        let mut c = client();
        let err = c.list_files(None).await.unwrap_err();
        assert!(matches!(err, ClientError::Precondition { .. }));
    }

    #[tokio::test]
    async fn create_without_connection_is_a_precondition_error() {
        let mut c = client();
        let err = c
            .create_knowledge_base(&["r1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Precondition { .. }));
    }

    #[tokio::test]
    async fn sync_without_token_is_a_precondition_error() {
        let mut c = client();
        let err = c.sync_knowledge_base("kb-1").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Precondition { field: "access token" }
        ));
    }

    #[tokio::test]
    async fn kb_listing_without_token_is_a_precondition_error() {
        let mut c = client();
        let err = c.list_knowledge_bases().await.unwrap_err();
        assert!(matches!(err, ClientError::Precondition { .. }));
    }
}
