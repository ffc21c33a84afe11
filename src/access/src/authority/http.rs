//! REST client for the portal's access authority

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::authority::{AccessAuthority, ScopeChildrenQuery};
use crate::error::{AccessError, Result};
use crate::types::{
    ActionId, AppliedRole, PermissionSnapshot, PermissionState, SaveItem, SaveItemWire,
    ScopeValue, SystemRef, SystemRole, SystemTree, UserRef,
};

const TENANT_HEADER: &str = "X-Tenant-Id";

/// Reqwest-backed [`AccessAuthority`] implementation.
///
/// Tenancy travels as the `X-Tenant-Id` header. The caller's own
/// permission snapshot is cached against its ETag so repeat reads can
/// be answered from a 304 without re-parsing the full tree.
pub struct HttpAuthority {
    client: Client,
    base_url: String,
    perm_cache: Mutex<Option<(String, PermissionSnapshot)>>,
}

impl HttpAuthority {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            perm_cache: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport(e: reqwest::Error) -> AccessError {
        AccessError::Authority(e.to_string())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        tenant_id: Option<&str>,
    ) -> Result<T> {
        let mut request = self.client.get(self.url(path)).query(query);
        if let Some(tenant) = tenant_id {
            request = request.header(TENANT_HEADER, tenant);
        }
        let response = request
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        response.json().await.map_err(Self::transport)
    }
}

/// Paged envelope some list endpoints wrap their rows in
#[derive(Debug, Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    content: Vec<T>,
}

#[async_trait]
impl AccessAuthority for HttpAuthority {
    async fn systems(&self) -> Result<Vec<SystemRef>> {
        // The dropdown endpoint is the fast path; fall back to the paged
        // listing when it is unavailable.
        match self
            .get_json::<Vec<SystemRef>>("/access/api/dropdowns/systems", &[], None)
            .await
        {
            Ok(systems) => Ok(systems),
            Err(e) => {
                warn!(error = %e, "systems dropdown unavailable; falling back to paged listing");
                let page: Paged<SystemRef> = self
                    .get_json(
                        "/access/api/systems",
                        &[("page", "0"), ("size", "500")],
                        None,
                    )
                    .await?;
                Ok(page.content)
            }
        }
    }

    async fn system_tree(&self, system_id: &str, lang: &str) -> Result<SystemTree> {
        self.get_json(
            &format!("/access/api/system-trees/{system_id}"),
            &[("lang", lang)],
            None,
        )
        .await
    }

    async fn scope_children(&self, query: &ScopeChildrenQuery) -> Result<Vec<ScopeValue>> {
        // Organization branches come from a dedicated provider keyed by
        // the parent organization; every other level uses the generic
        // code-table-values lookup with the full parent chain.
        let is_branch_level = query.level.name.to_lowercase().contains("branch");
        if is_branch_level && query.parent_path.len() == 1 {
            return self
                .get_json(
                    "/access/api/cascade-dropdowns/access.organization-branches-by-organization",
                    &[
                        ("organizationId", query.parent_path[0].as_str()),
                        ("lang", query.lang.as_str()),
                    ],
                    None,
                )
                .await;
        }

        let depth = query.level_index.to_string();
        let mut params: Vec<(String, String)> = vec![
            ("codeTableId".into(), query.level.scope_table_id.clone()),
            ("tableId".into(), query.level.scope_table_id.clone()),
            ("lang".into(), query.lang.clone()),
            ("depth".into(), depth),
        ];
        for (i, parent) in query.parent_path.iter().enumerate() {
            params.push((format!("p{i}"), parent.clone()));
        }
        if let Some(last) = query.parent_path.last() {
            params.push(("parentId".into(), last.clone()));
        }

        let request = self
            .client
            .get(self.url(
                "/access/api/cascade-dropdowns/access.code-table-values-by-table",
            ))
            .query(&params);
        let response = request
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        response.json().await.map_err(Self::transport)
    }

    async fn user_permission_states(
        &self,
        user_id: &str,
        action_ids: &[ActionId],
        tenant_id: Option<&str>,
    ) -> Result<Vec<PermissionState>> {
        let mut request = self
            .client
            .get(self.url("/access/api/user-permissions/states"))
            .query(&[("userId", user_id)]);
        for action_id in action_ids {
            request = request.query(&[("actionIds", action_id.as_str())]);
        }
        if let Some(tenant) = tenant_id {
            request = request.header(TENANT_HEADER, tenant);
        }

        let response = request
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        response.json().await.map_err(Self::transport)
    }

    async fn bulk_save(&self, items: &[SaveItem], tenant_id: Option<&str>) -> Result<()> {
        let wire: Vec<SaveItemWire> = items.iter().map(SaveItem::to_wire).collect();
        let mut request = self
            .client
            .post(self.url("/access/api/user-permissions/bulk"))
            .query(&[("mode", "REPLACE")])
            .json(&serde_json::json!({ "items": wire }));
        if let Some(tenant) = tenant_id {
            request = request.header(TENANT_HEADER, tenant);
        }

        request
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        Ok(())
    }

    async fn system_roles(&self, system_id: &str) -> Result<Vec<SystemRole>> {
        self.get_json(
            &format!("/access/api/system-roles/dropdown/by-system/{system_id}"),
            &[],
            None,
        )
        .await
    }

    async fn apply_role(
        &self,
        user_id: &str,
        system_role_id: &str,
        _system_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<AppliedRole> {
        let mut request = self
            .client
            .post(self.url("/access/api/user-system-roles/apply-role"))
            .json(&serde_json::json!({
                "userId": user_id,
                "systemRoleId": system_role_id,
                "tenantId": tenant_id,
            }));
        if let Some(tenant) = tenant_id {
            request = request.header(TENANT_HEADER, tenant);
        }

        let response = request
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        response.json().await.map_err(Self::transport)
    }

    async fn users_directory(&self) -> Result<Vec<UserRef>> {
        let page: Paged<UserRef> = self
            .get_json(
                "/access/api/users",
                &[("page", "0"), ("size", "500")],
                None,
            )
            .await?;
        Ok(page.content)
    }

    async fn my_permissions(&self, force: bool) -> Result<PermissionSnapshot> {
        let mut cache = self.perm_cache.lock().await;

        let force_param = if force { "true" } else { "false" };
        let mut request = self
            .client
            .get(self.url("/auth/me/permissions"))
            .query(&[("force", force_param)]);
        if let Some((etag, _)) = cache.as_ref() {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(Self::transport)?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("permission snapshot unchanged; serving cached copy");
            return Ok(cache
                .as_ref()
                .map(|(_, snapshot)| snapshot.clone())
                .unwrap_or_default());
        }

        let response = response.error_for_status().map_err(Self::transport)?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let snapshot: PermissionSnapshot = response.json().await.map_err(Self::transport)?;

        if let Some(etag) = etag {
            *cache = Some((etag, snapshot.clone()));
        }
        Ok(snapshot)
    }
}
