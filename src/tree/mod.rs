//! Resource tree of one API Management service.
//!
//! ```text
//! Service
//! └── AuthorizationProviders
//!     └── AuthorizationProvider
//!         └── Authorizations
//!             └── Authorization
//!                 └── Permissions
//!                     └── Permission
//! ```
//!
//! Nodes live in a slab owned by [`ResourceTree`] and refer to each other by
//! generational [`NodeId`]s; freed slots are reused. Children are listed
//! lazily and cached until [`ResourceTree::refresh`].

pub mod draft;

use tracing::{info, warn};

pub use draft::{AuthorizationDraft, AuthorizationProviderDraft, ChildDraft, PermissionDraft};

use crate::apim::ApimService;
use crate::apim::contracts::{
    AuthorizationContract, AuthorizationPermissionContract, AuthorizationProviderContract,
};
use crate::error::{ApimError, ResultExt};
use crate::host::{Notifier, Prompter};

/// Arena handle. The generation tells a reused slot apart from the node that
/// previously lived there, so a stale id never resolves to a different node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

const ROOT: NodeId = NodeId {
    index: 0,
    generation: 0,
};

/// Identifies the resources above a node. Built by value from the parent's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub subscription_id: String,
    pub resource_group: String,
    pub service_name: String,
    pub authorization_provider: Option<String>,
    pub authorization: Option<String>,
}

impl ResourceScope {
    pub fn for_service(service: &ApimService) -> Self {
        Self {
            subscription_id: service.subscription_id().to_string(),
            resource_group: service.resource_group().to_string(),
            service_name: service.service_name().to_string(),
            authorization_provider: None,
            authorization: None,
        }
    }

    pub fn with_authorization_provider(&self, name: &str) -> Self {
        Self {
            authorization_provider: Some(name.to_string()),
            authorization: None,
            ..self.clone()
        }
    }

    pub fn with_authorization(&self, name: &str) -> Self {
        Self {
            authorization: Some(name.to_string()),
            ..self.clone()
        }
    }

    pub fn authorization_provider(&self) -> Result<&str, ApimError> {
        self.authorization_provider
            .as_deref()
            .ok_or(ApimError::MissingContext("Expected Authorization Provider name."))
    }

    pub fn authorization(&self) -> Result<&str, ApimError> {
        self.authorization
            .as_deref()
            .ok_or(ApimError::MissingContext("Expected Authorization name."))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Service,
    AuthorizationProviders,
    AuthorizationProvider(AuthorizationProviderContract),
    Authorizations,
    Authorization(AuthorizationContract),
    Permissions,
    Permission(AuthorizationPermissionContract),
}

impl NodeKind {
    fn name(&self) -> &'static str {
        match self {
            NodeKind::Service => "service",
            NodeKind::AuthorizationProviders => "authorization providers",
            NodeKind::AuthorizationProvider(_) => "authorization provider",
            NodeKind::Authorizations => "authorizations",
            NodeKind::Authorization(_) => "authorization",
            NodeKind::Permissions => "permissions",
            NodeKind::Permission(_) => "permission",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub scope: ResourceScope,
    /// Back reference only; the parent owns the child list.
    pub parent: Option<NodeId>,
    /// `None` until listed.
    children: Option<Vec<NodeId>>,
    /// Nodes created while `children` was unloaded; freed with the next load.
    detached: Vec<NodeId>,
}

impl TreeNode {
    pub fn label(&self) -> String {
        match &self.kind {
            NodeKind::Service => self.scope.service_name.clone(),
            NodeKind::AuthorizationProviders => "AuthorizationProviders".to_string(),
            NodeKind::AuthorizationProvider(provider) => provider.name.clone(),
            NodeKind::Authorizations => "Authorizations".to_string(),
            NodeKind::Authorization(authorization) => authorization.name.clone(),
            NodeKind::Permissions => "Permissions".to_string(),
            NodeKind::Permission(permission) => permission.name.clone(),
        }
    }

    pub fn description(&self) -> Option<String> {
        let description = match &self.kind {
            NodeKind::AuthorizationProvider(provider) => {
                provider.properties.identity_provider.clone()
            }
            NodeKind::Authorization(authorization) => authorization.properties.status.clone(),
            NodeKind::Permission(permission) => permission.properties.object_id.clone(),
            _ => return None,
        };
        Some(description).filter(|d| !d.is_empty())
    }

    pub fn icon(&self) -> &'static str {
        match self.kind {
            NodeKind::Service => "apim",
            NodeKind::AuthorizationProviders
            | NodeKind::Authorizations
            | NodeKind::Permissions => "list",
            NodeKind::AuthorizationProvider(_) => "provider",
            NodeKind::Authorization(_) => "api",
            NodeKind::Permission(_) => "op",
        }
    }

    /// Stable identifier hosts use to bind commands to node kinds.
    pub fn context_value(&self) -> &'static str {
        match self.kind {
            NodeKind::Service => "azureApiManagementService",
            NodeKind::AuthorizationProviders => "azureApiManagementAuthorizationProviders",
            NodeKind::AuthorizationProvider(_) => "azureApiManagementAuthorizationProvider",
            NodeKind::Authorizations => "azureApiManagementAuthorizations",
            NodeKind::Authorization(_) => "azureApiManagementAuthorization",
            NodeKind::Permissions => "azureApiManagementAuthorizationPermissions",
            NodeKind::Permission(_) => "azureApiManagementAuthorizationPermission",
        }
    }

    /// Lists are fetched as a single page, so there is never more to load.
    pub fn has_more_children(&self) -> bool {
        false
    }

    pub fn children(&self) -> Option<&[NodeId]> {
        self.children.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.children.is_some()
    }
}

struct Slot {
    generation: u32,
    node: Option<TreeNode>,
}

pub struct ResourceTree {
    service: ApimService,
    slots: Vec<Slot>,
    /// Indices of empty slots, reused before the arena grows.
    free: Vec<usize>,
}

impl ResourceTree {
    pub fn new(service: ApimService) -> Self {
        let scope = ResourceScope::for_service(&service);
        let root = TreeNode {
            id: ROOT,
            kind: NodeKind::Service,
            scope,
            parent: None,
            children: None,
            detached: Vec::new(),
        };
        Self {
            service,
            slots: vec![Slot {
                generation: ROOT.generation,
                node: Some(root),
            }],
            free: Vec::new(),
        }
    }

    pub fn service(&self) -> &ApimService {
        &self.service
    }

    pub fn root(&self) -> NodeId {
        ROOT
    }

    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn node(&self, id: NodeId) -> Result<&TreeNode, ApimError> {
        self.get(id)
            .ok_or_else(|| ApimError::Unsupported("The tree item no longer exists.".to_string()))
    }

    /// Loaded child whose label matches.
    pub fn find_child(&self, id: NodeId, label: &str) -> Option<NodeId> {
        self.get(id)?
            .children()?
            .iter()
            .copied()
            .find(|child| self.get(*child).is_some_and(|node| node.label() == label))
    }

    /// Lists the children of a node, serving the cache when already loaded.
    pub async fn load_children(&mut self, id: NodeId) -> Result<Vec<NodeId>, ApimError> {
        let node = self.node(id)?;
        if let Some(children) = node.children() {
            return Ok(children.to_vec());
        }
        let scope = node.scope.clone();
        let kind = node.kind.clone();

        let children: Vec<(NodeKind, ResourceScope)> = match kind {
            NodeKind::Service => vec![(NodeKind::AuthorizationProviders, scope)],
            NodeKind::AuthorizationProviders => self
                .service
                .list_authorization_providers()
                .await?
                .into_iter()
                .map(|provider| {
                    let scope = scope.with_authorization_provider(&provider.name);
                    (NodeKind::AuthorizationProvider(provider), scope)
                })
                .collect(),
            NodeKind::AuthorizationProvider(_) => vec![(NodeKind::Authorizations, scope)],
            NodeKind::Authorizations => self
                .service
                .list_authorizations(scope.authorization_provider()?)
                .await?
                .into_iter()
                .map(|authorization| {
                    let scope = scope.with_authorization(&authorization.name);
                    (NodeKind::Authorization(authorization), scope)
                })
                .collect(),
            NodeKind::Authorization(_) => vec![(NodeKind::Permissions, scope)],
            NodeKind::Permissions => self
                .service
                .list_authorization_permissions(
                    scope.authorization_provider()?,
                    scope.authorization()?,
                )
                .await?
                .into_iter()
                .map(|permission| (NodeKind::Permission(permission), scope.clone()))
                .collect(),
            NodeKind::Permission(_) => Vec::new(),
        };

        self.drop_children(id);
        let ids: Vec<NodeId> = children
            .into_iter()
            .map(|(kind, scope)| self.allocate(kind, scope, id))
            .collect();
        if let Some(node) = self.slot_mut(id) {
            node.children = Some(ids.clone());
        }
        Ok(ids)
    }

    /// Drops the cached children of a node so the next load lists them again.
    pub fn refresh(&mut self, id: NodeId) -> Result<(), ApimError> {
        self.node(id)?;
        self.drop_children(id);
        Ok(())
    }

    /// Creates a resource under a collection node and returns the node wrapping
    /// the server's response.
    pub async fn create_child<N>(
        &mut self,
        parent: NodeId,
        draft: ChildDraft,
        notifier: &N,
    ) -> Result<NodeId, ApimError>
    where
        N: Notifier + ?Sized,
    {
        let node = self.node(parent)?;
        let scope = node.scope.clone();

        let (kind, child_scope) = match (&node.kind, draft) {
            (NodeKind::AuthorizationProviders, ChildDraft::AuthorizationProvider(draft)) => {
                let provider = self.create_provider(&draft, notifier).await?;
                let child_scope = scope.with_authorization_provider(&provider.name);
                (NodeKind::AuthorizationProvider(provider), child_scope)
            }
            (NodeKind::Authorizations, ChildDraft::Authorization(draft)) => {
                let authorization = self.create_authorization(&scope, &draft, notifier).await?;
                let child_scope = scope.with_authorization(&authorization.name);
                (NodeKind::Authorization(authorization), child_scope)
            }
            (NodeKind::Permissions, ChildDraft::Permission(draft)) => {
                let permission = self.create_permission(&scope, &draft, notifier).await?;
                (NodeKind::Permission(permission), scope)
            }
            (kind, draft) => {
                return Err(ApimError::Unsupported(format!(
                    "Cannot create {} under {}.",
                    draft.kind_name(),
                    kind.name()
                )));
            }
        };

        Ok(self.upsert_child(parent, kind, child_scope))
    }

    /// Replaces the settings of an existing authorization provider.
    pub async fn update_authorization_provider<N>(
        &mut self,
        id: NodeId,
        draft: &AuthorizationProviderDraft,
        notifier: &N,
    ) -> Result<(), ApimError>
    where
        N: Notifier + ?Sized,
    {
        let node = self.node(id)?;
        let NodeKind::AuthorizationProvider(current) = &node.kind else {
            return Err(ApimError::Unsupported(format!(
                "Only authorization providers can be edited, not {}.",
                node.kind.name()
            )));
        };
        draft.validate()?;
        let name = current.name.clone();

        let updated = self
            .service
            .create_authorization_provider(&name, &draft.to_properties())
            .await
            .with_operation(|| format!("Failed to update authorization provider '{}'.", name))?;
        info!(authorization_provider = %name, "Authorization provider updated");
        notifier
            .info(&format!("Updated AuthorizationProvider '{}' successfully.", name))
            .await;

        if let Some(node) = self.slot_mut(id) {
            node.kind = NodeKind::AuthorizationProvider(updated);
        }
        Ok(())
    }

    /// Deletes the resource behind a node after the user confirms.
    ///
    /// Declining returns [`ApimError::Cancelled`] without any request.
    pub async fn delete<H>(&mut self, id: NodeId, host: &H) -> Result<(), ApimError>
    where
        H: Prompter + Notifier + ?Sized,
    {
        let node = self.node(id)?;
        let scope = node.scope.clone();
        let label = node.label();

        let confirmation = match &node.kind {
            NodeKind::AuthorizationProvider(_) => format!(
                "Are you sure you want to remove AuthorizationProvider '{}' from API Management service '{}'?",
                label, scope.service_name
            ),
            NodeKind::Authorization(_) => format!(
                "Are you sure you want to remove Authorization '{}' from AuthorizationProvider '{}'?",
                label,
                scope.authorization_provider()?
            ),
            NodeKind::Permission(_) => format!(
                "Are you sure you want to remove permission '{}' from authorization '{}'?",
                label,
                scope.authorization()?
            ),
            kind => {
                return Err(ApimError::Unsupported(format!(
                    "The {} node cannot be deleted.",
                    kind.name()
                )));
            }
        };
        let kind = node.kind.clone();

        if !host.confirm(&confirmation).await? {
            return Err(ApimError::Cancelled);
        }

        let done = match kind {
            NodeKind::AuthorizationProvider(_) => {
                self.service
                    .delete_authorization_provider(&label)
                    .await
                    .with_operation(|| {
                        format!("Failed to remove authorization provider '{}'.", label)
                    })?;
                format!(
                    "Successfully removed AuthorizationProvider \"{}\" from API Management service '{}'.",
                    label, scope.service_name
                )
            }
            NodeKind::Authorization(_) => {
                let provider = scope.authorization_provider()?;
                self.service
                    .delete_authorization(provider, &label)
                    .await
                    .with_operation(|| format!("Failed to remove authorization '{}'.", label))?;
                format!(
                    "Successfully removed Authorization \"{}\" from AuthorizationProvider '{}'.",
                    label, provider
                )
            }
            _ => {
                let authorization = scope.authorization()?;
                self.service
                    .delete_authorization_permission(
                        scope.authorization_provider()?,
                        authorization,
                        &label,
                    )
                    .await
                    .with_operation(|| format!("Failed to remove permission '{}'.", label))?;
                format!(
                    "Successfully removed permission \"{}\" from Authorization '{}'.",
                    label, authorization
                )
            }
        };

        info!(node = %label, "Resource deleted");
        self.remove(id);
        host.info(&done).await;
        Ok(())
    }

    async fn create_provider<N>(
        &self,
        draft: &AuthorizationProviderDraft,
        notifier: &N,
    ) -> Result<AuthorizationProviderContract, ApimError>
    where
        N: Notifier + ?Sized,
    {
        draft.validate()?;
        let provider = self
            .service
            .create_authorization_provider(&draft.name, &draft.to_properties())
            .await
            .with_operation(|| {
                format!("Failed to create authorization provider '{}'.", draft.name)
            })?;

        info!(authorization_provider = %provider.name, "Authorization provider created");
        let mut message = format!(
            "Successfully created authorization provider \"{}\".",
            provider.name
        );
        if let Some(redirect_url) = provider.properties.oauth_settings.redirect_url.as_deref() {
            message.push_str(&format!(
                "\nPlease add redirect uri '{}' to the OAuth application before authorizing an authorization.",
                redirect_url
            ));
        }
        notifier.info(&message).await;
        Ok(provider)
    }

    async fn create_authorization<N>(
        &self,
        scope: &ResourceScope,
        draft: &AuthorizationDraft,
        notifier: &N,
    ) -> Result<AuthorizationContract, ApimError>
    where
        N: Notifier + ?Sized,
    {
        draft.validate()?;
        let provider = scope.authorization_provider()?;
        let authorization = self
            .service
            .create_authorization(provider, &draft.name)
            .await
            .with_operation(|| {
                format!(
                    "Failed to add authorization '{}' to authorizationProvider '{}'.",
                    draft.name, provider
                )
            })?;
        info!(
            authorization_provider = %provider,
            authorization = %authorization.name,
            "Authorization created"
        );

        // The signed-in principal gets access to its own authorization.
        if let Err(err) = self.grant_current_principal(provider, &authorization.name).await {
            warn!(error = %err, "Failed to grant permission to the signed-in principal");
            notifier
                .warn(&format!(
                    "Could not grant the signed-in user access to authorization '{}'. {}",
                    authorization.name, err
                ))
                .await;
        }

        notifier
            .info(&format!(
                "Created Authorization '{}' in API Management successfully.",
                authorization.name
            ))
            .await;
        Ok(authorization)
    }

    async fn grant_current_principal(
        &self,
        provider: &str,
        authorization: &str,
    ) -> Result<AuthorizationPermissionContract, ApimError> {
        let token = self.service.credential().get_token().await?;
        self.service
            .create_authorization_permission(
                provider,
                authorization,
                &token.user_id,
                &token.object_id,
                &token.tenant_id,
            )
            .await
    }

    async fn create_permission<N>(
        &self,
        scope: &ResourceScope,
        draft: &PermissionDraft,
        notifier: &N,
    ) -> Result<AuthorizationPermissionContract, ApimError>
    where
        N: Notifier + ?Sized,
    {
        draft.validate()?;
        let permission = self
            .service
            .create_authorization_permission(
                scope.authorization_provider()?,
                scope.authorization()?,
                &draft.name,
                &draft.object_id,
                &draft.tenant_id,
            )
            .await
            .with_operation(|| format!("Failed to create permission '{}'.", draft.name))?;

        info!(permission = %permission.name, "Authorization permission created");
        notifier
            .info(&format!(
                "Successfully created permission \"{}\".",
                permission.name
            ))
            .await;
        Ok(permission)
    }

    fn allocate(&mut self, kind: NodeKind, scope: ResourceScope, parent: NodeId) -> NodeId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        let id = NodeId {
            index,
            generation: slot.generation,
        };
        let children = match kind {
            NodeKind::Permission(_) => Some(Vec::new()),
            _ => None,
        };
        slot.node = Some(TreeNode {
            id,
            kind,
            scope,
            parent: Some(parent),
            children,
            detached: Vec::new(),
        });
        id
    }

    /// Empties a slot and returns its index to the free list.
    fn release(&mut self, id: NodeId) -> Option<TreeNode> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    /// Adds a created node to the parent's cache, replacing a same-named child.
    /// An unloaded parent keeps it aside until its children are listed.
    fn upsert_child(&mut self, parent: NodeId, kind: NodeKind, scope: ResourceScope) -> NodeId {
        let id = self.allocate(kind, scope, parent);
        let label = self.get(id).map(TreeNode::label).unwrap_or_default();
        if let Some(old) = self.find_child(parent, &label) {
            self.remove(old);
        }
        if let Some(node) = self.slot_mut(parent) {
            match node.children.as_mut() {
                Some(children) => children.push(id),
                None => node.detached.push(id),
            }
        }
        id
    }

    /// Removes a node with its subtree and unlinks it from its parent.
    fn remove(&mut self, id: NodeId) {
        self.drop_children(id);
        let parent = self.release(id).and_then(|node| node.parent);
        if let Some(node) = parent.and_then(|parent| self.slot_mut(parent)) {
            if let Some(children) = node.children.as_mut() {
                children.retain(|child| *child != id);
            }
            node.detached.retain(|child| *child != id);
        }
    }

    /// Frees every descendant, including nodes created while the node was
    /// unloaded, and marks the node unloaded.
    fn drop_children(&mut self, id: NodeId) {
        let Some(node) = self.slot_mut(id) else {
            return;
        };
        let mut pending = node.children.take().unwrap_or_default();
        pending.append(&mut node.detached);
        if let NodeKind::Permission(_) = node.kind {
            node.children = Some(Vec::new());
        }

        while let Some(child) = pending.pop() {
            if let Some(mut freed) = self.release(child) {
                pending.extend(freed.children.take().unwrap_or_default());
                pending.append(&mut freed.detached);
            }
        }
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }
}
