//! Shared fixtures for integration tests: a service client pointed at a
//! wiremock server and a scripted host that replays prepared answers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use apim_authorizations::apim::ApimService;
use apim_authorizations::credentials::{AccessToken, StaticTokenCredential};
use apim_authorizations::error::ApimError;
use apim_authorizations::host::{Browser, Clipboard, Notifier, Prompter};
use apim_authorizations::tree::{NodeId, ResourceTree};
use apim_authorizations::wizard::{Answer, PromptStep};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use wiremock::MockServer;

pub const SUBSCRIPTION_ID: &str = "sub-1";
pub const RESOURCE_GROUP: &str = "rg-1";
pub const SERVICE_NAME: &str = "svc-1";
pub const PROVIDER_API_VERSION: &str = "2021-04-01-preview";
pub const SERVICE_API_VERSION: &str = "2018-06-01-preview";

pub fn test_token() -> AccessToken {
    AccessToken {
        token: "token-1".to_string(),
        user_id: "me@contoso.com".to_string(),
        object_id: "oid-me".to_string(),
        tenant_id: "tid-1".to_string(),
    }
}

/// Path of the service resource, without host or query.
pub fn service_path() -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ApiManagement/service/{}",
        SUBSCRIPTION_ID, RESOURCE_GROUP, SERVICE_NAME
    )
}

pub fn resource_path(suffix: &str) -> String {
    format!("{}{}", service_path(), suffix)
}

/// Client against the mock server with a fixed clock of 2024-01-01T00:00:00Z.
pub fn service(server: &MockServer) -> ApimService {
    let credential = Arc::new(StaticTokenCredential::new(test_token()));
    ApimService::new(
        credential,
        &server.uri(),
        SUBSCRIPTION_ID,
        RESOURCE_GROUP,
        SERVICE_NAME,
    )
    .with_clock(Arc::new(|| {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }))
}

/// Walks provider → authorization → permission by name, loading along the way.
pub async fn navigate(tree: &mut ResourceTree, path: &[&str]) -> NodeId {
    let mut node = tree.root();
    for name in path {
        let collection = tree.load_children(node).await.unwrap()[0];
        tree.load_children(collection).await.unwrap();
        node = tree
            .find_child(collection, name)
            .unwrap_or_else(|| panic!("'{}' not found", name));
    }
    node
}

pub fn text(value: &str) -> Option<Answer> {
    Some(Answer::Text(value.to_string()))
}

pub fn pick(index: usize) -> Option<Answer> {
    Some(Answer::Picked(index))
}

pub fn confirm(accepted: bool) -> Option<Answer> {
    Some(Answer::Confirmed(accepted))
}

/// Host that answers prompts from a queue and records every side effect.
#[derive(Default)]
pub struct ScriptedHost {
    answers: Mutex<VecDeque<Option<Answer>>>,
    pub prompts: Mutex<Vec<PromptStep>>,
    pub infos: Mutex<Vec<String>>,
    pub warnings: Mutex<Vec<String>>,
    pub clipboard: Mutex<Vec<String>>,
    pub opened: Mutex<Vec<String>>,
}

impl ScriptedHost {
    pub fn new(answers: Vec<Option<Answer>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Default::default()
        }
    }

    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn clipboard(&self) -> Vec<String> {
        self.clipboard.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn prompt_keys(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|step| step.key.clone())
            .collect()
    }
}

#[async_trait]
impl Prompter for ScriptedHost {
    async fn prompt(&self, step: &PromptStep) -> Result<Option<Answer>, ApimError> {
        self.prompts.lock().unwrap().push(step.clone());
        // Running out of answers behaves like the user dismissing the prompt.
        Ok(self.answers.lock().unwrap().pop_front().flatten())
    }
}

#[async_trait]
impl Notifier for ScriptedHost {
    async fn info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_string());
    }

    async fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }
}

#[async_trait]
impl Clipboard for ScriptedHost {
    async fn write_text(&self, text: &str) -> Result<(), ApimError> {
        self.clipboard.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[async_trait]
impl Browser for ScriptedHost {
    async fn open(&self, url: &str) -> Result<(), ApimError> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}
