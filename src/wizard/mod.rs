//! Prompt steps as data.
//!
//! Every interactive flow is an ordered list of [`PromptStep`]s handed to
//! [`run_steps`], which asks the host [`Prompter`] for each answer in turn.
//! Flows whose later steps depend on remote data (the provider catalog, the
//! identity options) run the driver once per phase.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::ApimError;
use crate::host::Prompter;

/// How many times a required input is re-asked before the flow gives up.
pub const MAX_ATTEMPTS: usize = 3;

/// An answer returned by the host for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    /// Index into the step's options.
    Picked(usize),
    Confirmed(bool),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PickOption {
    pub label: String,
    pub description: String,
    pub detail: String,
}

impl PickOption {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    Input {
        prompt: String,
        /// Pre-filled value, also used when the answer is empty.
        default: Option<String>,
        password: bool,
    },
    Pick {
        placeholder: String,
        options: Vec<PickOption>,
    },
    Confirm {
        message: String,
        accept_label: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Optional,
    /// Empty answers are re-asked; after [`MAX_ATTEMPTS`] the flow fails with this message.
    Required(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptStep {
    pub key: String,
    pub kind: PromptKind,
    pub validation: Validation,
}

impl PromptStep {
    pub fn input(key: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: PromptKind::Input {
                prompt: prompt.into(),
                default: None,
                password: false,
            },
            validation: Validation::Optional,
        }
    }

    pub fn pick(
        key: impl Into<String>,
        placeholder: impl Into<String>,
        options: Vec<PickOption>,
    ) -> Self {
        Self {
            key: key.into(),
            kind: PromptKind::Pick {
                placeholder: placeholder.into(),
                options,
            },
            validation: Validation::Required("No option was selected."),
        }
    }

    pub fn confirm(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: PromptKind::Confirm {
                message: message.into(),
                accept_label: "Delete".to_string(),
            },
            validation: Validation::Optional,
        }
    }

    pub fn with_default(mut self, value: Option<String>) -> Self {
        if let PromptKind::Input { default, .. } = &mut self.kind {
            *default = value.filter(|v| !v.is_empty());
        }
        self
    }

    pub fn password(mut self) -> Self {
        if let PromptKind::Input { password, .. } = &mut self.kind {
            *password = true;
        }
        self
    }

    pub fn required(mut self, message: &'static str) -> Self {
        self.validation = Validation::Required(message);
        self
    }
}

/// Collected answers keyed by step key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    values: BTreeMap<String, String>,
    picks: BTreeMap<String, usize>,
}

impl Answers {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Index of the option chosen for a pick step.
    pub fn picked(&self, key: &str) -> Option<usize> {
        self.picks.get(key).copied()
    }

    /// Non-empty answer or [`ApimError::MissingContext`].
    pub fn require(&self, key: &str, message: &'static str) -> Result<&str, ApimError> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .ok_or(ApimError::MissingContext(message))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

/// Runs the steps in order. A dismissed prompt aborts the rest with [`ApimError::Cancelled`].
pub async fn run_steps<P>(prompter: &P, steps: &[PromptStep]) -> Result<Answers, ApimError>
where
    P: Prompter + ?Sized,
{
    let mut answers = Answers::default();
    for step in steps {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let answer = prompter.prompt(step).await?.ok_or(ApimError::Cancelled)?;
            match resolve(step, answer)? {
                Some((value, pick)) => {
                    debug!(key = %step.key, "prompt answered");
                    if let Some(index) = pick {
                        answers.picks.insert(step.key.clone(), index);
                    }
                    answers.values.insert(step.key.clone(), value);
                    break;
                }
                None if attempts >= MAX_ATTEMPTS => {
                    return Err(ApimError::MissingContext(match step.validation {
                        Validation::Required(message) => message,
                        Validation::Optional => "No valid answer was provided.",
                    }));
                }
                None => {}
            }
        }
    }
    Ok(answers)
}

/// Maps a raw answer to the stored value. `None` asks again.
fn resolve(step: &PromptStep, answer: Answer) -> Result<Option<(String, Option<usize>)>, ApimError> {
    match (&step.kind, answer) {
        (PromptKind::Input { default, .. }, Answer::Text(text)) => {
            let text = text.trim();
            let value = if text.is_empty() {
                default.clone().unwrap_or_default()
            } else {
                text.to_string()
            };
            if value.is_empty() && matches!(step.validation, Validation::Required(_)) {
                return Ok(None);
            }
            Ok(Some((value, None)))
        }
        (PromptKind::Pick { options, .. }, Answer::Picked(index)) => options
            .get(index)
            .map(|option| Some((option.label.clone(), Some(index))))
            .ok_or_else(|| ApimError::Host(format!("option {} is out of range", index))),
        (PromptKind::Pick { options, .. }, Answer::Text(label)) => {
            match options.iter().position(|option| option.label == label) {
                Some(index) => Ok(Some((label, Some(index)))),
                None => Ok(None),
            }
        }
        (PromptKind::Confirm { .. }, Answer::Confirmed(accepted)) => {
            Ok(Some((accepted.to_string(), None)))
        }
        (_, answer) => Err(ApimError::Host(format!(
            "unexpected answer {:?} for prompt '{}'",
            answer, step.key
        ))),
    }
}

/// Prompt text for a catalog parameter.
pub fn parameter_prompt(display_name: &str, description: Option<&str>, default: Option<&str>) -> String {
    let mut prompt = format!("Enter {}... ", display_name);
    let mut additional = String::new();
    if let Some(description) = description.filter(|d| !d.is_empty()) {
        additional.push_str(&format!("{}. ", description));
    }
    if let Some(default) = default.filter(|d| !d.is_empty()) {
        additional.push_str(&format!("Default is {}", default));
    }
    if !additional.is_empty() {
        prompt.push_str(&format!("({})", additional));
    }
    prompt
}
