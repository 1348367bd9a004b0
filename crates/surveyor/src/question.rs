//! Question Resolver
//!
//! Answers form questions identified only by their displayed text. Every
//! mutation is followed by an explicit wait until the UI reflects it, so a
//! method returns only once the answer is visibly applied.

use crate::chain::{Resolution, SelectorChain, Strategy};
use crate::poll::{PollOutcome, PollPolicy, Poller};
use crate::result::{SurveyorError, SurveyorResult};
use crate::surface::{
    ElementHandle, ElementQuery, ElementState, Pick, Role, TextMatch, UiSurface,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Label of the control that reopens an answered question
pub const EDIT_LABEL: &str = "Edit";

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// How a question is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Mutually exclusive buttons
    ButtonChoice,
    /// Radio options
    RadioChoice,
    /// Combobox with a list of options
    Dropdown,
    /// Independently toggleable options
    MultiSelect,
    /// Single-line text
    FreeText,
    /// Multi-line text
    TextArea,
    /// File attachment
    FileUpload,
}

impl QuestionKind {
    /// Answer shape this kind accepts
    #[must_use]
    pub const fn expected_shape(&self) -> &'static str {
        match self {
            Self::MultiSelect => "choices",
            Self::FileUpload => "files",
            _ => "text",
        }
    }
}

/// A question as displayed on screen
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuestionDescriptor {
    /// Displayed question text, unique per screen
    pub text: String,
    /// Interaction kind
    pub kind: QuestionKind,
}

impl QuestionDescriptor {
    /// Create a descriptor
    #[must_use]
    pub fn new(text: impl Into<String>, kind: QuestionKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

impl fmt::Display for QuestionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:?})", self.text, self.kind)
    }
}

/// Value applied to a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerValue {
    /// Single text value
    Text(String),
    /// Several option labels
    Choices(Vec<String>),
    /// Local files to attach
    Files(Vec<PathBuf>),
}

impl AnswerValue {
    /// Shape name, comparable with [`QuestionKind::expected_shape`]
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Choices(_) => "choices",
            Self::Files(_) => "files",
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for AnswerValue {
    fn from(v: Vec<String>) -> Self {
        Self::Choices(v)
    }
}

impl From<Vec<PathBuf>> for AnswerValue {
    fn from(v: Vec<PathBuf>) -> Self {
        Self::Files(v)
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Applies answers through a [`UiSurface`]
#[derive(Debug)]
pub struct QuestionResolver<'a, S: UiSurface + ?Sized> {
    surface: &'a S,
    existence: PollPolicy,
    post_condition: PollPolicy,
}

impl<'a, S: UiSurface + ?Sized> QuestionResolver<'a, S> {
    /// Create a resolver with explicit budgets
    #[must_use]
    pub const fn new(surface: &'a S, existence: PollPolicy, post_condition: PollPolicy) -> Self {
        Self {
            surface,
            existence,
            post_condition,
        }
    }

    /// Resolver with the default budgets
    #[must_use]
    pub const fn with_defaults(surface: &'a S) -> Self {
        Self::new(surface, PollPolicy::existence(), PollPolicy::post_condition())
    }

    /// Apply `value` according to the descriptor's kind.
    ///
    /// The value shape is checked before the UI is touched.
    ///
    /// # Errors
    ///
    /// [`SurveyorError::AnswerShapeMismatch`] for a value of the wrong
    /// shape, otherwise the errors of the per-kind method.
    pub async fn answer(
        &self,
        descriptor: &QuestionDescriptor,
        value: &AnswerValue,
    ) -> SurveyorResult<()> {
        let question = descriptor.text.as_str();
        match (descriptor.kind, value) {
            (QuestionKind::ButtonChoice, AnswerValue::Text(a)) => self.answer_button(question, a).await,
            (QuestionKind::RadioChoice, AnswerValue::Text(a)) => self.answer_radio(question, a).await,
            (QuestionKind::Dropdown, AnswerValue::Text(a)) => self.answer_dropdown(question, a).await,
            (QuestionKind::FreeText, AnswerValue::Text(a)) => self.answer_text(question, a).await,
            (QuestionKind::TextArea, AnswerValue::Text(a)) => self.answer_text_area(question, a).await,
            (QuestionKind::MultiSelect, AnswerValue::Choices(c)) => {
                self.answer_multi_select(question, c).await
            }
            (QuestionKind::FileUpload, AnswerValue::Files(f)) => self.attach_files(question, f).await,
            (kind, value) => Err(SurveyorError::AnswerShapeMismatch {
                question: question.to_string(),
                expected: kind.expected_shape(),
                actual: value.shape(),
            }),
        }
    }

    /// Click the labelled button and wait until it is pressed
    ///
    /// # Errors
    ///
    /// `QuestionNotFound`, `NotFound`, or `TimedOut` if the button never
    /// reports the selected state.
    pub async fn answer_button(&self, question: &str, answer: &str) -> SurveyorResult<()> {
        self.choose(question, Role::Button, answer).await
    }

    /// Click the labelled radio option and wait until it is checked
    ///
    /// # Errors
    ///
    /// Same as [`Self::answer_button`].
    pub async fn answer_radio(&self, question: &str, answer: &str) -> SurveyorResult<()> {
        self.choose(question, Role::Radio, answer).await
    }

    async fn choose(&self, question: &str, role: Role, answer: &str) -> SurveyorResult<()> {
        self.locate_question(question).await?;
        let control = ElementQuery::new(role).with_exact_text(answer);
        let resolution = self.resolve(question, &control).await?;
        self.surface.click(&resolution.handle).await?;
        self.wait_selected(&resolution.handle, question, answer).await?;
        info!(question, answer, strategy = %resolution.strategy_name, "choice applied");
        Ok(())
    }

    /// Open the dropdown, pick the option with exactly `answer` and wait
    /// until the control shows it
    ///
    /// # Errors
    ///
    /// `QuestionNotFound`, `NotFound` for the control or the option, or
    /// `TimedOut` if the value never reflects the answer.
    pub async fn answer_dropdown(&self, question: &str, answer: &str) -> SurveyorResult<()> {
        self.locate_question(question).await?;
        let combobox = self
            .resolve(question, &ElementQuery::new(Role::Combobox))
            .await?;
        self.surface.click(&combobox.handle).await?;

        let option = ElementQuery::new(Role::Option).with_exact_text(answer);
        let option = SelectorChain::new(format!("option {answer:?} for {question:?}"))
            .strategy(Strategy::new("rendered_option", option, Pick::Nearest))
            .resolve(self.surface, self.existence)
            .await?;
        self.surface.click(&option.handle).await?;

        self.wait_value(&combobox.handle, question, answer).await?;
        info!(question, answer, "dropdown applied");
        Ok(())
    }

    /// Toggle each listed option on, leaving already selected ones alone
    ///
    /// # Errors
    ///
    /// `QuestionNotFound`, `NotFound`, or `TimedOut` if an option never
    /// reports the selected state.
    pub async fn answer_multi_select(&self, question: &str, answers: &[String]) -> SurveyorResult<()> {
        self.locate_question(question).await?;
        for answer in answers {
            let control = ElementQuery::new(Role::MultiOption).with_exact_text(answer.as_str());
            let resolution = self.resolve(question, &control).await?;
            if self
                .surface
                .has_state(&resolution.handle, ElementState::Selected)
                .await?
            {
                debug!(question, answer = %answer, "option already selected");
                continue;
            }
            self.surface.click(&resolution.handle).await?;
            self.wait_selected(&resolution.handle, question, answer).await?;
        }
        info!(question, count = answers.len(), "multi-select applied");
        Ok(())
    }

    /// Clear the input beneath the question, type `text` and wait for the value
    ///
    /// # Errors
    ///
    /// `QuestionNotFound`, `NotFound`, or `TimedOut` if the value never
    /// reflects the text.
    pub async fn answer_text(&self, question: &str, text: &str) -> SurveyorResult<()> {
        self.type_into(question, Role::TextInput, text).await
    }

    /// Multi-line variant of [`Self::answer_text`]
    ///
    /// # Errors
    ///
    /// Same as [`Self::answer_text`].
    pub async fn answer_text_area(&self, question: &str, text: &str) -> SurveyorResult<()> {
        self.type_into(question, Role::TextArea, text).await
    }

    async fn type_into(&self, question: &str, role: Role, text: &str) -> SurveyorResult<()> {
        self.locate_question(question).await?;
        let resolution = self.resolve(question, &ElementQuery::new(role)).await?;
        self.surface.fill(&resolution.handle, text).await?;
        self.wait_value(&resolution.handle, question, text).await?;
        info!(question, strategy = %resolution.strategy_name, "text applied");
        Ok(())
    }

    /// Attach each file in order, waiting for the input to report it
    ///
    /// # Errors
    ///
    /// [`SurveyorError::FileMissing`] before any interaction if a path does
    /// not exist, then `QuestionNotFound`, `NotFound` or `TimedOut`.
    pub async fn attach_files(&self, question: &str, files: &[PathBuf]) -> SurveyorResult<()> {
        if let Some(missing) = files.iter().find(|p| !p.exists()) {
            return Err(SurveyorError::FileMissing {
                path: missing.clone(),
            });
        }
        self.locate_question(question).await?;
        let input = self
            .resolve(question, &ElementQuery::new(Role::FileInput))
            .await?;
        for path in files {
            self.surface.attach_file(&input.handle, path).await?;
            self.wait_attached(&input.handle, path).await?;
        }
        info!(question, count = files.len(), "files attached");
        Ok(())
    }

    /// Whether an optional question is shown within `policy`
    ///
    /// # Errors
    ///
    /// Only non-transient surface errors; a timeout means `false`.
    pub async fn is_present(&self, question: &str, policy: PollPolicy) -> SurveyorResult<bool> {
        let outcome = self.question_poll(question, policy).await?;
        Ok(outcome.is_success())
    }

    /// Click the question's Edit control to reopen it
    ///
    /// # Errors
    ///
    /// `QuestionNotFound` or `NotFound`.
    pub async fn edit(&self, question: &str) -> SurveyorResult<()> {
        self.locate_question(question).await?;
        let control = ElementQuery::new(Role::Button).with_exact_text(EDIT_LABEL);
        let resolution = self.resolve(question, &control).await?;
        self.surface.click(&resolution.handle).await?;
        debug!(question, "question reopened for editing");
        Ok(())
    }

    /// Wait until `answer` is rendered below `question` in a summary view.
    ///
    /// The answer must be the whole text of its node; `25` does not match a
    /// rendered `250`.
    ///
    /// # Errors
    ///
    /// `TimedOut` if the answer text never appears.
    pub async fn verify_summary(&self, question: &str, answer: &str) -> SurveyorResult<()> {
        let query = ElementQuery::new(Role::Text)
            .with_text(TextMatch::exact(answer))
            .below(ElementQuery::text_node(question));
        let surface = self.surface;
        let query = &query;
        Poller::new(self.post_condition)
            .describe(format!("summary answer {answer:?} for {question:?}"))
            .until(move |_| async move { Ok(surface.first_visible(query).await?.is_some()) })
            .await?
            .or_timed_out(format!("summary answer {answer:?} below {question:?}"))
    }

    // -------------------------------------------------------------------------
    // helpers
    // -------------------------------------------------------------------------

    async fn question_poll(
        &self,
        question: &str,
        policy: PollPolicy,
    ) -> SurveyorResult<PollOutcome<ElementHandle>> {
        let container = ElementQuery::container(question);
        let label = ElementQuery::text_node(question);
        let surface = self.surface;
        let (container, label) = (&container, &label);
        Poller::new(policy)
            .describe(format!("question {question:?}"))
            .poll(move |_| async move {
                if let Some(found) = surface.first_visible(container).await? {
                    return Ok(Some(found));
                }
                surface.first_visible(label).await
            })
            .await
    }

    async fn locate_question(&self, question: &str) -> SurveyorResult<ElementHandle> {
        self.question_poll(question, self.existence)
            .await?
            .into_result(|_, _, _| SurveyorError::QuestionNotFound {
                question: question.to_string(),
            })
    }

    async fn resolve(&self, question: &str, control: &ElementQuery) -> SurveyorResult<Resolution> {
        SelectorChain::for_question(question, control)
            .resolve(self.surface, self.existence)
            .await
    }

    async fn wait_selected(
        &self,
        handle: &ElementHandle,
        question: &str,
        answer: &str,
    ) -> SurveyorResult<()> {
        let surface = self.surface;
        Poller::new(self.post_condition)
            .describe(format!("{answer:?} selected"))
            .until(move |_| surface.has_state(handle, ElementState::Selected))
            .await?
            .or_timed_out(format!("{answer:?} selected for {question:?}"))
    }

    async fn wait_value(
        &self,
        handle: &ElementHandle,
        question: &str,
        expected: &str,
    ) -> SurveyorResult<()> {
        let surface = self.surface;
        Poller::new(self.post_condition)
            .describe(format!("value {expected:?}"))
            .until(move |_| async move {
                let value = surface.read_attribute(handle, "value").await?;
                Ok(value.is_some_and(|v| v == expected))
            })
            .await?
            .or_timed_out(format!("value {expected:?} for {question:?}"))
    }

    async fn wait_attached(&self, handle: &ElementHandle, path: &Path) -> SurveyorResult<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let surface = self.surface;
        let name_ref = name.as_str();
        Poller::new(self.post_condition)
            .describe(format!("file {name} attached"))
            .until(move |_| async move {
                let files = surface.attached_files(handle).await?;
                Ok(files.iter().any(|f| f == name_ref))
            })
            .await?
            .or_timed_out(format!("file {name} attached"))
    }
}
