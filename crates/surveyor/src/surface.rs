//! Rendered UI Surface
//!
//! The abstract collaborator every component drives: a tree of elements
//! queryable by text containment and structural relationship
//! (descendant-of, positioned-below, state-of-container).
//!
//! # Design
//!
//! - **Queries are data**: an [`ElementQuery`] describes *what* to find;
//!   each [`UiSurface`] implementation decides *how*.
//! - **Handles are view-scoped**: an [`ElementHandle`] is only valid until
//!   the next reload or navigation.
//! - **No picking in the surface**: `query` returns every match in a stable
//!   order; strategies decide which one to use via [`Pick`].

use crate::result::SurveyorResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// =============================================================================
// ROLES AND TEXT MATCHING
// =============================================================================

/// Interaction role of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Content block grouping a question and its controls
    Container,
    /// Static text node (labels, titles, paragraphs)
    Text,
    /// Push button
    Button,
    /// Radio option
    Radio,
    /// Option inside an open dropdown list
    Option,
    /// Toggleable option of a multi-select question
    MultiOption,
    /// Single-line text input
    TextInput,
    /// Multi-line text input
    TextArea,
    /// Input that opens a dropdown list
    Combobox,
    /// File input
    FileInput,
    /// Embedded frame
    Frame,
    /// Item of a workflow stepper
    Step,
    /// Matches any role
    Any,
}

impl Role {
    /// Stable name used in logs and generated scripts
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Text => "text",
            Self::Button => "button",
            Self::Radio => "radio",
            Self::Option => "option",
            Self::MultiOption => "multi_option",
            Self::TextInput => "text_input",
            Self::TextArea => "text_area",
            Self::Combobox => "combobox",
            Self::FileInput => "file_input",
            Self::Frame => "frame",
            Self::Step => "step",
            Self::Any => "any",
        }
    }

    /// Whether `other` satisfies this role
    #[must_use]
    pub fn accepts(&self, other: Role) -> bool {
        *self == Self::Any || *self == other
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapse runs of whitespace and trim, the way rendered text reads
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text predicate applied to an element's rendered text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    /// Normalized text equals the value
    Exact(String),
    /// Normalized text contains the value
    Contains(String),
}

impl TextMatch {
    /// Exact text match
    #[must_use]
    pub fn exact(text: impl Into<String>) -> Self {
        Self::Exact(text.into())
    }

    /// Substring text match
    #[must_use]
    pub fn contains(text: impl Into<String>) -> Self {
        Self::Contains(text.into())
    }

    /// The raw value being matched
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Exact(v) | Self::Contains(v) => v,
        }
    }

    /// Check rendered text against this predicate
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        let text = normalize_text(text);
        match self {
            Self::Exact(v) => text == normalize_text(v),
            Self::Contains(v) => text.contains(&normalize_text(v)),
        }
    }
}

impl fmt::Display for TextMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "text={v:?}"),
            Self::Contains(v) => write!(f, "text~={v:?}"),
        }
    }
}

// =============================================================================
// ELEMENT STATE
// =============================================================================

/// Visual/ARIA state an element can be filtered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    /// Pressed, checked or selected control
    Selected,
    /// Highlighted or currently active container
    Active,
    /// Finished stepper item
    Completed,
    /// Stepper item marked as failed
    Failed,
}

/// Attributes consulted when deciding element state
pub const STATE_ATTRIBUTES: [&str; 8] = [
    "aria-pressed",
    "aria-checked",
    "aria-selected",
    "aria-current",
    "aria-invalid",
    "data-state",
    "data-status",
    "class",
];

impl ElementState {
    /// Decide the state from an attribute lookup.
    ///
    /// Both the in-memory surface and the generated browser scripts follow
    /// these rules, so a query means the same thing everywhere.
    pub fn matches_attributes<F>(&self, attribute: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_true = |name: &str| attribute(name).is_some_and(|v| v == "true");
        let class_has = |needles: &[&str]| {
            attribute("class").is_some_and(|class| {
                class
                    .split_whitespace()
                    .any(|c| needles.iter().any(|n| class_token_matches(c, n)))
            })
        };
        let data_state = |value: &str| {
            ["data-state", "data-status"]
                .iter()
                .any(|name| attribute(name).is_some_and(|v| v == value))
        };
        match self {
            Self::Selected => {
                is_true("aria-pressed")
                    || is_true("aria-checked")
                    || is_true("aria-selected")
                    || class_has(&["selected", "checked"])
            }
            Self::Active => {
                attribute("aria-current").is_some_and(|v| v != "false")
                    || data_state("active")
                    || class_has(&["active", "highlighted", "green"])
            }
            Self::Completed => data_state("completed") || class_has(&["past", "completed"]),
            Self::Failed => {
                data_state("failed") || is_true("aria-invalid") || class_has(&["failed", "error"])
            }
        }
    }
}

/// Whether a CSS class token carries `needle`.
///
/// The token is split on `_` and `-`; some segment must start with the
/// needle, so `Stepper__active_3fa` and `bg-green-500` match while
/// `inactive`, `unselected` and `evergreen` do not.
#[must_use]
pub fn class_token_matches(token: &str, needle: &str) -> bool {
    token
        .split(['_', '-'])
        .any(|segment| segment.to_ascii_lowercase().starts_with(needle))
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selected => f.write_str("selected"),
            Self::Active => f.write_str("active"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Structural relationship between a target and another query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Target is a descendant of an element matching the query
    Within(Box<ElementQuery>),
    /// Target is rendered below an element matching the query, nearest first
    Below(Box<ElementQuery>),
}

/// Declarative element lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementQuery {
    /// Required role
    pub role: Role,
    /// Optional text predicate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextMatch>,
    /// Optional structural relation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<Relation>,
    /// Optional state filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ElementState>,
    /// Restrict to the frame whose `src` contains this value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
}

impl ElementQuery {
    /// Query every element with a role
    #[must_use]
    pub const fn new(role: Role) -> Self {
        Self {
            role,
            text: None,
            relation: None,
            state: None,
            frame: None,
        }
    }

    /// Content block whose text contains `text`
    #[must_use]
    pub fn container(text: impl Into<String>) -> Self {
        Self::new(Role::Container).with_text(TextMatch::contains(text))
    }

    /// Text node whose text contains `text`
    #[must_use]
    pub fn text_node(text: impl Into<String>) -> Self {
        Self::new(Role::Text).with_text(TextMatch::contains(text))
    }

    /// Set the text predicate
    #[must_use]
    pub fn with_text(mut self, text: TextMatch) -> Self {
        self.text = Some(text);
        self
    }

    /// Require an exact text match
    #[must_use]
    pub fn with_exact_text(self, text: impl Into<String>) -> Self {
        self.with_text(TextMatch::exact(text))
    }

    /// Require the target to sit inside `container`
    #[must_use]
    pub fn within(mut self, container: ElementQuery) -> Self {
        self.relation = Some(Relation::Within(Box::new(container)));
        self
    }

    /// Require the target to be rendered below `anchor`
    #[must_use]
    pub fn below(mut self, anchor: ElementQuery) -> Self {
        self.relation = Some(Relation::Below(Box::new(anchor)));
        self
    }

    /// Filter on element state
    #[must_use]
    pub const fn with_state(mut self, state: ElementState) -> Self {
        self.state = Some(state);
        self
    }

    /// Restrict lookup to an embedded frame
    #[must_use]
    pub fn in_frame(mut self, src_contains: impl Into<String>) -> Self {
        self.frame = Some(src_contains.into());
        self
    }
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.role)?;
        if let Some(ref text) = self.text {
            write!(f, "[{text}]")?;
        }
        if let Some(state) = self.state {
            write!(f, ":{state}")?;
        }
        if let Some(ref frame) = self.frame {
            write!(f, " in frame({frame})")?;
        }
        match self.relation {
            Some(Relation::Within(ref q)) => write!(f, " within {q}"),
            Some(Relation::Below(ref q)) => write!(f, " below {q}"),
            None => Ok(()),
        }
    }
}

// =============================================================================
// PICKING
// =============================================================================

/// How a strategy chooses among the visible matches of its query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pick {
    /// Exactly one visible match, otherwise ambiguous
    Unique,
    /// First match in surface order (nearest for `Below`)
    Nearest,
    /// Last match in surface order
    Last,
    /// Zero-based index into the matches
    Nth(usize),
}

/// Result of applying a [`Pick`]
#[derive(Debug, Clone, PartialEq)]
pub enum Picked {
    /// A single element was chosen
    One(ElementHandle),
    /// No candidates
    Empty,
    /// Several candidates where one was required
    Ambiguous(usize),
}

impl Pick {
    /// Choose from visible candidates
    #[must_use]
    pub fn apply(&self, mut candidates: Vec<ElementHandle>) -> Picked {
        if candidates.is_empty() {
            return Picked::Empty;
        }
        match self {
            Self::Unique if candidates.len() > 1 => Picked::Ambiguous(candidates.len()),
            Self::Unique | Self::Nearest => Picked::One(candidates.swap_remove(0)),
            Self::Last => candidates.pop().map_or(Picked::Empty, Picked::One),
            Self::Nth(i) if *i < candidates.len() => Picked::One(candidates.swap_remove(*i)),
            Self::Nth(_) => Picked::Empty,
        }
    }
}

// =============================================================================
// ELEMENT HANDLE
// =============================================================================

/// Layout box of a rendered element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f32,
    /// Y position
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Bottom edge
    #[must_use]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Vertical gap from `anchor`'s bottom edge down to this box, if below it
    #[must_use]
    pub fn distance_below(&self, anchor: &BoundingBox) -> Option<f32> {
        let gap = self.y - anchor.bottom();
        (gap >= 0.0).then_some(gap)
    }
}

/// Handle to an element in the current page view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Surface-assigned identifier
    pub id: String,
    /// Role the element was matched as
    pub role: Role,
    /// Normalized rendered text at lookup time
    pub text: String,
    /// Layout box at lookup time, if rendered
    pub bounding_box: Option<BoundingBox>,
}

impl ElementHandle {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            text: text.into(),
            bounding_box: None,
        }
    }

    /// Attach a layout box
    #[must_use]
    pub const fn with_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }
}

// =============================================================================
// REFRESH
// =============================================================================

/// How a poll sees backend changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Reload the view before every read
    #[default]
    Reload,
    /// The UI updates itself; re-read without reloading
    InPlace,
}

impl RefreshMode {
    /// Refresh `surface` ahead of a read
    ///
    /// # Errors
    ///
    /// Propagates reload failures.
    pub async fn refresh<S: UiSurface + ?Sized>(&self, surface: &S) -> SurveyorResult<()> {
        match self {
            Self::Reload => surface.reload().await,
            Self::InPlace => Ok(()),
        }
    }
}

// =============================================================================
// SURFACE TRAIT
// =============================================================================

/// The rendered UI a scenario drives.
///
/// Implementations:
///
/// - [`FakeSurface`](crate::fake::FakeSurface) - in-memory element tree for tests
/// - `ChromiumSurface` - real browser page over CDP (feature `browser`)
#[async_trait]
pub trait UiSurface: Send + Sync {
    /// Every element matching `query`, in surface order
    async fn query(&self, query: &ElementQuery) -> SurveyorResult<Vec<ElementHandle>>;

    /// Whether the element is currently rendered and visible
    async fn is_visible(&self, element: &ElementHandle) -> SurveyorResult<bool>;

    /// Click the element
    async fn click(&self, element: &ElementHandle) -> SurveyorResult<()>;

    /// Clear the element's value, then type `text`
    async fn fill(&self, element: &ElementHandle, text: &str) -> SurveyorResult<()>;

    /// Normalized rendered text
    async fn read_text(&self, element: &ElementHandle) -> SurveyorResult<String>;

    /// Attribute value; `value` reads the live input value
    async fn read_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> SurveyorResult<Option<String>>;

    /// Attach a local file to a file input
    async fn attach_file(&self, element: &ElementHandle, path: &Path) -> SurveyorResult<()>;

    /// File names currently attached to a file input
    async fn attached_files(&self, element: &ElementHandle) -> SurveyorResult<Vec<String>>;

    /// Reload the current view
    async fn reload(&self) -> SurveyorResult<()>;

    /// Visible matches of `query`, in surface order
    async fn query_visible(&self, query: &ElementQuery) -> SurveyorResult<Vec<ElementHandle>> {
        let mut visible = Vec::new();
        for element in self.query(query).await? {
            if self.is_visible(&element).await? {
                visible.push(element);
            }
        }
        Ok(visible)
    }

    /// First visible match of `query`
    async fn first_visible(&self, query: &ElementQuery) -> SurveyorResult<Option<ElementHandle>> {
        Ok(self.query_visible(query).await?.into_iter().next())
    }

    /// Whether the element currently carries `state`
    async fn has_state(
        &self,
        element: &ElementHandle,
        state: ElementState,
    ) -> SurveyorResult<bool> {
        let mut attributes = Vec::with_capacity(STATE_ATTRIBUTES.len());
        for name in STATE_ATTRIBUTES {
            attributes.push((name, self.read_attribute(element, name).await?));
        }
        Ok(state.matches_attributes(|name| {
            attributes
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, v)| v.clone())
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod text_match_tests {
        use super::*;

        #[test]
        fn test_exact_ignores_surrounding_whitespace() {
            let m = TextMatch::exact("Yes");
            assert!(m.matches("  Yes \n"));
            assert!(!m.matches("Yes please"));
        }

        #[test]
        fn test_contains_collapses_inner_whitespace() {
            let m = TextMatch::contains("How many employees");
            assert!(m.matches("Q3.  How   many\nemployees do you have?"));
            assert!(!m.matches("How many contractors"));
        }

        #[test]
        fn test_value_and_display() {
            assert_eq!(TextMatch::exact("No").value(), "No");
            assert_eq!(TextMatch::contains("Tax").to_string(), "text~=\"Tax\"");
        }
    }

    mod state_tests {
        use super::*;
        use std::collections::HashMap;

        fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
            let map: HashMap<String, String> = pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect();
            move |name| map.get(name).cloned()
        }

        #[test]
        fn test_selected_from_aria() {
            assert!(ElementState::Selected.matches_attributes(lookup(&[("aria-pressed", "true")])));
            assert!(ElementState::Selected.matches_attributes(lookup(&[("aria-checked", "true")])));
            assert!(!ElementState::Selected.matches_attributes(lookup(&[("aria-pressed", "false")])));
        }

        #[test]
        fn test_selected_from_class() {
            let attrs = lookup(&[("class", "Button__root Button__selected_x1")]);
            assert!(ElementState::Selected.matches_attributes(attrs));
            assert!(!ElementState::Selected.matches_attributes(lookup(&[("class", "Button__root")])));
        }

        #[test]
        fn test_negated_classes_do_not_match() {
            assert!(!ElementState::Active.matches_attributes(lookup(&[("class", "Stepper__inactive")])));
            assert!(!ElementState::Selected.matches_attributes(lookup(&[("class", "chip-unselected")])));
            assert!(class_token_matches("Stepper__active_3fa", "active"));
        }

        #[test]
        fn test_class_needle_matches_whole_segments() {
            assert!(!ElementState::Active.matches_attributes(lookup(&[("class", "evergreen")])));
            assert!(!ElementState::Active.matches_attributes(lookup(&[("class", "theme-evergreen")])));
            assert!(ElementState::Active.matches_attributes(lookup(&[("class", "bg-green-500")])));
            assert!(!class_token_matches("reactive", "active"));
            assert!(class_token_matches("Tab__activeItem", "active"));
        }

        #[test]
        fn test_data_status_attribute() {
            assert!(STATE_ATTRIBUTES.contains(&"data-status"));
            assert!(ElementState::Completed.matches_attributes(lookup(&[("data-status", "completed")])));
            assert!(ElementState::Failed.matches_attributes(lookup(&[("data-status", "failed")])));
            assert!(!ElementState::Active.matches_attributes(lookup(&[("data-status", "pending")])));
        }

        #[test]
        fn test_stepper_states() {
            assert!(ElementState::Completed.matches_attributes(lookup(&[("class", "Stepper__past")])));
            assert!(ElementState::Failed.matches_attributes(lookup(&[("class", "Stepper__failed")])));
            assert!(ElementState::Failed.matches_attributes(lookup(&[("data-state", "failed")])));
            assert!(!ElementState::Completed.matches_attributes(lookup(&[("class", "Stepper__active")])));
        }

        #[test]
        fn test_active_variants() {
            assert!(ElementState::Active.matches_attributes(lookup(&[("class", "green Card")])));
            assert!(ElementState::Active.matches_attributes(lookup(&[("aria-current", "step")])));
            assert!(ElementState::Active.matches_attributes(lookup(&[("data-state", "active")])));
            assert!(!ElementState::Active.matches_attributes(lookup(&[("aria-current", "false")])));
        }
    }

    mod pick_tests {
        use super::*;

        fn handles(n: usize) -> Vec<ElementHandle> {
            (0..n)
                .map(|i| ElementHandle::new(format!("e{i}"), Role::Button, "Yes"))
                .collect()
        }

        #[test]
        fn test_unique_requires_single_candidate() {
            assert_eq!(Pick::Unique.apply(handles(0)), Picked::Empty);
            assert!(matches!(Pick::Unique.apply(handles(1)), Picked::One(h) if h.id == "e0"));
            assert_eq!(Pick::Unique.apply(handles(2)), Picked::Ambiguous(2));
        }

        #[test]
        fn test_first_last_nth() {
            assert!(matches!(Pick::Nearest.apply(handles(3)), Picked::One(h) if h.id == "e0"));
            assert!(matches!(Pick::Last.apply(handles(3)), Picked::One(h) if h.id == "e2"));
            assert!(matches!(Pick::Nth(1).apply(handles(3)), Picked::One(h) if h.id == "e1"));
            assert_eq!(Pick::Nth(5).apply(handles(3)), Picked::Empty);
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_display_describes_structure() {
            let q = ElementQuery::new(Role::Button)
                .with_exact_text("Yes")
                .within(ElementQuery::container("Do you have employees?"));
            assert_eq!(
                q.to_string(),
                "button[text=\"Yes\"] within container[text~=\"Do you have employees?\"]"
            );
        }

        #[test]
        fn test_query_serializes_as_data() {
            let q = ElementQuery::new(Role::TextInput)
                .below(ElementQuery::text_node("Company name"))
                .with_state(ElementState::Active);
            let json = serde_json::to_string(&q).unwrap();
            let back: ElementQuery = serde_json::from_str(&json).unwrap();
            assert_eq!(back, q);
        }

        #[test]
        fn test_distance_below() {
            let anchor = BoundingBox::new(0.0, 100.0, 200.0, 20.0);
            assert_eq!(BoundingBox::new(0.0, 150.0, 10.0, 10.0).distance_below(&anchor), Some(30.0));
            assert_eq!(BoundingBox::new(0.0, 50.0, 10.0, 10.0).distance_below(&anchor), None);
        }

        #[test]
        fn test_role_accepts() {
            assert!(Role::Any.accepts(Role::Radio));
            assert!(Role::Radio.accepts(Role::Radio));
            assert!(!Role::Radio.accepts(Role::Button));
        }
    }
}
