//! In-memory UI surface for deterministic tests
//!
//! [`FakeSurface`] keeps an element tree with attributes, visibility and a
//! simple vertical layout (every node is stacked in document order, a
//! parent spans its subtree). Clicks and reloads can carry scripted
//! [`Effect`]s, and a configurable lag delays their propagation so
//! post-condition waits are exercised for real.
//!
//! ```
//! use surveyor::fake::FakeSurface;
//!
//! let mut fake = FakeSurface::new();
//! let (_, buttons) = fake.button_question("Do you have employees?", &["Yes", "No"]);
//! assert_eq!(buttons.len(), 2);
//! ```
//!
//! [`FakeInbox`] plays the same role for mail: messages are scripted to
//! appear after a number of searches.

use crate::inbox::{BodyFormat, Inbox, MailQuery, MessageId};
use crate::result::{SurveyorError, SurveyorResult};
use crate::surface::{
    normalize_text, BoundingBox, ElementHandle, ElementQuery, Relation, Role, UiSurface,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Height of one layout row in the fake surface
pub const ROW_HEIGHT: f32 = 20.0;

/// Width of every laid-out node
pub const ROW_WIDTH: f32 = 400.0;

/// Index of a node in the fake tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Node definition used when building the tree
#[derive(Debug, Clone)]
pub struct FakeNode {
    role: Role,
    text: String,
    attributes: BTreeMap<String, String>,
    visible: bool,
}

impl FakeNode {
    /// Create a visible node
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            attributes: BTreeMap::new(),
            visible: true,
        }
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Start hidden
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Scripted change to the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Set an attribute
    SetAttribute {
        /// Target node
        target: NodeId,
        /// Attribute name
        name: String,
        /// New value
        value: String,
    },
    /// Flip an attribute between `"true"` and `"false"`
    ToggleAttribute {
        /// Target node
        target: NodeId,
        /// Attribute name
        name: String,
    },
    /// Remove an attribute
    RemoveAttribute {
        /// Target node
        target: NodeId,
        /// Attribute name
        name: String,
    },
    /// Make a node visible
    Show(NodeId),
    /// Hide a node
    Hide(NodeId),
    /// Replace a node's own text
    SetText {
        /// Target node
        target: NodeId,
        /// New text
        text: String,
    },
}

impl Effect {
    /// Set an attribute
    #[must_use]
    pub fn set(target: NodeId, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::SetAttribute {
            target,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Toggle an attribute
    #[must_use]
    pub fn toggle(target: NodeId, name: impl Into<String>) -> Self {
        Self::ToggleAttribute {
            target,
            name: name.into(),
        }
    }

    /// Remove an attribute
    #[must_use]
    pub fn remove(target: NodeId, name: impl Into<String>) -> Self {
        Self::RemoveAttribute {
            target,
            name: name.into(),
        }
    }

    /// Replace text
    #[must_use]
    pub fn text(target: NodeId, text: impl Into<String>) -> Self {
        Self::SetText {
            target,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ClickEffect {
    on_click_number: Option<u32>,
    effect: Effect,
}

#[derive(Debug)]
struct Node {
    role: Role,
    text: String,
    attributes: BTreeMap<String, String>,
    visible: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    files: Vec<String>,
    clicks: u32,
    on_click: Vec<ClickEffect>,
}

#[derive(Debug)]
struct FakeState {
    nodes: Vec<Node>,
    generation: u32,
    reloads: u32,
    on_reload: Vec<(u32, Effect)>,
    lag: u32,
    pending: Vec<(u32, Effect)>,
    failures: u32,
    history: Vec<String>,
}

/// Deterministic in-memory [`UiSurface`]
#[derive(Debug)]
pub struct FakeSurface {
    state: Mutex<FakeState>,
}

impl Default for FakeSurface {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BUILDING
// =============================================================================

impl FakeSurface {
    /// Empty surface with a single root node
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            role: Role::Any,
            text: String::new(),
            attributes: BTreeMap::new(),
            visible: true,
            parent: None,
            children: Vec::new(),
            files: Vec::new(),
            clicks: 0,
            on_click: Vec::new(),
        };
        Self {
            state: Mutex::new(FakeState {
                nodes: vec![root],
                generation: 0,
                reloads: 0,
                on_reload: Vec::new(),
                lag: 0,
                pending: Vec::new(),
                failures: 0,
                history: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The document root
    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Append a node under `parent`
    pub fn append(&mut self, parent: NodeId, node: FakeNode) -> NodeId {
        let mut state = self.lock();
        let id = NodeId(state.nodes.len());
        state.nodes.push(Node {
            role: node.role,
            text: node.text,
            attributes: node.attributes,
            visible: node.visible,
            parent: Some(parent),
            children: Vec::new(),
            files: Vec::new(),
            clicks: 0,
            on_click: Vec::new(),
        });
        if let Some(p) = state.nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        id
    }

    /// Apply `effect` on every click of `node`
    pub fn on_click(&mut self, node: NodeId, effect: Effect) {
        self.push_click_effect(node, None, effect);
    }

    /// Apply `effect` only on the `n`th click (1-based) of `node`
    pub fn on_click_number(&mut self, node: NodeId, n: u32, effect: Effect) {
        self.push_click_effect(node, Some(n), effect);
    }

    fn push_click_effect(&mut self, node: NodeId, on_click_number: Option<u32>, effect: Effect) {
        if let Some(n) = self.lock().nodes.get_mut(node.0) {
            n.on_click.push(ClickEffect {
                on_click_number,
                effect,
            });
        }
    }

    /// Apply `effect` when the view is reloaded for the `n`th time (1-based)
    pub fn on_reload(&mut self, n: u32, effect: Effect) {
        self.lock().on_reload.push((n, effect));
    }

    /// Delay click and fill effects until `reads` further reads ran.
    ///
    /// Queries, text, attribute and attachment reads advance the lag.
    pub fn set_lag(&mut self, reads: u32) {
        self.lock().lag = reads;
    }

    /// Fail the next `count` surface operations with a transient error
    pub fn fail_next(&self, count: u32) {
        self.lock().failures = count;
    }

    /// Apply an effect immediately
    pub fn apply(&self, effect: Effect) {
        self.lock().apply(&effect);
    }

    /// Attribute of a node, for assertions
    #[must_use]
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.lock()
            .nodes
            .get(node.0)
            .and_then(|n| n.attributes.get(name).cloned())
    }

    /// Number of times a node was clicked
    #[must_use]
    pub fn click_count(&self, node: NodeId) -> u32 {
        self.lock().nodes.get(node.0).map_or(0, |n| n.clicks)
    }

    /// Number of reloads so far
    #[must_use]
    pub fn reload_count(&self) -> u32 {
        self.lock().reloads
    }

    /// Handle for a node in the current view
    #[must_use]
    pub fn handle(&self, node: NodeId) -> ElementHandle {
        self.lock().handle(node)
    }

    /// Call history for verification
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Check if an operation was called
    #[must_use]
    pub fn was_called(&self, operation: &str) -> bool {
        self.lock().history.iter().any(|c| c.starts_with(operation))
    }

    /// Count calls of an operation
    #[must_use]
    pub fn count_calls(&self, operation: &str) -> usize {
        self.lock()
            .history
            .iter()
            .filter(|c| c.starts_with(operation))
            .count()
    }
}

// =============================================================================
// WIDGET HELPERS
// =============================================================================

impl FakeSurface {
    fn question_block(&mut self, question: &str) -> NodeId {
        let root = self.root();
        let container = self.append(root, FakeNode::new(Role::Container, ""));
        self.append(container, FakeNode::new(Role::Text, question));
        container
    }

    /// Card with a question and mutually exclusive choice buttons
    pub fn button_question(&mut self, question: &str, choices: &[&str]) -> (NodeId, Vec<NodeId>) {
        self.exclusive_question(question, choices, Role::Button, "aria-pressed")
    }

    /// Card with a question and radio options
    pub fn radio_question(&mut self, question: &str, choices: &[&str]) -> (NodeId, Vec<NodeId>) {
        self.exclusive_question(question, choices, Role::Radio, "aria-checked")
    }

    fn exclusive_question(
        &mut self,
        question: &str,
        choices: &[&str],
        role: Role,
        state_attribute: &str,
    ) -> (NodeId, Vec<NodeId>) {
        let container = self.question_block(question);
        let ids: Vec<NodeId> = choices
            .iter()
            .map(|c| {
                self.append(
                    container,
                    FakeNode::new(role, *c).attr(state_attribute, "false"),
                )
            })
            .collect();
        for &clicked in &ids {
            for &other in &ids {
                let value = if other == clicked { "true" } else { "false" };
                self.on_click(clicked, Effect::set(other, state_attribute, value));
            }
        }
        (container, ids)
    }

    /// Card with a combobox whose options render in a detached list.
    ///
    /// Returns the container, the combobox and the option nodes.
    pub fn dropdown_question(
        &mut self,
        question: &str,
        options: &[&str],
    ) -> (NodeId, NodeId, Vec<NodeId>) {
        let container = self.question_block(question);
        let combobox = self.append(
            container,
            FakeNode::new(Role::Combobox, "").attr("value", ""),
        );
        let root = self.root();
        let list = self.append(root, FakeNode::new(Role::Any, "").hidden());
        let ids: Vec<NodeId> = options
            .iter()
            .map(|o| self.append(list, FakeNode::new(Role::Option, *o)))
            .collect();
        self.on_click(combobox, Effect::Show(list));
        for (&id, option) in ids.iter().zip(options) {
            self.on_click(id, Effect::set(combobox, "value", *option));
            self.on_click(id, Effect::Hide(list));
        }
        (container, combobox, ids)
    }

    /// Card with independently toggleable options
    pub fn multi_select_question(
        &mut self,
        question: &str,
        options: &[&str],
    ) -> (NodeId, Vec<NodeId>) {
        let container = self.question_block(question);
        let ids: Vec<NodeId> = options
            .iter()
            .map(|o| {
                self.append(
                    container,
                    FakeNode::new(Role::MultiOption, *o).attr("aria-selected", "false"),
                )
            })
            .collect();
        for &id in &ids {
            self.on_click(id, Effect::toggle(id, "aria-selected"));
        }
        (container, ids)
    }

    /// Card with a single-line text input
    pub fn text_question(&mut self, question: &str) -> (NodeId, NodeId) {
        self.input_question(question, Role::TextInput)
    }

    /// Card with a multi-line text input
    pub fn text_area_question(&mut self, question: &str) -> (NodeId, NodeId) {
        self.input_question(question, Role::TextArea)
    }

    /// Card with a file input
    pub fn file_question(&mut self, question: &str) -> (NodeId, NodeId) {
        self.input_question(question, Role::FileInput)
    }

    fn input_question(&mut self, question: &str, role: Role) -> (NodeId, NodeId) {
        let container = self.question_block(question);
        let input = self.append(container, FakeNode::new(role, "").attr("value", ""));
        (container, input)
    }
}

// =============================================================================
// TREE EVALUATION
// =============================================================================

impl FakeState {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::SetAttribute {
                target,
                name,
                value,
            } => {
                if let Some(n) = self.nodes.get_mut(target.0) {
                    n.attributes.insert(name.clone(), value.clone());
                }
            }
            Effect::ToggleAttribute { target, name } => {
                if let Some(n) = self.nodes.get_mut(target.0) {
                    let next = if n.attributes.get(name).is_some_and(|v| v == "true") {
                        "false"
                    } else {
                        "true"
                    };
                    n.attributes.insert(name.clone(), next.to_string());
                }
            }
            Effect::RemoveAttribute { target, name } => {
                if let Some(n) = self.nodes.get_mut(target.0) {
                    n.attributes.remove(name);
                }
            }
            Effect::Show(target) | Effect::Hide(target) => {
                if let Some(n) = self.nodes.get_mut(target.0) {
                    n.visible = matches!(effect, Effect::Show(_));
                }
            }
            Effect::SetText { target, text } => {
                if let Some(n) = self.nodes.get_mut(target.0) {
                    n.text.clone_from(text);
                }
            }
        }
    }

    fn schedule(&mut self, effect: Effect) {
        if self.lag == 0 {
            self.apply(&effect);
        } else {
            self.pending.push((self.lag, effect));
        }
    }

    fn tick(&mut self) {
        let mut ready = Vec::new();
        self.pending.retain_mut(|(remaining, effect)| {
            *remaining -= 1;
            if *remaining == 0 {
                ready.push(effect.clone());
                false
            } else {
                true
            }
        });
        for effect in &ready {
            self.apply(effect);
        }
    }

    fn take_failure(&mut self, operation: &str) -> SurveyorResult<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(SurveyorError::surface(format!(
                "{operation}: target closed"
            )));
        }
        Ok(())
    }

    fn is_visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            match self.node(c) {
                Some(n) if n.visible => current = n.parent,
                _ => return false,
            }
        }
        true
    }

    fn rendered_text(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        self.collect_text(id, &mut parts);
        normalize_text(&parts.join(" "))
    }

    fn collect_text(&self, id: NodeId, parts: &mut Vec<String>) {
        let Some(n) = self.node(id) else { return };
        if !n.text.is_empty() {
            parts.push(n.text.clone());
        }
        for &child in &n.children {
            if self.node(child).is_some_and(|c| c.visible) {
                self.collect_text(child, parts);
            }
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.node(id).and_then(|n| n.parent);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.node(c).and_then(|n| n.parent);
        }
        false
    }

    fn enclosing_frame(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.node(id).and_then(|n| n.parent);
        while let Some(c) = current {
            let n = self.node(c)?;
            if n.role == Role::Frame {
                return Some(c);
            }
            current = n.parent;
        }
        None
    }

    /// Pre-order position and subtree size of every node
    fn layout(&self) -> Vec<(usize, usize)> {
        let mut layout = vec![(0, 1); self.nodes.len()];
        let mut position = 0;
        self.layout_from(NodeId(0), &mut position, &mut layout);
        layout
    }

    fn layout_from(&self, id: NodeId, position: &mut usize, layout: &mut [(usize, usize)]) -> usize {
        let start = *position;
        *position += 1;
        let mut size = 1;
        if let Some(n) = self.node(id) {
            for &child in &n.children {
                size += self.layout_from(child, position, layout);
            }
        }
        if let Some(slot) = layout.get_mut(id.0) {
            *slot = (start, size);
        }
        size
    }

    #[allow(clippy::cast_precision_loss)]
    fn bounding_box(&self, id: NodeId, layout: &[(usize, usize)]) -> Option<BoundingBox> {
        if !self.is_visible(id) {
            return None;
        }
        let (position, size) = layout.get(id.0).copied()?;
        Some(BoundingBox::new(
            0.0,
            position as f32 * ROW_HEIGHT,
            ROW_WIDTH,
            size as f32 * ROW_HEIGHT,
        ))
    }

    fn matches_local(&self, id: NodeId, query: &ElementQuery) -> bool {
        let Some(n) = self.node(id) else {
            return false;
        };
        if id.0 == 0 || !query.role.accepts(n.role) {
            return false;
        }
        if let Some(ref text) = query.text {
            if !text.matches(&self.rendered_text(id)) {
                return false;
            }
        }
        if let Some(state) = query.state {
            if !state.matches_attributes(|name| n.attributes.get(name).cloned()) {
                return false;
            }
        }
        let frame = self.enclosing_frame(id);
        match (&query.frame, frame) {
            (None, None) => true,
            (Some(src), Some(f)) => self
                .node(f)
                .and_then(|f| f.attributes.get("src"))
                .is_some_and(|s| s.contains(src.as_str())),
            _ => false,
        }
    }

    fn evaluate(&self, query: &ElementQuery, layout: &[(usize, usize)]) -> Vec<NodeId> {
        let mut ordered: Vec<NodeId> = (0..self.nodes.len()).map(NodeId).collect();
        ordered.sort_by_key(|id| layout.get(id.0).map_or(usize::MAX, |l| l.0));
        let candidates: Vec<NodeId> = ordered
            .into_iter()
            .filter(|&id| self.matches_local(id, query))
            .collect();

        match query.relation {
            None => candidates,
            Some(Relation::Within(ref container)) => {
                let all = self.evaluate(container, layout);
                let innermost: Vec<NodeId> = all
                    .iter()
                    .copied()
                    .filter(|&c| !all.iter().any(|&d| d != c && self.is_ancestor(c, d)))
                    .collect();
                candidates
                    .into_iter()
                    .filter(|&id| innermost.iter().any(|&c| self.is_ancestor(c, id)))
                    .collect()
            }
            Some(Relation::Below(ref anchor)) => {
                let anchors: Vec<BoundingBox> = self
                    .evaluate(anchor, layout)
                    .into_iter()
                    .filter_map(|a| self.bounding_box(a, layout))
                    .collect();
                let mut below: Vec<(f32, NodeId)> = candidates
                    .into_iter()
                    .filter_map(|id| {
                        let bbox = self.bounding_box(id, layout)?;
                        anchors
                            .iter()
                            .filter_map(|a| bbox.distance_below(a))
                            .reduce(f32::min)
                            .map(|d| (d, id))
                    })
                    .collect();
                below.sort_by(|a, b| a.0.total_cmp(&b.0));
                below.into_iter().map(|(_, id)| id).collect()
            }
        }
    }

    fn handle(&self, id: NodeId) -> ElementHandle {
        let layout = self.layout();
        self.handle_with(id, &layout)
    }

    fn handle_with(&self, id: NodeId, layout: &[(usize, usize)]) -> ElementHandle {
        let role = self.node(id).map_or(Role::Any, |n| n.role);
        let mut handle = ElementHandle::new(
            format!("n{}@{}", id.0, self.generation),
            role,
            self.rendered_text(id),
        );
        handle.bounding_box = self.bounding_box(id, layout);
        handle
    }

    fn resolve(&self, element: &ElementHandle) -> SurveyorResult<NodeId> {
        let stale = || SurveyorError::surface(format!("stale element handle {}", element.id));
        let (index, generation) = element
            .id
            .strip_prefix('n')
            .and_then(|rest| rest.split_once('@'))
            .ok_or_else(stale)?;
        let index: usize = index.parse().map_err(|_| stale())?;
        let generation: u32 = generation.parse().map_err(|_| stale())?;
        if generation != self.generation || index >= self.nodes.len() {
            return Err(stale());
        }
        Ok(NodeId(index))
    }
}

// =============================================================================
// SURFACE IMPLEMENTATION
// =============================================================================

#[async_trait]
impl UiSurface for FakeSurface {
    async fn query(&self, query: &ElementQuery) -> SurveyorResult<Vec<ElementHandle>> {
        let mut state = self.lock();
        state.history.push(format!("query:{query}"));
        state.take_failure("query")?;
        state.tick();
        let layout = state.layout();
        Ok(state
            .evaluate(query, &layout)
            .into_iter()
            .map(|id| state.handle_with(id, &layout))
            .collect())
    }

    async fn is_visible(&self, element: &ElementHandle) -> SurveyorResult<bool> {
        let state = self.lock();
        let id = state.resolve(element)?;
        Ok(state.is_visible(id))
    }

    async fn click(&self, element: &ElementHandle) -> SurveyorResult<()> {
        let mut state = self.lock();
        state.history.push(format!("click:{}", element.id));
        state.take_failure("click")?;
        let id = state.resolve(element)?;
        if !state.is_visible(id) {
            return Err(SurveyorError::surface(format!(
                "element {} is not visible",
                element.id
            )));
        }
        let effects: Vec<Effect> = match state.nodes.get_mut(id.0) {
            Some(n) => {
                n.clicks += 1;
                let clicks = n.clicks;
                n.on_click
                    .iter()
                    .filter(|c| c.on_click_number.map_or(true, |k| k == clicks))
                    .map(|c| c.effect.clone())
                    .collect()
            }
            None => Vec::new(),
        };
        for effect in effects {
            state.schedule(effect);
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> SurveyorResult<()> {
        let mut state = self.lock();
        state.history.push(format!("fill:{}:{text}", element.id));
        state.take_failure("fill")?;
        let id = state.resolve(element)?;
        let role = state.node(id).map_or(Role::Any, |n| n.role);
        if !matches!(role, Role::TextInput | Role::TextArea | Role::Combobox) {
            return Err(SurveyorError::surface(format!(
                "element {} ({role}) is not editable",
                element.id
            )));
        }
        state.apply(&Effect::set(id, "value", ""));
        state.schedule(Effect::set(id, "value", text));
        Ok(())
    }

    async fn read_text(&self, element: &ElementHandle) -> SurveyorResult<String> {
        let mut state = self.lock();
        state.tick();
        let id = state.resolve(element)?;
        Ok(state.rendered_text(id))
    }

    async fn read_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> SurveyorResult<Option<String>> {
        let mut state = self.lock();
        state.tick();
        let id = state.resolve(element)?;
        Ok(state.node(id).and_then(|n| n.attributes.get(name).cloned()))
    }

    async fn attach_file(&self, element: &ElementHandle, path: &Path) -> SurveyorResult<()> {
        let mut state = self.lock();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.history.push(format!("attach:{}:{name}", element.id));
        state.take_failure("attach")?;
        let id = state.resolve(element)?;
        match state.nodes.get_mut(id.0) {
            Some(n) if n.role == Role::FileInput => {
                n.files.push(name);
                Ok(())
            }
            _ => Err(SurveyorError::surface(format!(
                "element {} is not a file input",
                element.id
            ))),
        }
    }

    async fn attached_files(&self, element: &ElementHandle) -> SurveyorResult<Vec<String>> {
        let mut state = self.lock();
        state.tick();
        let id = state.resolve(element)?;
        Ok(state.node(id).map(|n| n.files.clone()).unwrap_or_default())
    }

    async fn reload(&self) -> SurveyorResult<()> {
        let mut state = self.lock();
        state.history.push("reload".to_string());
        state.take_failure("reload")?;
        state.reloads += 1;
        state.generation += 1;
        let reloads = state.reloads;
        let due: Vec<Effect> = state
            .on_reload
            .iter()
            .filter(|(n, _)| *n == reloads)
            .map(|(_, e)| e.clone())
            .collect();
        for effect in &due {
            state.apply(effect);
        }
        Ok(())
    }
}

// =============================================================================
// INBOX
// =============================================================================

/// Sender used by [`FakeInbox::deliver_after`]
pub const FAKE_SENDER: &str = "noreply@example.com";

#[derive(Debug, Clone)]
struct FakeMessage {
    id: MessageId,
    recipient: String,
    subject: String,
    from: String,
    html: String,
    visible_from: u32,
}

#[derive(Debug, Default)]
struct InboxState {
    messages: Vec<FakeMessage>,
    searches: u32,
    failures: u32,
    history: Vec<String>,
}

/// Deterministic in-memory [`Inbox`]
#[derive(Debug, Default)]
pub struct FakeInbox {
    state: Mutex<InboxState>,
}

impl FakeInbox {
    /// Empty inbox
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a message from [`FAKE_SENDER`] that becomes visible on the
    /// `searches`th search (0 and 1 both mean the next search).
    pub fn deliver_after(
        &self,
        searches: u32,
        recipient: &str,
        subject: &str,
        html: &str,
    ) -> MessageId {
        self.deliver_from(searches, recipient, FAKE_SENDER, subject, html)
    }

    /// Deliver a message with an explicit sender
    pub fn deliver_from(
        &self,
        searches: u32,
        recipient: &str,
        from: &str,
        subject: &str,
        html: &str,
    ) -> MessageId {
        let mut state = self.lock();
        let id = MessageId::new(format!("m{}", state.messages.len() + 1));
        state.messages.push(FakeMessage {
            id: id.clone(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            from: from.to_string(),
            html: html.to_string(),
            visible_from: searches,
        });
        id
    }

    /// Fail the next `count` calls with a transient error
    pub fn fail_next(&self, count: u32) {
        self.lock().failures = count;
    }

    /// Number of searches so far, failed ones included
    #[must_use]
    pub fn search_count(&self) -> u32 {
        self.lock().searches
    }

    /// Call history for verification
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }
}

impl InboxState {
    fn take_failure(&mut self, operation: &str) -> SurveyorResult<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(SurveyorError::inbox(format!("{operation}: 503 backend error")));
        }
        Ok(())
    }
}

/// Tag-stripped text of an HTML body
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    normalize_text(&out)
}

#[async_trait]
impl Inbox for FakeInbox {
    async fn search(&self, recipient: &str, query: &MailQuery) -> SurveyorResult<Vec<MessageId>> {
        let mut state = self.lock();
        state.searches += 1;
        state.history.push(format!("search:{recipient}:{query}"));
        state.take_failure("search")?;
        let searches = state.searches;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.visible_from <= searches && m.recipient.eq_ignore_ascii_case(recipient))
            .filter(|m| query.matches(&m.recipient, &m.subject, &m.from, &html_to_text(&m.html)))
            .map(|m| m.id.clone())
            .collect())
    }

    async fn fetch_body(&self, id: &MessageId, format: BodyFormat) -> SurveyorResult<String> {
        let mut state = self.lock();
        state.history.push(format!("fetch:{id}:{}", format.mime_type()));
        state.take_failure("fetch")?;
        let message = state
            .messages
            .iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| SurveyorError::inbox(format!("no message {id}")))?;
        Ok(match format {
            BodyFormat::Html => message.html.clone(),
            BodyFormat::Text => html_to_text(&message.html),
        })
    }
}
