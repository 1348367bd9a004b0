//! Selector Strategy Chain
//!
//! Ordered fallback lookup of one interactable element from a question's
//! displayed text. The first strategy to yield a visible, unambiguous
//! element wins; the whole chain is re-run under an existence
//! [`PollPolicy`] before giving up with [`SurveyorError::NotFound`].
//!
//! Default order for a question-scoped control:
//!
//! 1. `descendant` - inside the content block containing the question text
//! 2. `below` - nearest element rendered below the question text node
//! 3. `active_container` - inside the highlighted (active) content block

use crate::poll::{PollPolicy, Poller};
use crate::result::{SurveyorError, SurveyorResult};
use crate::surface::{ElementHandle, ElementQuery, ElementState, Pick, Picked, Role, UiSurface};
use tracing::{debug, trace};

/// One lookup strategy
#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    /// Name used in logs and [`Resolution`]
    pub name: String,
    /// Structural query
    pub query: ElementQuery,
    /// How to choose among visible matches
    pub pick: Pick,
}

impl Strategy {
    /// Create a strategy
    #[must_use]
    pub fn new(name: impl Into<String>, query: ElementQuery, pick: Pick) -> Self {
        Self {
            name: name.into(),
            query,
            pick,
        }
    }
}

/// Which strategy located an element
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Located element
    pub handle: ElementHandle,
    /// Zero-based position of the winning strategy
    pub strategy_index: usize,
    /// Name of the winning strategy
    pub strategy_name: String,
}

/// Ranked strategies for one target
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorChain {
    target: String,
    strategies: Vec<Strategy>,
}

impl SelectorChain {
    /// Empty chain for a described target
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            strategies: Vec::new(),
        }
    }

    /// Standard three-strategy chain for a control belonging to `question`.
    ///
    /// `control` supplies role, text and state of the wanted element; its
    /// relation is replaced by each strategy.
    #[must_use]
    pub fn for_question(question: &str, control: &ElementQuery) -> Self {
        let scoped = |relation: ElementQuery, below: bool| {
            let q = control.clone();
            if below {
                q.below(relation)
            } else {
                q.within(relation)
            }
        };
        Self::new(format!("{control} for {question:?}"))
            .strategy(Strategy::new(
                "descendant",
                scoped(ElementQuery::container(question), false),
                Pick::Unique,
            ))
            .strategy(Strategy::new(
                "below",
                scoped(ElementQuery::text_node(question), true),
                Pick::Nearest,
            ))
            .strategy(Strategy::new(
                "active_container",
                scoped(
                    ElementQuery::new(Role::Container).with_state(ElementState::Active),
                    false,
                ),
                Pick::Last,
            ))
    }

    /// Append a strategy
    #[must_use]
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Change how the named strategy picks among its matches
    #[must_use]
    pub fn with_pick(mut self, name: &str, pick: Pick) -> Self {
        for s in self.strategies.iter_mut().filter(|s| s.name == name) {
            s.pick = pick;
        }
        self
    }

    /// Description of the target
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Strategies in priority order
    #[must_use]
    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Run every strategy once, in order.
    ///
    /// # Errors
    ///
    /// Propagates surface errors.
    pub async fn resolve_once<S>(&self, surface: &S) -> SurveyorResult<Option<Resolution>>
    where
        S: UiSurface + ?Sized,
    {
        for (index, strategy) in self.strategies.iter().enumerate() {
            let visible = surface.query_visible(&strategy.query).await?;
            match strategy.pick.apply(visible) {
                Picked::One(handle) => {
                    trace!(
                        target_desc = %self.target,
                        strategy = %strategy.name,
                        element = %handle.id,
                        "strategy matched"
                    );
                    return Ok(Some(Resolution {
                        handle,
                        strategy_index: index,
                        strategy_name: strategy.name.clone(),
                    }));
                }
                Picked::Empty => {
                    debug!(target_desc = %self.target, strategy = %strategy.name, "no visible match");
                }
                Picked::Ambiguous(count) => {
                    debug!(
                        target_desc = %self.target,
                        strategy = %strategy.name,
                        count,
                        "ambiguous match skipped"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Resolve within an existence budget.
    ///
    /// # Errors
    ///
    /// Returns [`SurveyorError::NotFound`] when no strategy resolves before
    /// the budget is spent.
    pub async fn resolve<S>(&self, surface: &S, policy: PollPolicy) -> SurveyorResult<Resolution>
    where
        S: UiSurface + ?Sized,
    {
        Poller::new(policy)
            .describe(self.target.clone())
            .poll(move |_| self.resolve_once(surface))
            .await?
            .into_result(|_, _, _| SurveyorError::NotFound {
                target: self.target.clone(),
                strategies: self.strategies.len(),
            })
    }
}
