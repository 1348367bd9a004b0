//! Session
//!
//! Owns one [`UiSurface`] and the [`EngineConfig`] for a scenario, and hands
//! out the resolvers, navigators and waiters that borrow it. Scenarios pass
//! the session explicitly instead of reaching for shared fixtures.

use crate::config::EngineConfig;
use crate::inbox::{Inbox, InboxWaiter};
use crate::question::QuestionResolver;
use crate::result::SurveyorResult;
use crate::stepper::{StageSet, StepperNavigator, StepperState};
use crate::surface::{ElementQuery, UiSurface};
use crate::waiters::{
    FrameHandshakeWaiter, LoadingMaskWaiter, ReviewStatusWaiter, StatusMarker,
    TextConvergenceWaiter,
};
use tracing::debug;

/// One surface plus its wait budgets
#[derive(Debug)]
pub struct Session<S: UiSurface> {
    surface: S,
    config: EngineConfig,
}

impl<S: UiSurface> Session<S> {
    /// Create a session after validating `config`
    ///
    /// # Errors
    ///
    /// [`crate::SurveyorError::Config`] for an invalid configuration.
    pub fn new(surface: S, config: EngineConfig) -> SurveyorResult<Self> {
        config.validate()?;
        debug!(refresh = ?config.refresh, "session created");
        Ok(Self { surface, config })
    }

    /// Session with default budgets
    #[must_use]
    pub fn with_defaults(surface: S) -> Self {
        Self {
            surface,
            config: EngineConfig::default(),
        }
    }

    /// The driven surface
    #[must_use]
    pub const fn surface(&self) -> &S {
        &self.surface
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Give the surface back
    #[must_use]
    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Refresh the view the way polls do
    ///
    /// # Errors
    ///
    /// Propagates reload failures.
    pub async fn refresh(&self) -> SurveyorResult<()> {
        self.config.refresh.refresh(&self.surface).await
    }

    /// Question resolver with the configured existence and post-condition
    /// budgets
    #[must_use]
    pub const fn questions(&self) -> QuestionResolver<'_, S> {
        QuestionResolver::new(
            &self.surface,
            self.config.existence,
            self.config.post_condition,
        )
    }

    /// Navigator for `stages`
    #[must_use]
    pub fn stepper(&self, stages: StageSet) -> StepperNavigator<'_, S> {
        StepperNavigator::new(&self.surface, stages).with_refresh(self.config.refresh)
    }

    /// [`StepperNavigator::wait_for_active`] with the configured stepper budget
    ///
    /// # Errors
    ///
    /// Errors of [`StepperNavigator::wait_for_active`].
    pub async fn wait_for_stage(
        &self,
        navigator: &StepperNavigator<'_, S>,
        stage: &str,
    ) -> SurveyorResult<StepperState> {
        navigator.wait_for_active(stage, self.config.stepper).await
    }

    /// Review status waiter over `markers`
    #[must_use]
    pub fn review(&self, markers: Vec<StatusMarker>) -> ReviewStatusWaiter<'_, S> {
        ReviewStatusWaiter::new(&self.surface, markers, self.config.review)
            .with_refresh(self.config.refresh)
    }

    /// Handshake with the widget embedded in the frame whose `src` contains
    /// `frame`
    #[must_use]
    pub fn handshake(
        &self,
        trigger: ElementQuery,
        frame: impl Into<String>,
        first_control: ElementQuery,
    ) -> FrameHandshakeWaiter<'_, S> {
        FrameHandshakeWaiter::new(
            &self.surface,
            trigger,
            frame,
            first_control,
            self.config.handshake,
        )
    }

    /// Loading mask waiter; the appearance wait uses the existence budget
    #[must_use]
    pub const fn loading_mask(&self, indicator: ElementQuery) -> LoadingMaskWaiter<'_, S> {
        LoadingMaskWaiter::new(
            &self.surface,
            indicator,
            self.config.existence,
            self.config.loading_mask,
        )
    }

    /// Text convergence waiter for `target`
    #[must_use]
    pub const fn text(&self, target: ElementQuery) -> TextConvergenceWaiter<'_, S> {
        TextConvergenceWaiter::new(&self.surface, target, self.config.text_convergence)
            .with_refresh(self.config.refresh)
    }

    /// Inbox waiter with the configured inbox budget
    #[must_use]
    pub const fn inbox<'i, I: Inbox + ?Sized>(&self, inbox: &'i I) -> InboxWaiter<'i, I> {
        InboxWaiter::new(inbox, self.config.inbox)
    }
}
