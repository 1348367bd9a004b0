//! External Convergence Waiters
//!
//! Waits on state owned by other systems: review decisions rendered after
//! a backend job, embedded third-party widgets, progress masks and text
//! cells that settle after a sync. Inbox delivery lives in
//! [`crate::inbox`].

use crate::poll::{PollOutcome, PollPolicy, Poller};
use crate::result::{SurveyorError, SurveyorResult};
use crate::surface::{normalize_text, ElementHandle, ElementQuery, RefreshMode, UiSurface};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

// =============================================================================
// REVIEW STATUS
// =============================================================================

/// Terminal decision of an external review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Approved
    Success,
    /// Sent to manual review
    Review,
    /// Rejected
    Failed,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Review => f.write_str("review"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// A status and the element that indicates it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMarker {
    /// Status indicated
    pub status: ReviewStatus,
    /// Element rendered when the status is reached
    pub query: ElementQuery,
}

impl StatusMarker {
    /// Marker shown as a text node containing `text`
    #[must_use]
    pub fn text(status: ReviewStatus, text: impl Into<String>) -> Self {
        Self {
            status,
            query: ElementQuery::text_node(text),
        }
    }
}

/// Reloads until any terminal review marker is rendered
#[derive(Debug)]
pub struct ReviewStatusWaiter<'a, S: UiSurface + ?Sized> {
    surface: &'a S,
    markers: Vec<StatusMarker>,
    refresh: RefreshMode,
    policy: PollPolicy,
}

impl<'a, S: UiSurface + ?Sized> ReviewStatusWaiter<'a, S> {
    /// Create a waiter over `markers`, checked in order on every attempt
    #[must_use]
    pub fn new(surface: &'a S, markers: Vec<StatusMarker>, policy: PollPolicy) -> Self {
        Self {
            surface,
            markers,
            refresh: RefreshMode::Reload,
            policy,
        }
    }

    /// Override how the view is refreshed
    #[must_use]
    pub fn with_refresh(mut self, refresh: RefreshMode) -> Self {
        self.refresh = refresh;
        self
    }

    /// Wait for any terminal marker and report which one appeared
    ///
    /// # Errors
    ///
    /// [`SurveyorError::TimedOut`] if no marker appears within the budget.
    pub async fn wait(&self) -> SurveyorResult<ReviewStatus> {
        let this = self;
        let status = Poller::new(self.policy)
            .describe("review decision")
            .poll(move |_| async move {
                this.refresh.refresh(this.surface).await?;
                for marker in &this.markers {
                    if this.surface.first_visible(&marker.query).await?.is_some() {
                        return Ok(Some(marker.status));
                    }
                }
                Ok(None)
            })
            .await?
            .or_timed_out("review decision")?;
        info!(%status, "review decision converged");
        Ok(status)
    }

    /// Wait for convergence, then require `expected`
    ///
    /// # Errors
    ///
    /// [`SurveyorError::StatusMismatch`] when a different status converged,
    /// or the errors of [`Self::wait`].
    pub async fn expect(&self, expected: ReviewStatus) -> SurveyorResult<()> {
        let observed = self.wait().await?;
        if observed != expected {
            return Err(SurveyorError::StatusMismatch {
                expected: expected.to_string(),
                observed: observed.to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// FRAME HANDSHAKE
// =============================================================================

/// Clicks a trigger until an embedded widget renders its first control.
///
/// Embedded widgets sometimes swallow the first trigger click while their
/// frame loads, so the trigger is clicked at most twice.
#[derive(Debug)]
pub struct FrameHandshakeWaiter<'a, S: UiSurface + ?Sized> {
    surface: &'a S,
    trigger: ElementQuery,
    frame: String,
    first_control: ElementQuery,
    policy: PollPolicy,
}

/// Trigger clicks before giving up
pub const HANDSHAKE_CLICKS: u32 = 2;

impl<'a, S: UiSurface + ?Sized> FrameHandshakeWaiter<'a, S> {
    /// Create a waiter; `first_control` is looked up inside the frame whose
    /// `src` contains `frame`
    #[must_use]
    pub fn new(
        surface: &'a S,
        trigger: ElementQuery,
        frame: impl Into<String>,
        first_control: ElementQuery,
        policy: PollPolicy,
    ) -> Self {
        let frame = frame.into();
        let first_control = first_control.in_frame(frame.clone());
        Self {
            surface,
            trigger,
            frame,
            first_control,
            policy,
        }
    }

    /// Click the trigger and wait for the widget, retrying the click once.
    ///
    /// A transient surface error while finding or clicking the trigger on
    /// the first round is handled like a widget that did not render.
    ///
    /// # Errors
    ///
    /// [`SurveyorError::NotFound`] if the trigger is not rendered at all,
    /// or [`SurveyorError::HandshakeFailed`] once the retry is spent.
    pub async fn connect(&self) -> SurveyorResult<ElementHandle> {
        for click in 1..=HANDSHAKE_CLICKS {
            let retry_left = click < HANDSHAKE_CLICKS;
            match self.click_trigger().await {
                Ok(true) => {}
                Ok(false) if click == 1 => {
                    return Err(SurveyorError::NotFound {
                        target: self.trigger.to_string(),
                        strategies: 1,
                    });
                }
                Ok(false) => {
                    warn!(frame = %self.frame, "trigger gone before retry");
                    break;
                }
                Err(e) if e.is_transient() && retry_left => {
                    warn!(frame = %self.frame, error = %e, "trigger click failed, clicking again");
                    continue;
                }
                Err(e) => return Err(e),
            }

            let surface = self.surface;
            let control = &self.first_control;
            let outcome = Poller::new(self.policy)
                .describe(format!("first control of frame {:?}", self.frame))
                .poll(move |_| surface.first_visible(control))
                .await?;
            if let PollOutcome::Success { value, .. } = outcome {
                info!(frame = %self.frame, clicks = click, "frame handshake complete");
                return Ok(value);
            }
            if retry_left {
                warn!(frame = %self.frame, "widget did not render, clicking trigger again");
            }
        }
        Err(SurveyorError::HandshakeFailed {
            frame: self.frame.clone(),
            clicks: HANDSHAKE_CLICKS,
        })
    }

    /// `false` when the trigger is not visible
    async fn click_trigger(&self) -> SurveyorResult<bool> {
        let Some(trigger) = self.surface.first_visible(&self.trigger).await? else {
            return Ok(false);
        };
        self.surface.click(&trigger).await?;
        Ok(true)
    }
}

// =============================================================================
// LOADING MASK
// =============================================================================

/// Waits for a progress indicator to come and go
#[derive(Debug)]
pub struct LoadingMaskWaiter<'a, S: UiSurface + ?Sized> {
    surface: &'a S,
    indicator: ElementQuery,
    appear: PollPolicy,
    disappear: PollPolicy,
}

impl<'a, S: UiSurface + ?Sized> LoadingMaskWaiter<'a, S> {
    /// Create a waiter
    #[must_use]
    pub const fn new(
        surface: &'a S,
        indicator: ElementQuery,
        appear: PollPolicy,
        disappear: PollPolicy,
    ) -> Self {
        Self {
            surface,
            indicator,
            appear,
            disappear,
        }
    }

    /// Wait briefly for the indicator, then until it is gone.
    ///
    /// Returns whether the indicator was seen at all; a mask that never
    /// shows up is not an error.
    ///
    /// # Errors
    ///
    /// [`SurveyorError::TimedOut`] if the indicator stays visible.
    pub async fn wait(&self) -> SurveyorResult<bool> {
        let surface = self.surface;
        let indicator = &self.indicator;
        let appeared = Poller::new(self.appear)
            .describe("loading indicator to appear")
            .until(move |_| async move { Ok(surface.first_visible(indicator).await?.is_some()) })
            .await?;
        if !appeared.is_success() {
            debug!("loading indicator never appeared");
            return Ok(false);
        }
        Poller::new(self.disappear)
            .describe("loading indicator to disappear")
            .until(move |_| async move { Ok(surface.first_visible(indicator).await?.is_none()) })
            .await?
            .or_timed_out(format!("{indicator} to disappear"))?;
        Ok(true)
    }
}

// =============================================================================
// TEXT CONVERGENCE
// =============================================================================

/// Re-reads a text cell until it shows an expected value
#[derive(Debug)]
pub struct TextConvergenceWaiter<'a, S: UiSurface + ?Sized> {
    surface: &'a S,
    target: ElementQuery,
    refresh: RefreshMode,
    policy: PollPolicy,
}

impl<'a, S: UiSurface + ?Sized> TextConvergenceWaiter<'a, S> {
    /// Create a waiter that reloads between reads
    #[must_use]
    pub const fn new(surface: &'a S, target: ElementQuery, policy: PollPolicy) -> Self {
        Self {
            surface,
            target,
            refresh: RefreshMode::Reload,
            policy,
        }
    }

    /// Override how the view is refreshed
    #[must_use]
    pub const fn with_refresh(mut self, refresh: RefreshMode) -> Self {
        self.refresh = refresh;
        self
    }

    /// Wait until the normalized text equals `expected`
    ///
    /// # Errors
    ///
    /// [`SurveyorError::StatusMismatch`] with the last text read when the
    /// cell kept a different value, [`SurveyorError::TimedOut`] when it was
    /// never rendered.
    pub async fn wait_for(&self, expected: &str) -> SurveyorResult<String> {
        let expected = normalize_text(expected);
        let last_seen: Mutex<Option<String>> = Mutex::new(None);
        let (this, expected_ref, last_ref) = (self, expected.as_str(), &last_seen);

        let outcome = Poller::new(self.policy)
            .describe(format!("{} to read {expected:?}", self.target))
            .poll(move |_| async move {
                this.refresh.refresh(this.surface).await?;
                let Some(cell) = this.surface.first_visible(&this.target).await? else {
                    return Ok(None);
                };
                let text = normalize_text(&this.surface.read_text(&cell).await?);
                let done = text == expected_ref;
                if let Ok(mut last) = last_ref.lock() {
                    *last = Some(text.clone());
                }
                Ok(done.then_some(text))
            })
            .await?;

        match outcome {
            PollOutcome::Success { value, .. } => Ok(value),
            PollOutcome::TimedOut {
                attempts, elapsed, ..
            } => match last_seen.into_inner().unwrap_or_else(PoisonError::into_inner) {
                Some(observed) => Err(SurveyorError::StatusMismatch {
                    expected,
                    observed,
                }),
                None => Err(SurveyorError::TimedOut {
                    waited_for: self.target.to_string(),
                    attempts,
                    elapsed,
                }),
            },
        }
    }
}
