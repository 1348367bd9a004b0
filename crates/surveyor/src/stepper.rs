//! Stepper Navigator
//!
//! Observes a linear workflow whose progress is driven by the backend and
//! rendered as a stepper. State is read from the UI on every call and
//! never cached; the only memory kept is a journal of stages asserted
//! complete, used to detect regressions.

use crate::poll::{PollOutcome, PollPolicy, Poller};
use crate::result::{SurveyorError, SurveyorResult};
use crate::surface::{normalize_text, ElementQuery, ElementState, RefreshMode, Role, UiSurface};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

// =============================================================================
// STAGE SET
// =============================================================================

/// Ordered, named stages of one workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSet {
    workflow: String,
    stages: Vec<String>,
}

impl StageSet {
    /// Create a stage set
    ///
    /// # Errors
    ///
    /// [`SurveyorError::Config`] if the set is empty, or a name is blank or
    /// repeated.
    pub fn new<I, T>(workflow: impl Into<String>, stages: I) -> SurveyorResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let workflow = workflow.into();
        let stages: Vec<String> = stages.into_iter().map(Into::into).collect();
        if stages.is_empty() {
            return Err(SurveyorError::config(format!(
                "workflow {workflow:?} has no stages"
            )));
        }
        let mut seen = BTreeSet::new();
        for stage in &stages {
            if stage.trim().is_empty() {
                return Err(SurveyorError::config(format!(
                    "workflow {workflow:?} has a blank stage name"
                )));
            }
            if !seen.insert(stage.as_str()) {
                return Err(SurveyorError::config(format!(
                    "workflow {workflow:?} repeats stage {stage:?}"
                )));
            }
        }
        Ok(Self { workflow, stages })
    }

    /// Workflow name
    #[must_use]
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Stages in order
    #[must_use]
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Zero-based position of a stage
    #[must_use]
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }

    /// Fail with [`SurveyorError::UnknownStage`] unless `stage` belongs here
    ///
    /// # Errors
    ///
    /// [`SurveyorError::UnknownStage`] for a foreign stage name.
    pub fn check(&self, stage: &str) -> SurveyorResult<usize> {
        self.position(stage).ok_or_else(|| SurveyorError::UnknownStage {
            stage: stage.to_string(),
            workflow: self.workflow.clone(),
        })
    }

    /// Whether `a` comes strictly before `b`
    ///
    /// # Errors
    ///
    /// [`SurveyorError::UnknownStage`] for a foreign stage name.
    pub fn is_before(&self, a: &str, b: &str) -> SurveyorResult<bool> {
        Ok(self.check(a)? < self.check(b)?)
    }

    /// Stages after `stage`
    ///
    /// # Errors
    ///
    /// [`SurveyorError::UnknownStage`] for a foreign stage name.
    pub fn remaining_after(&self, stage: &str) -> SurveyorResult<&[String]> {
        let index = self.check(stage)?;
        Ok(self.stages.get(index + 1..).unwrap_or_default())
    }

    /// Map rendered stepper text to a stage name.
    ///
    /// An exact match wins; otherwise the longest stage name contained in
    /// the text (step labels often carry a number or a status suffix).
    #[must_use]
    pub fn identify(&self, rendered: &str) -> Option<&str> {
        let rendered = normalize_text(rendered);
        self.stages
            .iter()
            .find(|s| **s == rendered)
            .or_else(|| {
                self.stages
                    .iter()
                    .filter(|s| rendered.contains(s.as_str()))
                    .max_by_key(|s| s.len())
            })
            .map(String::as_str)
    }
}

// =============================================================================
// MARKERS AND STATE
// =============================================================================

/// Queries that find stepper items by state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepperMarkers {
    /// Item of the stage in progress
    pub active: ElementQuery,
    /// Items of finished stages
    pub completed: ElementQuery,
    /// Item of a stage the backend rejected
    pub failed: ElementQuery,
}

impl Default for StepperMarkers {
    fn default() -> Self {
        Self {
            active: ElementQuery::new(Role::Step).with_state(ElementState::Active),
            completed: ElementQuery::new(Role::Step).with_state(ElementState::Completed),
            failed: ElementQuery::new(Role::Step).with_state(ElementState::Failed),
        }
    }
}

/// Snapshot of the rendered stepper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepperState {
    /// Stage in progress, if a marker is rendered
    pub active: Option<String>,
    /// Stages rendered as complete
    pub completed: BTreeSet<String>,
    /// Stage rendered as failed, if any
    pub failed: Option<String>,
}

async fn read_state<S>(
    surface: &S,
    markers: &StepperMarkers,
    stages: &StageSet,
) -> SurveyorResult<StepperState>
where
    S: UiSurface + ?Sized,
{
    let name = |text: &str| {
        stages
            .identify(text)
            .map_or_else(|| text.to_string(), ToString::to_string)
    };
    let active = surface
        .first_visible(&markers.active)
        .await?
        .map(|h| name(&h.text));
    let completed = surface
        .query_visible(&markers.completed)
        .await?
        .iter()
        .map(|h| name(&h.text))
        .collect();
    let failed = surface
        .first_visible(&markers.failed)
        .await?
        .map(|h| name(&h.text));
    Ok(StepperState {
        active,
        completed,
        failed,
    })
}

// =============================================================================
// NAVIGATOR
// =============================================================================

/// Reads and waits on a workflow stepper
#[derive(Debug)]
pub struct StepperNavigator<'a, S: UiSurface + ?Sized> {
    surface: &'a S,
    stages: StageSet,
    markers: StepperMarkers,
    refresh: RefreshMode,
    journal: BTreeSet<String>,
}

impl<'a, S: UiSurface + ?Sized> StepperNavigator<'a, S> {
    /// Navigator with default markers that reloads before each read in a wait
    #[must_use]
    pub fn new(surface: &'a S, stages: StageSet) -> Self {
        Self {
            surface,
            stages,
            markers: StepperMarkers::default(),
            refresh: RefreshMode::Reload,
            journal: BTreeSet::new(),
        }
    }

    /// Override the marker queries
    #[must_use]
    pub fn with_markers(mut self, markers: StepperMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// Override how waits refresh the view
    #[must_use]
    pub const fn with_refresh(mut self, refresh: RefreshMode) -> Self {
        self.refresh = refresh;
        self
    }

    /// The workflow's stages
    #[must_use]
    pub const fn stages(&self) -> &StageSet {
        &self.stages
    }

    /// Stages observed complete so far
    #[must_use]
    pub const fn journal(&self) -> &BTreeSet<String> {
        &self.journal
    }

    /// Read the full stepper state once
    ///
    /// # Errors
    ///
    /// Propagates surface errors.
    pub async fn state(&self) -> SurveyorResult<StepperState> {
        read_state(self.surface, &self.markers, &self.stages).await
    }

    /// Read the active stage once
    ///
    /// # Errors
    ///
    /// [`SurveyorError::NoActiveStage`] when no marker is rendered,
    /// [`SurveyorError::StageRegressed`] when a journaled stage is active.
    pub async fn current_active(&self) -> SurveyorResult<String> {
        let state = self.state().await?;
        let active = state.active.ok_or(SurveyorError::NoActiveStage)?;
        self.check_regression(&active)?;
        Ok(active)
    }

    /// Assert `stage` is rendered complete, with a single read
    ///
    /// # Errors
    ///
    /// [`SurveyorError::UnknownStage`] or [`SurveyorError::StageNotComplete`].
    pub async fn assert_complete(&mut self, stage: &str) -> SurveyorResult<()> {
        self.stages.check(stage)?;
        let state = self.state().await?;
        if !state.completed.contains(stage) {
            return Err(SurveyorError::StageNotComplete {
                stage: stage.to_string(),
                completed: state.completed.into_iter().collect(),
            });
        }
        self.journal.insert(stage.to_string());
        debug!(workflow = %self.stages.workflow(), stage, "stage complete");
        Ok(())
    }

    /// Poll until `stage` is the active stage, refreshing before each read
    ///
    /// # Errors
    ///
    /// [`SurveyorError::UnknownStage`], [`SurveyorError::StageRegressed`], or
    /// [`SurveyorError::StageNotReached`] with the last stage seen.
    pub async fn wait_for_active(
        &self,
        stage: &str,
        policy: PollPolicy,
    ) -> SurveyorResult<StepperState> {
        self.stages.check(stage)?;
        let last_seen: Mutex<Option<String>> = Mutex::new(None);
        let last_seen_ref = &last_seen;
        let this = self;

        let outcome = Poller::new(policy)
            .describe(format!("stage {stage:?} active"))
            .poll(move |attempt| async move {
                this.refresh.refresh(this.surface).await?;
                let state = this.state().await?;
                if let Some(ref failed) = state.failed {
                    warn!(stage = %failed, attempt, "stepper shows a failed stage");
                }
                let Some(ref active) = state.active else {
                    return Ok(None);
                };
                this.check_regression(active)?;
                if let Ok(mut seen) = last_seen_ref.lock() {
                    *seen = Some(active.clone());
                }
                Ok((active == stage).then_some(state))
            })
            .await?;

        match outcome {
            PollOutcome::Success {
                value, attempts, ..
            } => {
                info!(workflow = %self.stages.workflow(), stage, attempts, "stage reached");
                Ok(value)
            }
            PollOutcome::TimedOut { attempts, .. } => {
                let last_seen = last_seen
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner);
                Err(SurveyorError::StageNotReached {
                    stage: stage.to_string(),
                    last_seen,
                    attempts,
                })
            }
        }
    }

    fn check_regression(&self, active: &str) -> SurveyorResult<()> {
        if self.journal.contains(active) {
            return Err(SurveyorError::StageRegressed {
                stage: active.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fake::{Effect, FakeNode, FakeSurface, NodeId};
    use std::time::Duration;

    fn onboarding() -> StageSet {
        StageSet::new("onboarding", ["Company Details", "Employees", "Payroll", "Review"]).unwrap()
    }

    /// Stepper with the first stage active
    fn stepper(fake: &mut FakeSurface) -> Vec<NodeId> {
        let root = fake.root();
        let bar = fake.append(root, FakeNode::new(Role::Container, ""));
        ["1 Company Details", "2 Employees", "3 Payroll", "4 Review"]
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let class = if i == 0 { "Stepper__active" } else { "Stepper__future" };
                fake.append(bar, FakeNode::new(Role::Step, *label).attr("class", class))
            })
            .collect()
    }

    fn advance(fake: &mut FakeSurface, on_reload: u32, done: NodeId, next: NodeId) {
        fake.on_reload(on_reload, Effect::set(done, "class", "Stepper__past"));
        fake.on_reload(on_reload, Effect::set(next, "class", "Stepper__active"));
    }

    mod stage_set_tests {
        use super::*;

        #[test]
        fn test_rejects_empty_and_duplicates() {
            assert!(StageSet::new("w", Vec::<String>::new()).is_err());
            assert!(StageSet::new("w", ["A", "A"]).is_err());
            assert!(StageSet::new("w", ["A", " "]).is_err());
        }

        #[test]
        fn test_ordering_helpers() {
            let set = onboarding();
            assert_eq!(set.position("Payroll"), Some(2));
            assert!(set.is_before("Employees", "Review").unwrap());
            assert!(!set.is_before("Review", "Employees").unwrap());
            assert_eq!(set.remaining_after("Payroll").unwrap(), ["Review".to_string()]);
            assert!(set.remaining_after("Review").unwrap().is_empty());
            assert!(matches!(
                set.is_before("Banking", "Review"),
                Err(SurveyorError::UnknownStage { .. })
            ));
        }

        #[test]
        fn test_identify_prefers_exact_then_longest() {
            let set = StageSet::new("w", ["Company", "Company Details"]).unwrap();
            assert_eq!(set.identify("Company"), Some("Company"));
            assert_eq!(set.identify("1 Company Details"), Some("Company Details"));
            assert_eq!(set.identify("Banking"), None);
        }
    }

    mod wait_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_reaches_employees_on_second_attempt() {
            let mut fake = FakeSurface::new();
            let steps = stepper(&mut fake);
            advance(&mut fake, 2, steps[0], steps[1]);

            let nav = StepperNavigator::new(&fake, onboarding());
            let policy = PollPolicy::stepper()
                .with_max_attempts(3)
                .with_interval(Duration::from_secs(2));
            let state = nav.wait_for_active("Employees", policy).await.unwrap();

            assert_eq!(state.active.as_deref(), Some("Employees"));
            assert!(state.completed.contains("Company Details"));
            assert_eq!(fake.reload_count(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn test_not_reached_reports_last_seen() {
            let mut fake = FakeSurface::new();
            stepper(&mut fake);
            let nav = StepperNavigator::new(&fake, onboarding());
            let policy = PollPolicy::stepper().with_max_attempts(3);
            let err = nav.wait_for_active("Payroll", policy).await.unwrap_err();
            match err {
                SurveyorError::StageNotReached {
                    stage,
                    last_seen,
                    attempts,
                } => {
                    assert_eq!(stage, "Payroll");
                    assert_eq!(last_seen.as_deref(), Some("Company Details"));
                    assert_eq!(attempts, 3);
                }
                other => panic!("unexpected {other}"),
            }
            assert_eq!(fake.reload_count(), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn test_missing_marker_is_not_yet_reached() {
            let mut fake = FakeSurface::new();
            let steps = stepper(&mut fake);
            fake.apply(Effect::set(steps[0], "class", "Stepper__past"));
            fake.on_reload(2, Effect::set(steps[1], "class", "Stepper__active"));
            let nav = StepperNavigator::new(&fake, onboarding());
            let state = nav
                .wait_for_active("Employees", PollPolicy::stepper().with_max_attempts(3))
                .await
                .unwrap();
            assert_eq!(state.active.as_deref(), Some("Employees"));
        }

        #[tokio::test(start_paused = true)]
        async fn test_in_place_refresh_never_reloads() {
            let mut fake = FakeSurface::new();
            stepper(&mut fake);
            let nav = StepperNavigator::new(&fake, onboarding()).with_refresh(RefreshMode::InPlace);
            nav.wait_for_active("Company Details", PollPolicy::stepper())
                .await
                .unwrap();
            assert_eq!(fake.reload_count(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_unknown_stage_is_rejected_without_polling() {
            let fake = FakeSurface::new();
            let nav = StepperNavigator::new(&fake, onboarding());
            let err = nav
                .wait_for_active("Banking", PollPolicy::stepper())
                .await
                .unwrap_err();
            assert!(matches!(err, SurveyorError::UnknownStage { .. }));
            assert!(fake.history().is_empty());
        }
    }

    mod read_tests {
        use super::*;

        #[tokio::test]
        async fn test_assert_complete_is_a_single_read() {
            let mut fake = FakeSurface::new();
            let steps = stepper(&mut fake);
            let mut nav = StepperNavigator::new(&fake, onboarding());

            let err = nav.assert_complete("Company Details").await.unwrap_err();
            assert!(matches!(err, SurveyorError::StageNotComplete { .. }));
            assert_eq!(fake.reload_count(), 0);

            fake.apply(Effect::set(steps[0], "class", "Stepper__past"));
            nav.assert_complete("Company Details").await.unwrap();
            assert!(nav.journal().contains("Company Details"));
        }

        #[tokio::test]
        async fn test_regression_is_detected() {
            let mut fake = FakeSurface::new();
            let steps = stepper(&mut fake);
            fake.apply(Effect::set(steps[0], "class", "Stepper__past"));
            fake.apply(Effect::set(steps[1], "class", "Stepper__active"));
            let mut nav = StepperNavigator::new(&fake, onboarding());
            nav.assert_complete("Company Details").await.unwrap();
            assert_eq!(nav.current_active().await.unwrap(), "Employees");

            fake.apply(Effect::set(steps[1], "class", "Stepper__future"));
            fake.apply(Effect::set(steps[0], "class", "Stepper__active"));
            let err = nav.current_active().await.unwrap_err();
            assert!(matches!(err, SurveyorError::StageRegressed { ref stage } if stage == "Company Details"));
        }

        #[tokio::test]
        async fn test_state_reports_failed_stage() {
            let mut fake = FakeSurface::new();
            let steps = stepper(&mut fake);
            fake.apply(Effect::set(steps[0], "class", "Stepper__failed"));
            let nav = StepperNavigator::new(&fake, onboarding());
            let state = nav.state().await.unwrap();
            assert_eq!(state.failed.as_deref(), Some("Company Details"));
            assert!(state.active.is_none());
            assert!(matches!(
                nav.current_active().await,
                Err(SurveyorError::NoActiveStage)
            ));
        }
    }
}
