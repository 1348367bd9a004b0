//! Surveyor: UI interaction and eventual-consistency polling engine
//!
//! Drives multi-step web workflows whose controls are known only by the
//! question text shown next to them, and waits for backend decisions that
//! surface asynchronously (reviews, stepper transitions, delivered email).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Session                                 │
//! │   ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │   │ Question     │  │ Stepper      │  │ Waiters               │  │
//! │   │ Resolver     │  │ Navigator    │  │ review / frame / mask │  │
//! │   └──────┬───────┘  └──────┬───────┘  │ text / inbox          │  │
//! │          │                 │          └───────────┬───────────┘  │
//! │   ┌──────▼───────┐         │                      │              │
//! │   │ Selector     │   ┌─────▼──────────────────────▼──────┐       │
//! │   │ Chain        │   │ Bounded Poller (PollPolicy)       │       │
//! │   └──────┬───────┘   └─────┬─────────────────────────────┘       │
//! │          └────────┬────────┘                                     │
//! │            ┌──────▼──────┐                ┌──────────┐           │
//! │            │ UiSurface   │                │ Inbox    │           │
//! │            └─────────────┘                └──────────┘           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use surveyor::fake::FakeSurface;
//! use surveyor::Session;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> surveyor::SurveyorResult<()> {
//! let mut fake = FakeSurface::new();
//! fake.button_question("Do you have employees?", &["Yes", "No"]);
//! let session = Session::with_defaults(fake);
//! session
//!     .questions()
//!     .answer_button("Do you have employees?", "Yes")
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod chain;
pub mod config;
pub mod fake;
pub mod inbox;
pub mod poll;
pub mod question;
mod result;
pub mod session;
pub mod stepper;
pub mod surface;
pub mod telemetry;
pub mod waiters;

#[cfg(feature = "browser")]
#[allow(clippy::needless_raw_string_hashes)]
pub mod chromium;

#[cfg(feature = "gmail")]
pub mod gmail;

pub use chain::{Resolution, SelectorChain, Strategy};
pub use config::{EngineConfig, LogConfig};
pub use inbox::{
    extract_links, extract_links_matching, find_tags, first_link, strip_patterns, BodyFormat,
    EmailCheck, HtmlTag, Inbox, InboxWaiter, MailQuery, MessageId, TagPattern,
};
pub use poll::{PollOutcome, PollPolicy, Poller};
pub use question::{AnswerValue, QuestionDescriptor, QuestionKind, QuestionResolver};
pub use result::{SurveyorError, SurveyorResult};
pub use session::Session;
pub use stepper::{StageSet, StepperMarkers, StepperNavigator, StepperState};
pub use surface::{
    BoundingBox, ElementHandle, ElementQuery, ElementState, Pick, Picked, RefreshMode, Relation,
    Role, TextMatch, UiSurface,
};
pub use waiters::{
    FrameHandshakeWaiter, LoadingMaskWaiter, ReviewStatus, ReviewStatusWaiter, StatusMarker,
    TextConvergenceWaiter,
};

#[cfg(feature = "browser")]
pub use chromium::{ChromiumSurface, LaunchOptions, SelectorProfile};
#[cfg(feature = "gmail")]
pub use gmail::GmailInbox;
