//! Inbox Convergence
//!
//! Waits for externally delivered email. The [`Inbox`] trait is the only
//! contract with the mail provider; the Gmail client (feature `gmail`) and
//! [`FakeInbox`](crate::fake::FakeInbox) implement it.

use crate::poll::{PollOutcome, PollPolicy, Poller};
use crate::result::{SurveyorError, SurveyorResult};
use crate::surface::normalize_text;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, info};

// =============================================================================
// MESSAGES AND QUERIES
// =============================================================================

/// Provider-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a message id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body representation to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    /// `text/html` part
    Html,
    /// `text/plain` part
    Text,
}

impl BodyFormat {
    /// MIME type of the part
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Html => "text/html",
            Self::Text => "text/plain",
        }
    }
}

/// Mail search in `subject:` / `from:` / `to:` grammar.
///
/// Values match by substring; anything else is kept as a free-text term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailQuery {
    /// Subject substring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Sender substring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Recipient address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Free-text terms
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<String>,
}

impl MailQuery {
    /// Empty query
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Query on subject
    #[must_use]
    pub fn subject(subject: impl Into<String>) -> Self {
        Self::new().with_subject(subject)
    }

    /// Set the subject
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the sender
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the recipient
    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Add a free-text term
    #[must_use]
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.terms.push(term.into());
        self
    }

    /// Provider query string
    #[must_use]
    pub fn render(&self) -> String {
        let quote = |v: &str| {
            if v.chars().any(char::is_whitespace) {
                format!("\"{v}\"")
            } else {
                v.to_string()
            }
        };
        let mut parts = Vec::new();
        if let Some(ref s) = self.subject {
            parts.push(format!("subject:{}", quote(s)));
        }
        if let Some(ref s) = self.from {
            parts.push(format!("from:{}", quote(s)));
        }
        if let Some(ref s) = self.to {
            parts.push(format!("to:{}", quote(s)));
        }
        parts.extend(self.terms.iter().map(|t| quote(t)));
        parts.join(" ")
    }

    /// Parse the provider query string
    ///
    /// # Errors
    ///
    /// [`SurveyorError::Config`] for an unterminated quote or an empty
    /// `subject:`/`from:`/`to:` value.
    pub fn parse(input: &str) -> SurveyorResult<Self> {
        let mut query = Self::new();
        for token in tokenize(input)? {
            let (key, value) = match token.split_once(':') {
                Some((k, v)) if matches!(k, "subject" | "from" | "to") => (Some(k), v),
                _ => (None, token.as_str()),
            };
            let value = value.trim_matches('"').to_string();
            match key {
                Some(k) if value.is_empty() => {
                    return Err(SurveyorError::config(format!("empty value for {k}:")));
                }
                Some("subject") => query.subject = Some(value),
                Some("from") => query.from = Some(value),
                Some(_) => query.to = Some(value),
                None => query.terms.push(value),
            }
        }
        Ok(query)
    }

    /// Whether a message with these fields satisfies the query
    #[must_use]
    pub fn matches(&self, recipient: &str, subject: &str, from: &str, body: &str) -> bool {
        let contains = |hay: &str, needle: &str| {
            normalize_text(hay)
                .to_lowercase()
                .contains(&normalize_text(needle).to_lowercase())
        };
        self.to
            .as_deref()
            .map_or(true, |to| recipient.eq_ignore_ascii_case(to))
            && self.subject.as_deref().map_or(true, |s| contains(subject, s))
            && self.from.as_deref().map_or(true, |f| contains(from, f))
            && self
                .terms
                .iter()
                .all(|t| contains(subject, t) || contains(body, t))
    }
}

impl fmt::Display for MailQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for MailQuery {
    type Err = SurveyorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn tokenize(input: &str) -> SurveyorResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in input.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        return Err(SurveyorError::config(format!(
            "unterminated quote in mail query {input:?}"
        )));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

// =============================================================================
// INBOX TRAIT
// =============================================================================

/// Mail provider contract
#[async_trait]
pub trait Inbox: Send + Sync {
    /// Ids of messages to `recipient` matching `query`, newest first
    async fn search(&self, recipient: &str, query: &MailQuery) -> SurveyorResult<Vec<MessageId>>;

    /// Body of a message in the requested format
    async fn fetch_body(&self, id: &MessageId, format: BodyFormat) -> SurveyorResult<String>;
}

// =============================================================================
// WAITER
// =============================================================================

/// Polls an [`Inbox`] until a matching message is delivered
#[derive(Debug)]
pub struct InboxWaiter<'a, I: Inbox + ?Sized> {
    inbox: &'a I,
    policy: PollPolicy,
}

impl<'a, I: Inbox + ?Sized> InboxWaiter<'a, I> {
    /// Create a waiter
    #[must_use]
    pub const fn new(inbox: &'a I, policy: PollPolicy) -> Self {
        Self { inbox, policy }
    }

    /// Waiter with the default 10 × 10 s budget
    #[must_use]
    pub const fn with_defaults(inbox: &'a I) -> Self {
        Self::new(inbox, PollPolicy::inbox())
    }

    async fn poll_first(
        &self,
        recipient: &str,
        query: &MailQuery,
    ) -> SurveyorResult<PollOutcome<MessageId>> {
        let inbox = self.inbox;
        Poller::new(self.policy)
            .describe(format!("mail to {recipient} matching `{query}`"))
            .poll(move |_| async move {
                let ids = inbox.search(recipient, query).await?;
                Ok(ids.into_iter().next())
            })
            .await
    }

    /// Search until a message arrives and return the first id
    ///
    /// # Errors
    ///
    /// [`SurveyorError::MessageNotFound`] when the budget is spent.
    pub async fn wait_for_message(
        &self,
        recipient: &str,
        query: &MailQuery,
    ) -> SurveyorResult<MessageId> {
        let id = self
            .poll_first(recipient, query)
            .await?
            .into_result(|attempts, elapsed, _| SurveyorError::MessageNotFound {
                recipient: recipient.to_string(),
                query: query.render(),
                attempts,
                elapsed,
            })?;
        info!(recipient, message = %id, "message delivered");
        Ok(id)
    }

    /// Require that no matching message arrives within the budget
    ///
    /// # Errors
    ///
    /// [`SurveyorError::UnexpectedMessage`] with the first match.
    pub async fn assert_absent(&self, recipient: &str, query: &MailQuery) -> SurveyorResult<()> {
        match self.poll_first(recipient, query).await? {
            PollOutcome::Success { value, .. } => Err(SurveyorError::UnexpectedMessage {
                recipient: recipient.to_string(),
                query: query.render(),
                message_id: value.0,
            }),
            PollOutcome::TimedOut { attempts, .. } => {
                debug!(recipient, attempts, "no message, as expected");
                Ok(())
            }
        }
    }

    /// Wait for a message and fetch its body
    ///
    /// # Errors
    ///
    /// Errors of [`Self::wait_for_message`] and of the provider fetch.
    pub async fn fetch_first_body(
        &self,
        recipient: &str,
        query: &MailQuery,
        format: BodyFormat,
    ) -> SurveyorResult<(MessageId, String)> {
        let id = self.wait_for_message(recipient, query).await?;
        let body = self.inbox.fetch_body(&id, format).await?;
        Ok((id, body))
    }

    /// Wait for a message and run `check` against its HTML body
    ///
    /// Returns the branding image `src` when the check names one.
    ///
    /// # Errors
    ///
    /// Errors of [`Self::fetch_first_body`] and of [`EmailCheck::verify`].
    pub async fn verify_first_body(
        &self,
        recipient: &str,
        query: &MailQuery,
        check: &EmailCheck,
    ) -> SurveyorResult<Option<String>> {
        let (id, body) = self.fetch_first_body(recipient, query, BodyFormat::Html).await?;
        let branding = check.verify(&body)?;
        debug!(recipient, message = %id, "email content verified");
        Ok(branding)
    }
}

// =============================================================================
// BODY HELPERS
// =============================================================================

static ANCHOR_HREF: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).ok()
});

/// `href` values of every anchor in an HTML body, in document order
#[must_use]
pub fn extract_links(html: &str) -> Vec<String> {
    let Some(re) = ANCHOR_HREF.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(html)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().replace("&amp;", "&"))
        .filter(|href| !href.is_empty())
        .collect()
}

/// First anchor `href` of an HTML body
#[must_use]
pub fn first_link(html: &str) -> Option<String> {
    extract_links(html).into_iter().next()
}

/// Anchor `href` values matching `pattern`, in document order
#[must_use]
pub fn extract_links_matching(html: &str, pattern: &Regex) -> Vec<String> {
    extract_links(html)
        .into_iter()
        .filter(|href| pattern.is_match(href))
        .collect()
}

static TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>").ok());

static ATTRIBUTE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).ok()
});

/// Element of an HTML body: tag name plus attribute substrings.
///
/// Displays as a CSS selector, e.g. `img[src*="logo"]`. An empty
/// substring only requires the attribute to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPattern {
    /// Lowercase tag name
    pub tag: String,
    /// `(name, substring)` pairs that must all hold
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
}

impl TagPattern {
    /// Any element with this tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
        }
    }

    /// Require attribute `name` to contain `value`
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .push((name.into().to_ascii_lowercase(), value.into()));
        self
    }

    fn matches(&self, tag: &HtmlTag) -> bool {
        tag.name == self.tag
            && self
                .attributes
                .iter()
                .all(|(name, value)| tag.attribute(name).is_some_and(|v| v.contains(value.as_str())))
    }
}

impl fmt::Display for TagPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)?;
        for (name, value) in &self.attributes {
            if value.is_empty() {
                write!(f, "[{name}]")?;
            } else {
                write!(f, "[{name}*={value:?}]")?;
            }
        }
        Ok(())
    }
}

/// Opening tag found in an HTML body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlTag {
    /// Lowercase tag name
    pub name: String,
    /// Attributes in source order, names lowercased, `&amp;` decoded
    pub attributes: Vec<(String, String)>,
}

impl HtmlTag {
    /// Value of attribute `name`
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Opening tags of `html` matching `pattern`, in document order
#[must_use]
pub fn find_tags(html: &str, pattern: &TagPattern) -> Vec<HtmlTag> {
    let (Some(tag_re), Some(attr_re)) = (TAG.as_ref(), ATTRIBUTE.as_ref()) else {
        return Vec::new();
    };
    tag_re
        .captures_iter(html)
        .filter_map(|c| {
            let name = c.get(1)?.as_str().to_ascii_lowercase();
            let attributes = c.get(2).map_or_else(Vec::new, |raw| {
                attr_re
                    .captures_iter(raw.as_str())
                    .filter_map(|a| {
                        let value = a.get(2).or_else(|| a.get(3)).or_else(|| a.get(4));
                        Some((
                            a.get(1)?.as_str().to_ascii_lowercase(),
                            value.map_or("", |v| v.as_str()).replace("&amp;", "&"),
                        ))
                    })
                    .collect()
            });
            Some(HtmlTag { name, attributes })
        })
        .filter(|tag| pattern.matches(tag))
        .collect()
}

/// Structural expectations on an HTML email body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailCheck {
    /// Elements that must appear
    #[serde(default)]
    pub expected: Vec<TagPattern>,
    /// Elements that must not appear
    #[serde(default)]
    pub excluded: Vec<TagPattern>,
    /// Branding image whose `src` is returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branding: Option<TagPattern>,
}

impl EmailCheck {
    /// Empty check
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an element
    #[must_use]
    pub fn with_expected(mut self, pattern: TagPattern) -> Self {
        self.expected.push(pattern);
        self
    }

    /// Forbid an element
    #[must_use]
    pub fn with_excluded(mut self, pattern: TagPattern) -> Self {
        self.excluded.push(pattern);
        self
    }

    /// Name the branding image
    #[must_use]
    pub fn with_branding(mut self, pattern: TagPattern) -> Self {
        self.branding = Some(pattern);
        self
    }

    /// Check `html` and return the branding image `src`, if one is named.
    /// A branding element without `src` yields an empty string.
    ///
    /// # Errors
    ///
    /// [`SurveyorError::EmailElementMissing`] for an absent expected or
    /// branding element, [`SurveyorError::EmailElementExcluded`] for a
    /// present excluded one.
    pub fn verify(&self, html: &str) -> SurveyorResult<Option<String>> {
        if let Some(missing) = self
            .expected
            .iter()
            .find(|p| find_tags(html, p).is_empty())
        {
            return Err(SurveyorError::EmailElementMissing {
                element: missing.to_string(),
            });
        }
        if let Some(present) = self
            .excluded
            .iter()
            .find(|p| !find_tags(html, p).is_empty())
        {
            return Err(SurveyorError::EmailElementExcluded {
                element: present.to_string(),
            });
        }
        let Some(ref branding) = self.branding else {
            return Ok(None);
        };
        let tag = find_tags(html, branding).into_iter().next().ok_or_else(|| {
            SurveyorError::EmailElementMissing {
                element: branding.to_string(),
            }
        })?;
        Ok(Some(tag.attribute("src").unwrap_or_default().to_string()))
    }
}

/// Remove every match of `patterns` (regular expressions), then collapse
/// whitespace. Used to drop volatile fragments such as dates before a text
/// comparison.
///
/// # Errors
///
/// [`SurveyorError::Config`] for an invalid pattern.
pub fn strip_patterns<P: AsRef<str>>(text: &str, patterns: &[P]) -> SurveyorResult<String> {
    let mut out = text.to_string();
    for pattern in patterns {
        let re = Regex::new(pattern.as_ref()).map_err(|e| {
            SurveyorError::config(format!("invalid pattern {:?}: {e}", pattern.as_ref()))
        })?;
        out = re.replace_all(&out, "").into_owned();
    }
    Ok(normalize_text(&out))
}
