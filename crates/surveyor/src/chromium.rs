//! Chromium surface over the Chrome `DevTools` Protocol
//!
//! [`ChromiumSurface`] implements [`UiSurface`] on a real page. Queries are
//! evaluated in the page by a generated script: the [`ElementQuery`] is sent
//! as JSON, roles are mapped to CSS by a [`SelectorProfile`], and every
//! matched element is tagged with a `data-surveyor-id` attribute that later
//! operations look up. Ids embed a per-document token, so a reload makes
//! every earlier handle stale.
//!
//! Elements inside frames are reached through `contentDocument`, which
//! only works for same-origin frames.

use crate::result::{SurveyorError, SurveyorResult};
use crate::surface::{BoundingBox, ElementHandle, ElementQuery, Role, UiSurface};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Attribute carrying the surface-assigned element id
pub const ID_ATTRIBUTE: &str = "data-surveyor-id";

// =============================================================================
// SELECTOR PROFILE
// =============================================================================

/// CSS selector list per [`Role`] for one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorProfile {
    roles: HashMap<Role, String>,
}

impl Default for SelectorProfile {
    fn default() -> Self {
        let roles = [
            (
                Role::Container,
                "section, fieldset, form, [role='group'], [role='region'], [class*='Card'], [class*='card']",
            ),
            (Role::Text, "h1, h2, h3, h4, h5, h6, p, label, legend, span, td, th, dt, dd"),
            (Role::Button, "button, [role='button'], input[type='button'], input[type='submit']"),
            (Role::Radio, "input[type='radio'], [role='radio']"),
            (Role::Option, "[role='option'], [role='listbox'] li, option"),
            (
                Role::MultiOption,
                "input[type='checkbox'], [role='checkbox'], [role='option'][aria-selected]",
            ),
            (
                Role::TextInput,
                "input:not([type]), input[type='text'], input[type='email'], input[type='tel'], input[type='number'], input[type='search'], input[type='password'], input[type='date']",
            ),
            (Role::TextArea, "textarea"),
            (Role::Combobox, "[role='combobox'], select"),
            (Role::FileInput, "input[type='file']"),
            (Role::Frame, "iframe"),
            (Role::Step, "[class*='Stepper'] li, [class*='stepper'] li, [role='tab'], [class*='step']"),
            (Role::Any, "*"),
        ]
        .into_iter()
        .map(|(role, css)| (role, css.to_string()))
        .collect();
        Self { roles }
    }
}

impl SelectorProfile {
    /// Override the selector list of one role
    #[must_use]
    pub fn with_role(mut self, role: Role, css: impl Into<String>) -> Self {
        self.roles.insert(role, css.into());
        self
    }

    /// Selector list of a role
    #[must_use]
    pub fn css(&self, role: Role) -> &str {
        self.roles.get(&role).map_or("*", String::as_str)
    }
}

// =============================================================================
// PAGE SCRIPTS
// =============================================================================

const PRELUDE: &str = r#"
const norm = s => (s || '').replace(/\s+/g, ' ').trim();
const idAttr = 'data-surveyor-id';
const view = () => {
  if (!window.__surveyorView) {
    window.__surveyorView = Math.random().toString(36).slice(2, 10);
    window.__surveyorSeq = 0;
  }
  return window.__surveyorView;
};
const tag = el => {
  let id = el.getAttribute(idAttr);
  if (!id || !id.startsWith(view() + ':')) {
    window.__surveyorSeq += 1;
    id = view() + ':' + window.__surveyorSeq;
    el.setAttribute(idAttr, id);
  }
  return id;
};
const frameDocs = () => Array.from(document.querySelectorAll('iframe'))
  .map(f => { try { return f.contentDocument; } catch (e) { return null; } })
  .filter(d => d);
const find = id => {
  const sel = '[' + idAttr + '="' + id + '"]';
  for (const d of [document, ...frameDocs()]) {
    const el = d.querySelector(sel);
    if (el) return el;
  }
  return null;
};
const attr = (el, name) => {
  if (name === 'value' && 'value' in el) return String(el.value);
  const v = el.getAttribute(name);
  if (v === null && name === 'aria-checked' && (el.type === 'radio' || el.type === 'checkbox')) {
    return String(el.checked);
  }
  return v;
};
const textOf = el => el.matches('input, textarea') ? norm(el.value) : norm(el.innerText || el.textContent);
const offsetRect = el => {
  const r = el.getBoundingClientRect();
  let x = r.x, y = r.y, w = el.ownerDocument.defaultView;
  while (w && w.frameElement) {
    const f = w.frameElement.getBoundingClientRect();
    x += f.x; y += f.y; w = w.parent;
  }
  return { x, y, width: r.width, height: r.height };
};
const isVisible = el => {
  const r = el.getBoundingClientRect();
  const s = el.ownerDocument.defaultView.getComputedStyle(el);
  return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
};
const classHas = (el, needles) => (el.getAttribute('class') || '').split(/\s+/).some(c =>
  c.toLowerCase().split(/[_-]/).some(seg => needles.some(n => seg.startsWith(n))));
const hasState = (el, state) => {
  const isTrue = n => attr(el, n) === 'true';
  const dataState = v => el.getAttribute('data-state') === v || el.getAttribute('data-status') === v;
  switch (state) {
    case 'selected': return isTrue('aria-pressed') || isTrue('aria-checked') || isTrue('aria-selected') || classHas(el, ['selected', 'checked']);
    case 'active': {
      const current = el.getAttribute('aria-current');
      return (current !== null && current !== 'false') || dataState('active') || classHas(el, ['active', 'highlighted', 'green']);
    }
    case 'completed': return dataState('completed') || classHas(el, ['past', 'completed']);
    case 'failed': return dataState('failed') || isTrue('aria-invalid') || classHas(el, ['failed', 'error']);
    default: return true;
  }
};
"#;

const QUERY_BODY: &str = r#"
(query, profile) => {
  const textMatches = (m, t) => !m || ('exact' in m ? t === norm(m.exact) : t.includes(norm(m.contains)));
  const docs = frame => frame == null
    ? [document]
    : Array.from(document.querySelectorAll('iframe'))
        .filter(f => (f.getAttribute('src') || '').includes(frame))
        .map(f => { try { return f.contentDocument; } catch (e) { return null; } })
        .filter(d => d);
  const evaluate = q => {
    let found = [];
    for (const d of docs(q.frame)) found.push(...d.querySelectorAll(profile[q.role] || '*'));
    found = found.filter(el => textMatches(q.text, textOf(el)) && (!q.state || hasState(el, q.state)));
    if (!q.relation) return found;
    if (q.relation.within) {
      const all = evaluate(q.relation.within);
      const inner = all.filter(c => !all.some(d => d !== c && c.contains(d)));
      return found.filter(el => inner.some(c => c !== el && c.contains(el)));
    }
    const anchors = evaluate(q.relation.below).filter(isVisible).map(offsetRect);
    return found
      .filter(isVisible)
      .map(el => {
        const r = offsetRect(el);
        const gaps = anchors.map(a => r.y - (a.y + a.height)).filter(g => g >= 0);
        return { el, gap: gaps.length ? Math.min(...gaps) : null };
      })
      .filter(c => c.gap !== null)
      .sort((a, b) => a.gap - b.gap)
      .map(c => c.el);
  };
  return evaluate(query).map(el => ({
    id: tag(el),
    text: textOf(el),
    bounding_box: isVisible(el) ? offsetRect(el) : null,
  }));
}
"#;

const ELEMENT_BODY: &str = r#"
(id, op, arg) => {
  const el = find(id);
  if (!el) return { stale: true, value: null };
  const done = value => ({ stale: false, value });
  switch (op) {
    case 'visible': return done(isVisible(el));
    case 'text': return done(textOf(el));
    case 'attribute': return done(attr(el, arg));
    case 'files': return done(Array.from(el.files || []).map(f => f.name));
    case 'center': {
      el.scrollIntoView({ block: 'center', inline: 'center' });
      const r = offsetRect(el);
      return done({ x: r.x + r.width / 2, y: r.y + r.height / 2 });
    }
    case 'fill': {
      const win = el.ownerDocument.defaultView;
      const proto = el.tagName === 'TEXTAREA' ? win.HTMLTextAreaElement.prototype : win.HTMLInputElement.prototype;
      const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
      el.focus();
      setter.call(el, '');
      el.dispatchEvent(new Event('input', { bubbles: true }));
      setter.call(el, arg);
      el.dispatchEvent(new Event('input', { bubbles: true }));
      el.dispatchEvent(new Event('change', { bubbles: true }));
      return done(true);
    }
    default: return done(null);
  }
}
"#;

fn script(body: &str, args: &[serde_json::Value]) -> SurveyorResult<String> {
    let args = args
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    Ok(format!("(() => {{ {PRELUDE}\nreturn ({body})({args}); }})()"))
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    text: String,
    bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Deserialize)]
struct ElementReply {
    stale: bool,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Center {
    x: f64,
    y: f64,
}

// =============================================================================
// LAUNCH OPTIONS
// =============================================================================

/// How to start Chromium
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Run without a window
    pub headless: bool,
    /// Keep the Chromium sandbox (disable in containers)
    pub sandbox: bool,
    /// Window width
    pub width: u32,
    /// Window height
    pub height: u32,
    /// Chromium binary, auto-detected when `None`
    pub chromium_path: Option<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            width: 1280,
            height: 900,
            chromium_path: None,
        }
    }
}

impl LaunchOptions {
    /// Show the browser window
    #[must_use]
    pub const fn with_head(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Disable the sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Set window dimensions
    #[must_use]
    pub const fn with_window(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the Chromium binary
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }
}

// =============================================================================
// SURFACE
// =============================================================================

fn cdp_error(e: impl std::fmt::Display) -> SurveyorError {
    SurveyorError::surface(e.to_string())
}

/// [`UiSurface`] backed by a Chromium page
#[derive(Debug)]
pub struct ChromiumSurface {
    page: CdpPage,
    profile: SelectorProfile,
    browser: Option<Arc<Mutex<CdpBrowser>>>,
    handler: Option<tokio::task::JoinHandle<()>>,
}

impl ChromiumSurface {
    /// Launch Chromium and open a blank page
    ///
    /// # Errors
    ///
    /// [`SurveyorError::Surface`] if the browser cannot be started.
    pub async fn launch(options: &LaunchOptions) -> SurveyorResult<Self> {
        let mut builder = CdpConfig::builder().window_size(options.width, options.height);
        if !options.headless {
            builder = builder.with_head();
        }
        if !options.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = options.chromium_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(cdp_error)?;
        let (browser, mut handler) = CdpBrowser::launch(config).await.map_err(cdp_error)?;
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        let page = browser.new_page("about:blank").await.map_err(cdp_error)?;
        debug!(headless = options.headless, "chromium launched");
        Ok(Self {
            page,
            profile: SelectorProfile::default(),
            browser: Some(Arc::new(Mutex::new(browser))),
            handler: Some(handle),
        })
    }

    /// Drive an existing page
    #[must_use]
    pub fn from_page(page: CdpPage) -> Self {
        Self {
            page,
            profile: SelectorProfile::default(),
            browser: None,
            handler: None,
        }
    }

    /// Use an application-specific selector profile
    #[must_use]
    pub fn with_profile(mut self, profile: SelectorProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Underlying page
    #[must_use]
    pub const fn page(&self) -> &CdpPage {
        &self.page
    }

    /// Navigate to `url`
    ///
    /// # Errors
    ///
    /// [`SurveyorError::Surface`] on navigation failure.
    pub async fn goto(&self, url: &str) -> SurveyorResult<()> {
        self.page.goto(url).await.map_err(cdp_error)?;
        Ok(())
    }

    /// Close the browser if this surface launched it
    ///
    /// # Errors
    ///
    /// [`SurveyorError::Surface`] if the browser does not shut down cleanly.
    pub async fn close(self) -> SurveyorResult<()> {
        if let Some(browser) = self.browser {
            browser.lock().await.close().await.map_err(cdp_error)?;
        }
        if let Some(handler) = self.handler {
            handler.abort();
        }
        Ok(())
    }

    async fn evaluate<T: DeserializeOwned>(&self, expression: String) -> SurveyorResult<T> {
        self.page
            .evaluate(expression)
            .await
            .map_err(cdp_error)?
            .into_value()
            .map_err(cdp_error)
    }

    async fn element_op<T: DeserializeOwned>(
        &self,
        element: &ElementHandle,
        op: &str,
        arg: serde_json::Value,
    ) -> SurveyorResult<T> {
        let expression = script(
            ELEMENT_BODY,
            &[
                serde_json::Value::from(element.id.as_str()),
                serde_json::Value::from(op),
                arg,
            ],
        )?;
        let reply: ElementReply = self.evaluate(expression).await?;
        if reply.stale {
            return Err(SurveyorError::surface(format!(
                "stale element handle {}",
                element.id
            )));
        }
        Ok(serde_json::from_value(reply.value)?)
    }
}

#[async_trait]
impl UiSurface for ChromiumSurface {
    async fn query(&self, query: &ElementQuery) -> SurveyorResult<Vec<ElementHandle>> {
        let expression = script(
            QUERY_BODY,
            &[serde_json::to_value(query)?, serde_json::to_value(&self.profile.roles)?],
        )?;
        let matches: Vec<QueryMatch> = self.evaluate(expression).await?;
        trace!(%query, count = matches.len(), "page query");
        Ok(matches
            .into_iter()
            .map(|m| {
                let mut handle = ElementHandle::new(m.id, query.role, m.text);
                handle.bounding_box = m.bounding_box;
                handle
            })
            .collect())
    }

    async fn is_visible(&self, element: &ElementHandle) -> SurveyorResult<bool> {
        self.element_op(element, "visible", serde_json::Value::Null)
            .await
    }

    async fn click(&self, element: &ElementHandle) -> SurveyorResult<()> {
        let center: Center = self
            .element_op(element, "center", serde_json::Value::Null)
            .await?;
        self.page
            .click(Point::new(center.x, center.y))
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> SurveyorResult<()> {
        let _: bool = self
            .element_op(element, "fill", serde_json::Value::from(text))
            .await?;
        Ok(())
    }

    async fn read_text(&self, element: &ElementHandle) -> SurveyorResult<String> {
        self.element_op(element, "text", serde_json::Value::Null)
            .await
    }

    async fn read_attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> SurveyorResult<Option<String>> {
        self.element_op(element, "attribute", serde_json::Value::from(name))
            .await
    }

    async fn attach_file(&self, element: &ElementHandle, path: &Path) -> SurveyorResult<()> {
        let selector = format!("[{ID_ATTRIBUTE}=\"{}\"]", element.id);
        let input = self
            .page
            .find_element(selector)
            .await
            .map_err(cdp_error)?;
        let mut params = SetFileInputFilesParams::new(vec![path.to_string_lossy().into_owned()]);
        params.backend_node_id = Some(input.backend_node_id);
        self.page.execute(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn attached_files(&self, element: &ElementHandle) -> SurveyorResult<Vec<String>> {
        self.element_op(element, "files", serde_json::Value::Null)
            .await
    }

    async fn reload(&self) -> SurveyorResult<()> {
        self.page.reload().await.map_err(cdp_error)?;
        Ok(())
    }
}
