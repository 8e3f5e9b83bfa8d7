//! Chromiumoxide-backed [`QuizSurface`] implementation.
//!
//! Connects to a running Chrome over CDP and drives the quiz tab through the
//! embedded helper script. Element handles are `(kind, index)` pairs that the
//! helper re-resolves with a fresh DOM query on every call, so a re-rendered
//! page surfaces as [`SurfaceError::StaleElement`] instead of a dangling
//! remote object.

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::dom_scripts::{QUIZ_SURFACE_SCRIPT, helper_call};
use crate::page::{QuizSurface, SurfaceError, is_supported_host};
use crate::types::QuizOption;

fn map_page_error(err: impl std::fmt::Display) -> SurfaceError {
    let message = err.to_string();
    if message.contains("stale element") {
        SurfaceError::StaleElement(message)
    } else {
        SurfaceError::Script(message)
    }
}

fn map_connection_error(err: impl std::fmt::Display) -> SurfaceError {
    SurfaceError::Connection(err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Option,
    Text,
    Submit,
}

/// Page element addressed by kind and enumeration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageElement {
    pub kind: ElementKind,
    pub index: usize,
}

impl PageElement {
    fn args(&self) -> [Value; 2] {
        [json!(self.kind), json!(self.index)]
    }
}

#[derive(Debug, Deserialize)]
struct RawOption {
    index: usize,
    #[serde(default)]
    label: String,
    #[serde(default)]
    position: Option<String>,
}

/// Quiz surface over one chromiumoxide page.
#[derive(Debug, Clone)]
pub struct ChromiumQuizSurface {
    page: Page,
}

impl ChromiumQuizSurface {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Register the helper for future navigations and evaluate it now.
    pub async fn install(&self) -> Result<(), SurfaceError> {
        self.page
            .evaluate_on_new_document(QUIZ_SURFACE_SCRIPT)
            .await
            .map_err(map_page_error)?;
        self.page
            .evaluate_expression(QUIZ_SURFACE_SCRIPT)
            .await
            .map_err(map_page_error)?;
        Ok(())
    }

    async fn call(&self, method: &str, args: &[Value]) -> Result<Value, SurfaceError> {
        // The helper is idempotent; prepending it covers pages that navigated
        // since `install` ran.
        let expression = format!("{QUIZ_SURFACE_SCRIPT}\n;{}", helper_call(method, args)?);
        let result = self
            .page
            .evaluate_expression(expression)
            .await
            .map_err(map_page_error)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: &[Value],
    ) -> Result<T, SurfaceError> {
        let value = self.call(method, args).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl QuizSurface for ChromiumQuizSurface {
    type Element = PageElement;

    async fn hostname(&self) -> Result<String, SurfaceError> {
        self.call_as("hostname", &[]).await
    }

    async fn url(&self) -> Result<Option<String>, SurfaceError> {
        self.page.url().await.map_err(map_page_error)
    }

    async fn enumerate_options(&self) -> Result<Vec<QuizOption<PageElement>>, SurfaceError> {
        let raw: Vec<RawOption> = self.call_as("options", &[]).await?;
        Ok(raw
            .into_iter()
            .map(|option| {
                let element = PageElement {
                    kind: ElementKind::Option,
                    index: option.index,
                };
                QuizOption::new(element, option.label, option.position, option.index)
            })
            .collect())
    }

    async fn enumerate_text_surfaces(&self) -> Result<Vec<PageElement>, SurfaceError> {
        let count: usize = self.call_as("textInputCount", &[]).await?;
        Ok((0..count)
            .map(|index| PageElement {
                kind: ElementKind::Text,
                index,
            })
            .collect())
    }

    async fn is_multi_select(&self) -> Result<bool, SurfaceError> {
        self.call_as("isMultiSelect", &[]).await
    }

    async fn find_submit(&self) -> Result<Option<PageElement>, SurfaceError> {
        let present: bool = self.call_as("hasSubmit", &[]).await?;
        Ok(present.then_some(PageElement {
            kind: ElementKind::Submit,
            index: 0,
        }))
    }

    async fn is_disabled(&self, element: &PageElement) -> Result<bool, SurfaceError> {
        self.call_as("isDisabled", &element.args()).await
    }

    async fn activate(&self, element: &PageElement) -> Result<(), SurfaceError> {
        self.call("click", &element.args()).await.map(drop)
    }

    async fn set_value(&self, element: &PageElement, text: &str) -> Result<(), SurfaceError> {
        let [kind, index] = element.args();
        self.call("setValue", &[kind, index, json!(text)])
            .await
            .map(drop)
    }

    async fn emit_change_signals(&self, element: &PageElement) -> Result<(), SurfaceError> {
        self.call("emitChange", &element.args()).await.map(drop)
    }

    async fn notify(&self, message: &str) -> Result<(), SurfaceError> {
        self.call("notify", &[json!(message)]).await.map(drop)
    }
}

/// Connection to an already running Chrome.
///
/// The CDP handler task is aborted when the connection is dropped.
pub struct ChromiumConnection {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumConnection {
    /// Attach over a CDP websocket or `http://host:port` debugging URL.
    pub async fn connect(url: &str) -> Result<Self, SurfaceError> {
        let (browser, mut handler) = Browser::connect(url)
            .await
            .map_err(map_connection_error)?;
        let handler = tokio::spawn(async move {
            while let Some(result) = handler.next().await {
                if let Err(err) = result {
                    log::debug!(target: "vision_key::browser", "chromiumoxide handler error: {err}");
                }
            }
        });
        Ok(Self { browser, handler })
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// The first open tab on the supported quiz platform.
    pub async fn quiz_page(&self) -> Result<Option<ChromiumQuizSurface>, SurfaceError> {
        let pages = self.browser.pages().await.map_err(map_connection_error)?;
        for page in pages {
            let url = page.url().await.map_err(map_page_error)?.unwrap_or_default();
            if host_of(&url).is_some_and(is_supported_host) {
                let surface = ChromiumQuizSurface::new(page);
                surface.install().await?;
                return Ok(Some(surface));
            }
        }
        Ok(None)
    }
}

impl Drop for ChromiumConnection {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Hostname portion of an absolute URL.
fn host_of(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_args_serialize_kind_in_lowercase() {
        let element = PageElement {
            kind: ElementKind::Submit,
            index: 0,
        };
        assert_eq!(element.args(), [json!("submit"), json!(0)]);
    }

    #[test]
    fn raw_options_tolerate_missing_fields() {
        let raw: Vec<RawOption> =
            serde_json::from_value(json!([{"index": 0}, {"index": 1, "label": "B. x", "position": "2"}]))
                .unwrap();
        assert_eq!(raw[0].label, "");
        assert_eq!(raw[0].position, None);
        assert_eq!(raw[1].position.as_deref(), Some("2"));
    }

    #[test]
    fn extracts_host_from_url() {
        assert_eq!(host_of("https://quizizz.com/join/game"), Some("quizizz.com"));
        assert_eq!(host_of("https://user@wayground.com:443/x?y"), Some("wayground.com"));
        assert_eq!(host_of("about:blank"), None);
        assert_eq!(host_of("chrome://newtab/"), Some("newtab"));
    }

    #[test]
    fn stale_errors_are_classified() {
        assert!(matches!(
            map_page_error("Error: stale element: option#3"),
            SurfaceError::StaleElement(_)
        ));
        assert!(matches!(map_page_error("boom"), SurfaceError::Script(_)));
    }
}
