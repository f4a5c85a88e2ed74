//! Typed facade over the script-side filter engine object.
//!
//! The matching logic lives in the script resources; this module only
//! converts arguments and results.

use std::fmt;
use std::ops::BitOr;

use blinder_engine::{BridgeError, EngineSession, EngineValue};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{PlatformError, PlatformResult};

/// Request content types, with the mask values of the filter engine API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Other,
    Script,
    Image,
    Stylesheet,
    Object,
    Subdocument,
    Websocket,
    Webrtc,
    Ping,
    Xmlhttprequest,
    Media,
    Font,
    Popup,
    Csp,
    Header,
    Document,
    Genericblock,
    Elemhide,
    Generichide,
}

impl ContentType {
    pub const ALL: [ContentType; 19] = [
        Self::Other,
        Self::Script,
        Self::Image,
        Self::Stylesheet,
        Self::Object,
        Self::Subdocument,
        Self::Websocket,
        Self::Webrtc,
        Self::Ping,
        Self::Xmlhttprequest,
        Self::Media,
        Self::Font,
        Self::Popup,
        Self::Csp,
        Self::Header,
        Self::Document,
        Self::Genericblock,
        Self::Elemhide,
        Self::Generichide,
    ];

    pub fn mask(self) -> u32 {
        match self {
            Self::Other => 1,
            Self::Script => 2,
            Self::Image => 4,
            Self::Stylesheet => 8,
            Self::Object => 16,
            Self::Subdocument => 32,
            Self::Websocket => 128,
            Self::Webrtc => 256,
            Self::Ping => 1024,
            Self::Xmlhttprequest => 2048,
            Self::Media => 16384,
            Self::Font => 32768,
            Self::Popup => 1 << 24,
            Self::Csp => 1 << 25,
            Self::Header => 1 << 26,
            Self::Document => 1 << 27,
            Self::Genericblock => 1 << 28,
            Self::Elemhide => 1 << 29,
            Self::Generichide => 1 << 30,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Other => "OTHER",
            Self::Script => "SCRIPT",
            Self::Image => "IMAGE",
            Self::Stylesheet => "STYLESHEET",
            Self::Object => "OBJECT",
            Self::Subdocument => "SUBDOCUMENT",
            Self::Websocket => "WEBSOCKET",
            Self::Webrtc => "WEBRTC",
            Self::Ping => "PING",
            Self::Xmlhttprequest => "XMLHTTPREQUEST",
            Self::Media => "MEDIA",
            Self::Font => "FONT",
            Self::Popup => "POPUP",
            Self::Csp => "CSP",
            Self::Header => "HEADER",
            Self::Document => "DOCUMENT",
            Self::Genericblock => "GENERICBLOCK",
            Self::Elemhide => "ELEMHIDE",
            Self::Generichide => "GENERICHIDE",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|content_type| content_type.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of content types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ContentTypeMask(pub u32);

impl ContentTypeMask {
    pub fn contains(self, content_type: ContentType) -> bool {
        self.0 & content_type.mask() != 0
    }
}

impl From<ContentType> for ContentTypeMask {
    fn from(content_type: ContentType) -> Self {
        Self(content_type.mask())
    }
}

impl BitOr for ContentType {
    type Output = ContentTypeMask;

    fn bitor(self, rhs: Self) -> ContentTypeMask {
        ContentTypeMask(self.mask() | rhs.mask())
    }
}

impl BitOr<ContentType> for ContentTypeMask {
    type Output = ContentTypeMask;

    fn bitor(self, rhs: ContentType) -> ContentTypeMask {
        ContentTypeMask(self.0 | rhs.mask())
    }
}

impl BitOr for ContentTypeMask {
    type Output = ContentTypeMask;

    fn bitor(self, rhs: Self) -> ContentTypeMask {
        ContentTypeMask(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Blocking,
    #[serde(alias = "allowing", alias = "whitelist")]
    Exception,
    #[serde(rename = "elemhide")]
    ElemHide,
    #[serde(rename = "elemhideexception")]
    ElemHideException,
    #[serde(rename = "elemhideemulation")]
    ElemHideEmulation,
    Snippet,
    Comment,
    #[serde(other)]
    Invalid,
}

/// A filter as reported by the script engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub text: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
}

/// An element hiding emulation rule: the CSS selector and its filter text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulationSelector {
    pub selector: String,
    pub text: String,
}

/// Handle to the constructed script-side filter engine.
pub struct FilterEngine {
    session: EngineSession,
    object: EngineValue,
}

impl FilterEngine {
    /// Wrap a script object; it must be an object.
    pub fn new(session: EngineSession, object: EngineValue) -> PlatformResult<Self> {
        if !object.is_object() {
            return Err(PlatformError::factory(
                "filter engine factory did not produce an object",
            ));
        }
        Ok(Self { session, object })
    }

    /// The wrapped script object.
    pub fn object(&self) -> &EngineValue {
        &self.object
    }

    fn invoke(&self, method: &str, args: &[EngineValue]) -> PlatformResult<EngineValue> {
        trace!(method, "filter engine call");
        let function = self.object.get_property(method)?;
        if !function.is_function() {
            return Err(BridgeError::type_error(format!("method `{method}`"), "non-function").into());
        }
        Ok(function.call_with_this(args, &self.object)?)
    }

    fn string(&self, value: &str) -> PlatformResult<EngineValue> {
        Ok(self.session.new_string(value)?)
    }

    fn optional_string(&self, value: Option<&str>) -> PlatformResult<EngineValue> {
        match value {
            Some(value) => self.string(value),
            None => Ok(self.session.new_null()?),
        }
    }

    fn mask(&self, mask: impl Into<ContentTypeMask>) -> PlatformResult<EngineValue> {
        Ok(self.session.new_int(i64::from(mask.into().0))?)
    }

    /// The filter matching a request, if any.
    pub fn matches(
        &self,
        url: &str,
        content_type: impl Into<ContentTypeMask>,
        document_url: Option<&str>,
        sitekey: Option<&str>,
        specific_only: bool,
    ) -> PlatformResult<Option<Filter>> {
        let args = [
            self.string(url)?,
            self.mask(content_type)?,
            self.optional_string(document_url)?,
            self.optional_string(sitekey)?,
            self.session.new_bool(specific_only)?,
        ];
        let result = self.invoke("matches", &args)?;
        if result.is_null() || result.is_undefined() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result.to_json()?)?))
    }

    /// Whether an allowing rule covers the request for any of the documents.
    pub fn is_content_allowlisted(
        &self,
        url: &str,
        content_type: impl Into<ContentTypeMask>,
        document_urls: &[String],
        sitekey: Option<&str>,
    ) -> PlatformResult<bool> {
        let documents = document_urls
            .iter()
            .map(|document| self.string(document))
            .collect::<PlatformResult<Vec<_>>>()?;
        let args = [
            self.string(url)?,
            self.mask(content_type)?,
            self.session.new_array(&documents)?,
            self.optional_string(sitekey)?,
        ];
        Ok(self.invoke("isContentAllowlisted", &args)?.as_bool()?)
    }

    pub fn element_hiding_style_sheet(
        &self,
        domain: &str,
        specific_only: bool,
    ) -> PlatformResult<String> {
        let args = [self.string(domain)?, self.session.new_bool(specific_only)?];
        let result = self.invoke("getElementHidingStyleSheet", &args)?;
        if result.is_null() || result.is_undefined() {
            return Ok(String::new());
        }
        Ok(result.as_string()?)
    }

    pub fn element_hiding_emulation_selectors(
        &self,
        domain: &str,
    ) -> PlatformResult<Vec<EmulationSelector>> {
        let result = self.invoke("getElementHidingEmulationSelectors", &[self.string(domain)?])?;
        Ok(serde_json::from_value(result.to_json()?)?)
    }

    pub fn add_filter(&self, text: &str) -> PlatformResult<()> {
        self.invoke("addFilter", &[self.string(text)?])?;
        Ok(())
    }

    pub fn remove_filter(&self, text: &str) -> PlatformResult<()> {
        self.invoke("removeFilter", &[self.string(text)?])?;
        Ok(())
    }

    pub fn listed_filters(&self) -> PlatformResult<Vec<Filter>> {
        let result = self.invoke("getListedFilters", &[])?;
        Ok(serde_json::from_value(result.to_json()?)?)
    }
}

impl fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterEngine")
            .field("session", &self.session.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_type_masks() {
        assert_eq!(ContentType::Other.mask(), 1);
        assert_eq!(ContentType::Websocket.mask(), 128);
        assert_eq!(ContentType::Xmlhttprequest.mask(), 2048);
        assert_eq!(ContentType::Popup.mask(), 0x0100_0000);
        assert_eq!(ContentType::Generichide.mask(), 0x4000_0000);

        let mut seen = 0u32;
        for content_type in ContentType::ALL {
            assert_eq!(seen & content_type.mask(), 0, "{content_type} overlaps");
            seen |= content_type.mask();
        }
    }

    #[test]
    fn test_content_type_names() {
        assert_eq!(ContentType::from_name("image"), Some(ContentType::Image));
        assert_eq!(ContentType::from_name("ELEMHIDE"), Some(ContentType::Elemhide));
        assert_eq!(ContentType::from_name("bogus"), None);
        for content_type in ContentType::ALL {
            assert_eq!(ContentType::from_name(content_type.name()), Some(content_type));
        }
    }

    #[test]
    fn test_mask_union() {
        let mask = ContentType::Image | ContentType::Script | ContentType::Font;
        assert_eq!(mask, ContentTypeMask(4 | 2 | 32768));
        assert!(mask.contains(ContentType::Font));
        assert!(!mask.contains(ContentType::Media));
    }

    #[test]
    fn test_filter_deserialize() {
        let filter: Filter = serde_json::from_value(json!({"text": "@@||x.com^", "type": "allowing"})).unwrap();
        assert_eq!(filter.filter_type, FilterType::Exception);

        let filter: Filter = serde_json::from_value(json!({"text": "##.ad", "type": "elemhide"})).unwrap();
        assert_eq!(filter.filter_type, FilterType::ElemHide);

        let filter: Filter = serde_json::from_value(json!({"text": "??", "type": "future-kind"})).unwrap();
        assert_eq!(filter.filter_type, FilterType::Invalid);
    }

    #[test]
    fn test_facade_requires_object() {
        let session = EngineSession::new().unwrap();
        let number = session.new_int(3).unwrap();
        assert!(matches!(
            FilterEngine::new(session.clone(), number),
            Err(PlatformError::Factory(_))
        ));
        session.dispose().unwrap();
    }

    #[test]
    fn test_facade_calls_script_methods() {
        let session = EngineSession::new().unwrap();
        let object = session
            .evaluate(
                r##"({
                    filters: [],
                    matches(url, mask, doc, sitekey, specific) {
                        if (url.includes("ads") && (mask & 4)) return { text: "ads", type: "blocking" };
                        return null;
                    },
                    isContentAllowlisted(url, mask, docs) { return docs.includes("https://trusted.example/"); },
                    getElementHidingStyleSheet(domain, specific) { return specific ? "" : ".ad {display: none !important;}"; },
                    getElementHidingEmulationSelectors(domain) { return [{ selector: "div:-abp-has(.ad)", text: domain + "#?#div:-abp-has(.ad)" }]; },
                    addFilter(text) { this.filters.push(text); },
                    removeFilter(text) { this.filters = this.filters.filter(f => f !== text); },
                    getListedFilters() { return this.filters.map(text => ({ text, type: "blocking" })); },
                })"##,
                "engine.js",
            )
            .unwrap();
        let engine = FilterEngine::new(session.clone(), object).unwrap();

        let hit = engine
            .matches("https://ads.example/banner.png", ContentType::Image, None, None, false)
            .unwrap();
        assert_eq!(hit.map(|filter| filter.text).as_deref(), Some("ads"));
        assert!(engine
            .matches("https://ads.example/app.js", ContentType::Script, None, None, false)
            .unwrap()
            .is_none());

        assert!(engine
            .is_content_allowlisted(
                "https://trusted.example/",
                ContentType::Document,
                &["https://trusted.example/".to_owned()],
                None,
            )
            .unwrap());
        assert_eq!(engine.element_hiding_style_sheet("example.com", true).unwrap(), "");
        let selectors = engine.element_hiding_emulation_selectors("example.com").unwrap();
        assert_eq!(selectors[0].selector, "div:-abp-has(.ad)");

        engine.add_filter("||a.com^").unwrap();
        engine.add_filter("||b.com^").unwrap();
        engine.remove_filter("||a.com^").unwrap();
        let listed = engine.listed_filters().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].text, "||b.com^");

        drop(engine);
        session.dispose().unwrap();
    }

    #[test]
    fn test_missing_method_is_type_error() {
        let session = EngineSession::new().unwrap();
        let object = session.new_object().unwrap();
        let engine = FilterEngine::new(session.clone(), object).unwrap();
        let error = engine.add_filter("x").unwrap_err();
        assert!(matches!(
            error,
            PlatformError::Bridge(BridgeError::TypeError { .. })
        ));
    }
}
