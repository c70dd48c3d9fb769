use std::{fmt, str::FromStr, sync::Arc, sync::LazyLock};

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;

use crate::{
    models::LinkConfig,
    store::{from_document, DocKey, Document, DocumentStore},
    subscription::Subscription,
};

pub const SETTINGS_COLLECTION: &str = "settings";
pub const SETTINGS_DOC_ID: &str = "link-settings";
pub const DEFAULT_LINK: &str = "https://wa.me/1234567890";

static PHONE_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"phone=(\d+)").unwrap());
static TEXT_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"text=([^&]*)").unwrap());
static STRICT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://wa\.me/\d+").unwrap());

// ── Validation policy ──────────────────────────────────────────────────────

/// Which candidate links [`ConfigStore::set_link`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPolicy {
    /// Any text that is non-empty after trimming whitespace.
    #[default]
    Permissive,
    /// Only `https://wa.me/<digits>…` links.
    Strict,
}

impl LinkPolicy {
    pub fn accepts(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        match self {
            LinkPolicy::Permissive => !candidate.is_empty(),
            LinkPolicy::Strict => STRICT_LINK.is_match(candidate),
        }
    }
}

impl fmt::Display for LinkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkPolicy::Permissive => "permissive",
            LinkPolicy::Strict => "strict",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown link policy '{0}' (expected 'permissive' or 'strict')")]
pub struct UnknownLinkPolicy(String);

impl FromStr for LinkPolicy {
    type Err = UnknownLinkPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(LinkPolicy::Permissive),
            "strict" => Ok(LinkPolicy::Strict),
            other => Err(UnknownLinkPolicy(other.to_owned())),
        }
    }
}

// ── ConfigStore ────────────────────────────────────────────────────────────

/// Reads, writes and watches the single active contact link.
///
/// Nothing is cached in-process: every read goes to the document store so
/// that all server instances agree on the current value.
#[derive(Clone)]
pub struct ConfigStore {
    store: Arc<dyn DocumentStore>,
    policy: LinkPolicy,
    default_link: Arc<str>,
}

impl ConfigStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        policy: LinkPolicy,
        default_link: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            store,
            policy,
            default_link: default_link.into(),
        }
    }

    fn key() -> DocKey {
        DocKey::new(SETTINGS_COLLECTION, SETTINGS_DOC_ID)
    }

    pub fn policy(&self) -> LinkPolicy {
        self.policy
    }

    pub fn default_link(&self) -> &str {
        &self.default_link
    }

    /// The stored link, or the default when none is stored or the store
    /// cannot be read.
    pub async fn get_link(&self) -> String {
        self.get_config().await.link
    }

    /// The full settings document with the same fallbacks as
    /// [`get_link`](Self::get_link). `updated_at` is `None` for the default.
    pub async fn get_config(&self) -> LinkConfig {
        match self.store.get(&Self::key()).await {
            Ok(snapshot) => config_from(snapshot.data.as_ref(), &self.default_link),
            Err(e) => {
                tracing::error!("Error fetching link: {}", e);
                fallback_config(&self.default_link)
            }
        }
    }

    /// Validate and store a new link, keeping any other settings fields.
    /// Returns `false` if the candidate is rejected or the write fails.
    pub async fn set_link(&self, candidate: &str) -> bool {
        if !self.is_valid_link(candidate) {
            tracing::warn!("Rejected link under {} policy: {:?}", self.policy, candidate);
            return false;
        }

        let mut fields = Document::new();
        fields.insert("link".into(), Value::String(candidate.to_owned()));
        fields.insert(
            "updatedAt".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        match self.store.set(&Self::key(), fields, true).await {
            Ok(_) => {
                tracing::info!("Link updated to {}", candidate);
                true
            }
            Err(e) => {
                tracing::error!("Error updating link: {}", e);
                false
            }
        }
    }

    pub fn is_valid_link(&self, candidate: &str) -> bool {
        self.policy.accepts(candidate)
    }

    /// Call `callback` with the current link now and again after every change.
    pub async fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(String) + Send + 'static,
    {
        let default_link = self.default_link.clone();
        Subscription::open(
            self.store.clone(),
            Self::key(),
            move |doc| config_from(doc, &default_link).link,
            callback,
        )
        .await
    }
}

fn config_from(doc: Option<&Document>, default_link: &str) -> LinkConfig {
    let Some(doc) = doc else {
        return fallback_config(default_link);
    };

    match from_document::<LinkConfig>(doc) {
        Ok(config) if !config.link.is_empty() => config,
        Ok(config) => LinkConfig {
            link: default_link.to_owned(),
            ..config
        },
        Err(e) => {
            tracing::warn!("Malformed link settings document: {}", e);
            fallback_config(default_link)
        }
    }
}

fn fallback_config(default_link: &str) -> LinkConfig {
    LinkConfig {
        link: default_link.to_owned(),
        updated_at: None,
    }
}

// ── Link helpers ───────────────────────────────────────────────────────────

/// Rewrite `api.whatsapp.com` / `web.whatsapp.com` style links carrying a
/// `phone=` parameter into `https://wa.me/<digits>[?text=…]`. The `text`
/// value is carried over as-is. Anything already on `wa.me/`, or without a
/// phone parameter, comes back unchanged.
pub fn normalize_link(candidate: &str) -> String {
    if candidate.contains("wa.me/") {
        return candidate.to_owned();
    }

    let Some(phone) = PHONE_PARAM.captures(candidate) else {
        return candidate.to_owned();
    };

    let mut normalized = format!("https://wa.me/{}", &phone[1]);
    if let Some(text) = TEXT_PARAM.captures(candidate) {
        normalized.push_str("?text=");
        normalized.push_str(&text[1]);
    }
    normalized
}

/// Build a `wa.me` link from a free-form phone number and optional
/// pre-filled message.
pub fn format_whatsapp_link(phone_number: &str, message: Option<&str>) -> String {
    let digits: String = phone_number.chars().filter(char::is_ascii_digit).collect();
    let mut link = format!("https://wa.me/{digits}");

    if let Some(message) = message.filter(|m| !m.is_empty()) {
        link.push_str("?text=");
        link.push_str(&encode_uri_component(message));
    }
    link
}

/// Percent-encode everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
fn encode_uri_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
