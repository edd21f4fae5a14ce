//! Deterministic rules for recurring dialogs.
//!
//! Rules are plain table lookups over the screen's captions, evaluated in
//! declared order. They are cheap, so the engine always tries them before
//! asking an oracle.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::history::Action;
use crate::screen::{ELEMENT_TYPES, ScreenDescription, similar_label};

/// Whether prompts asking for consent are accepted or refused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentMode {
    #[default]
    Accept,
    Reject,
}

/// A system dialog: every term must be on screen, then the first button
/// present is tapped.
#[derive(Debug, Clone, Copy)]
pub struct NativeRule {
    pub terms: &'static [&'static str],
    pub buttons: &'static [&'static str],
}

const fn rule(terms: &'static [&'static str], buttons: &'static [&'static str]) -> NativeRule {
    NativeRule { terms, buttons }
}

pub const ACCEPT_RULES: &[NativeRule] = &[
    rule(&["Ask App Not to Track"], &["Allow"]),
    rule(&["Notifications may include alerts"], &["Allow"]),
    rule(&["Headphones", "Is this Lightning adapter"], &["Headphones"]),
    rule(&["Turn on Location Services", "Cancel"], &["Allow"]),
    rule(&["Location", "Allow while using app"], &["Allow while using app"]),
    rule(&["Would Like to", "Don’t Allow"], &["Allow"]),
    rule(&["share information about you", "Cancel"], &["Allow"]),
    rule(&["Security"], &["Ok", "Continue to Use", "Quit"]),
    rule(&["Turn on Notifications", "Not now"], &["Not now"]),
    rule(&["Tap a star to rate"], &["Not now"]),
];

pub const REJECT_RULES: &[NativeRule] = &[
    rule(&["Ask App Not to Track"], &["Ask App Not to Track"]),
    rule(&["Notifications may include alerts"], &["Don’t Allow"]),
    rule(&["Headphones", "Is this Lightning adapter"], &["Headphones"]),
    rule(&["Turn on Location Services", "Cancel"], &["Cancel"]),
    rule(&["Location", "Allow while using app"], &["Don’t Allow"]),
    rule(&["Would Like to", "Don’t Allow"], &["Don’t Allow"]),
    rule(&["share information about you", "Cancel"], &["Don’t Allow"]),
    rule(&["Security"], &["Ok", "Continue to Use", "Quit"]),
    rule(&["Turn on Notifications", "Not now"], &["Not now"]),
    rule(&["Tap a star to rate"], &["Not now"]),
];

/// Button labels that accept a cookie or tracking banner.
pub const DEFAULT_COOKIE_KEYWORDS: &[&str] = &[
    "Accept",
    "Accept all",
    "Accept all cookies",
    "Accept cookies",
    "Allow all",
    "Allow all cookies",
    "Agree",
    "I agree",
    "Agree and continue",
    "Accept and continue",
    "Got it",
    "Akzeptieren",
    "Alle akzeptieren",
    "Alle Cookies akzeptieren",
    "Zustimmen",
    "Alle zulassen",
    "Einverstanden",
];

/// Spoken command that picks the password path of a sign-in sheet.
pub const CONTINUE_WITH_PASSWORD: &str = "continue with password";

const APPLE_SIGN_IN: &[&str] = &["Continue with Apple", "Sign in with Apple", "Apple sign-in"];

fn fold(s: &str) -> String {
    s.to_lowercase().replace('’', "'")
}

fn mentions(captions: &[&str], term: &str) -> bool {
    let term = fold(term);
    captions.iter().any(|c| fold(c).contains(&term))
}

/// Cut a caption at its first element-type part: `"Accept, Button, Selected"`
/// becomes `"Accept"`.
pub fn without_element_types(caption: &str) -> String {
    let parts: Vec<&str> = caption.split(',').map(str::trim).collect();
    let end = parts
        .iter()
        .position(|p| ELEMENT_TYPES.contains(p))
        .unwrap_or(parts.len());
    parts[..end].join(", ")
}

#[derive(Debug, Clone)]
pub struct RuleBook {
    cookie_keywords: Vec<String>,
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_KEYWORDS.iter().map(|k| k.to_string()).collect())
    }
}

impl RuleBook {
    pub fn new(cookie_keywords: Vec<String>) -> Self {
        Self { cookie_keywords }
    }

    /// Load cookie keywords from a file, one per line.
    pub fn with_keywords_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read keywords file: {}", path.display()))?;
        let keywords: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if keywords.is_empty() {
            anyhow::bail!("keywords file is empty: {}", path.display());
        }
        Ok(Self::new(keywords))
    }

    pub fn cookie_keywords(&self) -> &[String] {
        &self.cookie_keywords
    }

    /// Native system dialogs, then a lone OK/Cancel button.
    pub fn native_dialog(&self, screen: &ScreenDescription, mode: ConsentMode) -> Option<Action> {
        let captions = usable_captions(screen)?;
        self.native(&captions, mode)
            .or_else(|| single_button(&captions))
            .map(|a| locate(a, screen))
    }

    /// Native dialogs read from OCR, cookie banners, sign-in prompts, then a
    /// lone OK/Cancel button.
    pub fn consent_dialog(&self, screen: &ScreenDescription, mode: ConsentMode) -> Option<Action> {
        let captions = usable_captions(screen)?;
        let filtered: Vec<String> = captions.iter().map(|c| without_element_types(c)).collect();
        let filtered: Vec<&str> = filtered.iter().map(String::as_str).collect();

        self.native(&captions, mode)
            .or_else(|| self.cookie(&filtered, mode))
            .or_else(|| authentication(&filtered))
            .or_else(|| single_button(&captions))
            .map(|a| locate(a, screen))
    }

    fn native(&self, captions: &[&str], mode: ConsentMode) -> Option<Action> {
        let table = match mode {
            ConsentMode::Accept => ACCEPT_RULES,
            ConsentMode::Reject => REJECT_RULES,
        };
        for rule in table {
            if !rule.terms.iter().all(|t| mentions(captions, t)) {
                continue;
            }
            if let Some(button) = rule.buttons.iter().find(|b| mentions(captions, b)) {
                debug!(terms = ?rule.terms, button, "native dialog matched");
                return Some(Action::tap(*button));
            }
        }
        None
    }

    fn cookie(&self, captions: &[&str], mode: ConsentMode) -> Option<Action> {
        if mode == ConsentMode::Reject {
            return None;
        }
        for caption in captions {
            let text = caption.replace(',', "");
            let text = text.trim();
            for keyword in &self.cookie_keywords {
                let keyword = keyword.replace(',', "");
                if similar_label(&keyword, text, 2) {
                    debug!(caption = text, keyword = %keyword, "cookie banner matched");
                    return Some(Action::tap(text));
                }
            }
        }
        None
    }
}

/// Captions worth matching, or `None` when the screen carries no data.
fn usable_captions(screen: &ScreenDescription) -> Option<Vec<&str>> {
    if screen.is_empty() || screen.is_direct_interaction() {
        debug!("no usable screen data for rules");
        return None;
    }
    Some(screen.captions().collect())
}

fn authentication(captions: &[&str]) -> Option<Action> {
    if mentions(captions, "Continue with Password") {
        return Some(Action::custom(CONTINUE_WITH_PASSWORD));
    }
    APPLE_SIGN_IN.iter().find_map(|term| {
        let term = fold(term);
        captions
            .iter()
            .find(|c| fold(c).contains(&term))
            .map(|c| Action::tap(*c))
    })
}

/// Exactly one caption names a button and it reads OK or Cancel.
fn single_button(captions: &[&str]) -> Option<Action> {
    let mut buttons = captions.iter().filter(|c| c.to_lowercase().contains("button"));
    let (Some(only), None) = (buttons.next(), buttons.next()) else {
        return None;
    };
    let label = only.split(',').next().unwrap_or_default().trim();
    match label.to_lowercase().as_str() {
        "ok" => Some(Action::tap("Ok")),
        "cancel" => Some(Action::tap("Cancel")),
        _ => None,
    }
}

/// Attach the box of the matching OCR fragment, when there is one.
fn locate(action: Action, screen: &ScreenDescription) -> Action {
    match screen.locate(&action.target) {
        Some(bounds) if action.bounds.is_none() => action.with_bounds(bounds),
        _ => action,
    }
}
