use std::sync::Arc;

use culler_core::error::AppError;
use culler_core::models::Entity;
use culler_core::traits::{CellHandle, CellParser};
use scraper::{ElementRef, Html, Selector};

/// Texts that mark the "follows you" badge, per supported UI language.
const FOLLOWS_YOU: &[&str] = &["Follows you", "关注了你"];
/// Texts of the "Following" button, per supported UI language.
const FOLLOWING: &[&str] = &["Following", "正在关注"];
/// Display names are short; longer texts are bios.
const MAX_LABEL_CHARS: usize = 50;

struct Compiled {
    follow_indicator: Selector,
    trigger: Selector,
    button: Selector,
    span: Selector,
    label_candidates: Selector,
    profile_link: Selector,
}

/// [`CellParser`] over the account cell markup of the following list.
///
/// The id is the account handle without the `@`, taken from the follow
/// button's `aria-label`, then from an `@handle` span, then from a profile
/// link. Cells without a follow button are not accounts. Mutual follows
/// parse like any other account but are not harvest candidates unless
/// [`include_mutuals`](Self::include_mutuals) is set.
#[derive(Clone)]
pub struct MarkupCellParser {
    selectors: Arc<Compiled>,
    skip_mutuals: bool,
}

impl MarkupCellParser {
    pub fn new() -> Result<Self, AppError> {
        let parse = |css: &str| {
            Selector::parse(css)
                .map_err(|e| AppError::ConfigError(format!("Invalid selector '{css}': {e}")))
        };
        Ok(Self {
            selectors: Arc::new(Compiled {
                follow_indicator: parse(r#"[data-testid="userFollowIndicator"]"#)?,
                trigger: parse(r#"button[data-testid*="unfollow"]"#)?,
                button: parse("button")?,
                span: parse("span")?,
                label_candidates: parse(r#"div[dir="ltr"], span"#)?,
                profile_link: parse(r#"a[href^="/"]"#)?,
            }),
            skip_mutuals: true,
        })
    }

    /// Also harvest accounts that follow back.
    pub fn include_mutuals(mut self) -> Self {
        self.skip_mutuals = false;
        self
    }

    fn follows_back(&self, cell: &Html) -> bool {
        cell.select(&self.selectors.follow_indicator)
            .any(|el| contains_any(&text_of(el), FOLLOWS_YOU))
    }

    /// The "Following" button: by test id first, then by text.
    fn follow_button<'a>(&self, cell: &'a Html) -> Option<ElementRef<'a>> {
        cell.select(&self.selectors.trigger).next().or_else(|| {
            cell.select(&self.selectors.button)
                .find(|b| contains_any(&text_of(*b), FOLLOWING))
        })
    }

    fn handle_from_spans(&self, cell: &Html) -> Option<String> {
        cell.select(&self.selectors.span).find_map(|span| {
            let text = text_of(span);
            text.strip_prefix('@')
                .filter(|h| is_handle(h))
                .map(str::to_string)
        })
    }

    fn label(&self, cell: &Html) -> Option<String> {
        cell.select(&self.selectors.label_candidates)
            .map(text_of)
            .find(|text| {
                !text.is_empty()
                    && !text.starts_with('@')
                    && !contains_any(text, FOLLOWING)
                    && !contains_any(text, FOLLOWS_YOU)
                    && text.chars().count() < MAX_LABEL_CHARS
            })
    }

    /// First profile link: `(handle, link text)`.
    fn profile_link(&self, cell: &Html) -> Option<(String, String)> {
        cell.select(&self.selectors.profile_link).find_map(|link| {
            let href = link.value().attr("href")?;
            if href.contains("/search") || href.contains("/hashtag") {
                return None;
            }
            let handle = href.split('/').find(|s| !s.is_empty())?;
            is_handle(handle).then(|| (handle.to_string(), text_of(link)))
        })
    }
}

impl CellParser for MarkupCellParser {
    fn parse(&self, cell: &CellHandle) -> Option<Entity> {
        let html = Html::parse_fragment(&cell.markup);
        let button = self.follow_button(&html)?;

        let mut handle = button
            .value()
            .attr("aria-label")
            .and_then(handle_in)
            .or_else(|| self.handle_from_spans(&html));
        let mut label = self.label(&html);

        if handle.is_none() || label.is_none() {
            if let Some((link_handle, link_text)) = self.profile_link(&html) {
                handle.get_or_insert(link_handle);
                if label.is_none() && !link_text.is_empty() && !link_text.starts_with('@') {
                    label = Some(link_text);
                }
            }
        }

        let handle = handle?;
        let label = label.unwrap_or_else(|| handle.clone());
        Some(Entity::new(handle, label))
    }

    fn is_candidate(&self, cell: &CellHandle) -> bool {
        !self.skip_mutuals || !self.follows_back(&Html::parse_fragment(&cell.markup))
    }
}

/// Extracts the first `@handle` from text such as `Following @alice`.
fn handle_in(text: &str) -> Option<String> {
    let start = text.find('@')? + 1;
    let handle: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    (!handle.is_empty()).then_some(handle)
}

fn is_handle(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STANDARD: &str = include_str!("../fixtures/cell_standard.html");
    const MUTUAL: &str = include_str!("../fixtures/cell_mutual.html");
    const TEXT_BUTTON: &str = include_str!("../fixtures/cell_text_button.html");
    const LINK_ONLY: &str = include_str!("../fixtures/cell_link_only.html");
    const NOT_AN_ACCOUNT: &str = include_str!("../fixtures/cell_separator.html");

    fn parse(markup: &str) -> Option<Entity> {
        MarkupCellParser::new()
            .unwrap()
            .parse(&CellHandle::new(0, markup))
    }

    #[test]
    fn parses_standard_cell() {
        let entity = parse(STANDARD).unwrap();
        assert_eq!(entity.id, "rustlang");
        assert_eq!(entity.label, "Rust Language");
    }

    #[test]
    fn mutual_follow_is_not_a_harvest_candidate() {
        let cell = CellHandle::new(0, MUTUAL);
        let parser = MarkupCellParser::new().unwrap();
        assert!(!parser.is_candidate(&cell));
        assert!(parser.include_mutuals().is_candidate(&cell));
        assert!(MarkupCellParser::new().unwrap().is_candidate(&CellHandle::new(0, STANDARD)));
    }

    #[test]
    fn mutual_follow_still_parses_for_execution() {
        let entity = parse(MUTUAL).unwrap();
        assert_eq!(entity.id, "ferris_crab");
    }

    #[test]
    fn finds_text_button_and_span_handle() {
        let entity = parse(TEXT_BUTTON).unwrap();
        assert_eq!(entity.id, "tokio_rs");
        assert_eq!(entity.label, "Tokio");
    }

    #[test]
    fn falls_back_to_profile_link() {
        let entity = parse(LINK_ONLY).unwrap();
        assert_eq!(entity.id, "serde_rs");
        assert_eq!(entity.label, "serde_rs");
    }

    #[test]
    fn cell_without_follow_button_is_not_an_account() {
        assert!(parse(NOT_AN_ACCOUNT).is_none());
    }

    #[test]
    fn handle_extraction() {
        assert_eq!(handle_in("Following @alice_1"), Some("alice_1".into()));
        assert_eq!(handle_in("正在关注 @bob"), Some("bob".into()));
        assert_eq!(handle_in("Following"), None);
        assert!(is_handle("a_b9"));
        assert!(!is_handle("a-b"));
    }
}
