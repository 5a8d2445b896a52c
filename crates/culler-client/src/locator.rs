use std::sync::Arc;

use culler_core::error::AppError;
use culler_core::traits::{CellHandle, Control};
use scraper::{Html, Selector};

/// Candidate trigger selectors, most specific first.
const TRIGGERS: &[&str] = &[
    r#"button[data-testid*="unfollow"]"#,
    r#"button[aria-label^="Following"]"#,
    r#"button[aria-label^="正在关注"]"#,
];

/// Finds the action trigger inside a cell's markup and returns a control
/// whose selector re-finds it inside the live cell.
#[derive(Clone)]
pub struct TriggerLocator {
    candidates: Arc<Vec<(&'static str, Selector)>>,
}

impl TriggerLocator {
    pub fn new() -> Result<Self, AppError> {
        let candidates = TRIGGERS
            .iter()
            .map(|css| {
                Selector::parse(css)
                    .map(|sel| (*css, sel))
                    .map_err(|e| AppError::ConfigError(format!("Invalid selector '{css}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            candidates: Arc::new(candidates),
        })
    }

    pub fn locate(&self, cell: &CellHandle) -> Option<Control> {
        let html = Html::parse_fragment(&cell.markup);
        self.candidates
            .iter()
            .find(|(_, sel)| html.select(sel).next().is_some())
            .map(|(css, _)| Control::in_cell(cell.index, *css))
    }
}
