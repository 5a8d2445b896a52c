pub mod locator;
pub mod navigation;
pub mod parser;
pub mod webhook;

#[cfg(feature = "browser")]
pub mod browser;

pub use locator::TriggerLocator;
pub use navigation::{following_url, is_following_page, profile_handle};
pub use parser::MarkupCellParser;
pub use webhook::WebhookObserver;

#[cfg(feature = "browser")]
pub use browser::{BrowserConfig, BrowserHost};
