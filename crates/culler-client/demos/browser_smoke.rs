/// Smoke-test for `BrowserHost` and `MarkupCellParser`.
///
/// Opens the following list of the handle given as the first argument in a
/// browser (attach to a logged-in Chrome with `CULLER_CHROME_WS`) and prints
/// the accounts parsed from the rendered cells. Read-only: nothing is clicked.
///
/// Run with:
///   cargo run -p culler-client --example browser_smoke --features browser -- <handle>
use culler_client::{BrowserConfig, BrowserHost, MarkupCellParser};
use culler_core::traits::{CellParser, RenderedListHost};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let handle = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: browser_smoke <handle>"))?;

    let config = BrowserConfig::from_env();
    let cell = config.selectors.cell.clone();
    println!("Launching browser…");
    let host = BrowserHost::launch(config).await?;
    host.open_following(&handle).await?;

    let parser = MarkupCellParser::new()?;
    let cells = host.enumerate(&cell).await?;
    let accounts: Vec<_> = cells.iter().filter_map(|c| parser.parse(c)).collect();

    println!("{} cells rendered, {} accounts parsed", cells.len(), accounts.len());
    for account in &accounts {
        println!("  @{:<20} {}", account.id, account.label);
    }
    Ok(())
}
