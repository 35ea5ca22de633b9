//! System browser launcher

use loopauth_common::auth::{BrowserError, BrowserLauncher};
use tracing::debug;

/// Opens URLs with the platform's default handler
///
/// The launch is detached, so this returns as soon as the OS accepted it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl SystemBrowser {
    /// Create a launcher
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BrowserLauncher for SystemBrowser {
    fn open_url(&self, url: &str) -> Result<(), BrowserError> {
        open::that_detached(url).map_err(|e| BrowserError(e.to_string()))?;
        debug!(event = "browser.opened", "Handed authorization URL to the system browser");
        Ok(())
    }
}
