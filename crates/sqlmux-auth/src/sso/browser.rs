//! Browser launching for the SSO flow

use parking_lot::Mutex;
use std::sync::Arc;

/// Opens the identity provider's login page
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

/// Launch the system default browser
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        open::that(url).map_err(|e| format!("Failed to open URL: {}", e))
    }
}

/// Prints the URL instead of opening it, for headless hosts
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintUrl;

impl BrowserLauncher for PrintUrl {
    fn open(&self, url: &str) -> Result<(), String> {
        println!("Open the following URL in a browser to log in:\n\n    {}\n", url);
        Ok(())
    }
}

/// Records every URL it is asked to open
#[derive(Debug, Default, Clone)]
pub struct RecordingBrowser {
    opened: Arc<Mutex<Vec<String>>>,
}

impl RecordingBrowser {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

impl BrowserLauncher for RecordingBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        self.opened.lock().push(url.to_string());
        Ok(())
    }
}
