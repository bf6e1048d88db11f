use anyhow::{Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Chrome connection kept alive for the whole run.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attaches to a Chrome already listening on `debug_url`, otherwise
    /// launches one with a persistent profile so the FAED login survives
    /// restarts.
    pub fn launch(debug_url: &str, target_url: Option<&str>, profile: PathBuf) -> Result<Self> {
        info!(debug_url, "attempting to attach to existing Chrome");
        match Browser::connect(debug_url.to_string()) {
            Ok(browser) => {
                info!("attached to existing Chrome");
                let tab = pick_tab(&browser, target_url)?;
                return Ok(Self {
                    _browser: browser,
                    tab,
                });
            }
            Err(e) => warn!(error = %e, "could not attach, launching Chrome"),
        }

        if !profile.exists() {
            info!(profile = %profile.display(), "creating agent profile");
            std::fs::create_dir_all(&profile)?;
        }

        let options = LaunchOptions {
            headless: false,
            path: find_chrome(),
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(3600),
            ..Default::default()
        };

        let browser = Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        match target_url {
            Some(url) => {
                info!(url, "opening FAED");
                tab.navigate_to(url)?;
                tab.wait_until_navigated()?;
            }
            None => {
                tab.navigate_to("about:blank")?;
            }
        }
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

/// Prefers the tab already showing the FAED host, then any tab.
fn pick_tab(browser: &Browser, target_url: Option<&str>) -> Result<Arc<Tab>> {
    let existing = {
        let tabs = browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("tab list lock poisoned"))?;
        let host = target_url.and_then(host_of);
        host.and_then(|host| tabs.iter().find(|t| t.get_url().contains(host)).cloned())
            .or_else(|| tabs.first().cloned())
    };
    match existing {
        Some(tab) => {
            info!(url = %tab.get_url(), "using existing tab");
            Ok(tab)
        }
        None => {
            info!("no tabs found, creating one");
            let tab = browser.new_tab()?;
            if let Some(url) = target_url {
                tab.navigate_to(url)?;
            }
            Ok(tab)
        }
    }
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', '?', '#']).next().filter(|host| !host.is_empty())
}

/// Well-known install locations. `None` lets headless_chrome search itself.
fn find_chrome() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join(r"Google\Chrome\Application\chrome.exe"));
    }
    candidates.into_iter().find(|p| p.exists())
}
