//! Chrome DevTools Protocol implementation of
//! [`dtscan_scraper::BrowserSession`].
//!
//! [`cdp::CdpClient`] speaks JSON-RPC over the DevTools WebSocket,
//! [`session::CdpSession`] turns it into the page operations the navigator
//! needs, and [`launch`] starts Chromium and finds its page target.

pub mod cdp;
pub mod error;
pub mod launch;
pub mod session;

pub use cdp::{CdpClient, CdpEvent};
pub use error::CdpError;
pub use launch::{discover_page_target, launch_chromium, resolve_ws_url, LaunchedBrowser};
pub use session::CdpSession;
