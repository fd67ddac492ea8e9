use std::net::SocketAddr;
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "RehaTrack";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bind address when `REHATRACK_ADDR` is not set.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

/// Get the application data directory
/// ~/RehaTrack/ on all platforms (user-visible)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("RehaTrack")
}

/// Resolve the bind address from the environment, falling back to the default.
pub fn bind_addr() -> SocketAddr {
    std::env::var("REHATRACK_ADDR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            DEFAULT_BIND_ADDR
                .parse()
                .expect("default bind address is valid")
        })
}

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> String {
    format!("{}=info,tower_http=info", env!("CARGO_PKG_NAME"))
}
