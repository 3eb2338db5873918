//! Shared helpers and constants.

use chrono::Utc;
use uuid::Uuid;

pub const APP_NAME: &str = "postline_backend";

/// Current wall-clock time in milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn print_banner() {
    println!("{APP_NAME} {}", env!("CARGO_PKG_VERSION"));
}
