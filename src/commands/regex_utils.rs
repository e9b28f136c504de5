//! Utility module for common regular expressions used throughout the application.
use once_cell::sync::Lazy;
use regex::Regex;

/// Regex to validate tap names - `user/repo` with dashes, dots or underscores.
/// Brew compares tap names case-insensitively, so any case is accepted.
pub static TAP_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*/[A-Za-z0-9][A-Za-z0-9_.+-]*$").unwrap());

/// Regex to strip icons and bullets brew prints in front of listed names
pub static UNTAP_ICON_PREFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\p{L}\p{N}]+").unwrap());

/// Regex to validate formula and cask names, including versioned ones like `python@3.12`
pub static ENTITY_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.+@-]*(/[A-Za-z0-9_.+@-]+){0,2}$").unwrap());
