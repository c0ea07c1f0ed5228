//! Session cookie wire format: reading it from `Cookie` headers and serializing the
//! `Set-Cookie` values for login and logout.

use axum::http::{header, HeaderMap, HeaderValue};

use crate::config::CookieSettings;
use crate::error::{AppError, AppResult};

/// First value of the named cookie across all `Cookie` headers. Surrounding quotes are
/// dropped; empty values count as absent.
pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(header::COOKIE) {
        let Ok(s) = cookie.to_str() else { continue };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k.trim() == name {
                    let v = v.trim();
                    let v = v.strip_prefix('"').and_then(|x| x.strip_suffix('"')).unwrap_or(v);
                    if v.is_empty() {
                        return None;
                    }
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

fn attributes(settings: &CookieSettings) -> String {
    let mut out = format!("Path={}", settings.path);
    if settings.http_only {
        out.push_str("; HttpOnly");
    }
    if settings.secure {
        out.push_str("; Secure");
    }
    out.push_str("; SameSite=");
    out.push_str(settings.same_site.as_str());
    out
}

pub fn set_session_cookie(settings: &CookieSettings, token: &str) -> AppResult<HeaderValue> {
    let raw = format!("{}={}; Max-Age={}; {}", settings.name, token, settings.max_age_secs, attributes(settings));
    HeaderValue::from_str(&raw).map_err(|e| AppError::internal("bad_cookie_value".to_string(), e.to_string()))
}

pub fn clear_session_cookie(settings: &CookieSettings) -> AppResult<HeaderValue> {
    let raw = format!(
        "{}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; {}",
        settings.name,
        attributes(settings)
    );
    HeaderValue::from_str(&raw).map_err(|e| AppError::internal("bad_cookie_value".to_string(), e.to_string()))
}
