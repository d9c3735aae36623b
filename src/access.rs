//! Access control for the recording gateway. Exactly one mode is active: Basic, then password,
//! then token. With none configured the gateway is closed.

use crate::config::RecordingsAccessConfig;
use crate::pages;
use crate::utils::{b64_decode, constant_time_eq};

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

pub const SESSION_COOKIE: &str = "voice_rec_session";
pub const SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const MAX_SESSIONS: usize = 1024;

/// Issued password sessions. Expired entries are pruned on every insert and the oldest is
/// evicted once the set is full.
#[derive(Debug, Default)]
pub struct Sessions {
    issued: HashMap<String, Instant>,
}

impl Sessions {
    pub fn contains(&self, id: &str, now: Instant) -> bool {
        self.issued
            .get(id)
            .is_some_and(|at| now.saturating_duration_since(*at) < SESSION_TTL)
    }

    pub fn insert(&mut self, id: String, now: Instant) {
        self.issued
            .retain(|_, at| now.saturating_duration_since(*at) < SESSION_TTL);
        while self.issued.len() >= MAX_SESSIONS {
            let Some(oldest) = self
                .issued
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            self.issued.remove(&oldest);
        }
        self.issued.insert(id, now);
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

pub type SessionStore = Arc<Mutex<Sessions>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessMode {
    Basic { user: String, pass: String },
    Password { password: String, token: Option<String> },
    Token(String),
    Closed,
}

impl AccessMode {
    pub fn from_config(config: &RecordingsAccessConfig) -> Self {
        match config {
            RecordingsAccessConfig {
                basic_user: Some(user),
                basic_pass: Some(pass),
                ..
            } => AccessMode::Basic {
                user: user.clone(),
                pass: pass.clone(),
            },
            RecordingsAccessConfig {
                password: Some(password),
                ..
            } => AccessMode::Password {
                password: password.clone(),
                token: config.token.clone(),
            },
            RecordingsAccessConfig {
                token: Some(token), ..
            } => AccessMode::Token(token.clone()),
            _ => AccessMode::Closed,
        }
    }

    /// Token to carry on generated links; only bare token mode needs it.
    pub fn link_token(&self) -> Option<&str> {
        match self {
            AccessMode::Token(token) => Some(token),
            _ => None,
        }
    }
}

/// Credentials presented by one gateway request.
#[derive(Debug, Default, Clone, Copy)]
pub struct Presented<'a> {
    pub authorization: Option<&'a str>,
    pub cookie: Option<&'a str>,
    pub token: Option<&'a str>,
    pub password: Option<&'a str>,
}

impl<'a> Presented<'a> {
    pub fn from_headers(headers: &'a HeaderMap) -> Self {
        Self {
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            cookie: headers.get(header::COOKIE).and_then(|v| v.to_str().ok()),
            ..Default::default()
        }
    }
}

/// A granted request, with the cookie to set when a password login just succeeded.
#[derive(Debug, Default)]
pub struct Grant {
    pub set_cookie: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// 401 with a Basic challenge.
    Challenge,
    /// 401 with the password form.
    LoginForm,
    Forbidden,
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        match self {
            Denial::Challenge => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"Recordings\""),
                );
                (StatusCode::UNAUTHORIZED, headers).into_response()
            }
            Denial::LoginForm => (StatusCode::UNAUTHORIZED, Html(pages::login_form())).into_response(),
            Denial::Forbidden => StatusCode::FORBIDDEN.into_response(),
        }
    }
}

fn basic_credentials(authorization: &str) -> Option<(String, String)> {
    let (scheme, encoded) = authorization.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(b64_decode(encoded)?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn session_id(cookie: &str) -> Option<&str> {
    cookie
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|v| !v.is_empty())
}

fn secret_matches(expected: &str, presented: Option<&str>) -> bool {
    presented.is_some_and(|t| constant_time_eq(expected, t))
}

pub struct Gate {
    mode: AccessMode,
    sessions: SessionStore,
}

impl Gate {
    pub fn new(mode: AccessMode, sessions: SessionStore) -> Self {
        Self { mode, sessions }
    }

    pub fn mode(&self) -> &AccessMode {
        &self.mode
    }

    fn has_session(&self, cookie: Option<&str>) -> bool {
        let Some(id) = cookie.and_then(session_id) else {
            return false;
        };
        self.sessions
            .lock()
            .map(|s| s.contains(id, Instant::now()))
            .unwrap_or(false)
    }

    fn open_session(&self) -> Option<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.sessions.lock().ok()?.insert(id.clone(), Instant::now());
        Some(format!(
            "{SESSION_COOKIE}={id}; Path=/voice; HttpOnly; SameSite=Lax"
        ))
    }

    /// Check one request. `listing` selects the password-form denial over a bare 403.
    pub fn check(&self, presented: &Presented, listing: bool) -> Result<Grant, Denial> {
        match &self.mode {
            AccessMode::Basic { user, pass } => {
                let ok = presented
                    .authorization
                    .and_then(basic_credentials)
                    .is_some_and(|(u, p)| constant_time_eq(user, &u) && constant_time_eq(pass, &p));
                if ok {
                    Ok(Grant::default())
                } else {
                    Err(Denial::Challenge)
                }
            }
            AccessMode::Password { password, token } => {
                if self.has_session(presented.cookie) {
                    return Ok(Grant::default());
                }
                if secret_matches(password, presented.password) {
                    debug!("recordings password accepted");
                    return Ok(Grant {
                        set_cookie: self.open_session(),
                    });
                }
                if token.as_deref().is_some_and(|t| secret_matches(t, presented.token)) {
                    return Ok(Grant::default());
                }
                if listing {
                    Err(Denial::LoginForm)
                } else {
                    Err(Denial::Forbidden)
                }
            }
            AccessMode::Token(token) => {
                if secret_matches(token, presented.token) {
                    Ok(Grant::default())
                } else {
                    Err(Denial::Forbidden)
                }
            }
            AccessMode::Closed => Err(Denial::Forbidden),
        }
    }
}
