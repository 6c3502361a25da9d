//! Credential macros for protocol extensions.
//!
//! `%{NAME}` or `${NAME}` expands to a host or credential value.
//! `%{esc(kind)::NAME}` escapes the value for the given context first.
//!
//! | Macro | Value |
//! |---|---|
//! | `HOSTNAME` | host name |
//! | `USERNAME`, `PASSWORD`, `AUTHENTICATIONTOKEN` | protocol credentials |
//! | `PASSWORD_BASE64` | base64 of the password |
//! | `BASIC_AUTH_BASE64` | base64 of `username:password` |
//! | `SHA256_AUTH` | hex SHA-256 of the authentication token |

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::core::config::HostConfiguration;

/// Context a macro value is escaped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeKind {
    Json,
    Url,
    Xml,
    Regex,
    WindowsCmd,
    Powershell,
    Bash,
    Sql,
}

impl EscapeKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "json" => Some(EscapeKind::Json),
            "url" => Some(EscapeKind::Url),
            "xml" => Some(EscapeKind::Xml),
            "regex" => Some(EscapeKind::Regex),
            "windowscmd" | "cmd" => Some(EscapeKind::WindowsCmd),
            "powershell" => Some(EscapeKind::Powershell),
            "bash" => Some(EscapeKind::Bash),
            "sql" => Some(EscapeKind::Sql),
            _ => None,
        }
    }

    pub fn escape(self, value: &str) -> String {
        match self {
            EscapeKind::Json => escape_chars(value, |c| match c {
                '\\' => Some("\\\\"),
                '"' => Some("\\\""),
                '\n' => Some("\\n"),
                '\r' => Some("\\r"),
                '\t' => Some("\\t"),
                _ => None,
            }),
            EscapeKind::Url => url::form_urlencoded::byte_serialize(value.as_bytes())
                .collect::<String>()
                .replace('+', "%20"),
            EscapeKind::Xml => escape_chars(value, |c| match c {
                '&' => Some("&amp;"),
                '<' => Some("&lt;"),
                '>' => Some("&gt;"),
                '"' => Some("&quot;"),
                '\'' => Some("&apos;"),
                _ => None,
            }),
            EscapeKind::Regex => regex::escape(value),
            EscapeKind::WindowsCmd => escape_chars(value, |c| match c {
                '^' => Some("^^"),
                '&' => Some("^&"),
                '|' => Some("^|"),
                '<' => Some("^<"),
                '>' => Some("^>"),
                '%' => Some("^%"),
                '(' => Some("^("),
                ')' => Some("^)"),
                '"' => Some("^\""),
                _ => None,
            }),
            EscapeKind::Powershell => escape_chars(value, |c| match c {
                '`' => Some("``"),
                '#' => Some("`#"),
                '[' => Some("`["),
                ']' => Some("`]"),
                '(' => Some("`("),
                ')' => Some("`)"),
                '{' => Some("`{"),
                '}' => Some("`}"),
                '$' => Some("`$"),
                '\'' => Some("''"),
                '"' => Some("`\""),
                _ => None,
            }),
            EscapeKind::Bash => escape_chars(value, |c| match c {
                '\'' => Some("\\'"),
                '"' => Some("\\\""),
                '\\' => Some("\\\\"),
                '$' => Some("\\$"),
                '!' => Some("\\!"),
                '*' => Some("\\*"),
                '?' => Some("\\?"),
                '[' => Some("\\["),
                ']' => Some("\\]"),
                '(' => Some("\\("),
                ')' => Some("\\)"),
                '{' => Some("\\{"),
                '}' => Some("\\}"),
                '|' => Some("\\|"),
                '&' => Some("\\&"),
                '<' => Some("\\<"),
                '>' => Some("\\>"),
                '~' => Some("\\~"),
                ';' => Some("\\;"),
                '\n' => Some("\\n"),
                _ => None,
            }),
            EscapeKind::Sql => escape_chars(value, |c| match c {
                '\'' => Some("''"),
                '"' => Some("\\\""),
                '\\' => Some("\\\\"),
                '\n' => Some("\\n"),
                '\r' => Some("\\r"),
                '\t' => Some("\\t"),
                _ => None,
            }),
        }
    }
}

/// Single-pass escape: each char is replaced at most once.
fn escape_chars<F>(value: &str, replacement: F) -> String
where
    F: Fn(char) -> Option<&'static str>,
{
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match replacement(c) {
            Some(r) => out.push_str(r),
            None => out.push(c),
        }
    }
    out
}

fn sha256_hex(value: &str) -> String {
    Sha256::digest(value.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

struct Credentials<'a> {
    hostname: &'a str,
    username: &'a str,
    password: &'a str,
    token: &'a str,
}

impl Credentials<'_> {
    fn value(&self, name: &str) -> Option<String> {
        let value = match name {
            "HOSTNAME" => self.hostname.to_string(),
            "USERNAME" => self.username.to_string(),
            "PASSWORD" => self.password.to_string(),
            "AUTHENTICATIONTOKEN" => self.token.to_string(),
            "PASSWORD_BASE64" => STANDARD.encode(self.password),
            "BASIC_AUTH_BASE64" => STANDARD.encode(format!("{}:{}", self.username, self.password)),
            "SHA256_AUTH" if self.token.is_empty() => String::new(),
            "SHA256_AUTH" => sha256_hex(self.token),
            _ => return None,
        };
        Some(value)
    }
}

static MACRO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[$%]\{(?:esc\(([A-Za-z0-9]+)\))?(?:::)?([A-Z0-9_-]+)\}").expect("valid macro pattern")
});

/// Expand credential macros in `text` for `protocol` on `host`.
///
/// Unknown macro names and references to other namespaces (such as
/// `${source::...}`) are left untouched.
pub fn expand(text: &str, host: &HostConfiguration, protocol: Option<&str>) -> String {
    if !text.contains("%{") && !text.contains("${") {
        return text.to_string();
    }

    let config = protocol.and_then(|p| host.protocol(p));
    let credentials = Credentials {
        hostname: &host.hostname,
        username: config.and_then(|c| c.username.as_deref()).unwrap_or_default(),
        password: config.and_then(|c| c.password.as_deref()).unwrap_or_default(),
        token: config.and_then(|c| c.auth_token.as_deref()).unwrap_or_default(),
    };

    MACRO_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let value = match credentials.value(&caps[2]) {
                Some(value) => value,
                None => return caps[0].to_string(),
            };
            match caps.get(1).and_then(|kind| EscapeKind::parse(kind.as_str())) {
                Some(kind) => kind.escape(&value),
                None => value,
            }
        })
        .into_owned()
}
