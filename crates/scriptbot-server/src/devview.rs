//! Password-gated page showing a user's stored document.

use scriptbot_contracts::{ListField, UserRecord};
use serde::Deserialize;

use crate::messenger::AuthError;

pub const LOGIN_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>scriptbot dev view</title></head>
<body>
<form method="post" action="/dev">
<p><label>PSID <input type="text" name="psid"></label></p>
<p><label>Password <input type="password" name="password"></label></p>
<p><button type="submit">Show record</button></p>
</form>
</body>
</html>
"#;

#[derive(Debug, Deserialize)]
pub struct DevLogin {
    #[serde(default)]
    pub psid: String,
    #[serde(default)]
    pub password: String,
}

/// Plain equality against the configured password. No password configured
/// means every attempt is refused.
pub fn check_password(configured: Option<&str>, given: &str) -> Result<(), AuthError> {
    match configured {
        Some(expected) if !expected.is_empty() && expected == given => Ok(()),
        _ => Err(AuthError::PasswordMismatch),
    }
}

pub fn render_record(record: &UserRecord) -> String {
    let mut body = String::new();
    body.push_str(&field("PSID", &record.user_id));
    body.push_str(&field("Status", &record.status));
    body.push_str(&field("Name", record.name.as_deref().unwrap_or("")));
    for list in ListField::ALL {
        body.push_str(&field(list.as_str(), &record.list(list).len().to_string()));
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>scriptbot dev view</title></head>\n<body>\n{body}</body>\n</html>\n"
    )
}

fn field(label: &str, value: &str) -> String {
    format!(
        "<p>{}:</p><p>{}</p>\n",
        html_escape(label),
        html_escape(value)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
