//! HTML pages for the OAuth redirect leg. Both notify `window.opener` when
//! the flow ran in a popup, then close the window.

pub const AUTH_SUCCESS_MESSAGE: &str = "PIPEDREAM_AUTH_SUCCESS";
pub const AUTH_ERROR_MESSAGE: &str = "PIPEDREAM_AUTH_ERROR";

pub fn success_page() -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
  <head><title>Pipedream Authorization Complete</title></head>
  <body>
    <h2>Authorization Successful</h2>
    <p>You can now close this window.</p>
    <script>
      if (window.opener) {{
        window.opener.postMessage({{ type: '{AUTH_SUCCESS_MESSAGE}', data: {{ success: true }} }}, '*');
        window.close();
      }}
      setTimeout(() => window.close(), 3000);
    </script>
  </body>
</html>
"#
    )
}

pub fn failure_page(error: &str) -> String {
    let html = escape_html(error);
    let js = escape_js(error);
    format!(
        r#"<!DOCTYPE html>
<html>
  <head><title>Pipedream Authorization Error</title></head>
  <body>
    <h2>Authorization Failed</h2>
    <p>Error: {html}</p>
    <p>Please close this window and try again.</p>
    <script>
      if (window.opener) {{
        window.opener.postMessage({{ type: '{AUTH_ERROR_MESSAGE}', data: {{ error: '{js}' }} }}, '*');
        window.close();
      }}
    </script>
  </body>
</html>
"#
    )
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape for a single-quoted JS string inside a `<script>` element.
fn escape_js(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\x3c"),
            '>' => out.push_str("\\x3e"),
            '&' => out.push_str("\\x26"),
            c => out.push(c),
        }
    }
    out
}
