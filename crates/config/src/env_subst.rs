//! `${VAR}` placeholders in raw config text.
//!
//! A placeholder whose variable is unset expands to nothing, so an unset
//! `${PIPEDREAM_CLIENT_SECRET}` leaves the client unconfigured instead of
//! sending the placeholder itself as a credential. Unset names are reported
//! back to the caller for logging.

/// Config text after expansion.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Expanded {
    pub text: String,
    /// Variables referenced but unset, in order of first use.
    pub unresolved: Vec<String>,
}

/// Expand placeholders from the process environment.
pub fn expand(raw: &str) -> Expanded {
    expand_with(raw, |name| std::env::var(name).ok())
}

/// Expand placeholders using `lookup`. `${...}` whose content is not a valid
/// variable name, and a `${` with no closing brace, are kept verbatim.
pub fn expand_with(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> Expanded {
    let mut out = Expanded {
        text: String::with_capacity(raw.len()),
        unresolved: Vec::new(),
    };
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.text.push_str(&rest[..start]);
        let body = &rest[start + 2..];
        let Some(end) = body.find('}') else {
            out.text.push_str(&rest[start..]);
            return out;
        };

        let name = &body[..end];
        if is_var_name(name) {
            match lookup(name) {
                Some(value) => out.text.push_str(&value),
                None => {
                    if !out.unresolved.iter().any(|n| n == name) {
                        out.unresolved.push(name.to_string());
                    }
                },
            }
        } else {
            out.text.push_str(&rest[start..start + 2 + end + 1]);
        }
        rest = &body[end + 1..];
    }

    out.text.push_str(rest);
    out
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "PIPEDREAM_CLIENT_ID" => Some("cid-1".into()),
            "PORT" => Some("4000".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_set_variables() {
        let out = expand_with("client_id = \"${PIPEDREAM_CLIENT_ID}\"\nport = ${PORT}\n", env);
        assert_eq!(out.text, "client_id = \"cid-1\"\nport = 4000\n");
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn unset_secret_expands_empty_and_is_reported() {
        let out = expand_with(
            "secret = \"${PIPEDREAM_CLIENT_SECRET}\"\nagain = \"${PIPEDREAM_CLIENT_SECRET}\"",
            env,
        );
        assert_eq!(out.text, "secret = \"\"\nagain = \"\"");
        assert_eq!(out.unresolved, vec!["PIPEDREAM_CLIENT_SECRET".to_string()]);
    }

    #[test]
    fn non_placeholders_are_kept() {
        let out = expand_with("a = \"${not a var}\" b = \"cost: $5\" c = \"${OPEN", env);
        assert_eq!(out.text, "a = \"${not a var}\" b = \"cost: $5\" c = \"${OPEN");
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(expand("plain text").text, "plain text");
    }
}
