//! Page helper script embedding.
//!
//! The helper lives in its own `.js` file so editors can highlight it, and is
//! bundled as a string at compile time. Once evaluated it exposes
//! `window.__visionKey`, which the browser adapter calls into.

/// Embedded contents of `scripts/quiz_surface.js`.
pub const QUIZ_SURFACE_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/quiz_surface.js"
));

/// Global the helper installs itself under.
pub const QUIZ_SURFACE_GLOBAL: &str = "window.__visionKey";

pub fn quiz_surface_script() -> &'static str {
    QUIZ_SURFACE_SCRIPT
}

/// Expression calling `method` on the helper with JSON-encoded arguments.
pub fn helper_call(method: &str, args: &[serde_json::Value]) -> Result<String, serde_json::Error> {
    let encoded = args
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!(
        "{QUIZ_SURFACE_GLOBAL}.{method}({})",
        encoded.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_script_is_non_empty() {
        assert!(!QUIZ_SURFACE_SCRIPT.trim().is_empty());
    }

    #[test]
    fn embedded_script_installs_helper() {
        assert!(QUIZ_SURFACE_SCRIPT.contains("window.__visionKey = {"));
        for method in ["options", "isMultiSelect", "setValue", "emitChange", "notify"] {
            assert!(
                QUIZ_SURFACE_SCRIPT.contains(&format!("{method}(")),
                "helper should expose {method}"
            );
        }
    }

    #[test]
    fn helper_call_escapes_arguments() {
        let call = helper_call("setValue", &[json!("text"), json!(0), json!("say \"hi\"")]).unwrap();
        assert_eq!(
            call,
            r#"window.__visionKey.setValue("text", 0, "say \"hi\"")"#
        );
        assert_eq!(
            helper_call("hostname", &[]).unwrap(),
            "window.__visionKey.hostname()"
        );
    }
}
