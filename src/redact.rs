//! Masking of sensitive values in log output.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

struct Mask {
    pattern: Regex,
    replacement: &'static str,
}

static MASKS: LazyLock<Vec<Mask>> = LazyLock::new(|| {
    [
        // Estonian personal ID code
        (r"\b[3-6]\d{10}\b", "[REDACTED_ID_CODE]"),
        (r"(?is)<idCode>.*?</idCode>", "<idCode>[REDACTED]</idCode>"),
        (r"(?is)<personalCode>.*?</personalCode>", "<personalCode>[REDACTED]</personalCode>"),
        (r#"(?i)"idCode"\s*:\s*"[^"]*""#, r#""idCode":"[REDACTED]""#),
        (r#"(?i)"personalCode"\s*:\s*"[^"]*""#, r#""personalCode":"[REDACTED]""#),
        (r"(?i)password=\S+", "password=[REDACTED]"),
        (r#"(?i)"password"\s*:\s*"[^"]*""#, r#""password":"[REDACTED]""#),
        (r"(?i)apiKey=\S+", "apiKey=[REDACTED]"),
        (r#"(?i)"apiKey"\s*:\s*"[^"]*""#, r#""apiKey":"[REDACTED]""#),
        (r"(?i)Authorization:\s*Bearer\s+\S+", "Authorization: Bearer [REDACTED]"),
        (r"(?i)Authorization:\s*Basic\s+\S+", "Authorization: Basic [REDACTED]"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| Mask {
        pattern: Regex::new(pattern).expect("static redaction pattern"),
        replacement,
    })
    .collect()
});

/// Apply every mask to `message`. Borrows when nothing matched.
pub fn redact(message: &str) -> Cow<'_, str> {
    let mut result = Cow::Borrowed(message);
    for mask in MASKS.iter() {
        let replaced = match mask.pattern.replace_all(&result, mask.replacement) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        if let Some(replaced) = replaced {
            result = Cow::Owned(replaced);
        }
    }
    result
}
