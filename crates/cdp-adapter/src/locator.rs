use serde::{Deserialize, Serialize};

/// An ordered list of CSS selectors tried in turn; the first visible match wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorStrategy {
    pub name: String,
    pub selectors: Vec<String>,
}

impl LocatorStrategy {
    pub fn new<I, S>(name: impl Into<String>, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            selectors: selectors.into_iter().map(Into::into).collect(),
        }
    }

    /// Chat input boxes, most specific first.
    pub fn default_input() -> Self {
        Self::new(
            "input",
            [
                r#"textarea[placeholder*="DeepSeek"]"#,
                r#"textarea[placeholder*="发送消息"]"#,
                r#"textarea[placeholder*="输入"]"#,
                r#"textarea[placeholder*="message"]"#,
                r#"textarea[placeholder*="说点什么"]"#,
                "textarea",
                r#"input[type="text"]"#,
                r#"[contenteditable="true"]"#,
                r#"[role="textbox"]"#,
                ".ProseMirror",
            ],
        )
    }

    /// Nodes that wrap one whole assistant message.
    pub fn default_reply_roots() -> Self {
        Self::new(
            "reply-root",
            [
                r#"[data-message-type="assistant"]"#,
                r#"[class*="assistant"][class*="message"]"#,
                r#"[class*="message"][class*="assistant"]"#,
                r#"[role="article"][class*="assistant"]"#,
                r#"article[class*="assistant"]"#,
                r#"div[class*="assistant"][class*="message"]"#,
            ],
        )
    }

    /// Looser matches used when no message root is present.
    pub fn default_reply_fallback() -> Self {
        Self::new(
            "reply-fallback",
            [
                r#"[class*="message"]"#,
                r#"[class*="Message"]"#,
                r#"[class*="assistant"]"#,
                r#"[class*="markdown"]"#,
                r#"[class*="content"]"#,
                r#"[class*="prose"]"#,
                "article",
                r#"[role="article"]"#,
                r#"[class*="reply"]"#,
                "pre",
                "code",
            ],
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.selectors.is_empty() {
            return Err(format!("locator '{}' has no selectors", self.name));
        }
        if self.selectors.iter().any(|sel| sel.trim().is_empty()) {
            return Err(format!("locator '{}' contains an empty selector", self.name));
        }
        Ok(())
    }

    /// The selectors as a JavaScript array literal.
    pub fn to_js_array(&self) -> String {
        serde_json::to_string(&self.selectors).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        for strategy in [
            LocatorStrategy::default_input(),
            LocatorStrategy::default_reply_roots(),
            LocatorStrategy::default_reply_fallback(),
        ] {
            assert!(strategy.validate().is_ok(), "{}", strategy.name);
        }
    }

    #[test]
    fn rejects_empty_lists_and_blank_selectors() {
        assert!(LocatorStrategy::new("x", Vec::<String>::new())
            .validate()
            .is_err());
        assert!(LocatorStrategy::new("x", ["textarea", "  "])
            .validate()
            .is_err());
    }

    #[test]
    fn js_array_escapes_quotes() {
        let strategy = LocatorStrategy::new("x", [r#"textarea[placeholder*="a'b"]"#]);
        assert_eq!(strategy.to_js_array(), r#"["textarea[placeholder*=\"a'b\"]"]"#);
    }
}
