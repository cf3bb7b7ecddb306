//! Turns raw scraped reply text into API content.
//!
//! Every step is infallible: a step that does not apply leaves the text as it
//! was. The cleanup steps run to a fixpoint so that normalizing an already
//! normalized reply changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Sent instead of an empty reply so agent clients never see a blank message.
pub const EMPTY_REPLY_PLACEHOLDER: &str =
    "请直接描述你需要的代码或问题，我将直接给出代码或答案，无需额外确认。";

const FENCE: &str = "```";

const PROTOCOL_TAGS: &[&str] = &["[系统指令]", "[用户输入]", "[约束]", "[问题]"];
const FILE_TAGS: &[&str] = &["<create_file>", "<file_path>", "<file_content>"];
const UI_CHROME_LINES: &[&str] = &["复制", "联网搜索", "互联网搜索", "下载", "Copy", "Download"];
const SIGN_OFFS: &[&str] = &[
    "希望可以帮到你。",
    "希望可以帮到你",
    "如有疑问欢迎继续提问。",
    "如有疑问欢迎继续问。",
    "Hope this helps!",
    "Hope this helps.",
];

static FILE_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?mi)^([a-z0-9_.\-]+\.(?:py|js|ts|java|cpp|go|rs))\s*[)：:]?\s*\n\s*(python|javascript|typescript|java|cpp|go|rust)\s*\n",
    )
    .expect("file heading regex")
});
static OPENING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:好的|收到|明白了?|sure|certainly|of course)(?:[，,。!！]|[ \t]*\n)\s*")
        .expect("opening regex")
});
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:your\s*question\s*here|aline\s*有一个问题)[:：\s]*$")
        .expect("placeholder regex")
});
static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+\-]*\s*(.*?)\s*```").expect("fenced block regex")
});
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank run regex"));

/// Normalize a scraped reply. With `want_json_only`, a parseable JSON value
/// found in the reply is returned in compact form instead of the prose.
pub fn normalize(raw: &str, want_json_only: bool) -> String {
    let trimmed = raw.trim();
    if FILE_TAGS.iter().any(|tag| trimmed.contains(tag)) {
        return trimmed.to_string();
    }

    // Run to a fixpoint; the input length caps the pass count.
    let mut text = trimmed.to_string();
    for _ in 0..=trimmed.len() {
        let next = clean_pass(&text);
        if next == text {
            break;
        }
        text = next;
    }

    if want_json_only {
        if let Some(json) = extract_json(&text) {
            return json;
        }
    }
    text
}

fn clean_pass(text: &str) -> String {
    let text = strip_protocol_tags(text);
    let text = drop_agent_preamble(&text);
    let text = drop_ui_chrome(&text);
    let text = FILE_HEADING
        .replace_all(&text, "**${1}**\n```${2}\n")
        .into_owned();
    let text = close_fences(&text);
    let text = trim_templated(&text);
    let text = if PLACEHOLDER.is_match(text.trim()) {
        String::new()
    } else {
        text
    };
    tidy_whitespace(&text)
}

fn strip_protocol_tags(text: &str) -> String {
    let mut out = text.to_string();
    for tag in PROTOCOL_TAGS {
        out = out.replace(tag, "");
    }
    out.trim().to_string()
}

/// An agent's system prompt echoed back by the page: drop it up to `<task>`.
fn drop_agent_preamble(text: &str) -> String {
    if !(text.contains("You are Cline") && text.contains("GLOBAL RULES")) || text.contains(FENCE) {
        return text.to_string();
    }
    let mut skipping = false;
    let mut kept = Vec::new();
    for line in text.lines() {
        if line.contains("You are Cline") {
            skipping = true;
            continue;
        }
        if line.contains("<task>") {
            skipping = false;
        }
        if !skipping {
            kept.push(line);
        }
    }
    kept.join("\n").trim().to_string()
}

fn drop_ui_chrome(text: &str) -> String {
    text.lines()
        .filter(|line| !UI_CHROME_LINES.contains(&line.trim()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn close_fences(text: &str) -> String {
    if text.matches(FENCE).count() % 2 == 1 {
        format!("{}\n{FENCE}", text.trim_end())
    } else {
        text.to_string()
    }
}

fn trim_templated(text: &str) -> String {
    let mut out = text;
    while let Some(found) = OPENING.find(out) {
        out = out[found.end()..].trim_start();
    }

    let mut lines: Vec<&str> = out.lines().collect();
    while lines
        .last()
        .map(|line| SIGN_OFFS.contains(&line.trim()))
        .unwrap_or(false)
    {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

fn tidy_whitespace(text: &str) -> String {
    let joined = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_RUN.replace_all(&joined, "\n\n").trim().to_string()
}

/// Whole text, then the first fenced block, then the first balanced `{...}`.
fn extract_json(text: &str) -> Option<String> {
    let fenced = FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());
    [Some(text), fenced, balanced_object(text)]
        .into_iter()
        .flatten()
        .find_map(|candidate| serde_json::from_str::<Value>(candidate.trim()).ok())
        .and_then(|value| serde_json::to_string(&value).ok())
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unterminated_fence_gets_closed() {
        let out = normalize("```python\nprint(1)", false);
        assert_eq!(out, "```python\nprint(1)\n```");
    }

    #[test]
    fn repeated_opening_and_chrome_pairs_reach_a_fixpoint() {
        let raw = "好的，复制\n收到，复制\n明白，复制\n好的，复制\n收到，复制\n答案";
        let once = normalize(raw, false);
        assert_eq!(once, "答案");
        assert_eq!(normalize(&once, false), once);
    }

    #[test]
    fn balanced_fences_are_left_alone() {
        let raw = "Run this:\n```sh\nls\n```";
        assert_eq!(normalize(raw, false), raw);
    }

    #[test]
    fn strips_protocol_tags_and_page_chrome() {
        let raw = "[问题]\n复制\nThe answer is 4.\n下载\n  Copy  ";
        assert_eq!(normalize(raw, false), "The answer is 4.");
    }

    #[test]
    fn trims_templated_opening_and_sign_off() {
        let raw = "好的，收到，这是答案。\n第二行\n希望可以帮到你。";
        assert_eq!(normalize(raw, false), "这是答案。\n第二行");
        assert_eq!(normalize("Sure, here it is.", false), "here it is.");
        assert_eq!(normalize("Surely not", false), "Surely not");
    }

    #[test]
    fn file_creation_markup_passes_through() {
        let raw = "  <create_file>\n<file_path>a.py</file_path>\n复制\n</create_file>\n";
        assert_eq!(
            normalize(raw, false),
            "<create_file>\n<file_path>a.py</file_path>\n复制\n</create_file>"
        );
    }

    #[test]
    fn bare_placeholder_becomes_empty() {
        assert_eq!(normalize("Your question here:", false), "");
        assert_eq!(normalize("好的，Your question here", false), "");
    }

    #[test]
    fn file_heading_becomes_bold_name_and_fence() {
        let raw = "main.py:\npython\nprint(1)\n```";
        assert_eq!(normalize(raw, false), "**main.py**\n```python\nprint(1)\n```");
    }

    #[test]
    fn leaked_agent_preamble_is_dropped() {
        let raw = "You are Cline, a skilled engineer.\n====\nGLOBAL RULES\n- be brief\n<task>\nwrite hello\n</task>";
        assert_eq!(normalize(raw, false), "<task>\nwrite hello\n</task>");
    }

    #[test]
    fn collapses_blank_runs_and_trailing_spaces() {
        assert_eq!(normalize("a  \n\n\n\n  \nb\t", false), "a\n\nb");
    }

    #[test]
    fn json_mode_prefers_fenced_block() {
        let raw = "Here you go:\n```json\n{\"a\": \"x\", \"b\": [1, 2]}\n```\nDone.";
        assert_eq!(normalize(raw, true), r#"{"a":"x","b":[1,2]}"#);
    }

    #[test]
    fn json_mode_finds_balanced_object_with_braces_in_strings() {
        let raw = "结果是 {\"k\": \"a}b\", \"n\": {\"m\": 1}} 完成";
        assert_eq!(normalize(raw, true), r#"{"k":"a}b","n":{"m":1}}"#);
    }

    #[test]
    fn json_mode_falls_back_to_text_when_unparseable() {
        assert_eq!(normalize("{not json}", true), "{not json}");
        assert_eq!(normalize("plain words", true), "plain words");
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let inputs = [
            "```python\nprint(1)",
            "好的，\n\n\n\n```rust\nfn main() {}\n",
            "收到，好的，内容\n复制\n如有疑问欢迎继续提问。",
            "[约束]text [问题]\n\n\n\nmore   ",
            "Sure, the config is ```json\n{\"a\": 1}\n``` ok",
            "prefix {\"x\": [1, {\"y\": \"}\"}]} suffix",
            "好的，复制\nrest",
            "[[约束]约束] leftover",
            "main.rs\nrust\nfn main() {}",
            "",
            "   ",
        ];
        for input in inputs {
            for want_json in [false, true] {
                let once = normalize(input, want_json);
                let twice = normalize(&once, want_json);
                assert_eq!(once, twice, "input {input:?} want_json={want_json}");
            }
        }
    }
}
