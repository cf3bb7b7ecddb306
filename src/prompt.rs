//! Flattens an OpenAI/Ollama chat body into the single prompt typed into the page.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ApiError;

pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const MAX_TOOLS: usize = 20;

pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个专业的代码助手，正在与编程智能体协作完成任务。请严格按照以下格式输出：\n\
\n\
【文件创建格式】\n\
需要创建文件时使用：\n\
<create_file>\n\
<file_path>文件路径</file_path>\n\
<file_content>\n\
文件内容\n\
</file_content>\n\
</create_file>\n\
\n\
【代码块格式】\n\
代码必须放在 ```语言 代码块中，多文件项目分别列出每个文件。\n\
\n\
【输出要求】\n\
- 直接输出最终答案，无需解释过程\n\
- 代码必须完整可执行，包含必要导入和错误处理\n\
- 文件路径使用相对路径，如 src/main.py\n\
- 不要输出占位符或伪代码\n";

const REPLY_CONSTRAINTS: &str = "【本次对话】输出=choices[0].message.content：只输出纯文本或代码，无标签与开场白、一次输出完整。\
禁止输出 ask_followup_question、tool_calls、Your question here 等；直接给出答案或代码。\
若有代码：必须用 ```语言\\n代码\\n```，多文件用 **文件名** 或 文件名: 后接代码块。";

const FUNCTION_CALL_PREAMBLE: &str = "【Function Call 已开启】你已启用工具调用能力。\
当需要调用工具时，必须仅输出如下格式的 JSON，不要外加 markdown 或说明：\
 {\"tool_calls\":[{\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"<工具名>\",\"arguments\":\"<JSON 字符串>\"}}]}。\
不需要调用工具时直接回复正常文本。\n\n";

const TOOL_LIST_HEADER: &str = "\n\n可用工具列表（调用时 function.name 必须从下列 name 中选择）：\n";
const TOOL_CALL_FORMAT: &str = "\n\n调用时严格按此 JSON 格式回复，arguments 为 JSON 字符串：\
{\"tool_calls\":[{\"id\":\"call_xxx\",\"type\":\"function\",\"function\":{\"name\":\"工具名\",\"arguments\":\"{\\\"key\\\":\\\"value\\\"}\"}}]}。";
const JSON_ONLY_INSTRUCTION: &str = "\n\n请仅输出合法 JSON，不要外加说明或 markdown 代码块包裹。";

/// Request body shared by `/v1/chat/completions` and `/api/chat`.
///
/// Optional fields accept `null` and wrong-typed values; flags follow JSON
/// truthiness and only array-valued tool lists are used.
#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<Value>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub stream: Option<Value>,
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub functions: Option<Value>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub enable_function_call: Option<Value>,
    #[serde(default)]
    pub response_format: Option<Value>,
}

impl ChatRequest {
    pub fn model_name(&self) -> String {
        self.model
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_MODEL)
            .to_string()
    }

    pub fn streaming(&self) -> bool {
        truthy(self.stream.as_ref())
    }

    fn messages(&self) -> &[ChatMessage] {
        self.messages.as_deref().unwrap_or_default()
    }

    fn function_call_enabled(&self) -> bool {
        if truthy(self.enable_function_call.as_ref()) {
            return true;
        }
        match &self.tool_choice {
            Some(Value::String(choice)) => {
                !matches!(choice.trim().to_ascii_lowercase().as_str(), "" | "none" | "null")
            }
            other => truthy(other.as_ref()),
        }
    }

    fn wants_json(&self) -> bool {
        self.response_format
            .as_ref()
            .and_then(|format| format.get("type"))
            .and_then(Value::as_str)
            .map(|kind| kind == "json_object" || kind == "json_schema")
            .unwrap_or(false)
    }

    /// `tools`, or `functions` when `tools` is empty; anything but an array
    /// yields no tools.
    fn tool_list(&self) -> &[Value] {
        [&self.tools, &self.functions]
            .into_iter()
            .flatten()
            .find(|list| truthy(Some(*list)))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Plain string content or an array of typed parts. Any other shape carries
/// no text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
    Other(Value),
}

impl MessageContent {
    /// The string itself, or the first `{"type":"text"}` part.
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text.as_str()),
            MessageContent::Parts(parts) => parts
                .iter()
                .find(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                .map(|part| part.get("text").and_then(Value::as_str).unwrap_or_default()),
            MessageContent::Other(_) => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ToolDescriptor<'a> {
    name: &'a str,
    description: &'a str,
    parameters: Option<&'a Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlattenedPrompt {
    pub prompt: String,
    pub model: String,
    pub want_json_only: bool,
    pub prompt_tokens: usize,
}

pub fn flatten(body: &ChatRequest) -> Result<FlattenedPrompt, ApiError> {
    if body.messages().is_empty() {
        return Err(ApiError::validation("messages is required"));
    }

    let mut system = None;
    let mut user = None;
    for message in body.messages() {
        let text = message
            .content
            .as_ref()
            .and_then(MessageContent::text)
            .map(str::trim);
        let role = message.role.as_deref().unwrap_or_default();
        match role.trim().to_ascii_lowercase().as_str() {
            "system" => {
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    system = Some(text);
                }
            }
            "user" => user = text,
            _ => {}
        }
    }
    let user = user
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ApiError::validation("No user message in messages"))?;

    let mut instruction = String::new();
    let function_call = body.function_call_enabled();
    if function_call {
        instruction.push_str(FUNCTION_CALL_PREAMBLE);
    }
    instruction.push_str(system.unwrap_or(DEFAULT_SYSTEM_PROMPT));

    if function_call {
        let tools = describe_tools(body.tool_list());
        if !tools.is_empty() {
            if let Ok(listing) = serde_json::to_string_pretty(&tools) {
                instruction.push_str(TOOL_LIST_HEADER);
                instruction.push_str(&listing);
                instruction.push_str(TOOL_CALL_FORMAT);
            }
        }
    }

    let want_json_only = body.wants_json();
    if want_json_only {
        instruction.push_str(JSON_ONLY_INSTRUCTION);
    }

    let prompt = format!("[约束]\n{REPLY_CONSTRAINTS}\n\n{instruction}\n\n[问题]\n{user}")
        .trim()
        .to_string();

    Ok(FlattenedPrompt {
        prompt,
        model: body.model_name(),
        want_json_only,
        prompt_tokens: prompt_tokens(body),
    })
}

fn describe_tools(tools: &[Value]) -> Vec<ToolDescriptor<'_>> {
    tools
        .iter()
        .take(MAX_TOOLS)
        .filter(|tool| tool.is_object())
        .filter_map(|tool| {
            let function = tool.get("function").unwrap_or(tool);
            let name = function
                .get("name")
                .or_else(|| tool.get("name"))
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())?;
            let description = function
                .get("description")
                .or_else(|| tool.get("description"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let parameters = function
                .get("parameters")
                .or_else(|| tool.get("parameters"));
            Some(ToolDescriptor {
                name,
                description,
                parameters,
            })
        })
        .collect()
}

/// Rough token estimate: two tokens per three characters, at least one for
/// non-empty text.
pub fn approx_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        0
    } else {
        (chars * 2 / 3).max(1)
    }
}

fn prompt_tokens(body: &ChatRequest) -> usize {
    body.messages()
        .iter()
        .filter_map(|message| message.content.as_ref().and_then(MessageContent::text))
        .map(approx_tokens)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> ChatRequest {
        serde_json::from_value(value).expect("valid chat request")
    }

    #[test]
    fn uses_last_system_and_user_messages() {
        let body = request(json!({
            "messages": [
                {"role": "system", "content": "first system"},
                {"role": "user", "content": "old question"},
                {"role": "assistant", "content": "old answer"},
                {"role": "system", "content": [{"type": "text", "text": "second system"}]},
                {"role": "user", "content": [{"type": "image_url"}, {"type": "text", "text": "  new question  "}]}
            ]
        }));
        let flat = flatten(&body).expect("flatten");
        assert!(flat.prompt.starts_with("[约束]\n"));
        assert!(flat.prompt.contains("second system\n\n[问题]\nnew question"));
        assert!(!flat.prompt.contains("first system"));
        assert!(flat.prompt.ends_with("new question"));
        assert_eq!(flat.model, DEFAULT_MODEL);
        assert!(!flat.want_json_only);
    }

    #[test]
    fn falls_back_to_default_system_prompt() {
        let body = request(json!({
            "model": "deepseek-reasoner",
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let flat = flatten(&body).expect("flatten");
        assert!(flat.prompt.contains(DEFAULT_SYSTEM_PROMPT.trim_end()));
        assert_eq!(flat.model, "deepseek-reasoner");
    }

    #[test]
    fn rejects_missing_messages_and_user() {
        let empty = request(json!({}));
        assert!(matches!(flatten(&empty), Err(ApiError::Validation(msg)) if msg == "messages is required"));

        let no_user = request(json!({"messages": [{"role": "system", "content": "x"}]}));
        assert!(matches!(flatten(&no_user), Err(ApiError::Validation(_))));

        let blank_user = request(json!({"messages": [{"role": "user", "content": "   "}]}));
        assert!(matches!(flatten(&blank_user), Err(ApiError::Validation(_))));
    }

    #[test]
    fn tools_only_listed_when_function_calling_requested() {
        let tools = json!([
            {"type": "function", "function": {"name": "read_file", "description": "Read", "parameters": {"type": "object"}}},
            {"name": "legacy_tool", "description": "old style"},
            {"function": {"description": "nameless"}}
        ]);

        let passive = request(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": tools.clone()
        }));
        let flat = flatten(&passive).expect("flatten");
        assert!(!flat.prompt.contains("read_file"));
        assert!(!flat.prompt.contains("Function Call"));

        let active = request(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": tools,
            "tool_choice": "auto"
        }));
        let flat = flatten(&active).expect("flatten");
        assert!(flat.prompt.contains("Function Call 已开启"));
        assert!(flat.prompt.contains("\"name\": \"read_file\""));
        assert!(flat.prompt.contains("\"name\": \"legacy_tool\""));
        assert!(!flat.prompt.contains("nameless"));
    }

    #[test]
    fn tool_choice_none_keeps_function_calling_off() {
        let body = request(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "functions": [{"name": "f"}],
            "tool_choice": "none"
        }));
        assert!(!flatten(&body).expect("flatten").prompt.contains("Function Call"));

        let forced = request(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "functions": [{"name": "f"}],
            "enable_function_call": true
        }));
        assert!(flatten(&forced).expect("flatten").prompt.contains("\"name\": \"f\""));
    }

    #[test]
    fn caps_tool_list() {
        let tools: Vec<Value> = (0..30)
            .map(|i| json!({"name": format!("tool_{i:02}")}))
            .collect();
        let body = request(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": tools,
            "enable_function_call": true
        }));
        let prompt = flatten(&body).expect("flatten").prompt;
        assert!(prompt.contains("tool_19"));
        assert!(!prompt.contains("tool_20"));
    }

    #[test]
    fn response_format_requests_json_only() {
        for kind in ["json_object", "json_schema"] {
            let body = request(json!({
                "messages": [{"role": "user", "content": "hi"}],
                "response_format": {"type": kind}
            }));
            let flat = flatten(&body).expect("flatten");
            assert!(flat.want_json_only);
            assert!(flat.prompt.contains("请仅输出合法 JSON"));
        }
    }

    #[test]
    fn token_estimate() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("a"), 1);
        assert_eq!(approx_tokens("abcdef"), 4);
        assert_eq!(approx_tokens("你好吗"), 2);

        let body = request(json!({
            "messages": [
                {"role": "system", "content": "abc"},
                {"role": "user", "content": [{"type": "text", "text": "abcdef"}]}
            ]
        }));
        assert_eq!(flatten(&body).expect("flatten").prompt_tokens, 6);
    }

    #[test]
    fn null_and_mistyped_optional_fields_are_tolerated() {
        let body = request(json!({
            "model": 42,
            "stream": null,
            "tools": {},
            "functions": "not a list",
            "tool_choice": null,
            "enable_function_call": null,
            "response_format": null,
            "messages": [
                {"role": null, "content": "ignored"},
                {"role": "system", "content": 123},
                {"role": "user", "content": "ping"}
            ]
        }));
        assert!(!body.streaming());
        let flat = flatten(&body).expect("flatten");
        assert_eq!(flat.model, DEFAULT_MODEL);
        assert!(flat.prompt.contains(DEFAULT_SYSTEM_PROMPT.trim_end()));
        assert!(flat.prompt.ends_with("ping"));
        assert!(!flat.prompt.contains("Function Call"));

        let null_messages = request(json!({"messages": null}));
        assert!(matches!(flatten(&null_messages), Err(ApiError::Validation(msg)) if msg == "messages is required"));
    }

    #[test]
    fn flags_follow_json_truthiness() {
        let body = request(json!({
            "stream": 1,
            "enable_function_call": "yes",
            "tools": [],
            "functions": [{"name": "f"}],
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert!(body.streaming());
        assert!(flatten(&body).expect("flatten").prompt.contains("\"name\": \"f\""));

        let off = request(json!({"stream": false, "enable_function_call": 0}));
        assert!(!off.streaming());
        assert!(!off.function_call_enabled());
    }
}
