//! Google Gemini client (generateContent with function calling, and embeddings).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ChatMessage, ContentBlock, LlmClient, LlmError, Role, ToolCall, ToolSchema};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const SERVICE: &str = "gemini";

/// HTTP client for the Gemini REST API.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string(), timeout)
    }

    pub fn with_base_url(api_key: String, base_url: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// `{base}/models/{model}:{method}`; accepts `models/x` or bare `x`.
    pub(crate) fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    /// POST a JSON body and return the parsed JSON response.
    pub(crate) async fn post_json(&self, url: &str, body: &Value) -> Result<Value, LlmError> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| self.map_transport(e))
    }

    fn map_transport(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                service: SERVICE,
                elapsed: self.timeout,
            }
        } else {
            LlmError::Http(e)
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
    ) -> Result<ChatMessage, LlmError> {
        let body = build_request_body(messages, tools);
        let url = self.model_url(model, "generateContent");

        tracing::debug!(
            model,
            messages = messages.len(),
            tools = tools.map(|t| t.len()).unwrap_or(0),
            "Calling Gemini generateContent"
        );

        let response = match self.post_json(&url, &body).await {
            Err(LlmError::Api { status: 400, body: error, .. })
                if error.contains("thought_signature") || error.contains("thoughtSignature") =>
            {
                let (retry_body, dropped) = strip_unsigned_function_calls(&body);
                if dropped == 0 {
                    return Err(LlmError::Api {
                        service: SERVICE,
                        status: 400,
                        body: error,
                    });
                }
                tracing::warn!(dropped, "Retrying without unsigned function calls");
                self.post_json(&url, &retry_body).await?
            }
            other => other?,
        };
        parse_response(&response)
    }
}

/// Remove replayed `functionCall` parts that carry no thought signature,
/// together with their `functionResponse` parts. Contents left empty are
/// dropped. Returns the new body and the number of calls removed.
fn strip_unsigned_function_calls(body: &Value) -> (Value, usize) {
    let mut body = body.clone();
    let mut dropped_ids: Vec<Value> = Vec::new();

    if let Some(contents) = body.get_mut("contents").and_then(Value::as_array_mut) {
        for content in contents.iter_mut() {
            let Some(parts) = content.get_mut("parts").and_then(Value::as_array_mut) else {
                continue;
            };
            parts.retain(|part| {
                if let Some(call) = part.get("functionCall") {
                    let signed = part.get("thoughtSignature").is_some()
                        || part.get("thought_signature").is_some();
                    if !signed {
                        dropped_ids.push(call.get("id").cloned().unwrap_or(Value::Null));
                        return false;
                    }
                }
                match part.get("functionResponse") {
                    Some(response) => {
                        let id = response.get("id").cloned().unwrap_or(Value::Null);
                        !dropped_ids.contains(&id)
                    }
                    None => true,
                }
            });
        }
        contents.retain(|c| {
            c.get("parts")
                .and_then(Value::as_array)
                .is_some_and(|p| !p.is_empty())
        });
    }

    let dropped = dropped_ids.len();
    (body, dropped)
}

/// Convert the conversation into a Gemini `generateContent` request body.
///
/// Consecutive tool messages are folded into one content entry so the number
/// of function responses matches the preceding turn's function calls.
pub(crate) fn build_request_body(messages: &[ChatMessage], tools: Option<&[ToolSchema]>) -> Value {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    let mut pending_responses: Vec<Value> = Vec::new();

    for msg in messages {
        if msg.role != Role::Tool && !pending_responses.is_empty() {
            contents.push(json!({ "role": "user", "parts": std::mem::take(&mut pending_responses) }));
        }

        match msg.role {
            Role::System => {
                let text = msg.text();
                if !text.is_empty() {
                    system_parts.push(json!({ "text": text }));
                }
            }
            Role::User => {
                let parts = content_parts(&msg.content);
                if !parts.is_empty() {
                    contents.push(json!({ "role": "user", "parts": parts }));
                }
            }
            Role::Assistant => {
                let mut parts = content_parts(&msg.content);
                parts.extend(msg.tool_calls.iter().map(function_call_part));
                if !parts.is_empty() {
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
            Role::Tool => {
                let mut response = json!({
                    "name": msg.name.clone().unwrap_or_default(),
                    "response": { "result": msg.text() }
                });
                if let Some(id) = &msg.tool_call_id {
                    response["id"] = json!(id);
                }
                pending_responses.push(json!({ "functionResponse": response }));
            }
        }
    }
    if !pending_responses.is_empty() {
        contents.push(json!({ "role": "user", "parts": pending_responses }));
    }

    let mut body = json!({ "contents": contents });

    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({ "parts": system_parts });
    }

    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
        body["toolConfig"] = json!({ "functionCallingConfig": { "mode": "AUTO" } });
    }

    body
}

/// Replay a call as it was received: the id and arguments inside
/// `functionCall`, provider siblings such as `thoughtSignature` next to it.
/// Thinking models reject replayed calls whose signature is missing.
fn function_call_part(call: &ToolCall) -> Value {
    let mut part = call.extra.clone();
    part.insert(
        "functionCall".to_string(),
        json!({ "id": call.id, "name": call.name, "args": call.arguments }),
    );
    Value::Object(part)
}

fn content_parts(blocks: &[ContentBlock]) -> Vec<Value> {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if !text.is_empty() => Some(json!({ "text": text })),
            ContentBlock::Text { .. } | ContentBlock::Thought { .. } => None,
            ContentBlock::Other { data } => Some(data.clone()),
        })
        .collect()
}

/// Parse the first candidate of a `generateContent` response into an assistant message.
pub(crate) fn parse_response(response: &Value) -> Result<ChatMessage, LlmError> {
    let candidate = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| {
            let reason = response
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .map(|r| format!("prompt blocked: {}", r))
                .unwrap_or_else(|| "no candidates".to_string());
            LlmError::invalid_response(SERVICE, reason)
        })?;

    let parts = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut content = Vec::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| LlmError::invalid_response(SERVICE, "functionCall without name"))?;
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let arguments = match call.get("args") {
                Some(Value::Null) | None => json!({}),
                Some(args) => args.clone(),
            };
            let mut tool_call = ToolCall::new(id, name, arguments);
            if let Value::Object(fields) = &part {
                tool_call.extra = fields
                    .iter()
                    .filter(|(key, _)| key.as_str() != "functionCall")
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
            }
            tool_calls.push(tool_call);
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                content.push(ContentBlock::Thought {
                    text: text.to_string(),
                });
            } else {
                content.push(ContentBlock::text(text));
            }
        } else {
            content.push(ContentBlock::Other { data: part });
        }
    }

    if content.is_empty() && tool_calls.is_empty() {
        let finish = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::warn!(finish_reason = finish, "Gemini returned an empty candidate");
    }

    Ok(ChatMessage::assistant_with_tools(content, tool_calls))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.to_string(),
            description: "d".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    #[test]
    fn system_prompt_goes_to_system_instruction() {
        let body = build_request_body(
            &[ChatMessage::system("rules"), ChatMessage::user("คำถาม")],
            None,
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tool_results_are_folded_into_one_turn() {
        let call_a = ToolCall::new("a", "query_rag", json!({"query_text": "x"}));
        let call_b = ToolCall::new("b", "check_budget_discipline_s20", json!({}));
        let messages = vec![
            ChatMessage::user("q"),
            ChatMessage::assistant_with_tools(vec![], vec![call_a, call_b]),
            ChatMessage::tool_result("a", "query_rag", "ctx"),
            ChatMessage::tool_result("b", "check_budget_discipline_s20", "{}"),
        ];
        let body = build_request_body(&messages, Some(&[schema("query_rag")]));
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"].as_array().unwrap().len(), 2);
        let responses = contents[2]["parts"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["functionResponse"]["name"], "query_rag");
        assert_eq!(responses[0]["functionResponse"]["response"]["result"], "ctx");
        assert_eq!(responses[1]["functionResponse"]["id"], "b");
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "query_rag"
        );
    }

    #[test]
    fn empty_tool_list_binds_nothing() {
        let body = build_request_body(&[ChatMessage::user("q")], Some(&[]));
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn parses_text_thought_and_function_call_parts() {
        let response = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": "ขอค้นหาก่อน"},
                        {"functionCall": {"name": "query_rag", "args": {"query_text": "งบลงทุน"}}}
                    ]
                },
                "finishReason": "STOP"
            }]
        });
        let msg = parse_response(&response).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.text(), "ขอค้นหาก่อน");
        assert_eq!(msg.content.len(), 2);
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name, "query_rag");
        assert_eq!(msg.tool_calls[0].arguments["query_text"], "งบลงทุน");
        assert!(!msg.tool_calls[0].id.is_empty());
    }

    #[test]
    fn thought_signature_and_call_id_survive_a_round_trip() {
        let response = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "functionCall": {"id": "fc-1", "name": "query_rag", "args": {"query_text": "x"}},
                        "thoughtSignature": "c2lnbmF0dXJl"
                    }]
                }
            }]
        });
        let reply = parse_response(&response).unwrap();
        assert_eq!(reply.tool_calls[0].id, "fc-1");
        assert_eq!(reply.tool_calls[0].extra["thoughtSignature"], "c2lnbmF0dXJl");

        let messages = vec![
            ChatMessage::user("q"),
            reply,
            ChatMessage::tool_result("fc-1", "query_rag", "ctx"),
        ];
        let body = build_request_body(&messages, None);
        let replayed = &body["contents"][1]["parts"][0];
        assert_eq!(replayed["thoughtSignature"], "c2lnbmF0dXJl");
        assert_eq!(replayed["functionCall"]["id"], "fc-1");
        assert_eq!(replayed["functionCall"]["name"], "query_rag");
        assert_eq!(replayed["functionCall"]["args"]["query_text"], "x");
        assert_eq!(body["contents"][2]["parts"][0]["functionResponse"]["id"], "fc-1");
    }

    #[test]
    fn unsigned_calls_and_their_responses_are_stripped() {
        let mut signed = ToolCall::new("s", "query_rag", json!({}));
        signed.extra.insert("thoughtSignature".into(), json!("sig"));
        let messages = vec![
            ChatMessage::user("q"),
            ChatMessage::assistant_with_tools(vec![], vec![ToolCall::new("u", "query_rag", json!({}))]),
            ChatMessage::tool_result("u", "query_rag", "old"),
            ChatMessage::assistant_with_tools(vec![], vec![signed]),
            ChatMessage::tool_result("s", "query_rag", "new"),
        ];
        let (body, dropped) = strip_unsigned_function_calls(&build_request_body(&messages, None));

        assert_eq!(dropped, 1);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["parts"][0]["functionCall"]["id"], "s");
        assert_eq!(contents[2]["parts"][0]["functionResponse"]["id"], "s");
    }

    #[test]
    fn missing_args_become_empty_object() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"functionCall": {"name": "t", "id": "c1"}}]}}]
        });
        let msg = parse_response(&response).unwrap();
        assert_eq!(msg.tool_calls[0].id, "c1");
        assert_eq!(msg.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn blocked_prompt_is_an_invalid_response() {
        let response = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = parse_response(&response).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn model_url_accepts_prefixed_names() {
        let client = GeminiClient::new("k".into(), Duration::from_secs(1));
        assert_eq!(
            client.model_url("models/gemini-embedding-001", "embedContent"),
            format!("{}/models/gemini-embedding-001:embedContent", DEFAULT_BASE_URL)
        );
    }
}
