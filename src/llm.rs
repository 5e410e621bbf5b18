//! Answer generation against the external LLM backend
//!
//! One fixed system instruction scopes the assistant to the supplied context;
//! the user turn embeds the query and the delimited context block. Output
//! length and temperature are pinned — they are cost and determinism
//! decisions, not caller-facing knobs.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{GatewayError, Result};
use crate::guard::sanitize_for_llm;

/// Fixed system instruction — company-scoped assistant persona
pub const SYSTEM_PROMPT: &str = r#"Sen "Gelişim Pazarlama ve Ticaret" şirketinin resmi AI asistanısın.
Görevin, sana sağlanan Veri tabanı (Context) içerisindeki verileri kullanarak kullanıcı sorularını yanıtlamaktır.

TALİMATLAR:
1. Sadece sana verilen "Context" içerisindeki bilgileri kullan ancak bilgiler içerisinden kullanıcının sorusuna cevap olabilecek kısımları kullan. Kendi genel bilgilerini veya tahminlerini ASLA cevaba katma.
2. Cevapların profesyonel, nazik ve öz olmalı (Maksimum 8-9 cümle).
3. Eğer "Context" içerisinde kullanıcının sorusuna dair bilgi yoksa, kibarca "Maalesef bu konuyla ilgili güncel verilere sahip değilim." şeklinde cevap ver ve eğer varsa linklerle kullanıcıyı sayfa içerisinde yönlendirmeye çalış. Asla bilgi uydurma.
4. Link Kullanımı: Eğer context içerisinde konuyla ilgili URL'ler varsa, cevabın en altında "Daha Detaylı bilgi için İlgili Bağlantılar:" başlığı aç ve linkleri madde işaretleri (bullet points) halinde ve ALT ALTA şu formatta listele:
   [Linkin Tanımı]: [URL]
   [Linkin Tanımı]: [URL]

   Örnek çıktı formatı:
   Ürün detay linki: https://ornek.com/urun
   İletişim sayfası: https://ornek.com/iletisim"#;

/// Output cap per response
const MAX_OUTPUT_TOKENS: u32 = 500;

/// Low temperature for factual responses
const TEMPERATURE: f32 = 0.3;

/// Per-request timeout for the bulk call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the LLM backend
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible backend
    pub base_url: String,
    /// Optional bearer credential
    pub api_key: Option<String>,
    /// Model name passed through to the backend
    pub model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for the external LLM backend
pub struct LlmService {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Llm(format!("client init failed: {e}")))?;

        Ok(Self { http, config })
    }

    fn build_request(&self, query: &str, context: &str, stream: bool) -> CompletionRequest {
        let user_turn = format!(
            "Soru (Query): {query}\n\n\
             Data Base (Context):\n{}\n\n\
             Yukarıdaki veritabanından gelen veriyi analiz et. \
             Eğer soruyla alakalıysa cevapla ve varsa ilgili \
             linkleri belirtilen formatta sona ekle.",
            sanitize_for_llm(context)
        );

        CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_turn,
                },
            ],
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
            stream,
        }
    }

    fn completions_builder(&self) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Generate a complete answer for the query over the supplied context.
    pub async fn generate(&self, query: &str, context: &str) -> Result<String> {
        let request = self.build_request(query, context, false);

        let response = self
            .completions_builder()
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Llm(format!("completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Llm(format!(
                "completion returned status {status}"
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Llm(format!("completion response unreadable: {e}")))?;

        if let Some(usage) = &parsed.usage {
            info!(tokens_used = usage.total_tokens, "LLM response generated");
        }

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::Llm("completion contained no choices".to_string()))
    }

    /// Generate an incremental answer: a finite, single-pass sequence of
    /// text fragments whose concatenation equals the bulk result for the
    /// same inputs.
    ///
    /// A failure after some fragments were produced surfaces as an `Err`
    /// item, distinct from a clean end of stream.
    pub fn generate_stream(
        &self,
        query: &str,
        context: &str,
    ) -> impl Stream<Item = Result<String>> + Send + 'static {
        let request = self.build_request(query, context, true);
        let builder = self.completions_builder().json(&request);

        async_stream::stream! {
            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(GatewayError::Llm(format!("stream request failed: {e}")));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                yield Err(GatewayError::Llm(format!("stream returned status {status}")));
                return;
            }

            let mut body = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            'receive: while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(GatewayError::Llm(format!("stream interrupted: {e}")));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                // Frames are newline-delimited `data:` lines; a line is only
                // decoded once its terminator has arrived.
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        break 'receive;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => {
                            let content = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content);
                            if let Some(token) = content {
                                if !token.is_empty() {
                                    yield Ok(token);
                                }
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "skipping unreadable stream frame");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> LlmService {
        LlmService::new(LlmConfig {
            base_url: "http://localhost:9".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_request_embeds_query_and_delimited_context() {
        let request = service().build_request("Pepsi ürünleri?", "passage text", false);

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.messages[0].content.contains("Gelişim Pazarlama"));

        let user = &request.messages[1];
        assert_eq!(user.role, "user");
        assert!(user.content.contains("Soru (Query): Pepsi ürünleri?"));
        assert!(user.content.contains("###\npassage text\n###"));
    }

    #[test]
    fn test_request_pins_sampling_parameters() {
        let bulk = service().build_request("q?", "ctx", false);
        assert_eq!(bulk.max_tokens, 500);
        assert!((bulk.temperature - 0.3).abs() < f32::EPSILON);
        assert!(!bulk.stream);

        let streaming = service().build_request("q?", "ctx", true);
        assert!(streaming.stream);
    }
}
