//! services/api/src/adapters/translation_llm.rs
//!
//! This module contains the adapter for the translation LLM.
//! It implements the `TranslationService` port from the `core` crate with a
//! single schema-constrained chat completion per request.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
        ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use bridge_core::ports::{
    GenerationInput, GenerationRequest, PortError, PortResult, RawTranslation, TranslationService,
};
use serde_json::json;
use tracing::info;

//=========================================================================================
// Prompt and Schema
//=========================================================================================

pub const TRANSLATION_SYSTEM_PROMPT: &str = "You are a domain-aware translator specialized in official documents for immigrant families.

Your task is to:
1. Detect the source language
2. Translate the document into the requested target language, preserving structure in HTML
3. Create a plain-language summary with key actions, dates, and costs

Guidelines:
- Preserve document structure using semantic HTML (h1-h6, ul, ol, table, p)
- Keep dates, amounts, names, and addresses EXACTLY as written
- Expand acronyms on first mention (e.g., \"IEP (Individualized Education Program)\")
- Use plain language in summaries - avoid jargon
- For school docs: highlight enrollment, meetings, permissions
- For healthcare: highlight appointments, insurance, medications
- For legal: highlight deadlines, rights, obligations
- For government: highlight applications, requirements, benefits

Output format: Return ONLY valid JSON matching the schema.";

const SCHEMA_NAME: &str = "BridgeTranslation";
const TEMPERATURE: f32 = 0.3;
const MAX_COMPLETION_TOKENS: u32 = 4000;

/// The strict JSON schema every response must satisfy.
pub fn translation_schema() -> serde_json::Value {
    let string_list = |description: &str| {
        json!({ "type": "array", "items": { "type": "string" }, "description": description })
    };
    json!({
        "type": "object",
        "properties": {
            "translation_html": {
                "type": "string",
                "description": "The translated document content in HTML format, preserving structure (headings, lists, tables)"
            },
            "summary": {
                "type": "object",
                "properties": {
                    "purpose": {
                        "type": "string",
                        "description": "The main purpose of the document in plain language"
                    },
                    "actions": string_list("List of actions the recipient needs to take"),
                    "due_dates": string_list("Important dates and deadlines mentioned"),
                    "costs": string_list("Any costs, fees, or financial obligations")
                },
                "required": ["purpose", "actions", "due_dates", "costs"],
                "additionalProperties": false
            },
            "detected_language": {
                "type": "string",
                "description": "ISO 639-1 language code of the source document (e.g., \"vi\", \"es\", \"zh\")"
            }
        },
        "required": ["translation_html", "summary", "detected_language"],
        "additionalProperties": false
    })
}

/// The instruction line shared by text and image requests.
pub fn user_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!("Target language: {}", request.target_language);
    if let Some(domain) = request.domain {
        prompt.push_str(&format!("\nDocument domain: {domain}"));
    }
    prompt.push_str("\n\nPlease translate this document and provide a summary.");
    prompt
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `TranslationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiTranslationAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

fn unexpected(e: OpenAIError) -> PortError {
    PortError::Unexpected(e.to_string())
}

impl OpenAiTranslationAdapter {
    /// Creates a new `OpenAiTranslationAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn user_message(&self, request: &GenerationRequest) -> PortResult<ChatCompletionRequestMessage> {
        let prompt = user_prompt(request);
        let message = match &request.input {
            GenerationInput::Text(text) => ChatCompletionRequestUserMessageArgs::default()
                .content(format!("{prompt}\n\nDocument content:\n\n{text}"))
                .build()
                .map_err(unexpected)?,
            GenerationInput::ImageUrl(url) => {
                let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(prompt)
                        .build()
                        .map_err(unexpected)?
                        .into(),
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(url.as_str())
                                .detail(ImageDetail::High)
                                .build()
                                .map_err(unexpected)?,
                        )
                        .build()
                        .map_err(unexpected)?
                        .into(),
                ];
                ChatCompletionRequestUserMessageArgs::default()
                    .content(parts)
                    .build()
                    .map_err(unexpected)?
            }
        };
        Ok(message.into())
    }

    pub fn build_request(&self, request: &GenerationRequest) -> PortResult<CreateChatCompletionRequest> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(TRANSLATION_SYSTEM_PROMPT)
                .build()
                .map_err(unexpected)?
                .into(),
            self.user_message(request)?,
        ];

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: Some("A translated document with a plain-language summary".to_string()),
                    name: SCHEMA_NAME.to_string(),
                    schema: Some(translation_schema()),
                    strict: Some(true),
                },
            })
            .temperature(TEMPERATURE)
            .max_completion_tokens(MAX_COMPLETION_TOKENS)
            .n(1)
            .build()
            .map_err(unexpected)
    }
}

//=========================================================================================
// `TranslationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TranslationService for OpenAiTranslationAdapter {
    async fn generate(&self, request: &GenerationRequest) -> PortResult<RawTranslation> {
        let chat_request = self.build_request(request)?;
        info!(model = %self.model, target = %request.target_language, "Requesting translation");

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(unexpected)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("No response from translation service".to_string())
            })?;

        serde_json::from_str::<RawTranslation>(&content).map_err(|e| {
            PortError::Unexpected(format!("Translation service returned invalid JSON: {e}"))
        })
    }
}
