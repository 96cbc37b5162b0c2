//! services/client/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the tutor chat model.
//! It implements the `ChatService` port from the `core` crate by streaming a chat
//! completion and forwarding every non-empty content delta.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use study_sync_core::domain::{ChatRequest, ChatRole, ChatTurn};
use study_sync_core::ports::{ChatService, PortError, PortResult, TextStream};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChatService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn build_error(e: OpenAIError) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Converts one conversation turn into a request message. Images travel inline as
/// data URLs; other binary attachments are announced by name only.
fn to_message(turn: &ChatTurn) -> PortResult<ChatCompletionRequestMessage> {
    match turn.role {
        ChatRole::Model => Ok(ChatCompletionRequestAssistantMessageArgs::default()
            .content(turn.text.clone())
            .build()
            .map_err(build_error)?
            .into()),
        ChatRole::User => {
            let Some(file) = &turn.attachment else {
                return Ok(ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.text.clone())
                    .build()
                    .map_err(build_error)?
                    .into());
            };

            if !file.mime_type.starts_with("image/") {
                return Ok(ChatCompletionRequestUserMessageArgs::default()
                    .content(format!(
                        "{}\n\n[Attached file {} ({}) could not be forwarded]",
                        turn.text, file.name, file.mime_type
                    ))
                    .build()
                    .map_err(build_error)?
                    .into());
            }

            let data_url = format!("data:{};base64,{}", file.mime_type, STANDARD.encode(&file.data));
            let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(turn.text.clone())
                    .build()
                    .map_err(build_error)?
                    .into(),
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(ImageUrlArgs::default().url(data_url).build().map_err(build_error)?)
                    .build()
                    .map_err(build_error)?
                    .into(),
            ];
            Ok(ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(build_error)?
                .into())
        }
    }
}

//=========================================================================================
// `ChatService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatService for OpenAiChatAdapter {
    async fn stream_reply(&self, request: ChatRequest) -> PortResult<TextStream> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system_instruction.clone())
            .build()
            .map_err(build_error)?
            .into()];
        for turn in request.history.iter().chain(std::iter::once(&request.message)) {
            messages.push(to_message(turn)?);
        }

        let completion = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(build_error)?;

        let stream = self
            .client
            .chat()
            .create_stream(completion)
            .await
            .map_err(|e: OpenAIError| PortError::Unavailable(e.to_string()))?;

        Ok(Box::pin(stream.filter_map(|chunk| async move {
            match chunk {
                Ok(response) => response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|text| !text.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(PortError::Unavailable(e.to_string()))),
            }
        })))
    }
}
