use anyhow::{anyhow, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat,
};
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::generation::parameters::FormatType;
use std::time::Duration;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{LLMClient, LLMParams, TARGET_LLM_REQUEST};

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// One request against whichever backend `params` points at
async fn send_request(prompt: &str, system: Option<&str>, params: &LLMParams) -> Result<String> {
    match &params.llm_client {
        LLMClient::Ollama(ollama) => {
            let mut request = GenerationRequest::new(params.model.clone(), prompt.to_string());
            request.options = Some(GenerationOptions::default().temperature(params.temperature));
            if let Some(system) = system {
                request.system = Some(system.to_string().into());
            }
            if params.require_json {
                request.format = Some(FormatType::Json);
            }
            let response = ollama.generate(request).await?;
            Ok(response.response)
        }
        LLMClient::OpenAI(client) => {
            let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
            if let Some(system) = system {
                messages.push(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(system)
                        .build()?
                        .into(),
                );
            }
            messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?
                    .into(),
            );

            let mut builder = CreateChatCompletionRequestArgs::default();
            builder
                .model(params.model.clone())
                .temperature(params.temperature)
                .messages(messages);
            if params.require_json {
                builder.response_format(ResponseFormat::JsonObject);
            }
            let request = builder.build()?;

            let response = client.chat().create(request).await?;
            response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| anyhow!("OpenAI returned no content"))
        }
    }
}

/// Sends a prompt with timeout and exponential backoff between attempts.
///
/// # Returns
/// * `Some(text)` - the first non-empty response
/// * `None` - when every attempt failed, timed out or came back empty
pub async fn generate_llm_response(
    prompt: &str,
    system: Option<&str>,
    params: &LLMParams,
) -> Option<String> {
    let mut backoff = 2;

    debug!(target: TARGET_LLM_REQUEST, "Starting LLM response generation with model {}", params.model);

    for retry_count in 0..MAX_RETRIES {
        match timeout(REQUEST_TIMEOUT, send_request(prompt, system, params)).await {
            Ok(Ok(response)) if !response.trim().is_empty() => {
                debug!(target: TARGET_LLM_REQUEST, "LLM response received: {}", response);
                return Some(response);
            }
            Ok(Ok(_)) => {
                warn!(target: TARGET_LLM_REQUEST, "LLM returned an empty response");
            }
            Ok(Err(e)) => {
                warn!(target: TARGET_LLM_REQUEST, "Error generating response: {}", e);
            }
            Err(_) => {
                warn!(target: TARGET_LLM_REQUEST, "LLM request timed out after {:?}", REQUEST_TIMEOUT);
            }
        }

        if retry_count < MAX_RETRIES - 1 {
            info!(target: TARGET_LLM_REQUEST, "Retrying LLM request in {}s ({}/{})", backoff, retry_count + 1, MAX_RETRIES);
            sleep(Duration::from_secs(backoff)).await;
            backoff *= 2; // Exponential backoff
        }
    }

    error!(target: TARGET_LLM_REQUEST, "No response generated after {} attempts", MAX_RETRIES);
    None
}
