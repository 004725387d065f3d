use crate::{
    auth::AuthUser,
    context::{directives, ContextBuilder},
    db::ChatStore,
    types::{AppError, ChatRequest, ChatResponse, Message, MessageRole, Result},
    AppState,
};
use axum::{extract::State, Json};

/// Title of chats created without one
pub const DEFAULT_CHAT_TITLE: &str = "Neuer Chat";

const PRODUCT_COMMAND: &str = "bonlivre produkt:";

/// Trim `history`, add the directives and ask the configured model for a
/// reply.
pub(crate) async fn complete(
    state: &AppState,
    history: &[Message],
    directives: Vec<Message>,
) -> Result<Message> {
    let config = state.config.config();
    let builder = ContextBuilder::from_config(&config.context, config.llm.system_prompt.clone());
    let context = builder.build(history, directives);

    tracing::debug!(
        messages = context.messages.len(),
        history_cost = context.history_cost,
        directive_cost = context.directive_cost,
        dropped = context.dropped,
        "Requesting completion"
    );

    let client = state.llm_factory.create_default().await?;
    let completion = client.complete(&context.messages).await?;

    if let Some(usage) = completion.usage {
        tracing::debug!(
            model = client.model_name(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion finished"
        );
    }

    Ok(Message::assistant(completion.content))
}

/// Complete a client-held conversation and store the exchange as a new chat
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "chat",
    security(("bearer" = []))
)]
pub async fn chat(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    let last = payload
        .messages
        .last()
        .ok_or_else(|| AppError::InvalidInput("At least one message is required".to_string()))?;

    let mut extra = Vec::new();
    if !payload.products.is_empty() {
        extra.push(directives::products_found(&payload.products));
    } else if last.role == MessageRole::User
        && last
            .content
            .trim_start()
            .to_lowercase()
            .starts_with(PRODUCT_COMMAND)
    {
        extra.push(directives::no_products_found());
    }

    let reply = complete(&state, &payload.messages, extra).await?;

    // Keep the tail of the conversation together with the reply
    let tail_start = payload.messages.len().saturating_sub(2);
    let mut stored: Vec<Message> = payload.messages[tail_start..].to_vec();
    stored.push(reply.clone());

    let chat = state.db.create_chat(&claims.sub, DEFAULT_CHAT_TITLE).await?;
    state
        .db
        .append_messages(&chat.id, &claims.sub, &stored)
        .await?;

    tracing::info!(user_id = %claims.sub, chat_id = %chat.id, "Stored chat exchange");

    Ok(Json(ChatResponse {
        message: reply,
        chat_id: chat.id,
    }))
}
