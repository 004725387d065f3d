use crate::{
    api::handlers::chat::{complete, DEFAULT_CHAT_TITLE},
    auth::AuthUser,
    context::directives,
    db::ChatStore,
    types::{
        AppError, Chat, CreateChatRequest, Message, MessageResponse, Product,
        ProductsResponse, ReplaceProductsRequest, Result, SendMessageRequest,
    },
    AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};

/// A shop lookup embedded in a chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// `bonlivre produkt: <term>`
    ProductSearch(String),
    /// `bonlivre kategorie: <name>`
    CategorySearch(String),
    /// `bonlivre bestellung: <number> <postcode>`
    OrderLookup { number: String, postcode: String },
}

impl ChatCommand {
    /// Recognize a command prefix, ignoring case and an optional leading `/`.
    /// Returns `None` for ordinary messages and commands without an argument.
    pub fn parse(message: &str) -> Option<Self> {
        let text = message.trim();
        let text = text.strip_prefix('/').unwrap_or(text);

        let (keyword, rest) = text.split_once(':')?;
        let mut words = keyword.split_whitespace();
        if !words.next()?.eq_ignore_ascii_case("bonlivre") {
            return None;
        }
        let command = words.next()?.to_lowercase();
        if words.next().is_some() {
            return None;
        }

        let arg = rest.trim();
        if arg.is_empty() {
            return None;
        }

        match command.as_str() {
            "produkt" => Some(ChatCommand::ProductSearch(arg.to_string())),
            "kategorie" => Some(ChatCommand::CategorySearch(arg.to_string())),
            "bestellung" => {
                let (number, postcode) = arg.split_once(char::is_whitespace)?;
                let postcode = postcode.trim();
                (!postcode.is_empty()).then(|| ChatCommand::OrderLookup {
                    number: number.to_string(),
                    postcode: postcode.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Run a command against the shop and turn the result into directives.
/// Shop failures degrade to the "nothing found" directives so the
/// conversation can continue.
async fn run_command(
    state: &AppState,
    chat_id: &str,
    user_id: &str,
    command: ChatCommand,
) -> Result<Vec<Message>> {
    let Some(commerce) = state.commerce.clone() else {
        tracing::warn!(?command, "Shop command received but shop integration is not configured");
        return Ok(vec![match command {
            ChatCommand::OrderLookup { number, .. } => directives::order_not_found(&number),
            _ => directives::no_products_found(),
        }]);
    };

    let products = match command {
        ChatCommand::ProductSearch(term) => commerce.find_products(Some(&term), None).await,
        ChatCommand::CategorySearch(name) => commerce.find_products(None, Some(&name)).await,
        ChatCommand::OrderLookup { number, postcode } => {
            return match commerce.find_order(&number, &postcode).await {
                Ok(order) => Ok(vec![directives::order_found(&order)]),
                Err(e) => {
                    tracing::info!(order = %number, error = %e, "Order lookup failed");
                    Ok(vec![directives::order_not_found(&number)])
                }
            };
        }
    };

    let products: Vec<Product> = products.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Product lookup failed");
        Vec::new()
    });

    state.db.replace_products(chat_id, user_id, &products).await?;

    Ok(vec![if products.is_empty() {
        directives::no_products_found()
    } else {
        directives::products_found(&products)
    }])
}

/// List the user's chats, most recently updated first
#[utoipa::path(
    get,
    path = "/api/chats",
    responses((status = 200, description = "Chats with messages", body = [Chat])),
    tag = "chats",
    security(("bearer" = []))
)]
pub async fn list_chats(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Vec<Chat>>> {
    Ok(Json(state.db.list_chats(&claims.sub).await?))
}

/// Create an empty chat
#[utoipa::path(
    post,
    path = "/api/chats",
    request_body = CreateChatRequest,
    responses((status = 200, description = "Created chat", body = Chat)),
    tag = "chats",
    security(("bearer" = []))
)]
pub async fn create_chat(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    body: Bytes,
) -> Result<Json<Chat>> {
    // The body is optional; an empty POST creates an untitled chat
    let payload: CreateChatRequest = if body.is_empty() {
        CreateChatRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid request body: {}", e)))?
    };
    let title = payload
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_CHAT_TITLE.to_string());

    let chat = state.db.create_chat(&claims.sub, &title).await?;
    tracing::info!(user_id = %claims.sub, chat_id = %chat.id, "Chat created");
    Ok(Json(chat))
}

#[utoipa::path(
    get,
    path = "/api/chats/{id}",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Chat with messages", body = Chat),
        (status = 404, description = "Chat not found or unauthorized")
    ),
    tag = "chats",
    security(("bearer" = []))
)]
pub async fn get_chat(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Chat>> {
    Ok(Json(state.db.get_chat(&id, &claims.sub).await?))
}

/// Send a message and receive the updated chat including the reply
#[utoipa::path(
    post,
    path = "/api/chats/{id}",
    params(("id" = String, Path, description = "Chat id")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Updated chat", body = Chat),
        (status = 400, description = "Empty message"),
        (status = 404, description = "Chat not found or unauthorized")
    ),
    tag = "chats",
    security(("bearer" = []))
)]
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<Chat>> {
    if payload.message.trim().is_empty() {
        return Err(AppError::InvalidInput("Message must not be empty".to_string()));
    }

    let chat = state.db.get_chat(&id, &claims.sub).await?;
    let user_message = Message::user(payload.message);

    let extra = match ChatCommand::parse(&user_message.content) {
        Some(command) => run_command(&state, &chat.id, &claims.sub, command).await?,
        None => Vec::new(),
    };

    let mut history = chat.messages;
    history.push(user_message.clone());

    let reply = complete(&state, &history, extra).await?;

    let updated = state
        .db
        .append_messages(&chat.id, &claims.sub, &[user_message, reply])
        .await?;

    Ok(Json(updated))
}

/// Delete a chat with its messages and products
#[utoipa::path(
    delete,
    path = "/api/chats/{id}",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 404, description = "Chat not found or unauthorized")
    ),
    tag = "chats",
    security(("bearer" = []))
)]
pub async fn delete_chat(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    state.db.delete_chat(&id, &claims.sub).await?;
    tracing::info!(user_id = %claims.sub, chat_id = %id, "Chat deleted");
    Ok(Json(MessageResponse::new(
        "Chat and associated messages deleted successfully",
    )))
}

#[utoipa::path(
    get,
    path = "/api/chats/{id}/products",
    params(("id" = String, Path, description = "Chat id")),
    responses(
        (status = 200, description = "The chat's products", body = ProductsResponse),
        (status = 404, description = "Chat not found or unauthorized")
    ),
    tag = "chats",
    security(("bearer" = []))
)]
pub async fn list_products(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProductsResponse>> {
    let products = state.db.list_products(&id, &claims.sub).await?;
    Ok(Json(ProductsResponse { products }))
}

/// Replace the chat's product set
#[utoipa::path(
    post,
    path = "/api/chats/{id}/products",
    params(("id" = String, Path, description = "Chat id")),
    request_body = ReplaceProductsRequest,
    responses(
        (status = 200, description = "The stored products", body = ProductsResponse),
        (status = 404, description = "Chat not found or unauthorized")
    ),
    tag = "chats",
    security(("bearer" = []))
)]
pub async fn replace_products(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<ReplaceProductsRequest>,
) -> Result<Json<ProductsResponse>> {
    state
        .db
        .replace_products(&id, &claims.sub, &payload.products)
        .await?;
    Ok(Json(ProductsResponse {
        products: payload.products,
    }))
}
