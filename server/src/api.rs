use crate::client::{new_reply_address, ClientEvent, ClientHub, ClientRequest, ClientSink};
use crate::directory::PlayerId;
use crate::error::{CoreError, CoreResult};
use crate::node::ClusterNode;
use crate::protocol::{
    Ack, BattleEndNotice, BattleInitiate, ConnectRequest, DirectMessage, DisconnectRequest, HealthResponse,
    InventoryUpdate, MoveRequest, MoveSubmission, OfferRequest, OfferSubmission, PlayerUpdate, PurchaseOutcome,
    PurchaseRequest, StatusResponse, TradeInitiate, TradeResult, TurnResult,
};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// HTTP API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<ClusterNode>,
    pub hub: Arc<ClientHub>,
}

/// Create the HTTP API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        // Directory & inventory
        .route("/players/connect", post(connect_player))
        .route("/players/disconnect", post(disconnect_player))
        .route("/players/update", post(update_player))
        .route("/cards/buy", post(buy_cards))
        .route("/inventory/update", post(update_inventory))
        .route("/players/message", post(relay_message))
        // Battle
        .route("/battle/initiate", post(battle_initiate))
        .route("/battle/request_move", post(battle_request_move))
        .route("/battle/turn_result", post(battle_turn_result))
        .route("/battle/end", post(battle_end))
        .route("/battle/submit_move", post(battle_submit_move))
        // Trade
        .route("/trade/initiate", post(trade_initiate))
        .route("/trade/request_card", post(trade_request_card))
        .route("/trade/result", post(trade_result))
        .route("/trade/submit_card", post(trade_submit_card))
        // Client transport
        .route("/client/ws", get(client_socket))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(state.node.health().await)
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(state.node.status().await)
}

// ============= Directory & Inventory =============

async fn connect_player(State(state): State<ApiState>, Json(req): Json<ConnectRequest>) -> CoreResult<Json<Ack>> {
    state.node.accept_connect(req).await?;
    Ok(Json(Ack::OK))
}

async fn disconnect_player(
    State(state): State<ApiState>,
    Json(req): Json<DisconnectRequest>,
) -> CoreResult<Json<Ack>> {
    state.node.accept_disconnect(req).await?;
    Ok(Json(Ack::OK))
}

async fn update_player(State(state): State<ApiState>, Json(update): Json<PlayerUpdate>) -> Json<Ack> {
    state.node.apply_directory_update(update).await;
    Json(Ack::OK)
}

async fn buy_cards(
    State(state): State<ApiState>,
    Json(req): Json<PurchaseRequest>,
) -> CoreResult<Json<PurchaseOutcome>> {
    Ok(Json(state.node.accept_purchase(req).await?))
}

async fn update_inventory(State(state): State<ApiState>, Json(update): Json<InventoryUpdate>) -> Json<Ack> {
    state.node.apply_inventory(update).await;
    Json(Ack::OK)
}

async fn relay_message(State(state): State<ApiState>, Json(message): Json<DirectMessage>) -> CoreResult<Json<Ack>> {
    state.node.accept_direct_message(message).await?;
    Ok(Json(Ack::OK))
}

// ============= Battle =============

async fn battle_initiate(State(state): State<ApiState>, Json(req): Json<BattleInitiate>) -> CoreResult<Json<Ack>> {
    state.node.peer_open_battle(req).await?;
    Ok(Json(Ack::OK))
}

async fn battle_request_move(State(state): State<ApiState>, Json(req): Json<MoveRequest>) -> CoreResult<Json<Ack>> {
    state.node.peer_request_card(req).await?;
    Ok(Json(Ack::OK))
}

async fn battle_turn_result(State(state): State<ApiState>, Json(req): Json<TurnResult>) -> CoreResult<Json<Ack>> {
    state.node.peer_turn_result(req).await?;
    Ok(Json(Ack::OK))
}

async fn battle_end(State(state): State<ApiState>, Json(req): Json<BattleEndNotice>) -> CoreResult<Json<Ack>> {
    state.node.peer_end_battle(req).await?;
    Ok(Json(Ack::OK))
}

async fn battle_submit_move(
    State(state): State<ApiState>,
    Json(req): Json<MoveSubmission>,
) -> CoreResult<Json<Ack>> {
    state.node.accept_move(req).await?;
    Ok(Json(Ack::OK))
}

// ============= Trade =============

async fn trade_initiate(State(state): State<ApiState>, Json(req): Json<TradeInitiate>) -> CoreResult<Json<Ack>> {
    state.node.peer_open_trade(req).await?;
    Ok(Json(Ack::OK))
}

async fn trade_request_card(State(state): State<ApiState>, Json(req): Json<OfferRequest>) -> CoreResult<Json<Ack>> {
    state.node.peer_request_offer(req).await?;
    Ok(Json(Ack::OK))
}

async fn trade_result(State(state): State<ApiState>, Json(req): Json<TradeResult>) -> CoreResult<Json<Ack>> {
    state.node.peer_trade_result(req).await?;
    Ok(Json(Ack::OK))
}

async fn trade_submit_card(
    State(state): State<ApiState>,
    Json(req): Json<OfferSubmission>,
) -> CoreResult<Json<Ack>> {
    state.node.accept_offer(req).await?;
    Ok(Json(Ack::OK))
}

// ============= Client transport =============

/// Handle WebSocket upgrade for a player connection
async fn client_socket(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(move |socket| client_session(state, socket))
}

/// One player connection: requests in, events out. Closing the socket
/// disconnects the player.
async fn client_session(state: ApiState, socket: WebSocket) {
    let reply_address = new_reply_address();
    let mut events = state.hub.attach(&reply_address).await;
    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode client event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    tracing::debug!(reply = %reply_address, "client connected");
    let mut player: Option<PlayerId> = None;

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                let result = match serde_json::from_str::<ClientRequest>(&text) {
                    Ok(request) => dispatch(&state, &reply_address, &mut player, request).await,
                    Err(e) => Err(CoreError::conflict(format!("malformed request: {}", e))),
                };
                if let Err(e) = result {
                    state
                        .hub
                        .push(&reply_address, ClientEvent::Error { message: e.to_string() })
                        .await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(player) = player {
        state.node.disconnect_player(&player, &reply_address).await;
    }
    state.hub.detach(&reply_address).await;
    writer.abort();
    tracing::debug!(reply = %reply_address, "client connection closed");
}

async fn dispatch(
    state: &ApiState,
    reply_address: &str,
    player: &mut Option<PlayerId>,
    request: ClientRequest,
) -> CoreResult<()> {
    if let ClientRequest::Connect { player_id } = request {
        if let Some(current) = player {
            return Err(CoreError::conflict(format!("already connected as {}", current)));
        }
        state.node.connect_player(&player_id, reply_address).await?;
        *player = Some(player_id);
        return Ok(());
    }

    let me = player
        .as_deref()
        .ok_or_else(|| CoreError::not_found("connect before anything else"))?;
    let node = &state.node;
    match request {
        ClientRequest::Connect { .. } => Ok(()),
        ClientRequest::Buy => node.purchase(me).await.map(|_| ()),
        ClientRequest::Battle { opponent } => node.start_battle(me, &opponent).await.map(|_| ()),
        ClientRequest::Trade { partner } => node.start_trade(me, &partner).await.map(|_| ()),
        ClientRequest::PlayCard { session_id, index } => node.play_card(me, &session_id, index).await,
        ClientRequest::OfferCard { session_id, card_id } => node.offer_card(me, &session_id, &card_id).await,
        ClientRequest::Pair { partner } => node.pair_players(me, &partner).await,
        ClientRequest::Message { to, text } => node.send_message(me, &to, &text).await,
    }
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!(addr = %listener.local_addr()?, "HTTP API server listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
