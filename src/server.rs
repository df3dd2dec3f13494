use std::convert::Infallible;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use warp::http::StatusCode;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::auth::{Authenticator, TokenAuthenticator};
use crate::config::Config;
use crate::delivery::DeliveryService;
use crate::dispatch::dispatch;
use crate::error::ChatError;
use crate::messages::{ClientEvent, ServerEvent};
use crate::models::{MessageId, NewMessage, UserId};
use crate::registry::{dispatch_all, ConnectionHandle, ConnectionRegistry};
use crate::store::{MemoryStore, MessageStore};

const MAX_BODY_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Deserialize)]
struct Handshake {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Clone)]
pub struct Server {
    delivery: DeliveryService,
    auth: Arc<dyn Authenticator>,
}

impl Server {
    pub fn new(delivery: DeliveryService, auth: Arc<dyn Authenticator>) -> Self {
        Server { delivery, auth }
    }

    /// In-memory store, fresh registry, token auth from the configured secret.
    pub fn from_config(config: &Config) -> Self {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new());
        let delivery = DeliveryService::new(ConnectionRegistry::new(), store, config.store_timeout());
        let auth = match &config.auth_secret {
            Some(secret) => TokenAuthenticator::new(secret.as_bytes()),
            None => {
                warn!("AUTH_SECRET not set, using an ephemeral secret");
                TokenAuthenticator::random()
            }
        };
        Self::new(delivery, Arc::new(auth))
    }

    pub fn delivery(&self) -> &DeliveryService {
        &self.delivery
    }

    /// Serves one socket until it closes. The connection is registered for
    /// its whole lifetime; events for it are written by a separate task.
    pub async fn handle_connection(&self, ws: WebSocket, user: UserId) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
        let conn = ConnectionHandle::new(user.clone(), tx);
        let registry = self.delivery.registry();
        info!("Connection {} opened for {}", conn.id, user);
        registry.register(conn.clone()).await;

        let writer_user = user.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode event for {}: {}", writer_user, e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::text(text)).await {
                    debug!("Failed to send WebSocket message to {}: {}", writer_user, e);
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(msg) if msg.is_close() => break,
                Ok(msg) => {
                    let Ok(text) = msg.to_str() else {
                        continue;
                    };
                    match serde_json::from_str::<ClientEvent>(text) {
                        Ok(event) => dispatch_all(dispatch(&self.delivery, &conn, event).await),
                        Err(e) => debug!("Ignoring malformed frame from {}: {}", user, e),
                    }
                }
                Err(e) => {
                    warn!("WebSocket error for {}: {}", user, e);
                    break;
                }
            }
        }

        registry.unregister(&user, conn.id).await;
        info!("Connection {} closed for {}", conn.id, user);
    }

    pub fn routes(&self, cors_origin: Option<&str>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let cors = warp::cors()
            .allow_methods(vec!["GET", "POST", "PUT"])
            .allow_headers(vec!["token", "content-type"]);
        let cors = match cors_origin {
            Some(origin) => cors.allow_origin(origin),
            None => cors.allow_any_origin(),
        };

        let status = warp::path!("api" / "status")
            .and(warp::get())
            .map(|| "Server is live");

        self.ws_route()
            .or(status)
            .or(self.api_routes())
            .recover(handle_rejection)
            .with(cors)
    }

    fn ws_route(&self) -> impl Filter<Extract = (Box<dyn Reply>,), Error = Rejection> + Clone {
        let server = self.clone();
        warp::path("ws")
            .and(warp::path::end())
            .and(warp::ws())
            .and(warp::query::<Handshake>())
            .map(move |ws: Ws, handshake: Handshake| -> Box<dyn Reply> {
                let Some(user) = handshake.user_id.filter(|id| !id.is_empty()) else {
                    return Box::new(warp::reply::with_status("userId is required", StatusCode::BAD_REQUEST));
                };
                let server = server.clone();
                Box::new(ws.on_upgrade(move |socket| async move {
                    server.handle_connection(socket, UserId::from(user)).await;
                }))
            })
    }

    fn api_routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let server = self.clone();
        let with_server = warp::any().map(move || server.clone());
        let identity = with_identity(Arc::clone(&self.auth));

        let unseen = warp::path!("api" / "messages" / "users")
            .and(warp::get())
            .and(identity.clone())
            .and(with_server.clone())
            .and_then(unseen_counts);

        let fetch = warp::path!("api" / "messages" / String)
            .and(warp::get())
            .and(identity.clone())
            .and(with_server.clone())
            .and_then(fetch_conversation);

        let send = warp::path!("api" / "messages" / "send" / String)
            .and(warp::post())
            .and(identity.clone())
            .and(warp::body::content_length_limit(MAX_BODY_BYTES))
            .and(warp::body::json())
            .and(with_server.clone())
            .and_then(send_message);

        let mark = warp::path!("api" / "messages" / "mark" / MessageId)
            .and(warp::put())
            .and(identity)
            .and(with_server)
            .and_then(mark_message_seen);

        unseen.or(fetch).or(send).or(mark)
    }
}

fn with_identity(auth: Arc<dyn Authenticator>) -> impl Filter<Extract = (UserId,), Error = Rejection> + Clone {
    warp::header::optional::<String>("token").and_then(move |token: Option<String>| {
        let auth = Arc::clone(&auth);
        async move {
            let Some(token) = token else {
                return Err(warp::reject::custom(ChatError::Unauthorized));
            };
            auth.resolve(&token)
                .await
                .ok_or_else(|| warp::reject::custom(ChatError::Unauthorized))
        }
    })
}

async fn unseen_counts(user: UserId, server: Server) -> Result<impl Reply, Rejection> {
    let counts = server
        .delivery
        .unseen_counts(&user)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&json!({
        "success": true,
        "unseenMessages": counts,
    })))
}

async fn fetch_conversation(counterpart: String, user: UserId, server: Server) -> Result<impl Reply, Rejection> {
    let fetched = server
        .delivery
        .fetch_conversation(&user, &UserId::from(counterpart))
        .await
        .map_err(warp::reject::custom)?;
    dispatch_all(fetched.outbound);
    Ok(warp::reply::json(&json!({
        "success": true,
        "messages": fetched.value,
    })))
}

async fn send_message(receiver: String, user: UserId, body: NewMessage, server: Server) -> Result<impl Reply, Rejection> {
    let sent = server
        .delivery
        .send_message(&user, &UserId::from(receiver), body)
        .await
        .map_err(warp::reject::custom)?;
    dispatch_all(sent.outbound);
    Ok(warp::reply::json(&json!({
        "success": true,
        "message": sent.value,
    })))
}

async fn mark_message_seen(message_id: MessageId, user: UserId, server: Server) -> Result<impl Reply, Rejection> {
    let marked = server
        .delivery
        .mark_message_seen(&user, message_id)
        .await
        .map_err(warp::reject::custom)?;
    dispatch_all(marked.outbound);
    Ok(warp::reply::json(&json!({ "success": true })))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<ChatError>() {
        (e.status(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "success": false, "message": message })),
        status,
    ))
}
