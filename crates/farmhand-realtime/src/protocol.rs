//! WebSocket message schema.
//!
//! JSON objects with a `type` discriminator, validated on ingress.
//! Unknown client tags deserialize to `Unknown` and are answered with
//! an `error` message rather than dropping the connection.

use farmhand_core::types::Printer;
use serde::{Deserialize, Serialize};

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribePrinter {
        printer_id: String,
    },
    UnsubscribePrinter {
        printer_id: String,
    },
    SubscribeAll,
    Ping,
    GetInitialData,
    GetStatus,
    #[serde(other)]
    Unknown,
}

/// Server → client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        client_id: String,
        timestamp: String,
    },
    SubscriptionConfirmed {
        printer_id: String,
    },
    UnsubscriptionConfirmed {
        printer_id: String,
    },
    SubscriptionAllConfirmed {
        printer_ids: Vec<String>,
    },
    Pong,
    InitialData {
        printers: Vec<Printer>,
    },
    StatusResponse {
        connected_clients: usize,
        subscriptions: Vec<String>,
    },
    PrinterUpdate {
        printer_id: String,
        /// Strictly increasing per printer; lets receivers assert
        /// ordered delivery.
        seq: u64,
        timestamp: String,
        data: serde_json::Value,
    },
    Error {
        message: String,
    },
}
