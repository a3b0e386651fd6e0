//! Transport-neutral view of WebSocket messages
//!
//! The browser leg speaks axum's message type and the hub leg speaks
//! tungstenite's. Both are mapped onto [`Frame`] so the forwarding loop can be
//! written once and never looks inside a payload.

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage};
use bytes::Bytes;
use tokio_tungstenite::tungstenite::Message as TungMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TungCloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use venue_gateway_common::constants::{
    CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_MESSAGE_TOO_BIG, CLOSE_NORMAL,
    CLOSE_PROTOCOL_ERROR,
};

/// An opaque data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

/// Close code and reason carried by a close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "")
    }

    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_GOING_AWAY, reason)
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_INTERNAL_ERROR, reason)
    }

    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_PROTOCOL_ERROR, reason)
    }

    pub fn message_too_big(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_MESSAGE_TOO_BIG, reason)
    }
}

/// What a received message means to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Forwarded unchanged to the other leg
    Data(Payload),
    /// The sender is closing its side
    Close(Option<CloseReason>),
    /// Ping/pong and raw frames, handled per leg by the WebSocket stack
    Control,
}

/// A WebSocket message type the relay can read and write
pub trait WireMessage: Sized {
    fn classify(self) -> Frame;

    fn data(payload: Payload) -> Self;

    fn close(reason: Option<CloseReason>) -> Self;
}

impl WireMessage for AxumMessage {
    fn classify(self) -> Frame {
        match self {
            AxumMessage::Text(text) => Frame::Data(Payload::Text(text.as_str().to_owned())),
            AxumMessage::Binary(data) => Frame::Data(Payload::Binary(data)),
            AxumMessage::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
                code: f.code,
                reason: f.reason.as_str().to_owned(),
            })),
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => Frame::Control,
        }
    }

    fn data(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => AxumMessage::Text(text.into()),
            Payload::Binary(data) => AxumMessage::Binary(data),
        }
    }

    fn close(reason: Option<CloseReason>) -> Self {
        AxumMessage::Close(reason.map(|r| AxumCloseFrame {
            code: r.code,
            reason: r.reason.into(),
        }))
    }
}

impl WireMessage for TungMessage {
    fn classify(self) -> Frame {
        match self {
            TungMessage::Text(text) => Frame::Data(Payload::Text(text.as_str().to_owned())),
            TungMessage::Binary(data) => Frame::Data(Payload::Binary(data)),
            TungMessage::Close(frame) => Frame::Close(frame.map(|f| CloseReason {
                code: u16::from(f.code),
                reason: f.reason.as_str().to_owned(),
            })),
            TungMessage::Ping(_) | TungMessage::Pong(_) | TungMessage::Frame(_) => Frame::Control,
        }
    }

    fn data(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => TungMessage::Text(text.into()),
            Payload::Binary(data) => TungMessage::Binary(data),
        }
    }

    fn close(reason: Option<CloseReason>) -> Self {
        TungMessage::Close(reason.map(|r| TungCloseFrame {
            code: CloseCode::from(r.code),
            reason: r.reason.into(),
        }))
    }
}
