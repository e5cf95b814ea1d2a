//! Model client module for AI inference
//!
//! This module provides:
//! - `message`: conversation messages and the image retention policy
//! - `client`: the conversation client and request shaping
//! - `transport`: the HTTP seam to an OpenAI-compatible endpoint

mod client;
mod message;
mod transport;

pub use client::{
    parse_reply, ConversationClient, MessageBuilder, ModelConfig, ModelResponse,
    FREQUENCY_PENALTY, MAX_TOKENS, TEMPERATURE, TOP_P,
};
pub use message::{prune_images, Content, ContentItem, Message, Role, MAX_LIVE_IMAGES};
pub use transport::{extract_content, ChatTransport, HttpTransport, REQUEST_TIMEOUT};
