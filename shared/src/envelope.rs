//! Message codec for the (command, delivery options) envelope.
//!
//! The codec isolates the wire format from transport and relay logic:
//! both the client and the server hand it a command plus options and get
//! back an opaque byte payload, and vice versa. The codec keeps the
//! options of the last successfully decoded envelope so the server's
//! relay step can recover the originally-sent delivery flags after the
//! decoded command has been handed on.

use crate::command::Command;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery flags attached to a command when it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandOptions {
    /// Suppress delivery of this command to the host peer.
    pub skip_host: bool,
}

impl CommandOptions {
    pub const NONE: CommandOptions = CommandOptions { skip_host: false };
    pub const SKIP_HOST: CommandOptions = CommandOptions { skip_host: true };
}

/// The unit of wire transport: a command together with its delivery options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: Command,
    pub options: CommandOptions,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode command: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode command envelope: {0}")]
    Decode(#[source] bincode::Error),
}

/// Serializes and deserializes command envelopes.
///
/// Decoding is stateful: [`MessageCodec::last_options`] returns the
/// options of the most recent successful decode. Failed decodes leave
/// that state untouched.
#[derive(Debug, Default)]
pub struct MessageCodec {
    last_options: CommandOptions,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes a command and its delivery options into an opaque payload.
    pub fn encode(&self, command: &Command, options: CommandOptions) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(&CommandEnvelope {
            command: command.clone(),
            options,
        })
        .map_err(CodecError::Encode)
    }

    /// Deserializes a payload back into the command it was encoded from,
    /// recording the envelope's delivery options.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Command, CodecError> {
        let envelope: CommandEnvelope =
            bincode::deserialize(payload).map_err(CodecError::Decode)?;
        self.last_options = envelope.options;
        Ok(envelope.command)
    }

    /// Delivery options of the last successfully decoded envelope.
    pub fn last_options(&self) -> CommandOptions {
        self.last_options
    }
}
