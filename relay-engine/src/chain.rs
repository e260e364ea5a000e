//! # Handler chain
//!
//! Runs every handler's `before` in order (any `false` stops the chain), then `handle` in order
//! until one returns Stop, then every `after` in reverse order with the final response.

use std::sync::Arc;

use relay_core::{Handler, HandlerResponse, InboundEvent, Result, RoomInfo};
use tracing::{debug, instrument};

#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler (runs in order; first Stop ends the handle phase).
    pub fn add_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns Stop when a `before` vetoed or a handler stopped the chain, otherwise Continue.
    #[instrument(skip(self, event, room), fields(event_id = %event.id, room_id = %room.room_id))]
    pub async fn handle(&self, event: &InboundEvent, room: &RoomInfo) -> Result<HandlerResponse> {
        debug!(sender = %event.sender, "step: handler_chain started");

        for handler in &self.handlers {
            let name = std::any::type_name_of_val(handler.as_ref());
            if !handler.before(event, room).await? {
                debug!(handler = %name, "step: before returned false, chain stopped");
                return Ok(HandlerResponse::Stop);
            }
        }

        let mut final_response = HandlerResponse::Continue;
        for handler in &self.handlers {
            let name = std::any::type_name_of_val(handler.as_ref());
            let response = handler.handle(event, room).await?;
            debug!(handler = %name, response = ?response, "step: handler done");

            match response {
                HandlerResponse::Stop => {
                    final_response = response;
                    break;
                }
                HandlerResponse::Continue | HandlerResponse::Ignore => continue,
            }
        }

        for handler in self.handlers.iter().rev() {
            handler.after(event, &final_response).await?;
        }

        debug!(response = ?final_response, "step: handler_chain finished");
        Ok(final_response)
    }
}

// Tests live in tests/handler_chain_test.rs
