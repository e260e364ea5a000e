//! The single processing path: dedup, then the handler chain, one event at a time.

use std::sync::Arc;

use relay_core::{HandlerResponse, InboundEvent, RoomInfo, Transport, TransportEvent};
use storage::CorrelationStore;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chain::HandlerChain;
use crate::commands::{CommandHandler, DEFAULT_COMMAND_PREFIX};
use crate::dedup::{EventDeduplicator, DEFAULT_CAPACITY};
use crate::dispatcher::{RateLimitedDispatcher, RetryPolicy};
use crate::filter::IgnoreFilter;
use crate::membership::MembershipNotifier;
use crate::mention::MentionPolicy;
use crate::resolver::{Confirmation, ReplyResolver, DEFAULT_REPLY_MARKER};
use crate::router::RelayRouter;

/// Everything the engine needs to know at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bot_user_id: String,
    pub management_room_id: String,
    pub log_room_id: Option<String>,
    pub command_prefix: String,
    pub reply_marker: String,
    pub anonymise: bool,
    pub mention_only_rooms: Vec<String>,
    /// Every named room requires a mention, listed or not.
    pub mention_only_always_for_named: bool,
    pub welcome_message: Option<String>,
    pub confirmation: Confirmation,
    pub notify_unresolved: bool,
    pub retry: RetryPolicy,
    pub dedup_capacity: usize,
}

impl EngineConfig {
    pub fn new(bot_user_id: impl Into<String>, management_room_id: impl Into<String>) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            management_room_id: management_room_id.into(),
            log_room_id: None,
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            reply_marker: DEFAULT_REPLY_MARKER.to_string(),
            anonymise: false,
            mention_only_rooms: Vec::new(),
            mention_only_always_for_named: false,
            welcome_message: None,
            confirmation: Confirmation::Notice,
            notify_unresolved: true,
            retry: RetryPolicy::default(),
            dedup_capacity: DEFAULT_CAPACITY,
        }
    }
}

pub struct RelayEngine {
    dedup: EventDeduplicator,
    chain: HandlerChain,
    membership: MembershipNotifier,
}

impl RelayEngine {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CorrelationStore>,
    ) -> Self {
        let dispatcher = Arc::new(RateLimitedDispatcher::new(transport, config.retry));

        let filter = IgnoreFilter::new(&config.bot_user_id, config.log_room_id.clone());
        let commands = CommandHandler::new(
            &config.command_prefix,
            &config.management_room_id,
            Arc::clone(&dispatcher),
            Arc::clone(&store),
        )
        .with_reply_marker(&config.reply_marker);
        let resolver = ReplyResolver::new(
            &config.management_room_id,
            Arc::clone(&dispatcher),
            Arc::clone(&store),
        )
        .with_reply_marker(&config.reply_marker)
        .with_confirmation(config.confirmation.clone())
        .with_anonymise(config.anonymise)
        .with_notify_unresolved(config.notify_unresolved);
        let router = RelayRouter::new(
            &config.bot_user_id,
            &config.management_room_id,
            Arc::clone(&dispatcher),
            store,
        )
        .with_log_room(config.log_room_id.clone())
        .with_anonymise(config.anonymise)
        .with_mention_policy(MentionPolicy::new(
            config.mention_only_rooms.iter().cloned(),
            config.mention_only_always_for_named,
        ));

        let chain = HandlerChain::new()
            .add_handler(Arc::new(filter))
            .add_handler(Arc::new(commands))
            .add_handler(Arc::new(resolver))
            .add_handler(Arc::new(router));

        let membership = MembershipNotifier::new(
            &config.management_room_id,
            config.welcome_message.clone(),
            config.dedup_capacity,
            dispatcher,
        );

        Self {
            dedup: EventDeduplicator::new(config.dedup_capacity),
            chain,
            membership,
        }
    }

    pub async fn process(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { event, room } => {
                self.process_message(&event, &room).await;
            }
            TransportEvent::Invited { room_id } => self.membership.on_invite(&room_id).await,
            TransportEvent::Joined { room } => self.membership.on_joined(&room).await,
        }
    }

    /// `None` when the event was already processed this session.
    pub async fn process_message(
        &mut self,
        event: &InboundEvent,
        room: &RoomInfo,
    ) -> Option<HandlerResponse> {
        if !self.dedup.should_process(&event.id) {
            return None;
        }
        match self.chain.handle(event, room).await {
            Ok(response) => Some(response),
            Err(e) => {
                error!(event_id = %event.id, room_id = %room.room_id, error = %e, "Event processing failed");
                Some(HandlerResponse::Stop)
            }
        }
    }

    /// Consumes events until every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<TransportEvent>) {
        info!("Relay engine started");
        while let Some(event) = events.recv().await {
            self.process(event).await;
        }
        info!("Event channel closed, relay engine stopped");
    }
}
