//! AMQP command handling
//!
//! Commands arrive as JSON on the command queue, are dispatched to the lobby
//! registry and acknowledged once handled. A command the lobby rejects is
//! answered with a `CommandRejected` event and still acknowledged:
//! redelivering it would be rejected the same way.

use crate::amqp::messages::MessageUtils;
use crate::error::{LobbyError, LobbyResult, Result, ServiceError};
use crate::lobby::{LobbyRegistry, PickOutcome};
use crate::metrics::MetricsCollector;
use crate::types::{
    CommandRejected, LobbyCommand, LobbyEvent, LobbyId, MatchResult, ReportOutcome,
};
use crate::utils::current_timestamp;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What a successfully handled command did
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Queued { lobby_id: LobbyId },
    Left { lobby_id: LobbyId },
    Picked(PickOutcome),
    Reported(ReportOutcome),
    Forced(MatchResult),
}

/// Trait defining the interface for handling inbound commands
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one decoded command
    async fn handle_command(&self, command: LobbyCommand) -> Result<CommandReply>;

    /// Tell the sender why `command` was rejected
    async fn handle_rejection(
        &self,
        command: LobbyCommand,
        error: &anyhow::Error,
        correlation_id: Option<String>,
    );

    /// Handle a message that could not be decoded or processed
    async fn handle_error(&self, error: ServiceError, message_data: &[u8]);
}

/// Handler that drives the lobby registry
pub struct RegistryCommandHandler {
    registry: Arc<LobbyRegistry>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RegistryCommandHandler {
    pub fn new(registry: Arc<LobbyRegistry>) -> Self {
        Self {
            registry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one command against the registry
    pub async fn dispatch(&self, command: LobbyCommand) -> LobbyResult<CommandReply> {
        match command {
            LobbyCommand::JoinQueue { player_id } => self
                .registry
                .join_queue(player_id)
                .await
                .map(|lobby_id| CommandReply::Queued { lobby_id }),
            LobbyCommand::LeaveQueue { player_id } => self
                .registry
                .leave_queue(player_id)
                .await
                .map(|lobby_id| CommandReply::Left { lobby_id }),
            LobbyCommand::Pick {
                captain_id,
                target_id,
            } => self
                .registry
                .pick(captain_id, target_id)
                .await
                .map(CommandReply::Picked),
            LobbyCommand::Report {
                captain_id,
                outcome,
            } => self
                .registry
                .report(captain_id, outcome)
                .await
                .map(CommandReply::Reported),
            LobbyCommand::ForceResult {
                lobby_id,
                winning_team,
            } => self
                .registry
                .force_result(lobby_id, winning_team)
                .await
                .map(CommandReply::Forced),
        }
    }
}

/// Metrics label for a command outcome
fn command_status(result: &LobbyResult<CommandReply>) -> &'static str {
    match result {
        Ok(_) => "ok",
        // a reset round is a normal protocol outcome
        Err(LobbyError::ConsensusConflict { .. }) => "conflict",
        Err(e) if e.requires_operator() => "failed",
        Err(_) => "rejected",
    }
}

#[async_trait]
impl MessageHandler for RegistryCommandHandler {
    async fn handle_command(&self, command: LobbyCommand) -> Result<CommandReply> {
        let name = command.name();
        let start_time = Instant::now();
        debug!("Dispatching {:?}", command);

        let result = self.dispatch(command).await;
        let elapsed = start_time.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_command(name, command_status(&result), elapsed);
        }

        match result {
            Ok(reply) => {
                info!(
                    "Command {} handled in {:.2}ms: {:?}",
                    name,
                    elapsed.as_secs_f64() * 1000.0,
                    reply
                );
                Ok(reply)
            }
            Err(e) => {
                if e.requires_operator() {
                    error!("Command {} failed: {}", name, e);
                } else {
                    warn!("Command {} rejected ({}): {}", name, e.kind(), e);
                }
                Err(e.into())
            }
        }
    }

    async fn handle_rejection(
        &self,
        command: LobbyCommand,
        error: &anyhow::Error,
        correlation_id: Option<String>,
    ) {
        let lobby_error = error.downcast_ref::<LobbyError>();
        let event = LobbyEvent::CommandRejected(CommandRejected {
            lobby_id: lobby_error.and_then(|e| e.lobby_id()).or(match &command {
                LobbyCommand::ForceResult { lobby_id, .. } => Some(*lobby_id),
                _ => None,
            }),
            kind: lobby_error.map_or("internal", |e| e.kind()).to_string(),
            message: error.to_string(),
            command,
            correlation_id,
            timestamp: current_timestamp(),
        });

        let result = self.registry.publisher().publish(event).await;
        if let Err(e) = &result {
            warn!("Failed to publish command rejection: {}", e);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_event_published("CommandRejected", result.is_ok());
        }
    }

    async fn handle_error(&self, error: ServiceError, message_data: &[u8]) {
        error!(
            "Command message dropped - error: '{}', message_size: {} bytes",
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }
    }
}

/// Consumer for the command queue
pub struct CommandConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CommandConsumer {
    /// Create a new command consumer
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        channel: Channel,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let consumer_tag = format!("pickup-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
            metrics,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        // no_ack stays off; QueueConsumer acks each delivery once handled
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(
                QueueConsumer::new(self.handler.clone(), self.metrics.clone()),
                args,
            )
            .await
            .map_err(|e| ServiceError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            ServiceError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming commands");
        Ok(())
    }
}

/// Internal consumer implementation
struct QueueConsumer {
    handler: Arc<dyn MessageHandler>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl QueueConsumer {
    fn new(handler: Arc<dyn MessageHandler>, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self { handler, metrics }
    }

    /// Decode and handle one message. Only failures to decode are returned;
    /// a rejected command is answered through the handler.
    async fn process_message(
        &self,
        content: &[u8],
        correlation_id: Option<String>,
    ) -> std::result::Result<(), ServiceError> {
        let command = MessageUtils::deserialize_command(content).map_err(|e| {
            ServiceError::InvalidCommand {
                reason: e.to_string(),
            }
        })?;

        if let Err(e) = self.handler.handle_command(command.clone()).await {
            self.handler
                .handle_rejection(command, &e, correlation_id)
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncConsumer for QueueConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = Instant::now();
        let correlation_id = basic_properties.correlation_id().cloned();
        let result = self.process_message(&content, correlation_id).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation("consume", result.is_ok(), start_time.elapsed());
        }
        if let Err(e) = result {
            self.handler.handle_error(e, &content).await;
        }

        let args = BasicAckArguments::new(delivery_tag, false);
        if let Err(e) = channel.basic_ack(args).await {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}
