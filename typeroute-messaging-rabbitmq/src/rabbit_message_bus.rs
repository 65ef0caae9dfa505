use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::*,
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle, time::sleep};
use tracing::{error, info, warn};

use crate::delivery::{
    disposition, inbound_from_delivery, publish_properties, publish_target, Disposition,
};
use crate::options::RabbitMqOptions;
use typeroute_messaging_core::{
    DispatchOutcome, MessageType, MessagingError, OutboundMessage, Publisher, RoutingDispatcher,
    Topology,
};

struct ConnState {
    conn: Connection,
    pub_ch: Channel,
}

/// RabbitMQ side of the dispatch layer: owns the connection, declares the
/// topology, publishes and feeds deliveries to a [`RoutingDispatcher`].
pub struct RabbitMessageBus {
    opts: RabbitMqOptions,
    state: Arc<RwLock<Option<ConnState>>>,
}

impl RabbitMessageBus {
    pub async fn connect(opts: RabbitMqOptions) -> Result<Self, MessagingError> {
        opts.validate()?;
        let bus = Self {
            opts,
            state: Arc::new(RwLock::new(None)),
        };
        bus.connect_once().await?;
        Ok(bus)
    }

    pub fn options(&self) -> &RabbitMqOptions {
        &self.opts
    }

    /// Topology for the listened types of `M` on the configured exchange and queue.
    pub fn topology<M: MessageType>(&self) -> Result<Topology, MessagingError> {
        Topology::for_types::<M>(self.opts.exchange.clone(), self.opts.queue.clone())
    }

    /// Opens the connection and publish channel unless a live pair is already
    /// held. The write lock is held across the connect so concurrent callers
    /// reconnect once.
    async fn connect_once(&self) -> Result<(), MessagingError> {
        let mut guard = self.state.write().await;
        let held = guard
            .as_ref()
            .map(|s| (s.conn.status().connected(), s.pub_ch.status().connected()));
        if !needs_reconnect(held) {
            return Ok(());
        }

        let conn = Connection::connect(&self.opts.uri, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        let ch = conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        if self.opts.confirms {
            ch.confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| MessagingError::Connection(e.to_string()))?;
        }

        declare_exchange(&ch, &self.opts.exchange).await?;

        *guard = Some(ConnState { conn, pub_ch: ch });

        info!(exchange = %self.opts.exchange, "RabbitMQ connected");
        Ok(())
    }

    async fn current_channel(&self) -> Result<Channel, MessagingError> {
        if let Some(ch) = self
            .state
            .read()
            .await
            .as_ref()
            .filter(|s| s.pub_ch.status().connected())
            .map(|s| s.pub_ch.clone())
        {
            return Ok(ch);
        }
        self.connect_once().await?;
        self.state
            .read()
            .await
            .as_ref()
            .map(|s| s.pub_ch.clone())
            .ok_or_else(|| MessagingError::Connection("no channel after reconnect".into()))
    }

    /// A fresh channel on the shared connection, reconnecting if it dropped.
    async fn open_channel(&self) -> Result<Channel, MessagingError> {
        let connected = self
            .state
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.conn.status().connected());
        if !connected {
            self.connect_once().await?;
        }

        let guard = self.state.read().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| MessagingError::Connection("no connection after reconnect".into()))?;
        state
            .conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))
    }

    /// Declares the exchange, the queue and one binding per routing key.
    /// Safe to repeat.
    pub async fn declare_topology(&self, topology: &Topology) -> Result<(), MessagingError> {
        let ch = self.current_channel().await?;
        declare_topology_on(&ch, topology).await
    }

    /// Declares the topology for `M`, then starts the configured number of
    /// consumer tasks feeding `dispatcher`. Fails without consuming if the
    /// topology cannot be declared.
    pub async fn consume<M: MessageType>(
        &self,
        dispatcher: Arc<RoutingDispatcher<M>>,
    ) -> Result<Vec<JoinHandle<()>>, MessagingError> {
        let topology = Arc::new(self.topology::<M>()?);
        if topology.bindings.is_empty() {
            warn!(queue = %topology.queue, "no listened message types; the queue will receive nothing");
        }
        self.declare_topology(&topology).await?;

        let handles = (0..self.opts.consumers)
            .map(|index| {
                let bus = self.clone_for_task();
                let topology = Arc::clone(&topology);
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { bus.consumer_loop(index, topology, dispatcher).await })
            })
            .collect();
        Ok(handles)
    }

    async fn consumer_loop<M: MessageType>(
        self,
        index: usize,
        topology: Arc<Topology>,
        dispatcher: Arc<RoutingDispatcher<M>>,
    ) {
        let tag = format!("consumer-{}-{}", self.opts.service, index);
        loop {
            let ch = match self.open_channel().await {
                Ok(c) => c,
                Err(e) => {
                    error!("consume: no channel yet: {e}");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if let Err(e) = ch
                .basic_qos(self.opts.prefetch, BasicQosOptions { global: false })
                .await
            {
                error!("basic_qos failed: {e}");
                sleep(Duration::from_secs(1)).await;
                continue;
            }

            if let Err(e) = declare_topology_on(&ch, &topology).await {
                error!("declare_topology failed: {e}");
                sleep(Duration::from_secs(1)).await;
                continue;
            }

            let mut consumer = match ch
                .basic_consume(
                    &topology.queue,
                    &tag,
                    BasicConsumeOptions {
                        no_ack: false,
                        exclusive: false,
                        nowait: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    error!("basic_consume failed: {e}");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            info!(
                queue = %topology.queue,
                exchange = %topology.exchange,
                consumer = %tag,
                "consuming"
            );

            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(d) => {
                        let message = inbound_from_delivery(&d);
                        let result = dispatcher.dispatch(&message).await;
                        settle(&d, &result).await;
                    }
                    Err(e) => {
                        error!("delivery error: {e}");
                        break;
                    }
                }
            }

            sleep(Duration::from_secs(1)).await;
        }
    }

    fn clone_for_task(&self) -> Self {
        Self {
            opts: self.opts.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl Publisher for RabbitMessageBus {
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        let ch = self.current_channel().await?;

        let (exchange, routing_key) = publish_target(&message, &self.opts.exchange);
        let props = publish_properties(&message);

        let confirm = ch
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &message.body,
                props,
            )
            .await
            .map_err(|e| MessagingError::Publish(e.to_string()))?
            .await
            .map_err(|e| MessagingError::Publish(e.to_string()))?;

        if confirm.is_nack() {
            return Err(MessagingError::Publish(
                "publisher confirm NACK".to_string(),
            ));
        }
        Ok(())
    }
}

/// `held` is the (connection, publish channel) liveness of the current state.
fn needs_reconnect(held: Option<(bool, bool)>) -> bool {
    !matches!(held, Some((true, true)))
}

async fn declare_exchange(ch: &Channel, exchange: &str) -> Result<(), MessagingError> {
    ch.exchange_declare(
        exchange,
        ExchangeKind::Topic,
        ExchangeDeclareOptions {
            durable: true,
            auto_delete: false,
            internal: false,
            nowait: false,
            passive: false,
        },
        FieldTable::default(),
    )
    .await
    .map_err(|e| MessagingError::Topology(e.to_string()))
}

async fn declare_topology_on(ch: &Channel, topology: &Topology) -> Result<(), MessagingError> {
    declare_exchange(ch, &topology.exchange).await?;

    ch.queue_declare(
        &topology.queue,
        QueueDeclareOptions {
            durable: true,
            auto_delete: false,
            exclusive: false,
            nowait: false,
            passive: false,
        },
        FieldTable::default(),
    )
    .await
    .map_err(|e| MessagingError::Topology(e.to_string()))?;

    for binding in &topology.bindings {
        ch.queue_bind(
            &binding.queue,
            &binding.exchange,
            &binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
        .map_err(|e| MessagingError::Topology(e.to_string()))?;
    }

    Ok(())
}

async fn settle(delivery: &Delivery, result: &Result<DispatchOutcome, MessagingError>) {
    let settled = match disposition(result, delivery.redelivered) {
        Disposition::Ack => delivery.ack(BasicAckOptions { multiple: false }).await,
        Disposition::Requeue => {
            delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await
        }
        Disposition::Reject => {
            delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
        }
    };

    if let Err(err) = result {
        error!(routing_key = %delivery.routing_key, "dispatch failed: {err}");
    }
    if let Err(e) = settled {
        error!(routing_key = %delivery.routing_key, "failed to settle delivery: {e}");
    }
}
