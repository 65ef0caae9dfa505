// typeroute-messaging-core/src/dispatcher.rs
//! Per-message routing: resolve the declared type, decode the body once and
//! run every handler registered for the type.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::{
    codec, DispatchMetrics, HandlerRegistration, HandlerRegistry, InboundMessage, LogResults,
    MessageType, MessagingError, Payload, ResultContext, ResultHandler,
};

/// What happens to the remaining handlers when one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failure and return it.
    #[default]
    AbortOnFirst,
    /// Run every handler, then return all failures together.
    ContinueOnError,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Upper bound for a single handler invocation. `None` waits forever.
    pub handler_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every handler ran without failing.
    Dispatched { handlers: usize, results: usize },
    /// The type is known but nothing is registered for it.
    Unhandled,
}

pub struct RoutingDispatcher<M> {
    registry: Arc<HandlerRegistry<M>>,
    results: Arc<dyn ResultHandler>,
    options: DispatchOptions,
    metrics: Arc<DispatchMetrics>,
}

impl<M: MessageType> RoutingDispatcher<M> {
    /// A dispatcher that logs handler results.
    pub fn new(registry: Arc<HandlerRegistry<M>>) -> Self {
        Self {
            registry,
            results: Arc::new(LogResults),
            options: DispatchOptions::default(),
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    pub fn with_result_handler(mut self, results: Arc<dyn ResultHandler>) -> Self {
        self.results = results;
        self
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry<M> {
        &self.registry
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Routes one inbound message to its handlers.
    ///
    /// Errors are returned to the broker client, which owns the ack/requeue
    /// decision. A known type with no handlers is `Ok(DispatchOutcome::Unhandled)`.
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<DispatchOutcome, MessagingError> {
        let (message_type, payload) = match self.prepare(message) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.metrics.inc_rejected();
                warn!(routing_key = %message.routing_key, error = %err, "rejecting message");
                return Err(err);
            }
        };

        let registrations = self.registry.lookup(message_type);
        if registrations.is_empty() {
            self.metrics.inc_unhandled();
            warn!(message_type = %message_type, "no handler registered for message type");
            return Ok(DispatchOutcome::Unhandled);
        }

        let mut results = 0;
        let mut failures = Vec::new();
        for registration in registrations {
            match self.invoke(registration, &payload, message).await {
                Ok(produced) => results += usize::from(produced),
                Err(err) => {
                    self.metrics.inc_handler_failures();
                    error!(
                        message_type = %message_type,
                        handler = registration.handler_name(),
                        operation = registration.operation(),
                        error = %err,
                        "listener failed"
                    );
                    match self.options.failure_policy {
                        FailurePolicy::AbortOnFirst => return Err(err),
                        FailurePolicy::ContinueOnError => failures.push(err),
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Err(MessagingError::DispatchFailed {
                total: registrations.len(),
                failures,
            });
        }

        self.metrics.inc_dispatched();
        debug!(
            message_type = %message_type,
            handlers = registrations.len(),
            results,
            "message dispatched"
        );
        Ok(DispatchOutcome::Dispatched {
            handlers: registrations.len(),
            results,
        })
    }

    fn prepare(&self, message: &InboundMessage) -> Result<(M, Payload), MessagingError> {
        let declared = message
            .message_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(MessagingError::MissingMessageType)?;
        let message_type =
            M::parse(declared).ok_or_else(|| MessagingError::UnknownMessageType(declared.to_string()))?;
        let payload = codec::decode(&message.body)?;
        Ok((message_type, payload))
    }

    /// Runs one handler. `Ok(true)` when it produced a result.
    async fn invoke(
        &self,
        registration: &HandlerRegistration<M>,
        payload: &Payload,
        message: &InboundMessage,
    ) -> Result<bool, MessagingError> {
        let handler = registration.handler_name();
        let operation = registration.operation();

        let call = registration.handler().handle(payload);
        let outcome = match self.options.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                MessagingError::HandlerTimeout {
                    handler: handler.to_string(),
                    operation: operation.to_string(),
                    timeout: limit,
                }
            })?,
            None => call.await,
        };

        match outcome {
            Ok(Some(result)) => {
                let ctx = ResultContext {
                    message,
                    handler,
                    operation,
                };
                self.results.handle_result(ctx, result).await?;
                self.metrics.inc_results();
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => Err(MessagingError::from_handler(handler, operation, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandlerError, InMemoryPublisher, MessageHandler, ReplyResults};
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    crate::message_types! {
        enum Orders {
            Placed("orders.placed", listened = true),
            Cancelled("orders.cancelled", listened = true),
        }
    }

    enum Behaviour {
        Quiet,
        Reply,
        IoFail,
        Fail,
        Hang,
    }

    struct Recorder {
        behaviour: Behaviour,
        calls: AtomicUsize,
        seen: Mutex<Vec<Payload>>,
    }

    impl Recorder {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, payload: &Payload) -> Result<Option<Payload>, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(payload.clone());
            match self.behaviour {
                Behaviour::Quiet => Ok(None),
                Behaviour::Reply => Ok(Some(Payload::from([(
                    "ack".to_string(),
                    "yes".to_string(),
                )]))),
                Behaviour::IoFail => Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset").into()),
                Behaviour::Fail => Err(HandlerError::msg("bad order")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(None)
                }
            }
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<(String, String, Payload)>>);

    #[async_trait]
    impl ResultHandler for Collect {
        async fn handle_result(
            &self,
            ctx: ResultContext<'_>,
            result: Payload,
        ) -> Result<(), MessagingError> {
            self.0
                .lock()
                .unwrap()
                .push((ctx.handler.to_string(), ctx.operation.to_string(), result));
            Ok(())
        }
    }

    fn dispatcher(handlers: Vec<Arc<Recorder>>) -> RoutingDispatcher<Orders> {
        let mut builder = HandlerRegistry::builder();
        for handler in handlers {
            builder.register_default(Orders::Placed, handler).unwrap();
        }
        RoutingDispatcher::new(Arc::new(builder.build().unwrap()))
    }

    fn placed() -> InboundMessage {
        InboundMessage::new("orders.placed", br#"{"order":"7"}"#.to_vec())
    }

    #[tokio::test]
    async fn every_handler_sees_the_same_payload() {
        let first = Recorder::new(Behaviour::Quiet);
        let second = Recorder::new(Behaviour::Quiet);
        let d = dispatcher(vec![first.clone(), second.clone()]);

        let outcome = d.dispatch(&placed()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Dispatched { handlers: 2, results: 0 });
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(*first.seen.lock().unwrap(), *second.seen.lock().unwrap());
        assert_eq!(first.seen.lock().unwrap()[0]["order"], "7");
        assert_eq!(d.metrics().dispatched(), 1);
    }

    #[tokio::test]
    async fn results_are_forwarded() {
        let collect = Arc::new(Collect::default());
        let d = dispatcher(vec![Recorder::new(Behaviour::Reply)]).with_result_handler(collect.clone());

        let outcome = d.dispatch(&placed()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Dispatched { handlers: 1, results: 1 });
        let got = collect.0.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, "Recorder");
        assert_eq!(got[0].1, "handle");
        assert_eq!(got[0].2["ack"], "yes");
    }

    #[tokio::test]
    async fn failing_result_handler_stops_the_fan_out() {
        let publisher = Arc::new(InMemoryPublisher::new());
        publisher.fail_publishes("reply channel closed");
        let replying = Recorder::new(Behaviour::Reply);
        let after = Recorder::new(Behaviour::Quiet);
        let d = dispatcher(vec![replying.clone(), after.clone()])
            .with_result_handler(Arc::new(ReplyResults::new(Arc::clone(&publisher))));

        let message = placed().with_reply_to("orders.replies");
        let err = d.dispatch(&message).await.unwrap_err();
        assert!(matches!(err, MessagingError::Publish(ref m) if m == "reply channel closed"));
        assert_eq!(replying.calls(), 1);
        assert_eq!(after.calls(), 0);
        assert_eq!(d.metrics().results(), 0);
        assert_eq!(d.metrics().dispatched(), 0);
    }

    #[tokio::test]
    async fn replies_are_not_dispatched_as_requests() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let d = dispatcher(vec![Recorder::new(Behaviour::Reply)])
            .with_result_handler(Arc::new(ReplyResults::new(Arc::clone(&publisher))));

        d.dispatch(&placed().with_reply_to("orders.replies")).await.unwrap();
        let reply = publisher.drain_inbound().remove(0);
        assert_eq!(reply.routing_key, "orders.replies");
        assert!(matches!(
            d.dispatch(&reply).await,
            Err(MessagingError::MissingMessageType)
        ));
    }

    #[tokio::test]
    async fn io_failure_aborts_and_is_classified() {
        let failing = Recorder::new(Behaviour::IoFail);
        let after = Recorder::new(Behaviour::Quiet);
        let d = dispatcher(vec![failing.clone(), after.clone()]);

        let err = d.dispatch(&placed()).await.unwrap_err();
        assert!(matches!(err, MessagingError::BrokerIo { .. }));
        assert_eq!(failing.calls(), 1);
        assert_eq!(after.calls(), 0);
        assert_eq!(d.metrics().handler_failures(), 1);
    }

    #[tokio::test]
    async fn general_failure_aborts_with_identity() {
        let failing = Recorder::new(Behaviour::Fail);
        let after = Recorder::new(Behaviour::Quiet);
        let d = dispatcher(vec![failing, after.clone()]);

        match d.dispatch(&placed()).await.unwrap_err() {
            MessagingError::ListenerFailed {
                handler,
                operation,
                source,
            } => {
                assert_eq!(handler, "Recorder");
                assert_eq!(operation, "handle");
                assert_eq!(source.to_string(), "bad order");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn continue_on_error_runs_everything() {
        let failing = Recorder::new(Behaviour::Fail);
        let after = Recorder::new(Behaviour::Quiet);
        let d = dispatcher(vec![failing, after.clone()]).with_options(DispatchOptions {
            failure_policy: FailurePolicy::ContinueOnError,
            ..Default::default()
        });

        let err = d.dispatch(&placed()).await.unwrap_err();
        assert!(matches!(
            err,
            MessagingError::DispatchFailed { total: 2, ref failures } if failures.len() == 1
        ));
        assert_eq!(after.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handlers_time_out() {
        let d = dispatcher(vec![Recorder::new(Behaviour::Hang)]).with_options(DispatchOptions {
            handler_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        });

        let err = d.dispatch(&placed()).await.unwrap_err();
        assert!(matches!(err, MessagingError::HandlerTimeout { .. }));
    }

    #[tokio::test]
    async fn unhandled_known_type_is_a_noop() {
        let d = dispatcher(vec![Recorder::new(Behaviour::Quiet)]);
        let outcome = d
            .dispatch(&InboundMessage::new("orders.cancelled", b"{}".to_vec()))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert_eq!(d.metrics().unhandled(), 1);
    }

    #[tokio::test]
    async fn protocol_violations_are_rejected() {
        let d = dispatcher(vec![Recorder::new(Behaviour::Quiet)]);

        let unknown = InboundMessage::new("orders.refunded", b"{}".to_vec());
        assert!(matches!(
            d.dispatch(&unknown).await,
            Err(MessagingError::UnknownMessageType(t)) if t == "orders.refunded"
        ));

        let untyped = InboundMessage {
            body: b"{}".to_vec(),
            ..Default::default()
        };
        assert!(matches!(
            d.dispatch(&untyped).await,
            Err(MessagingError::MissingMessageType)
        ));

        let garbage = InboundMessage::new("orders.placed", b"[]".to_vec());
        assert!(matches!(
            d.dispatch(&garbage).await,
            Err(MessagingError::Serialization(_))
        ));
        assert_eq!(d.metrics().rejected(), 3);
    }
}
