use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::event::MessageType;
use parley_core::queue::EventQueue;
use parley_xmpp::xmpp_parsers::jid::Jid;
use parley_xmpp::xmpp_parsers::message::Message;

/// What to send: plain text, or a caller-built message that is re-addressed
/// on delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingBody {
    Text(String),
    Stanza(Box<Message>),
}

impl From<&str> for OutgoingBody {
    fn from(value: &str) -> Self {
        OutgoingBody::Text(value.to_string())
    }
}

impl From<String> for OutgoingBody {
    fn from(value: String) -> Self {
        OutgoingBody::Text(value)
    }
}

impl From<Message> for OutgoingBody {
    fn from(value: Message) -> Self {
        OutgoingBody::Stanza(Box::new(value))
    }
}

/// A message waiting for its destination to accept our subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub to: Jid,
    pub body: OutgoingBody,
    pub message_type: MessageType,
}

impl PendingMessage {
    pub fn new(to: Jid, body: impl Into<OutgoingBody>, message_type: MessageType) -> Self {
        Self {
            to,
            body: body.into(),
            message_type,
        }
    }
}

/// The delivery side the worker drives.
pub trait DeferredDelivery: Send + Sync + 'static {
    type Error: Display + Send;

    fn is_subscribed(&self, to: &Jid) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    fn deliver(&self, message: PendingMessage)
    -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub requeued: usize,
}

/// Try `first` and everything currently queued once. Messages that cannot be
/// delivered yet go back on the queue unchanged.
pub async fn process_batch<D>(
    queue: &EventQueue<PendingMessage>,
    first: PendingMessage,
    delivery: &D,
) -> DeliveryReport
where
    D: DeferredDelivery,
{
    let mut batch = vec![first];
    batch.extend(queue.drain(usize::MAX));

    let mut report = DeliveryReport::default();
    for message in batch {
        let subscribed = match delivery.is_subscribed(&message.to).await {
            Ok(subscribed) => subscribed,
            Err(error) => {
                warn!(to = %message.to, error = %error, "Subscription lookup failed; keeping message queued");
                false
            }
        };

        if !subscribed {
            queue.push(message);
            report.requeued += 1;
            continue;
        }

        let to = message.to.clone();
        match delivery.deliver(message.clone()).await {
            Ok(()) => {
                debug!(to = %to, "Delivered deferred message");
                report.delivered += 1;
            }
            Err(error) => {
                warn!(to = %to, error = %error, "Deferred delivery failed; keeping message queued");
                queue.push(message);
                report.requeued += 1;
            }
        }
    }
    report
}

/// Background task flushing `pending_messages` once contacts subscribe.
pub struct DeferredDeliveryWorker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DeferredDeliveryWorker {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    pub fn spawn<D>(
        queue: Arc<EventQueue<PendingMessage>>,
        delivery: Arc<D>,
        interval: Duration,
    ) -> Self
    where
        D: DeferredDelivery,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            run(queue, delivery, interval, token).await;
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the worker and wait for it to exit. A batch in progress is
    /// finished first.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(error) = handle.await {
                warn!(error = %error, "Deferred delivery worker ended abnormally");
            }
        }
    }
}

impl Drop for DeferredDeliveryWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<D>(
    queue: Arc<EventQueue<PendingMessage>>,
    delivery: Arc<D>,
    interval: Duration,
    cancel: CancellationToken,
) where
    D: DeferredDelivery,
{
    info!(interval_secs = interval.as_secs(), "Deferred delivery worker started");
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            message = queue.pop() => message,
        };

        let report = process_batch(&queue, first, delivery.as_ref()).await;
        info!(
            delivered = report.delivered,
            requeued = report.requeued,
            "Deferred delivery cycle finished"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("Deferred delivery worker stopped");
}
