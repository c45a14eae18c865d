use std::sync::Arc;

use super::channel::ChannelNotifier;
use crate::domain::id::{ChainId, JobId, MarketId};
use crate::domain::job::{JobKind, JobState};
use crate::port::outbound::notifier::{
    AlertKind, ChainAlert, Event, JobEvent, Notifier, NotifierRegistry, Topic,
};

fn alert(kind: AlertKind) -> Event {
    Event::ChainAlert(ChainAlert {
        chain_id: ChainId::new(137),
        kind,
        message: "test".into(),
    })
}

fn job_finished() -> Event {
    Event::JobFinished(JobEvent {
        job_id: JobId::new(),
        market_id: MarketId::new("m1"),
        kind: JobKind::Settle,
        state: JobState::Succeeded,
        attempts: 1,
        broadcasts: vec![],
        last_error: None,
    })
}

#[tokio::test]
async fn test_subscribers_only_see_their_topic_in_order() {
    let notifier = ChannelNotifier::default();
    let mut chain = notifier.subscribe(Topic::Chain);
    let mut jobs = notifier.subscribe(Topic::Job);

    notifier.notify(alert(AlertKind::Degraded));
    notifier.notify(job_finished());
    notifier.notify(alert(AlertKind::Recovered));

    let first = chain.recv().await.unwrap();
    let second = chain.recv().await.unwrap();
    assert!(matches!(first, Event::ChainAlert(a) if a.kind == AlertKind::Degraded));
    assert!(matches!(second, Event::ChainAlert(a) if a.kind == AlertKind::Recovered));
    assert!(matches!(jobs.recv().await.unwrap(), Event::JobFinished(_)));
    assert!(jobs.try_recv().is_err());
}

#[test]
fn test_notify_without_subscribers_is_silent() {
    let notifier = ChannelNotifier::new(1);
    notifier.notify(job_finished());
}

struct Forward(Arc<ChannelNotifier>);

impl Notifier for Forward {
    fn notify(&self, event: Event) {
        self.0.notify(event);
    }
}

#[tokio::test]
async fn test_registry_fans_out_to_channel() {
    let channel = Arc::new(ChannelNotifier::default());
    let mut rx = channel.subscribe(Topic::Chain);
    let mut registry = NotifierRegistry::new();
    registry.register(Box::new(Forward(Arc::clone(&channel))));
    registry.register(Box::new(Forward(Arc::clone(&channel))));

    registry.notify_all(alert(AlertKind::ReorgBeyondConfirmations));

    assert!(rx.recv().await.is_ok());
    assert!(rx.recv().await.is_ok());
    assert_eq!(registry.len(), 2);
}
