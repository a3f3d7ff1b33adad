//! Subscription behavior against the scripted engine.

use bytes::Bytes;
use pretty_assertions::assert_eq;
use redis_bridge::{Error, RawReply, Subscription};

use super::support::mock_engine;

fn bulk(s: &str) -> RawReply { RawReply::Bulk(Bytes::copy_from_slice(s.as_bytes())) }

fn message(channel: &str, payload: &str) -> RawReply {
    RawReply::Array(vec![bulk("message"), bulk(channel), bulk(payload)])
}

#[tokio::test]
async fn subscription_yields_messages_in_order() {
    let (engine, mut handle) = mock_engine(false);
    let mut subscription = Subscription::connect_with(Box::new(engine), &["c"], &[]).unwrap();
    handle.wait_for_submits(1).await;

    // The confirmation is consumed internally; only messages surface.
    handle.reply(RawReply::Array(vec![bulk("subscribe"), bulk("c"), RawReply::Integer(1)]));
    for i in 0..5 {
        handle.reply(message("c", &format!("payload-{i}")));
    }

    for i in 0..5 {
        let msg = subscription.next().await.unwrap();
        assert_eq!(msg.channel, "c");
        assert_eq!(msg.pattern, None);
        assert_eq!(msg.payload, Bytes::from(format!("payload-{i}").into_bytes()));
    }
    subscription.close();
}

#[tokio::test]
async fn pattern_subscriptions_carry_the_pattern() {
    let (engine, mut handle) = mock_engine(false);
    let mut subscription =
        Subscription::connect_with(Box::new(engine), &[], &["news.*"]).unwrap();
    handle.wait_for_submits(1).await;

    handle.reply(RawReply::Array(vec![
        bulk("psubscribe"),
        bulk("news.*"),
        RawReply::Integer(1),
    ]));
    handle.reply(RawReply::Array(vec![
        bulk("pmessage"),
        bulk("news.*"),
        bulk("news.tech"),
        bulk("breaking"),
    ]));

    let msg = subscription.next().await.unwrap();
    assert_eq!(msg.channel, "news.tech");
    assert_eq!(msg.pattern.as_deref(), Some("news.*"));
    assert_eq!(msg.payload, Bytes::from_static(b"breaking"));
    subscription.close();
}

#[tokio::test]
async fn empty_subscription_is_rejected() {
    let (engine, _handle) = mock_engine(false);
    assert!(matches!(
        Subscription::connect_with(Box::new(engine), &[], &[]),
        Err(Error::EmptySubscription)
    ));
}

#[tokio::test]
async fn subscription_ends_when_the_connection_drops() {
    let (engine, mut handle) = mock_engine(false);
    let mut subscription = Subscription::connect_with(Box::new(engine), &["c"], &[]).unwrap();
    handle.wait_for_submits(1).await;

    handle.reply(message("c", "last words"));
    assert!(subscription.next().await.is_some());

    handle.hangup();
    assert!(subscription.next().await.is_none());
}
