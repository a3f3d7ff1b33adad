//! End-to-end tests against a real server.
//!
//! These need a redis-server listening on 127.0.0.1:6379 and are ignored by
//! default; run them with `cargo test -- --ignored`.

use bytes::Bytes;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use redis_bridge::{client, Command, Reply, Result};

fn server_addr() -> &'static str { "127.0.0.1:6379" }

#[tokio::test]
#[ignore = "requires a running redis-server"]
async fn echo() -> Result<()> {
    let client = client::connect(server_addr()).await?;
    let reply = client.command(Command::new("PING")).await?;
    assert_eq!(reply, Reply::Status("PONG".to_string()));
    client.close();
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running redis-server"]
async fn set_then_get() -> Result<()> {
    let client = client::connect(server_addr()).await?;
    client.set("redis-bridge:live:k", "v").await?;
    assert_eq!(
        client.get("redis-bridge:live:k").await?,
        Some(Bytes::from_static(b"v"))
    );
    client.close();
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running redis-server"]
async fn binary_keys_survive_the_round_trip() -> Result<()> {
    let client = client::connect(server_addr()).await?;
    let payload = b"\x00\r\n\x00";
    client.set("redis-bridge:live:bin", &payload[..]).await?;
    assert_eq!(
        client.get("redis-bridge:live:bin").await?,
        Some(Bytes::from_static(payload))
    );
    client.close();
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running redis-server"]
async fn turn_local_commands_pipeline() -> Result<()> {
    let client = client::connect(server_addr()).await?;
    let futures: Vec<_> = (0..10_000)
        .map(|i| {
            client.command(
                Command::new("SET")
                    .arg(format!("redis-bridge:live:pipe:{i}"))
                    .arg(i as i64),
            )
        })
        .collect();
    let replies = join_all(futures).await;
    assert!(replies.iter().all(std::result::Result::is_ok));
    client.close();
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running redis-server"]
async fn pubsub_delivers_published_messages_in_order() -> Result<()> {
    let subscriber = client::connect(server_addr()).await?;
    let mut subscription = subscriber.subscribe(&["redis-bridge:live:chan"], &[]).await?;

    // Give the SUBSCRIBE a moment to reach the server before publishing.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let publisher = client::connect(server_addr()).await?;
    for i in 0..5 {
        publisher
            .publish("redis-bridge:live:chan", format!("payload-{i}"))
            .await?;
    }

    for i in 0..5 {
        let msg = subscription.next().await.expect("subscription ended early");
        assert_eq!(msg.channel, "redis-bridge:live:chan");
        assert_eq!(msg.payload, Bytes::from(format!("payload-{i}").into_bytes()));
    }

    subscription.close();
    publisher.close();
    subscriber.close();
    Ok(())
}
