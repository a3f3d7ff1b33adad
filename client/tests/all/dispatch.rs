//! Dispatch-core behavior against the scripted engine.

use bytes::Bytes;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use redis_bridge::{Command, Error, RawReply, Reply};

use super::support::mock_client;

#[tokio::test]
async fn command_completes_with_its_reply() {
    let (client, mut handle) = mock_client(false);

    let pong = client.command(Command::new("PING"));
    handle.wait_for_submits(1).await;
    handle.reply(RawReply::Status(Bytes::from_static(b"PONG")));

    assert_eq!(pong.await.unwrap(), Reply::Status("PONG".to_string()));
    client.close();
}

#[tokio::test]
async fn replies_resolve_in_submission_order() {
    let (client, handle) = mock_client(true);

    let futures: Vec<_> = (0..100)
        .map(|i| client.command(Command::new("ECHO").arg(format!("payload-{i}"))))
        .collect();
    let replies = join_all(futures).await;

    for (i, reply) in replies.into_iter().enumerate() {
        let expected = Bytes::from(format!("payload-{i}").into_bytes());
        assert_eq!(reply.unwrap(), Reply::Bulk(expected));
    }
    assert_eq!(handle.submits(), 100);
    client.close();
}

#[tokio::test]
async fn turn_local_commands_pipeline_into_few_writes() {
    let (client, handle) = mock_client(true);

    // All issued in one scheduler turn: enqueued synchronously, flushed by a
    // single end-of-turn microtask.
    let futures: Vec<_> = (0..10_000)
        .map(|i| client.command(Command::new("SET").arg(format!("key-{i}")).arg(i as i64)))
        .collect();
    let replies = join_all(futures).await;

    assert_eq!(replies.len(), 10_000);
    assert!(replies.iter().all(Result::is_ok));
    assert_eq!(handle.submits(), 10_000);
    assert!(
        handle.write_batches() <= 3,
        "expected a pipelined write, saw {} write batches",
        handle.write_batches()
    );
    client.close();
}

#[tokio::test]
async fn error_replies_surface_as_reply_errors() {
    let (client, mut handle) = mock_client(false);

    let fut = client.command(Command::new("GET").arg("k"));
    handle.wait_for_submits(1).await;
    handle.reply(RawReply::Error(Bytes::from_static(b"ERR boom")));

    match fut.await {
        Err(Error::ReplyError(message)) => assert_eq!(message, "ERR boom"),
        other => panic!("expected a reply error, got {other:?}"),
    }
    client.close();
}

#[tokio::test]
async fn nil_replies_are_ordinary_values() {
    let (client, mut handle) = mock_client(false);

    let fut = client.command(Command::new("GET").arg("missing"));
    handle.wait_for_submits(1).await;
    handle.reply(RawReply::Nil);

    assert_eq!(fut.await.unwrap(), Reply::Nil);
    client.close();
}

#[tokio::test]
async fn close_fails_commands_still_in_flight() {
    let (client, handle) = mock_client(false);

    // Never answered: the mock holds the reply forever, like a blocking pop
    // on an empty list would.
    let blocked = client.command(Command::new("BLPOP").arg("empty").arg(0i64));
    handle.wait_for_submits(1).await;

    client.close();
    assert!(matches!(blocked.await, Err(Error::ClientClosed)));

    // Idempotent: a second close is a no-op.
    client.close();

    // Operations after close fail immediately.
    assert!(matches!(
        client.command(Command::new("PING")).await,
        Err(Error::ClientClosed)
    ));
}

#[tokio::test]
async fn every_future_resolves_once_close_returns() {
    let (client, handle) = mock_client(false);

    let futures: Vec<_> = (0..32)
        .map(|_| client.command(Command::new("PING")))
        .collect();
    handle.wait_for_submits(32).await;

    client.close();
    for fut in futures {
        assert!(matches!(fut.await, Err(Error::ClientClosed)));
    }
}

#[tokio::test]
async fn connection_loss_fails_pending_commands() {
    let (client, handle) = mock_client(false);

    let fut = client.command(Command::new("PING"));
    handle.wait_for_submits(1).await;
    handle.hangup();

    assert!(matches!(fut.await, Err(Error::ConnectionLost)));

    // The loop is gone; later commands fail fast instead of hanging.
    assert!(matches!(
        client.command(Command::new("PING")).await,
        Err(Error::ClientClosed)
    ));
}

#[tokio::test]
async fn empty_commands_are_rejected() {
    let (client, _handle) = mock_client(false);

    assert!(matches!(
        client.command(Command::from_args(Vec::new())).await,
        Err(Error::EmptyCommand)
    ));
    client.close();
}

#[tokio::test]
async fn submission_failure_fails_the_command() {
    let (client, handle) = mock_client(false);
    handle.reject_submits(true);

    let fut = client.command(Command::new("PING"));
    match fut.await {
        Err(Error::SubmissionFailed(message)) => {
            assert!(message.contains("scripted submit failure"));
        },
        other => panic!("expected a submission failure, got {other:?}"),
    }
    client.close();
}
