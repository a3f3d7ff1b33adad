//! Typed convenience wrappers.
//!
//! Each wrapper formats an argv and interprets the typed reply; they are
//! deliberately mechanical. Anything not wrapped here can be issued through
//! [`Client::command`] with a hand-built [`Command`].

use bytes::Bytes;
use tracing::instrument;

use super::Client;
use crate::{cmd::{Command, ToArg},
            error::{Error, Result},
            reply::Reply};

impl Client {
    /// Pings the server; resolves to the status line.
    #[instrument(level = "debug", skip(self))]
    pub async fn ping(&self) -> Result<String> {
        expect_status(self.command(Command::new("PING")).await?)
    }

    /// Gets the value of a key, or `None` if the key does not exist.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        optional_bulk(self.command(Command::new("GET").arg(key)).await?)
    }

    /// Sets a key to a value.
    #[instrument(level = "debug", skip(self, value))]
    pub async fn set(&self, key: &str, value: impl ToArg) -> Result<()> {
        expect_status(self.command(Command::new("SET").arg(key).arg(value)).await?)?;
        Ok(())
    }

    /// Sets a key to a value that expires after `seconds`.
    #[instrument(level = "debug", skip(self, value))]
    pub async fn set_ex(&self, key: &str, value: impl ToArg, seconds: u64) -> Result<()> {
        expect_status(
            self.command(Command::new("SETEX").arg(key).arg(seconds).arg(value))
                .await?,
        )?;
        Ok(())
    }

    /// Deletes keys; resolves to the number actually removed.
    pub async fn del(&self, keys: &[&str]) -> Result<i64> {
        let mut cmd = Command::new("DEL");
        for key in keys {
            cmd = cmd.arg(*key);
        }
        expect_integer(self.command(cmd).await?)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(expect_integer(self.command(Command::new("EXISTS").arg(key)).await?)? != 0)
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        expect_integer(self.command(Command::new("INCR").arg(key)).await?)
    }

    /// Places a time-to-live on a key; `false` when the key does not exist.
    pub async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        Ok(expect_integer(
            self.command(Command::new("EXPIRE").arg(key).arg(seconds)).await?,
        )? != 0)
    }

    pub async fn ttl(&self, key: &str) -> Result<i64> {
        expect_integer(self.command(Command::new("TTL").arg(key)).await?)
    }

    pub async fn hset(&self, key: &str, field: &str, value: impl ToArg) -> Result<i64> {
        expect_integer(
            self.command(Command::new("HSET").arg(key).arg(field).arg(value))
                .await?,
        )
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        optional_bulk(self.command(Command::new("HGET").arg(key).arg(field)).await?)
    }

    /// All fields and values of a hash as `(field, value)` pairs.
    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>> {
        let items = expect_items(self.command(Command::new("HGETALL").arg(key)).await?)?;
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((text(&field), bulk(value)?));
        }
        Ok(pairs)
    }

    pub async fn lpush(&self, key: &str, value: impl ToArg) -> Result<i64> {
        expect_integer(self.command(Command::new("LPUSH").arg(key).arg(value)).await?)
    }

    pub async fn rpush(&self, key: &str, value: impl ToArg) -> Result<i64> {
        expect_integer(self.command(Command::new("RPUSH").arg(key).arg(value)).await?)
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let items = expect_items(
            self.command(Command::new("LRANGE").arg(key).arg(start).arg(stop))
                .await?,
        )?;
        items.into_iter().map(bulk).collect()
    }

    pub async fn sadd(&self, key: &str, member: impl ToArg) -> Result<i64> {
        expect_integer(self.command(Command::new("SADD").arg(key).arg(member)).await?)
    }

    pub async fn srem(&self, key: &str, member: impl ToArg) -> Result<i64> {
        expect_integer(self.command(Command::new("SREM").arg(key).arg(member)).await?)
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<Bytes>> {
        let items = expect_items(self.command(Command::new("SMEMBERS").arg(key)).await?)?;
        items.into_iter().map(bulk).collect()
    }

    pub async fn zadd(&self, key: &str, score: f64, member: impl ToArg) -> Result<i64> {
        expect_integer(
            self.command(Command::new("ZADD").arg(key).arg(score).arg(member))
                .await?,
        )
    }

    pub async fn zscore(&self, key: &str, member: impl ToArg) -> Result<Option<f64>> {
        match optional_bulk(self.command(Command::new("ZSCORE").arg(key).arg(member)).await?)? {
            None => Ok(None),
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Some)
                .ok_or(Error::UnexpectedReply {
                    expected: "a floating point score",
                    actual:   "bulk string",
                }),
        }
    }

    /// Publishes a message; resolves to the number of receiving subscribers.
    #[instrument(level = "debug", skip(self, message))]
    pub async fn publish(&self, channel: &str, message: impl ToArg) -> Result<i64> {
        expect_integer(
            self.command(Command::new("PUBLISH").arg(channel).arg(message))
                .await?,
        )
    }
}

fn expect_status(reply: Reply) -> Result<String> {
    match reply {
        Reply::Status(s) => Ok(s),
        other => Err(unexpected("a status line", &other)),
    }
}

fn expect_integer(reply: Reply) -> Result<i64> {
    reply
        .as_integer()
        .ok_or_else(|| unexpected("an integer", &reply))
}

fn optional_bulk(reply: Reply) -> Result<Option<Bytes>> {
    match reply {
        Reply::Nil => Ok(None),
        Reply::Bulk(b) => Ok(Some(b)),
        other => Err(unexpected("a bulk string or nil", &other)),
    }
}

fn expect_items(reply: Reply) -> Result<Vec<Reply>> {
    let kind = reply.kind();
    reply
        .into_items()
        .ok_or(Error::UnexpectedReply {
            expected: "an aggregate",
            actual:   kind,
        })
}

fn bulk(reply: Reply) -> Result<Bytes> {
    match reply {
        Reply::Bulk(b) => Ok(b),
        other => Err(unexpected("a bulk string", &other)),
    }
}

fn text(reply: &Reply) -> String {
    reply.as_str().map_or_else(String::new, str::to_string)
}

fn unexpected(expected: &'static str, actual: &Reply) -> Error {
    Error::UnexpectedReply {
        expected,
        actual: actual.kind(),
    }
}
