mod support;

mod dispatch;
mod live;
mod pubsub;
