use redis_bridge::{client, Command, Result};

#[tokio::main]
pub async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let client = client::connect("127.0.0.1:6379").await?;

    println!("PING -> {:?}", client.command(Command::new("PING")).await?);

    client.set("greeting", "hello").await?;
    if let Some(value) = client.get("greeting").await? {
        println!("greeting = {}", String::from_utf8_lossy(&value));
    }

    let mut subscription = client.subscribe(&["news"], &[]).await?;
    let publisher = client::connect("127.0.0.1:6379").await?;
    publisher.publish("news", "it works").await?;
    if let Some(message) = subscription.next().await {
        println!("{} -> {}", message.channel, String::from_utf8_lossy(&message.payload));
    }

    subscription.close();
    publisher.close();
    client.close();
    Ok(())
}
