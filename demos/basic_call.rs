//! Basic example: sign in, read the current user and a person.
//!
//! This example shows how to:
//! - Configure a client for the sandbox
//! - Obtain an access token with the password grant
//! - Make plumbing calls and read mapped responses
//! - Add an accessor at runtime
//!
//! Set `FS_APP_KEY`, `FS_USERNAME` and `FS_PASSWORD`, then run with:
//! `cargo run --example basic_call`

use lineage::{AuthGrant, Client, ConvenienceRegistry, Environment, Error, Kind};
use serde_json::Value;
use std::time::Duration;

fn env(name: &str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| Error::ConfigurationError(format!("{} is not set", name)))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lineage=debug,basic_call=info")),
        )
        .init();

    let client = Client::builder()
        .environment(Environment::Sandbox)
        .app_key(env("FS_APP_KEY")?)
        .timeout(Duration::from_secs(30))
        .build()?;

    client
        .acquire_token(AuthGrant::Password {
            username: env("FS_USERNAME")?,
            password: env("FS_PASSWORD")?,
        })
        .await?;

    println!("=== Current user ===");
    let response = client
        .get("/platform/users/current", &Kind::USER_RESPONSE)
        .await?;
    let user = response.get("user").unwrap_or(Value::Null);
    println!("Display name: {}", user["displayName"]);
    println!("Tree person:  {}", user["personId"]);
    println!("Status: {}", response.status);
    println!("Latency: {:?}", response.latency);
    println!("Attempts: {}", response.attempts);

    let Some(person_id) = user["personId"].as_str() else {
        println!("User has no tree person");
        return Ok(());
    };

    ConvenienceRegistry::global().register(&Kind::PERSON, "is_living", |person| {
        person.get("living").cloned()
    });

    println!("\n=== Tree person ===");
    let response = client
        .get(format!("/platform/tree/persons/{}", person_id), &Kind::PERSON_RESPONSE)
        .await?;
    if let Some(person) = response.get("person") {
        let person = client.mapper().map_value(person, &Kind::PERSON);
        println!("Accessors: {:?}", person.accessor_names());
        println!("Name:      {:?}", person.get("display_name"));
        println!("Lifespan:  {:?}", person.get("lifespan"));
        println!("Living:    {:?}", person.get("is_living"));
    }

    println!("\n=== Error handling ===");
    match client
        .get("/platform/tree/persons/NOT-A-PERSON", &Kind::PERSON_RESPONSE)
        .await
    {
        Ok(_) => println!("Unexpectedly found a person"),
        Err(e) => println!("Failed with status {:?}: {}", e.status(), e),
    }

    Ok(())
}
