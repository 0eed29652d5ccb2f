//! Example: create, update and delete a person.
//!
//! This example shows how to:
//! - Describe an endpoint with delta updates and change messages
//! - Save a new object and read back the server's version
//! - Change a field and save the difference
//! - Delete with a reason
//!
//! Set `FS_APP_KEY`, `FS_USERNAME` and `FS_PASSWORD`, then run with:
//! `cargo run --example change_objects`

use lineage::{
    AuthGrant, ChangeObject, Client, DeleteOptions, Endpoint, Environment, Error, FileTokenStore,
    Kind, SaveOptions,
};
use serde_json::json;
use std::sync::Arc;

fn env(name: &str) -> Result<String, Error> {
    std::env::var(name).map_err(|_| Error::ConfigurationError(format!("{} is not set", name)))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lineage=info,change_objects=info")),
        )
        .init();

    let token_file = std::env::temp_dir().join("lineage-demo-token.json");
    let client = Client::builder()
        .environment(Environment::Sandbox)
        .app_key(env("FS_APP_KEY")?)
        .token_store(Arc::new(FileTokenStore::new(&token_file)))
        .build()?;

    if client.restore_token().await?.is_none() {
        client
            .acquire_token(AuthGrant::Password {
                username: env("FS_USERNAME")?,
                password: env("FS_PASSWORD")?,
            })
            .await?;
    }

    let persons = Endpoint::new("/platform/tree/persons", Kind::PERSON_RESPONSE)
        .envelope("persons")
        .change_messages(true)
        .require("gender");

    let draft = client.mapper().map_value(
        json!({
            "living": false,
            "gender": {"type": "http://gedcomx.org/Female"},
            "names": [{
                "preferred": true,
                "nameForms": [{"fullText": "Anastasia Aleksandrova"}]
            }]
        }),
        &Kind::PERSON,
    );
    let person = ChangeObject::new(persons, draft);

    println!("=== Create ===");
    person
        .save(
            &client,
            SaveOptions {
                refresh: true,
                change_message: Some("Added from a family letter".into()),
            },
        )
        .await?;
    println!("State: {:?}", person.state());
    println!("Id:    {:?}", person.id());
    println!("Name:  {:?}", person.object().get("display_name"));

    println!("\n=== Update ===");
    person.set("living", json!(true))?;
    println!("Dirty fields: {:?}", person.dirty_fields());
    person
        .save(
            &client,
            SaveOptions {
                refresh: false,
                change_message: Some("Still living per letter".into()),
            },
        )
        .await?;
    println!("State: {:?}", person.state());

    println!("\n=== Delete ===");
    person
        .delete(
            &client,
            DeleteOptions {
                change_message: Some("Demo record".into()),
            },
        )
        .await?;
    println!("State: {:?}", person.state());

    match person.delete(&client, DeleteOptions::default()).await {
        Err(Error::ObjectDeleted) => println!("Second delete refused locally"),
        other => println!("Unexpected: {:?}", other),
    }

    Ok(())
}
