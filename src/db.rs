use mongodb::{options::ClientOptions, Client};
use std::env;

pub async fn get_db() -> mongodb::error::Result<mongodb::Database> {
    // Load the MongoDB connection string from an environment variable:
    let client_uri =
        env::var("MONGODB_URI").expect("You must set the MONGODB_URI environment var!");

    let options = ClientOptions::parse(&client_uri).await?;
    let client = Client::with_options(options)?;

    Ok(client.database("prodline"))
}
