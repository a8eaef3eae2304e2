//! CLI tool to store the admin password in the config store
//!
//! Usage: cargo run --bin setup_password -- <password>
//!
//! The daemon socket is taken from `UCI_SOCKET_PATH` like the server does.
//! Storing the password also completes the wizard's password step.

use foris_web::{config::AppConfig, services::auth::PasswordService, uci_client::UciClient};
use std::env;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <password>", args[0]);
        std::process::exit(1);
    }

    let password = &args[1];

    let result: anyhow::Result<()> = async {
        let config = AppConfig::load()?;
        let store = UciClient::new(&config.store)?;
        if PasswordService::password_exists(&store).await? {
            println!("Replacing the existing password");
        }
        PasswordService::store_password(&store, password).await
    }
    .await;

    match result {
        Ok(()) => {
            println!("Password stored successfully");
        }
        Err(e) => {
            eprintln!("Failed to store password: {e:#}");
            std::process::exit(1);
        }
    }
}
