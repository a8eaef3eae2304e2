use actix_files::Files;
use actix_server::ServerHandle;
use actix_web::{
    App, HttpServer,
    cookie::Key,
    web::{self, Data},
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use foris_web::{
    api::{self, Api},
    config::AppConfig,
    middleware::{SecurityHeadersMw, session_middleware},
    outcome::{ErrorKind, Outcome},
    session_store::MemorySessionStore,
    uci_client::UciClient,
};
use log::{debug, error, info, warn};
use std::io::Write;
use tokio::signal::unix::{SignalKind, signal};

type UiApi = Api<UciClient>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = AppConfig::load().context("failed to load configuration")?;
    let store = UciClient::new(&config.store).context("failed to create config store client")?;

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let (server_handle, server_task) = run_server(UiApi::new(store, config))?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
        },
        _ = sigterm.recv() => {
            debug!("SIGTERM received");
        },
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    }

    info!("shutting down");
    server_handle.stop(true).await;
    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!(
        "module version: {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHORT_REV")
    );
}

fn run_server(
    api: UiApi,
) -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let config = api.config.clone();
    let ui = config.ui.clone();
    let session_key = Key::generate();
    let sessions = MemorySessionStore::new();

    if config.debug {
        warn!(
            "debug mode, serving static files from {}",
            config.paths.static_dir.display()
        );
    }

    let server = HttpServer::new(move || {
        let app = App::new()
            .wrap(SecurityHeadersMw)
            .wrap(session_middleware(
                &config.session,
                session_key.clone(),
                sessions.clone(),
            ))
            .app_data(Data::new(api.clone()))
            .configure(api::configure::<UciClient>);

        let app = if config.debug {
            app.service(Files::new("/static", &config.paths.static_dir))
        } else {
            app
        };

        app.default_service(web::route().to(not_found))
    })
    .bind((ui.host.as_str(), ui.port))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    Ok((server.handle(), tokio::spawn(server)))
}

async fn not_found() -> actix_web::HttpResponse {
    Outcome::<()>::Error(ErrorKind::NotFound("not found".to_string())).into_response("/")
}
