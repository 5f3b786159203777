use recap_server::config::Config;
use recap_server::db::Store;
use recap_server::server::{self, AppState};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let store = {
        let path = match &config.database_path {
            Some(path) => path.clone(),
            None => match Store::default_path() {
                Ok(path) => path,
                Err(e) => {
                    log::error!("could not resolve database path: {}", e);
                    std::process::exit(1);
                }
            },
        };
        match Store::open_at(path.clone()) {
            Ok(store) => {
                log::info!("store opened at {}", path.display());
                store
            }
            Err(e) => {
                log::error!("could not open store: {}", e);
                std::process::exit(1);
            }
        }
    };

    let state = match AppState::build(config, store) {
        Ok(state) => state,
        Err(e) => {
            log::error!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run(state).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
