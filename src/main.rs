// Módulos de la aplicación
mod actions;
mod api;
mod app_state;
mod config;
mod llm;
mod mindmap;
mod models;
mod mongo_store;
mod sqlite_store;
mod store;

use std::sync::Arc;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, BackendPair};
use crate::llm::LlmClient;
use crate::mongo_store::MongoStore;
use crate::sqlite_store::SqliteStore;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Abrir los backends de persistencia y emparejarlos con su proveedor LLM
    let sqlite_store =
        SqliteStore::open(&cfg.sqlite_path).expect("Error abriendo la base de datos SQLite");
    let sqlite = BackendPair {
        store: Arc::new(sqlite_store),
        llm: LlmClient::new(cfg.llm_provider_sqlite.clone(), cfg.llm_chat_model.clone()),
    };

    let mongo = match &cfg.mongo_uri {
        Some(uri) => {
            let store = MongoStore::connect(uri, &cfg.mongo_db, &cfg.mongo_collection)
                .await
                .expect("Error conectando a MongoDB");
            Some(BackendPair {
                store: Arc::new(store),
                llm: LlmClient::new(cfg.llm_provider_mongo.clone(), cfg.llm_chat_model.clone()),
            })
        }
        None => {
            info!("MONGO_URI no configurado; solo estará disponible el backend sqlite.");
            None
        }
    };

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        sqlite,
        mongo,
    };

    // 5. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("public"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("Error abriendo el puerto del servidor");
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // 7. Apagado ordenado con ctrl-c
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error sirviendo la aplicación");

    info!("✅ Servidor cerrado correctamente.");
}
