use std::path::PathBuf;
use std::sync::Arc;

use backsaas_engine::hooks::HookRegistry;
use backsaas_engine::registry;
use backsaas_engine::routes::engine_routes;
use backsaas_engine::state::EngineState;
use backsaas_engine::store::TenantStore;
use backsaas_core::Schema;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Where the engine reads its schema document from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemaSource {
    /// A YAML/JSON document on disk.
    File,
    /// The platform schema registry (the `schemas` table).
    Registry,
}

/// Schema-driven CRUD API server for one tenant.
#[derive(Debug, Parser)]
#[command(name = "backsaas-engine")]
struct Args {
    /// The tenant this engine instance serves.
    #[arg(long, env = "TENANT_ID")]
    tenant_id: String,

    /// Where to load the schema from.
    #[arg(long, value_enum, default_value = "file", env = "SCHEMA_SOURCE")]
    schema_source: SchemaSource,

    /// Path to the schema document (required with --schema-source file).
    #[arg(long, env = "SCHEMA_PATH")]
    schema_path: Option<PathBuf>,

    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(message) = run(args).await {
        tracing::error!("{message}");
        std::process::exit(1);
    }
}

/// Startup sequence: load & validate schema, open the store, provision
/// tables, register routes, listen. Any step failing aborts startup.
async fn run(args: Args) -> Result<(), String> {
    let schema = load_schema(&args).await?;

    let report = backsaas_core::validate(&schema);
    if !report.is_ok() {
        for issue in report.issues() {
            tracing::error!(tenant_id = %args.tenant_id, "schema issue: {issue}");
        }
        return Err(format!(
            "schema for tenant '{}' failed validation with {} issue(s)",
            args.tenant_id,
            report.issues().len()
        ));
    }

    let hooks = HookRegistry::from_schema(&schema)
        .map_err(|e| format!("hook registration failed: {e}"))?;

    let schema = Arc::new(schema);
    let store = TenantStore::connect(&args.database_url, &args.tenant_id, Arc::clone(&schema))
        .await
        .map_err(|e| format!("store connection failed: {e}"))?;

    store
        .ensure_tables()
        .await
        .map_err(|e| format!("provisioning failed: {e}"))?;

    tracing::info!(
        tenant_id = %args.tenant_id,
        service = %schema.service.name,
        version = schema.version,
        entities = schema.entities.len(),
        "schema provisioned"
    );

    let state = EngineState::new(Arc::new(store), Arc::new(hooks));
    let app = engine_routes().with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;
    tracing::info!(%addr, tenant_id = %args.tenant_id, "engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {e}"))
}

async fn load_schema(args: &Args) -> Result<Schema, String> {
    match args.schema_source {
        SchemaSource::File => {
            let path = args
                .schema_path
                .as_deref()
                .ok_or("--schema-path is required with --schema-source file")?;
            Schema::from_file(path).map_err(|e| e.to_string())
        }
        SchemaSource::Registry => {
            // The system tenant bootstraps from the built-in platform
            // schema: its `schemas` table is where every other tenant's
            // registry rows live, so no row can precede it.
            if args.tenant_id == registry::SYSTEM_TENANT {
                return registry::platform_schema().map_err(|e| e.to_string());
            }
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(2)
                .connect(&args.database_url)
                .await
                .map_err(|e| format!("registry connection failed: {e}"))?;
            registry::load_from_registry(&pool, &args.tenant_id)
                .await
                .map_err(|e| format!("registry load failed: {e}"))
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
