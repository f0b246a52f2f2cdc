use parley_config::ParleyConfig;

/// Create or upgrade the schema of the configured database.
pub async fn migrate(config: &ParleyConfig) -> anyhow::Result<()> {
    let pool =
        parley_conversations::connect(&config.database.url, config.database.max_connections)
            .await?;
    parley_conversations::run_migrations(&pool).await?;
    pool.close().await;
    println!("Migrations applied to {}", config.database.url);
    Ok(())
}
