use liant::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    println!("liant: entity graph JSON server");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    if config.seed.load_seed_data {
        println!("Loading seed data...");
    }
    let view = liant::build_view(&config)?;
    println!(
        "Serving {} entity types",
        view.registry().types().count()
    );

    liant::run_server(view, &config).await
}
