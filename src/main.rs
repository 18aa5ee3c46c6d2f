use clap::Parser;
use element_stats::domain::ports::DocumentSource;
use element_stats::utils::error::ErrorSeverity;
use element_stats::utils::{logger, validation::Validate};
use element_stats::{
    source_from_config, CliConfig, ConnectorConfig, ElementStatsPipeline, EtlEngine, EtlError,
    LocalStorage, PipelineOptions, Result,
};

#[tokio::main]
async fn main() {
    // 缺少參數時 clap 會印出用法並以狀態碼 2 結束
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting element-stats");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    match run(&cli).await {
        Ok(output_path) => {
            tracing::info!("✅ Statistics written successfully!");
            println!("✅ Statistics written successfully!");
            println!("📁 Output saved to: {}", output_path);
        }
        Err(e) => {
            tracing::error!("❌ Run failed: {} (Severity: {:?})", e, e.severity());
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e);
            eprintln!("💡 {}", e.recovery_suggestion());

            std::process::exit(exit_code(&e));
        }
    }
}

async fn run(cli: &CliConfig) -> Result<String> {
    let config_path = cli.config_path.trim();
    tracing::info!("📁 Loading connector configuration from: {}", config_path);

    // 載入並驗證配置
    let config = ConnectorConfig::from_file(config_path)?;
    config.validate()?;
    tracing::debug!("Loaded {} configuration properties", config.len());

    let source = source_from_config(&config)?;
    tracing::info!("📡 Source: {}", source.describe());

    let storage = LocalStorage::new(cli.output_path.clone());
    let pipeline = ElementStatsPipeline::new(source, storage, PipelineOptions::from_config(&config)?);

    EtlEngine::new(pipeline).run().await
}

fn exit_code(error: &EtlError) -> i32 {
    match error.severity() {
        ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    }
}
