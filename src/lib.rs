pub mod cache;
pub mod commands;
pub mod config;
pub mod coords;
pub mod detail_proxy;
pub mod error;
pub mod geocoding;
pub mod http;
pub mod listings;
pub mod route;
pub mod scanner;
pub mod testing;

pub use commands::{RunHandle, RunInfo, Scout};
pub use config::ScoutConfig;
pub use error::{FetchError, ScoutError};
pub use scanner::{ScanEvent, ScanRequest, Terminal};

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "沿路线走廊搜索分类广告，按行输出 JSON 事件")]
struct Cli {
    /// GeoJSON LineString（或编码折线）文件
    route: PathBuf,

    /// 搜索词
    query: String,

    /// 走廊半径（米）
    corridor_m: Option<f64>,

    /// 采样步长（米）
    step_m: Option<f64>,

    #[arg(long)]
    min_price: Option<u32>,

    #[arg(long)]
    max_price: Option<u32>,

    /// 配置文件，默认 scout_config.json
    #[arg(long)]
    config: Option<PathBuf>,
}

pub fn run() {
    env_logger::init();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("创建运行时失败: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(scan(cli)) {
        Ok(Terminal::Done) => {}
        Ok(terminal) => {
            log::warn!("扫描未正常结束: {:?}", terminal);
            std::process::exit(2);
        }
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn scan(cli: Cli) -> Result<Terminal, ScoutError> {
    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    let raw = tokio::fs::read_to_string(&cli.route).await?;
    let points = route::parse_route(&raw)
        .ok_or_else(|| ScoutError::InvalidInput(format!("无法解析路线文件 {}", cli.route.display())))?;

    let request = ScanRequest::new(
        points,
        cli.query,
        cli.step_m.unwrap_or(config.default_step_m),
        cli.corridor_m.unwrap_or(config.default_corridor_m),
    )
    .with_price_range(cli.min_price, cli.max_price);

    let scout = Scout::new(config)?;
    let handle = scout.start(request)?;

    let mut terminal = Terminal::Aborted;
    while let Some(event) = handle.next_event().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("事件序列化失败: {}", e),
        }
        if let ScanEvent::Finished(t) = event {
            terminal = t;
        }
    }

    log::info!("统计: {:?}", scout.stats());
    Ok(terminal)
}
