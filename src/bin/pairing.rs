// アクティブスキャンを経てスマートメーターとPANAセッションを確立する。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::{Context, bail};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use wisun_broute::config::{ScanMode, SessionConfig};
use wisun_broute::serial::UartSerialPort;
use wisun_broute::state::init::InitState;
use wisun_broute::Session;

/// 接続対象のスマートメーターを探してPANAセッションを確立する
#[derive(Parser, Debug)]
#[command(name = "pairing")]
#[command(version, about, long_about = None)]
struct Cli {
    /// シリアルデバイス名
    #[arg(short = 'D', long, default_value = "/dev/ttyUSB0")]
    device: String,

    /// ボーレート
    #[arg(long, default_value_t = 115_200)]
    baud_rate: u32,

    /// initialize_tickを呼び出す最大回数
    #[arg(long, default_value_t = 600)]
    max_ticks: usize,

    /// 設定ファイル(TOML)。指定した項目以外は既定値で補われる。
    #[arg(short = 'S', long)]
    config_file: Option<String>,

    /// スキャン方式。設定ファイルの値を上書きする。
    #[arg(long)]
    scan_mode: Option<ScanMode>,

    /// スキャン対象チャンネルマスク。設定ファイルの値を上書きする。
    #[arg(long)]
    channel_mask: Option<u32>,

    /// スキャン継続時間の上限(1-14)。設定ファイルの値を上書きする。
    #[arg(long)]
    scan_duration_cap: Option<u8>,

    /// UdpSentイベントのパラメータバイトを厳密に検査する。
    #[arg(long)]
    strict_udp_sent_check: bool,

    /// ログを詳細にする(複数指定で段階的に詳細化)。`RUST_LOG`が設定されていれば
    /// そちらを優先する。
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// ルートBID(32文字)
    id: String,

    /// ルートBパスワード(12文字)
    password: String,
}

/// 設定ファイル(あれば)をCLIフラグで上書きして組み立てる。
fn build_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config_file {
        Some(path) => SessionConfig::load_from_file(Path::new(path))
            .with_context(|| format!("failed to load config file \"{path}\""))?,
        None => SessionConfig::default(),
    };
    if let Some(scan_mode) = cli.scan_mode {
        config.scan_mode = scan_mode;
    }
    if let Some(channel_mask) = cli.channel_mask {
        config.channel_mask = channel_mask;
    }
    if let Some(cap) = cli.scan_duration_cap {
        config.scan_duration_cap = cap;
    }
    if cli.strict_udp_sent_check {
        config.strict_udp_sent_check = true;
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = build_config(&cli)?;

    let port = UartSerialPort::open(&cli.device, cli.baud_rate)
        .with_context(|| format!("Failed to open \"{}\".", cli.device))?;

    let mut session = Session::new(&cli.id, &cli.password, Box::new(port))?.with_config(config);
    session.set_status_change_callback(|state: InitState| {
        tracing::info!("init state -> {:?}", state);
    });

    for _ in 0..cli.max_ticks {
        if session.initialize_tick()? {
            println!("joined smart meter, init state = {:?}", session.get_init_state());
            return Ok(());
        }
    }

    bail!(
        "did not reach readySmartMeter within {} ticks (stuck at {:?})",
        cli.max_ticks,
        session.get_init_state()
    )
}
