// 設定項目
// SPDX-License-Identifier: MPL-2.0
//
use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// アクティブスキャンの方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ScanMode {
    /// ED スキャン
    EdScan,
    /// IE 付きアクティブスキャン
    ActiveScanWithIe,
    /// IE なしアクティブスキャン
    ActiveScanWithoutIe,
}

impl ScanMode {
    /// SKSCAN コマンドの第一引数として送る値
    pub fn as_mode_digit(self) -> u8 {
        match self {
            ScanMode::EdScan => 0,
            ScanMode::ActiveScanWithIe => 2,
            ScanMode::ActiveScanWithoutIe => 3,
        }
    }
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::ActiveScanWithIe
    }
}

/// セッション全体の挙動を調整するノブ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub scan_mode: ScanMode,
    pub channel_mask: u32,
    pub default_timeout_ms: u32,
    pub default_delay_ms: u32,
    pub scan_duration_cap: u8,
    /// trueの場合、EVENT 21のパラメータバイトを厳密に検査し、送信失敗(01)なら
    /// waitErxudpへは進まない。falseは元実装の(おそらくバグの)挙動を保つ。
    pub strict_udp_sent_check: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            scan_mode: ScanMode::ActiveScanWithIe,
            channel_mask: 0xFFFF_FFFF,
            default_timeout_ms: 5_000,
            default_delay_ms: 100,
            scan_duration_cap: 14,
            strict_udp_sent_check: false,
        }
    }
}

impl SessionConfig {
    /// TOML設定ファイルを読み込む。`#[serde(default)]` により、ファイルに
    /// 書かれていない項目は `Default::default()` の値で補われる。
    pub fn load_from_file(path: &Path) -> Result<Self, DriverError> {
        let text = std::fs::read_to_string(path)?;
        let config = toml::from_str(&text)?;
        Ok(config)
    }
}
