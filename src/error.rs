// エラー型定義
// SPDX-License-Identifier: MPL-2.0
//
use thiserror::Error;

/// 状態機械の外側、つまりシリアルポートや設定ファイルの取り扱いで発生するエラー
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    #[error("serial port error")]
    SerialPort(#[from] serialport::Error),
    #[error("config file error")]
    Config(#[from] toml::de::Error),
    #[error("invalid credentials: {0}")]
    Credentials(String),
}

/// 状態機械の内側で発生し、状態遷移に吸収されるエラーの種別。
///
/// どの値も状態機械の外には出てこない。ハンドラがこの値をもとに次状態を選ぶ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbsorbedError {
    #[error("module rejected the command (FAIL ER)")]
    ProtocolReject(u8),
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("response did not match the expected token shape")]
    UnexpectedFormat,
    #[error("ECHONET Lite payload could not be decoded")]
    DecodeFailure,
    #[error("PANA authentication was rejected")]
    PanaRejected,
}
