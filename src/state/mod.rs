// 初期化/通信の状態機械
// SPDX-License-Identifier: MPL-2.0
//
//! 初期化シーケンス(`InitState`)と要求/応答の相関(`CommState`)という
//! 二つの独立した状態機械を、同じティック駆動の考え方で動かす。
//! どちらも「1回の呼び出しにつき高々1回の遷移」という規律に従う。
pub mod comm;
pub mod init;

pub use comm::{CommMachine, CommOutcome, CommState};
pub use init::{InitMachine, InitOutcome, InitState};

/// スキャンとPANA認証を通じて少しずつ埋まっていく、隣接ノードの通信パラメータ。
/// すべてモジュールが送ってきたASCIIトークンをそのまま保持し、書き戻すときも
/// そのまま使う。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommunicationParameter {
    pub channel: Option<String>,
    pub channel_page: Option<String>,
    pub pan_id: Option<String>,
    pub mac_address: Option<String>,
    pub ipv6_address: Option<String>,
    pub dest_ipv6_address: Option<String>,
    pub lqi: Option<String>,
    pub pair_id: Option<String>,
}

impl CommunicationParameter {
    /// 到達可能な終端状態で要求される非空フィールドがすべて埋まっているか。
    pub fn is_complete(&self) -> bool {
        self.channel.is_some()
            && self.pan_id.is_some()
            && self.mac_address.is_some()
            && self.ipv6_address.is_some()
    }
}

/// `SKINFO` の応答6トークンから得られる自局情報。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfInfo {
    pub ipv6: String,
    pub mac64: String,
    pub channel: String,
    pub pan_id: String,
    pub mac16: String,
}

/// `EVER` の応答から得られるファームウェアバージョン文字列。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion(pub String);

/// 初期化完了直後に取得する、スマートメーター側のEPC。
pub const EPC_COEFFICIENT: u8 = 0xD3;
pub const EPC_CUMULATIVE_ENERGY_UNIT: u8 = 0xE1;

pub const SEOJ_CONTROLLER: [u8; 3] = [0x05, 0xFF, 0x01];
pub const DEOJ_LOW_VOLTAGE_SMART_METER: [u8; 3] = [0x02, 0x88, 0x01];

/// `FAIL ER<NN>` 行かどうか。
pub(crate) fn is_fail_line(line: &str) -> bool {
    line.trim_start().starts_with("FAIL ER")
}

/// 応答が裸の `OK` かどうか。
pub(crate) fn is_bare_ok(line: &str) -> bool {
    line.trim() == "OK"
}
