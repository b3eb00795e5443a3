// EPANDESC複数行ブロックの解析
// SPDX-License-Identifier: MPL-2.0
//
//! スキャンでビーコンを受信すると、モジュールは `EPANDESC` に続けて6行の
//! `Key:Value` を厳密な順序で送ってくる。この並びを一行ずつ検証するための
//! 小さなヘルパー群。実際の値の蓄積は状態機械の各行が `CommunicationParameter`
//! へ直接行う(このモジュールは検証と値抽出だけを受け持つ)。

/// EPANDESCブロックの6つのキー。この順序で厳密に出現しなければならない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpandescKey {
    Channel,
    ChannelPage,
    PanId,
    Addr,
    Lqi,
    PairId,
}

impl EpandescKey {
    pub fn label(self) -> &'static str {
        match self {
            EpandescKey::Channel => "Channel",
            EpandescKey::ChannelPage => "Channel Page",
            EpandescKey::PanId => "Pan ID",
            EpandescKey::Addr => "Addr",
            EpandescKey::Lqi => "LQI",
            EpandescKey::PairId => "PairID",
        }
    }

    /// ブロック内でこのキーの次に来るべきキー。`PairId` が最後。
    pub fn next(self) -> Option<EpandescKey> {
        match self {
            EpandescKey::Channel => Some(EpandescKey::ChannelPage),
            EpandescKey::ChannelPage => Some(EpandescKey::PanId),
            EpandescKey::PanId => Some(EpandescKey::Addr),
            EpandescKey::Addr => Some(EpandescKey::Lqi),
            EpandescKey::Lqi => Some(EpandescKey::PairId),
            EpandescKey::PairId => None,
        }
    }
}

/// 行が文字通り `EPANDESC` かどうか。
pub fn is_epandesc_literal(line: &str) -> bool {
    line.trim() == "EPANDESC"
}

/// `  Channel:3B` のような行から、期待したキーのときだけ値を取り出す。
/// 先頭の空白は無視し、`Key:Value` / `Key : Value` のどちらも受け付ける。
pub fn parse_epandesc_kv(line: &str, key: EpandescKey) -> Option<String> {
    let trimmed = line.trim();
    let (found_key, value) = trimmed.split_once(':')?;
    if found_key.trim() != key.label() {
        return None;
    }
    Some(value.trim().to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recognizes_literal_block_header() {
        assert!(is_epandesc_literal("EPANDESC"));
        assert!(is_epandesc_literal("  EPANDESC  "));
        assert!(!is_epandesc_literal("EPANDESCX"));
    }

    #[test]
    fn extracts_value_for_matching_key() {
        assert_eq!(
            parse_epandesc_kv("  Channel:3B", EpandescKey::Channel),
            Some("3B".to_string())
        );
        assert_eq!(
            parse_epandesc_kv("  Channel Page:09", EpandescKey::ChannelPage),
            Some("09".to_string())
        );
        assert_eq!(
            parse_epandesc_kv("  PairID:1234ABCD", EpandescKey::PairId),
            Some("1234ABCD".to_string())
        );
    }

    #[test]
    fn rejects_mismatched_key() {
        // 典型的な欠陥シナリオ: "Pan ID:" が "PanID:" に化けている
        assert_eq!(parse_epandesc_kv("  PanID:ABCD", EpandescKey::PanId), None);
    }

    #[test]
    fn key_order_is_total_and_ends_at_pair_id() {
        let mut key = EpandescKey::Channel;
        let mut count = 1;
        while let Some(next) = key.next() {
            key = next;
            count += 1;
        }
        assert_eq!(count, 6);
        assert_eq!(key, EpandescKey::PairId);
    }
}
