// ECHONET Liteフレームの送受信
// SPDX-License-Identifier: MPL-2.0
//
//! `SKSENDTO`/`ERXUDP` を介してECHONET Liteフレームをやり取りするための
//! 薄い層。フレームそのものの符号化/復号は [`crate::echonetlite`] に委譲し、
//! ここでは宛先ポートの固定値(0x0E1A)とコマンド文字列の組み立てだけを持つ。
//! プロパティコードの意味(EPCごとの値解釈)は呼び出し側の責務であり、
//! このモジュールはバイト列を素通りさせるだけ。
use crate::echonetlite::{EchonetliteEdata, EchonetliteFrame};
use std::net::Ipv6Addr;

/// ECHONET Liteのペアノードが待ち受けるUDPポート番号。
pub const ECHONET_LITE_PORT: u16 = 0x0E1A;

/// `SKSENDTO 1 <addr> <port> 1 <len> ` に続けてバイナリペイロードを置いた、
/// モジュールへ書き込む生コマンド列を組み立てる。
pub fn build_send_command(destination: &Ipv6Addr, frame: &EchonetliteFrame) -> anyhow::Result<Vec<u8>> {
    let config = bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding();
    let payload = bincode::encode_to_vec(frame, config)?;
    let address = destination
        .segments()
        .map(|n| format!("{:04X}", n))
        .collect::<Vec<_>>()
        .join(":");
    let header = format!(
        "SKSENDTO 1 {} {:04X} 1 {:04X} ",
        address,
        ECHONET_LITE_PORT,
        payload.len()
    );
    Ok([header.into_bytes(), payload].concat())
}

/// ERXUDPで受信したペイロードバイト列からECHONET Liteフレームを復号する。
pub fn decode_frame(payload: &[u8]) -> Result<EchonetliteFrame<'_>, bincode::error::DecodeError> {
    let config = bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding();
    let (frame, _len) = bincode::borrow_decode_from_slice(payload, config)?;
    Ok(frame)
}

/// EPCのみを指定したGetプロパティ要求フレームを組み立てる。
/// ESVは0x62(Get)固定、送信元/宛先オブジェクトコードは呼び出し側が指定する。
/// 要求フレームのEDTは常に空なので、借用を持ち越す必要がない。
pub fn build_get_request(tid: u16, seoj: [u8; 3], deoj: [u8; 3], epcs: &[u8]) -> EchonetliteFrame<'static> {
    let edata = epcs
        .iter()
        .map(|epc| EchonetliteEdata {
            epc: *epc,
            pdc: 0,
            edt: &[],
        })
        .collect::<Vec<_>>();
    EchonetliteFrame {
        ehd: 0x1081,
        tid,
        seoj,
        deoj,
        esv: 0x62,
        opc: edata.len() as u8,
        edata,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_send_command_embeds_port_and_length() {
        let destination: Ipv6Addr = "FE80:0000:0000:0000:0000:0000:0000:0001"
            .parse()
            .unwrap();
        let frame = EchonetliteFrame {
            ehd: 0x1081,
            tid: 1,
            seoj: [0x05, 0xFF, 0x01],
            deoj: [0x02, 0x88, 0x01],
            esv: 0x62,
            opc: 1,
            edata: vec![EchonetliteEdata {
                epc: 0xE7,
                pdc: 0,
                edt: &[],
            }],
        };
        let command = build_send_command(&destination, &frame).unwrap();
        let text = String::from_utf8_lossy(&command);
        assert!(text.starts_with("SKSENDTO 1 FE80:0000:0000:0000:0000:0000:0000:0001 0E1A 1 "));
    }

    #[test]
    fn decode_frame_round_trips_through_build_send_command() {
        let destination: Ipv6Addr = "FE80:0000:0000:0000:0000:0000:0000:0001"
            .parse()
            .unwrap();
        let frame = build_get_request(0x1234, [0x05, 0xFF, 0x01], [0x02, 0x88, 0x01], &[0xE7]);
        let command = build_send_command(&destination, &frame).unwrap();
        // ヘッダの後、固定14バイトのペイロードだけを切り出して復号する
        let payload = &command[command.len() - 14..];
        let decoded = decode_frame(payload).unwrap();
        assert_eq!(decoded.tid, 0x1234);
        assert_eq!(decoded.esv, 0x62);
        assert_eq!(decoded.opc, 1);
        assert_eq!(decoded.edata[0].epc, 0xE7);
    }
}
