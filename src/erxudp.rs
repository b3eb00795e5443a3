// ERXUDP 行の解析
// SPDX-License-Identifier: MPL-2.0
//
//! `ERXUDP` に続く9個の空白区切りフィールドを1つの構造体に変換する。
//! フィールドがひとつでも欠けていれば解析は失敗として扱う。
use nom::Parser;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{hex_digit1, space1};
use nom::combinator::map_res;
use std::net::Ipv6Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErxUdpFrame {
    pub sender: Ipv6Addr,
    pub destination: Ipv6Addr,
    pub sender_port: u16,
    pub destination_port: u16,
    pub sender_lla: u64,
    pub secured: u8,
    pub length: u16,
    pub data: Vec<u8>,
}

fn ipv6_colon_hex(input: &str) -> nom::IResult<&str, Ipv6Addr> {
    map_res(take_while1(|c: char| c != ' '), |s: &str| {
        s.parse::<Ipv6Addr>()
    })
    .parse(input)
}

fn u16_hex(input: &str) -> nom::IResult<&str, u16> {
    map_res(hex_digit1, |s| u16::from_str_radix(s, 16)).parse(input)
}

fn u64_hex(input: &str) -> nom::IResult<&str, u64> {
    map_res(hex_digit1, |s| u64::from_str_radix(s, 16)).parse(input)
}

fn u8_hex(input: &str) -> nom::IResult<&str, u8> {
    map_res(hex_digit1, |s| u8::from_str_radix(s, 16)).parse(input)
}

fn payload_bytes(input: &str) -> nom::IResult<&str, Vec<u8>> {
    let mut bytes = Vec::new();
    let mut rest = input;
    while rest.len() >= 2 {
        let (a, b) = rest.split_at(2);
        match u8::from_str_radix(a, 16) {
            Ok(byte) => {
                bytes.push(byte);
                rest = b;
            }
            Err(_) => break,
        }
    }
    Ok((rest, bytes))
}

/// 9フィールド揃って初めて成功する。どれか一つでも欠けていれば `Err`。
pub fn parse_erxudp(input: &str) -> nom::IResult<&str, ErxUdpFrame> {
    let (input, _) = tag("ERXUDP").parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, sender) = ipv6_colon_hex.parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, destination) = ipv6_colon_hex.parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, sender_port) = u16_hex.parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, destination_port) = u16_hex.parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, sender_lla) = u64_hex.parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, secured) = u8_hex.parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, length) = u16_hex.parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, data) = payload_bytes.parse(input)?;

    Ok((
        input,
        ErxUdpFrame {
            sender,
            destination,
            sender_port,
            destination_port,
            sender_lla,
            secured,
            length,
            data,
        },
    ))
}

impl ErxUdpFrame {
    /// `parse_erxudp` の逆変換。試験とフェイクポートのスクリプト作成に使う。
    pub fn render(&self) -> String {
        format!(
            "ERXUDP {} {} {:04X} {:04X} {:016X} {:X} {:04X} {}",
            self.sender,
            self.destination,
            self.sender_port,
            self.destination_port,
            self.sender_lla,
            self.secured,
            self.length,
            self.data
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<String>()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_all_nine_fields() {
        let line = "ERXUDP FE80:0001:0002:0003:0004:0005:0006:0007 FE80:0008:0009:000A:000B:000C:000D:000E 02CC 02CC 123456789ABC0000 1 0010 000102030405060708090A0B0C0D0E0F";
        let (rest, frame) = parse_erxudp(line).unwrap();
        assert_eq!(rest, "");
        assert_eq!(frame.sender_port, 0x02CC);
        assert_eq!(frame.destination_port, 0x02CC);
        assert_eq!(frame.sender_lla, 0x1234_5678_9ABC_0000);
        assert_eq!(frame.secured, 1);
        assert_eq!(frame.length, 0x0010);
        assert_eq!(frame.data.len(), 16);
        assert_eq!(frame.data[0], 0x00);
        assert_eq!(frame.data[15], 0x0F);
    }

    #[test]
    fn missing_trailing_field_fails() {
        let line = "ERXUDP FE80:0001:0002:0003:0004:0005:0006:0007 FE80:0008:0009:000A:000B:000C:000D:000E 02CC 02CC 123456789ABC0000 1";
        assert!(parse_erxudp(line).is_err());
    }

    #[test]
    fn render_then_parse_round_trips() {
        let original = ErxUdpFrame {
            sender: "FE80:0001:0002:0003:0004:0005:0006:0007".parse().unwrap(),
            destination: "FE80:0008:0009:000A:000B:000C:000D:000E".parse().unwrap(),
            sender_port: 0x02CC,
            destination_port: 0x0E1A,
            sender_lla: 0x1234_5678_9ABC_0000,
            secured: 1,
            length: 4,
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        let (rest, parsed) = parse_erxudp(&original.render()).unwrap();
        assert_eq!(rest, "");
        assert_eq!(parsed, original);
    }
}
