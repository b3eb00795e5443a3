// EVENT 行の解析
// SPDX-License-Identifier: MPL-2.0
//
//! `EVENT <code> <sender-ipv6> [<parameter>]` 形式の行をタグ付きイベントに
//! 変換する。
use nom::Parser;
use nom::bytes::complete::take_while_m_n;
use nom::character::complete::{space0, space1};
use nom::combinator::{map_res, opt};
use std::net::Ipv6Addr;

/// イベント種別。値はモジュールが送出する16進コードそのもの。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCode {
    ReceiveNs,
    ReceiveNa,
    EchoReq,
    EdScanDone,
    Beacon,
    UdpSent,
    ScanDone,
    PanaFail,
    PanaOk,
    PanaClosedRx,
    PanaClosedOk,
    PanaCloseTimeout,
    SessionExpired,
    AribSendTimeError,
    AribSendTimeReleased,
    Invalid(u8),
}

impl EventCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => EventCode::ReceiveNs,
            0x02 => EventCode::ReceiveNa,
            0x05 => EventCode::EchoReq,
            0x1F => EventCode::EdScanDone,
            0x20 => EventCode::Beacon,
            0x21 => EventCode::UdpSent,
            0x22 => EventCode::ScanDone,
            0x24 => EventCode::PanaFail,
            0x25 => EventCode::PanaOk,
            0x26 => EventCode::PanaClosedRx,
            0x27 => EventCode::PanaClosedOk,
            0x28 => EventCode::PanaCloseTimeout,
            0x29 => EventCode::SessionExpired,
            0x32 => EventCode::AribSendTimeError,
            0x33 => EventCode::AribSendTimeReleased,
            other => EventCode::Invalid(other),
        }
    }
}

/// UdpSent(0x21) イベントのパラメータバイトの意味。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpSentResult {
    Success,
    Fail,
    NeighborSolicitation,
    Unknown(u8),
}

impl UdpSentResult {
    pub fn from_param(param: u8) -> Self {
        match param {
            0x00 => UdpSentResult::Success,
            0x01 => UdpSentResult::Fail,
            0x02 => UdpSentResult::NeighborSolicitation,
            other => UdpSentResult::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub code: EventCode,
    pub sender: Ipv6Addr,
    pub param: Option<u8>,
}

impl Event {
    /// `UdpSent` イベントのパラメータ解釈。UdpSent以外では常に `None`。
    pub fn udp_sent_result(&self) -> Option<UdpSentResult> {
        match self.code {
            EventCode::UdpSent => self.param.map(UdpSentResult::from_param),
            _ => None,
        }
    }
}

fn u8_hex(input: &str) -> nom::IResult<&str, u8> {
    map_res(
        take_while_m_n(1, 2, |c: char| c.is_ascii_hexdigit()),
        |s| u8::from_str_radix(s, 16),
    )
    .parse(input)
}

fn ipv6_fixed_width(input: &str) -> nom::IResult<&str, Ipv6Addr> {
    map_res(take_while_m_n(39, 39, |c: char| c != ' '), |s: &str| {
        s.parse::<Ipv6Addr>()
    })
    .parse(input)
}

/// `EVENT <code> <sender> [<param>]` を解析する。行頭に `EVENT` が無ければ失敗する。
pub fn parse_event(input: &str) -> nom::IResult<&str, Event> {
    let (input, _) = nom::bytes::complete::tag("EVENT").parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, code) = u8_hex.parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, sender) = ipv6_fixed_width.parse(input)?;
    let (input, _) = space0.parse(input)?;
    let (input, param) = opt(u8_hex).parse(input)?;

    Ok((
        input,
        Event {
            code: EventCode::from_code(code),
            sender,
            param,
        },
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    const SENDER: &str = "FE80:0000:0000:0000:0000:0000:0000:0000";

    #[test]
    fn parses_event_without_parameter() {
        let line = format!("EVENT 20 {}", SENDER);
        let (rest, event) = parse_event(&line).unwrap();
        assert_eq!(rest, "");
        assert_eq!(event.code, EventCode::Beacon);
        assert_eq!(event.sender, SENDER.parse::<Ipv6Addr>().unwrap());
        assert_eq!(event.param, None);
    }

    #[test]
    fn parses_event_with_parameter() {
        let line = format!("EVENT 21 {} 00", SENDER);
        let (_, event) = parse_event(&line).unwrap();
        assert_eq!(event.code, EventCode::UdpSent);
        assert_eq!(event.param, Some(0));
        assert_eq!(event.udp_sent_result(), Some(UdpSentResult::Success));
    }

    #[test]
    fn unknown_code_is_tagged_invalid() {
        let line = format!("EVENT FA {}", SENDER);
        let (_, event) = parse_event(&line).unwrap();
        assert_eq!(event.code, EventCode::Invalid(0xFA));
    }

    #[test]
    fn rejects_non_event_line() {
        assert!(parse_event("OK").is_err());
    }
}
