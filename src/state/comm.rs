// 通信状態機械
// SPDX-License-Identifier: MPL-2.0
//
//! 初期化完了後、プロパティ要求の送信から応答の相関までを扱う3状態の機械。
use crate::echonet;
use crate::echonetlite::EchonetliteFrame;
use crate::erxudp::parse_erxudp;
use crate::error::AbsorbedError;
use crate::event::{EventCode, UdpSentResult, parse_event};
use crate::serial::SerialPort;
use std::net::Ipv6Addr;

use super::SEOJ_CONTROLLER;

/// 通信機械の3つの状態。初期値は `Ready`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommState {
    Ready,
    WaitSuccessUdpSend,
    WaitErxudp,
}

impl CommState {
    pub fn reads_input(self) -> bool {
        !matches!(self, CommState::Ready)
    }
}

#[derive(Debug, Clone, Default)]
struct CommFlags {
    udp_sent_ok: bool,
    udp_sent_event: bool,
    udp_sent_result: Option<UdpSentResult>,
}

impl CommFlags {
    fn reset(&mut self) {
        self.udp_sent_ok = false;
        self.udp_sent_event = false;
        self.udp_sent_result = None;
    }
}

/// 1ティックの結果。`GotPayload` は応答ペイロードが復号できたときのみ運ばれる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommOutcome {
    Continue,
    Ready,
    GotPayload(Vec<u8>),
}

pub struct CommMachine {
    state: CommState,
    flags: CommFlags,
    tid_counter: u16,
}

impl CommMachine {
    pub fn new() -> Self {
        CommMachine {
            state: CommState::Ready,
            flags: CommFlags::default(),
            tid_counter: 0,
        }
    }

    pub fn state(&self) -> CommState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = CommState::Ready;
        self.flags.reset();
    }

    fn next_tid(&mut self) -> u16 {
        self.tid_counter = self.tid_counter.wrapping_add(1);
        self.tid_counter
    }

    /// ブロックしない。EPCの並びを持つGETフレームを組み立て、`SKSENDTO`を
    /// 書き込んだ直後に `WaitSuccessUdpSend` へ遷移する。
    pub fn send_property_request(
        &mut self,
        port: &mut dyn SerialPort,
        destination: Ipv6Addr,
        deoj: [u8; 3],
        epcs: &[u8],
    ) -> std::io::Result<()> {
        let tid = self.next_tid();
        let frame = echonet::build_get_request(tid, SEOJ_CONTROLLER, deoj, epcs);
        let command = echonet::build_send_command(&destination, &frame)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        port.write_bytes(&command)?;
        port.write_bytes(b"\r\n")?;
        port.flush()?;
        self.state = CommState::WaitSuccessUdpSend;
        tracing::debug!(target: "comm-state", "Ready -> {:?} (tid {})", self.state, tid);
        Ok(())
    }

    /// 1ステップ進める。`expected_sender` はERXUDPの送信元として許容する
    /// スマートメーターのIPv6(通信パラメータから得たもの)。
    pub fn advance(
        &mut self,
        line: Option<&str>,
        expected_sender: Option<Ipv6Addr>,
        strict_udp_sent_check: bool,
    ) -> CommOutcome {
        if self.state.reads_input() && line.is_none() {
            return CommOutcome::Continue;
        }

        match self.state {
            CommState::Ready => CommOutcome::Continue,

            CommState::WaitSuccessUdpSend => {
                let line = line.unwrap();
                if line.trim() == "OK" {
                    self.flags.udp_sent_ok = true;
                } else if let Ok((_, event)) = parse_event(line) {
                    if event.code == EventCode::UdpSent {
                        self.flags.udp_sent_event = true;
                        self.flags.udp_sent_result = event.udp_sent_result();
                    }
                }

                if self.flags.udp_sent_ok && self.flags.udp_sent_event {
                    let result = self.flags.udp_sent_result;
                    self.flags.reset();
                    let proceed = if strict_udp_sent_check {
                        result == Some(UdpSentResult::Success)
                    } else {
                        true
                    };
                    if proceed {
                        self.state = CommState::WaitErxudp;
                        tracing::debug!(target: "comm-state", "WaitSuccessUdpSend -> WaitErxudp");
                    } else {
                        self.state = CommState::Ready;
                        tracing::warn!(target: "comm-state", "UdpSent reported failure ({:?}), abandoning request", result);
                        return CommOutcome::Ready;
                    }
                }
                CommOutcome::Continue
            }

            CommState::WaitErxudp => {
                let line = line.unwrap();
                if !line.starts_with("ERXUDP") {
                    return CommOutcome::Continue;
                }
                let Ok((_, frame)) = parse_erxudp(line) else {
                    tracing::warn!(target: "comm-state", "{}", AbsorbedError::UnexpectedFormat);
                    return CommOutcome::Continue;
                };
                if let Some(expected) = expected_sender {
                    if frame.sender != expected {
                        tracing::warn!(target: "comm-state", "ERXUDP from unexpected sender {}, ignoring", frame.sender);
                        return CommOutcome::Continue;
                    }
                }
                self.state = CommState::Ready;
                tracing::debug!(target: "comm-state", "WaitErxudp -> Ready");
                CommOutcome::GotPayload(frame.data)
            }
        }
    }
}

impl Default for CommMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// `GotPayload` のバイト列をECHONET Liteフレームへ復号する便宜関数。
pub fn decode_payload(payload: &[u8]) -> Result<EchonetliteFrame<'_>, bincode::error::DecodeError> {
    echonet::decode_frame(payload)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serial::FakeSerialPort;

    #[test]
    fn ready_state_ignores_ticks() {
        let mut machine = CommMachine::new();
        assert_eq!(machine.advance(None, None, false), CommOutcome::Continue);
        assert_eq!(machine.state(), CommState::Ready);
    }

    #[test]
    fn send_property_request_transitions_to_wait_success_udp_send() {
        let mut port = FakeSerialPort::new();
        let mut machine = CommMachine::new();
        let destination: Ipv6Addr = "FE80:0000:0000:0000:0000:0000:0000:0001".parse().unwrap();
        machine
            .send_property_request(&mut port, destination, [0x02, 0x88, 0x01], &[0xE7])
            .unwrap();
        assert_eq!(machine.state(), CommState::WaitSuccessUdpSend);
        assert!(port.written.iter().any(|l| l.starts_with("SKSENDTO")));
    }

    #[test]
    fn full_round_trip_reaches_ready_with_payload() {
        let mut machine = CommMachine::new();
        machine.state = CommState::WaitSuccessUdpSend;
        let sender: Ipv6Addr = "FE80:0000:0000:0000:0000:0000:0000:0001".parse().unwrap();

        assert_eq!(machine.advance(Some("OK"), Some(sender), false), CommOutcome::Continue);
        assert_eq!(machine.state(), CommState::WaitSuccessUdpSend);

        let outcome = machine.advance(
            Some("EVENT 21 FE80:0000:0000:0000:0000:0000:0000:0001 00"),
            Some(sender),
            false,
        );
        assert_eq!(outcome, CommOutcome::Continue);
        assert_eq!(machine.state(), CommState::WaitErxudp);

        let line = "ERXUDP FE80:0000:0000:0000:0000:0000:0000:0001 FE80:0000:0000:0000:0000:0000:0000:0002 0E1A 0E1A 123456789ABC0000 1 0002 ABCD";
        let outcome = machine.advance(Some(line), Some(sender), false);
        assert_eq!(outcome, CommOutcome::GotPayload(vec![0xAB, 0xCD]));
        assert_eq!(machine.state(), CommState::Ready);
    }
}
