// 公開API: セッション
// SPDX-License-Identifier: MPL-2.0
//
//! ドライバ全体の入口。シリアルポートを排他的に所有し、初期化機械と通信機械を
//! ティックごとに1歩ずつ進める。呼び出し側は `initialize_tick`/
//! `communication_tick` を外側のループ(スーパーループや定期タスク)から
//! 繰り返し呼ぶ。
use crate::config::SessionConfig;
use crate::credentials::Credentials;
use crate::echonetlite::EchonetliteFrame;
use crate::error::{AbsorbedError, DriverError};
use crate::line_reader::LineReader;
use crate::serial::SerialPort;
use crate::state::comm::{CommMachine, CommOutcome, CommState};
use crate::state::init::{InitMachine, InitOutcome, InitState};
use crate::state::DEOJ_LOW_VOLTAGE_SMART_METER;
use std::net::Ipv6Addr;

pub struct Session {
    port: Box<dyn SerialPort>,
    credentials: Credentials,
    config: SessionConfig,
    init_machine: InitMachine,
    comm_machine: CommMachine,
    status_callback: Option<Box<dyn FnMut(InitState)>>,
}

impl Session {
    pub fn new(id: &str, password: &str, serial: Box<dyn SerialPort>) -> Result<Self, DriverError> {
        Ok(Session {
            port: serial,
            credentials: Credentials::new(id, password).map_err(DriverError::Credentials)?,
            config: SessionConfig::default(),
            init_machine: InitMachine::new(),
            comm_machine: CommMachine::new(),
            status_callback: None,
        })
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_status_change_callback(&mut self, callback: impl FnMut(InitState) + 'static) {
        self.status_callback = Some(Box::new(callback));
    }

    pub fn get_init_state(&self) -> InitState {
        self.init_machine.state()
    }

    pub fn get_comm_state(&self) -> CommState {
        self.comm_machine.state()
    }

    pub fn reset_init_state(&mut self) {
        self.init_machine.reset();
    }

    pub fn reset_comm_state(&mut self) {
        self.comm_machine.reset();
    }

    /// 初期化機械を1歩進める。終端状態(`ReadySmartMeter`)に達したら`true`。
    pub fn initialize_tick(&mut self) -> std::io::Result<bool> {
        let line = if self.init_machine.state().reads_input() {
            LineReader::new(self.port.as_mut()).try_read_line()?
        } else {
            None
        };

        let outcome = self.init_machine.advance(
            self.port.as_mut(),
            line.as_deref(),
            &self.config,
            &self.credentials,
        )?;

        if let Some(callback) = self.status_callback.as_mut() {
            callback(self.init_machine.state());
        }

        Ok(outcome == InitOutcome::Terminal)
    }

    /// 通信機械を1歩進める。ERXUDPの復号に成功したら`callback`を一度だけ呼ぶ。
    /// `ready`へ戻ったら`true`を返す。
    pub fn communication_tick(
        &mut self,
        mut callback: impl FnMut(EchonetliteFrame<'_>),
    ) -> std::io::Result<bool> {
        let line = if self.comm_machine.state().reads_input() {
            LineReader::new(self.port.as_mut()).try_read_line()?
        } else {
            None
        };

        let expected_sender = self.expected_sender();
        let outcome = self.comm_machine.advance(
            line.as_deref(),
            expected_sender,
            self.config.strict_udp_sent_check,
        );

        match outcome {
            CommOutcome::Continue => Ok(false),
            CommOutcome::Ready => Ok(true),
            CommOutcome::GotPayload(payload) => {
                match crate::state::comm::decode_payload(&payload) {
                    Ok(frame) => callback(frame),
                    Err(e) => tracing::warn!(target: "comm-state", "{}: {}", AbsorbedError::DecodeFailure, e),
                }
                Ok(self.comm_machine.state() == CommState::Ready)
            }
        }
    }

    /// 指定したEPC集合に対するGET要求を送る。ブロックしない。
    pub fn send_property_request(&mut self, epcs: &[u8]) -> std::io::Result<()> {
        let destination = self.expected_sender().unwrap_or(Ipv6Addr::UNSPECIFIED);
        self.comm_machine.send_property_request(
            self.port.as_mut(),
            destination,
            DEOJ_LOW_VOLTAGE_SMART_METER,
            epcs,
        )
    }

    fn expected_sender(&self) -> Option<Ipv6Addr> {
        self.init_machine
            .param
            .ipv6_address
            .as_deref()
            .and_then(|s| s.parse().ok())
    }
}
