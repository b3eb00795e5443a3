// 初期化状態機械
// SPDX-License-Identifier: MPL-2.0
//
//! モジュールの未初期化状態からPANA認証済みの通信可能状態までを進める、
//! 39個の待ち合わせ地点からなる直線的な(ただし条件分岐とリトライを持つ)
//! 状態機械。各状態は「この状態に入ってから次に何を読み/書きするか」だけを
//! 知っていればよく、それ以外の状態を意識しない。
use crate::command::{CommandWriter, SkCommand, VirtualRegister};
use crate::config::SessionConfig;
use crate::credentials::Credentials;
use crate::echonet;
use crate::erxudp::parse_erxudp;
use crate::error::AbsorbedError;
use crate::event::{EventCode, UdpSentResult, parse_event};
use crate::line_reader::LineReader;
use crate::scan::{EpandescKey, is_epandesc_literal, parse_epandesc_kv};
use crate::serial::SerialPort;
use std::net::Ipv6Addr;

use super::{CommunicationParameter, FirmwareVersion, SelfInfo, is_bare_ok, is_fail_line};

/// `FAIL ER<NN>` から拒否コードを取り出し、`ProtocolReject` として記録する。
fn log_protocol_reject(line: &str) {
    let code = line
        .trim_start()
        .strip_prefix("FAIL ER")
        .and_then(|rest| rest.trim().parse::<u8>().ok())
        .unwrap_or(0);
    tracing::warn!(target: "init-state", "{}", AbsorbedError::ProtocolReject(code));
}

/// 初期化シーケンスの待ち合わせ地点。`Uninitialized` が初期値、
/// `ReadySmartMeter` が終端値。リセットはどの状態からでも許される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitState {
    Uninitialized,
    WaitDisableEcho,
    GetSkInfo,
    WaitEinfo,
    WaitEinfoOk,
    GetSkStackVersion,
    WaitEver,
    WaitEverOk,
    SetSkStackPassword,
    WaitSetSkStackPassword,
    SetSkStackId,
    WaitSetSkStackId,
    ReadOpt,
    WaitReadOpt,
    WriteOpt,
    WaitWriteOpt,
    ActiveScanWithIe,
    WaitActiveScanWithIeOk,
    WaitScanEvent,
    WaitEpanDesc,
    WaitChannel,
    WaitChannelPage,
    WaitPanId,
    WaitAddr,
    WaitLqi,
    WaitPairId,
    ConvertAddr,
    WaitConvertAddr,
    SetChannel,
    WaitSetChannel,
    SetPanId,
    WaitSetPanId,
    SkJoin,
    WaitSkJoin,
    WaitPana,
    ReadyCommunication,
    WaitInitParamSuccessUdpSend,
    WaitInitParamErxudp,
    ReadySmartMeter,
}

impl InitState {
    /// このrowがモジュールからの1行を必要とするか。falseなら副作用のみの
    /// 無条件遷移。
    pub fn reads_input(self) -> bool {
        !matches!(
            self,
            InitState::Uninitialized
                | InitState::GetSkInfo
                | InitState::GetSkStackVersion
                | InitState::SetSkStackPassword
                | InitState::SetSkStackId
                | InitState::ReadOpt
                | InitState::WriteOpt
                | InitState::ActiveScanWithIe
                | InitState::ConvertAddr
                | InitState::SetChannel
                | InitState::SetPanId
                | InitState::SkJoin
                | InitState::ReadyCommunication
                | InitState::ReadySmartMeter
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InitState::ReadySmartMeter)
    }
}

#[derive(Debug, Clone, Default)]
struct InitFlags {
    echo_seen: bool,
    ok_seen: bool,
    received_beacon: bool,
    received_epandesc: bool,
    scan_duration: u8,
    udp_sent_ok: bool,
    udp_sent_event: bool,
    udp_sent_result: Option<UdpSentResult>,
}

impl InitFlags {
    fn new() -> Self {
        InitFlags {
            scan_duration: 3,
            ..Default::default()
        }
    }

    fn reset_scan_wait(&mut self) {
        self.received_beacon = false;
        self.received_epandesc = false;
    }

    fn bump_scan_duration(&mut self, cap: u8) {
        if self.scan_duration < cap {
            self.scan_duration += 1;
        }
    }

    fn reset_udp_sent(&mut self) {
        self.udp_sent_ok = false;
        self.udp_sent_event = false;
        self.udp_sent_result = None;
    }
}

/// 初期パラメータ取得(Coefficient/CumulativeEnergyUnit)の結果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitialParameters {
    pub coefficient: Option<u8>,
    pub cumulative_energy_unit: Option<u8>,
}

/// 1ティックの呼び出しが終わった後に呼び出し元へ伝える要約。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Continue,
    Terminal,
}

pub struct InitMachine {
    state: InitState,
    flags: InitFlags,
    tid_counter: u16,
    pub param: CommunicationParameter,
    pub self_info: Option<SelfInfo>,
    pub firmware_version: Option<FirmwareVersion>,
    pub initial_parameters: InitialParameters,
}

impl InitMachine {
    pub fn new() -> Self {
        InitMachine {
            state: InitState::Uninitialized,
            flags: InitFlags::new(),
            tid_counter: 0,
            param: CommunicationParameter::default(),
            self_info: None,
            firmware_version: None,
            initial_parameters: InitialParameters::default(),
        }
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    /// 完全なリセット。static扱いの持続フラグもすべて初期値へ戻す。
    pub fn reset(&mut self) {
        self.state = InitState::Uninitialized;
        self.flags = InitFlags::new();
        self.param = CommunicationParameter::default();
        self.self_info = None;
        self.firmware_version = None;
        self.initial_parameters = InitialParameters::default();
    }

    fn next_tid(&mut self) -> u16 {
        self.tid_counter = self.tid_counter.wrapping_add(1);
        self.tid_counter
    }

    /// 1ステップ進める。`reads_input()` が真の行は `line` が `None` なら
    /// 何もしない(次のティックで再試行)。偽の行は `line` を無視して必ず
    /// 副作用と遷移を実行する。
    pub fn advance(
        &mut self,
        port: &mut dyn SerialPort,
        line: Option<&str>,
        config: &SessionConfig,
        credentials: &Credentials,
    ) -> std::io::Result<InitOutcome> {
        if self.state.reads_input() && line.is_none() {
            return Ok(InitOutcome::Continue);
        }

        let previous = self.state;
        self.state = self.step(port, line, config, credentials)?;
        tracing::debug!(target: "init-state", "{:?} -> {:?}", previous, self.state);

        if self.state == InitState::ActiveScanWithIe
            && !matches!(previous, InitState::WaitReadOpt | InitState::WaitWriteOpt)
        {
            tracing::warn!(target: "init-state", "retrying scan pass (duration now {})", self.flags.scan_duration);
        }

        if self.state.is_terminal() {
            tracing::info!(target: "init-state", "smart meter session ready");
            Ok(InitOutcome::Terminal)
        } else {
            Ok(InitOutcome::Continue)
        }
    }

    fn abort_scan_to(&mut self, cap: u8) -> InitState {
        self.flags.reset_scan_wait();
        self.flags.bump_scan_duration(cap);
        InitState::ActiveScanWithIe
    }

    fn step(
        &mut self,
        port: &mut dyn SerialPort,
        line: Option<&str>,
        config: &SessionConfig,
        credentials: &Credentials,
    ) -> std::io::Result<InitState> {
        use InitState::*;

        match self.state {
            Uninitialized => {
                let mut writer = CommandWriter::new(port);
                writer.write(&SkCommand::TerminateSkStack)?;
                writer.write(&SkCommand::ResetSkStack)?;
                drop(writer);
                LineReader::new(port).discard(50)?;
                CommandWriter::new(port).write(&SkCommand::DisableEcho)?;
                Ok(WaitDisableEcho)
            }

            WaitDisableEcho => {
                let line = line.unwrap();
                if line.contains("SKSREG") {
                    self.flags.echo_seen = true;
                }
                if is_bare_ok(line) {
                    self.flags.ok_seen = true;
                }
                if self.flags.echo_seen && self.flags.ok_seen {
                    self.flags.echo_seen = false;
                    self.flags.ok_seen = false;
                    Ok(GetSkInfo)
                } else {
                    Ok(WaitDisableEcho)
                }
            }

            GetSkInfo => {
                CommandWriter::new(port).write(&SkCommand::GetSkInfo)?;
                Ok(WaitEinfo)
            }

            WaitEinfo => {
                let line = line.unwrap();
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() == 6 && tokens[0] == "EINFO" {
                    self.self_info = Some(SelfInfo {
                        ipv6: tokens[1].to_string(),
                        mac64: tokens[2].to_string(),
                        channel: tokens[3].to_string(),
                        pan_id: tokens[4].to_string(),
                        mac16: tokens[5].to_string(),
                    });
                    Ok(WaitEinfoOk)
                } else {
                    Ok(Uninitialized)
                }
            }

            WaitEinfoOk => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(GetSkStackVersion)
                } else {
                    Ok(WaitEinfoOk)
                }
            }

            GetSkStackVersion => {
                CommandWriter::new(port).write(&SkCommand::GetSkStackVersion)?;
                Ok(WaitEver)
            }

            WaitEver => {
                let line = line.unwrap();
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() == 2 && tokens[0] == "EVER" {
                    self.firmware_version = Some(FirmwareVersion(tokens[1].to_string()));
                    Ok(WaitEverOk)
                } else {
                    Ok(Uninitialized)
                }
            }

            WaitEverOk => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(SetSkStackPassword)
                } else {
                    Ok(WaitEverOk)
                }
            }

            SetSkStackPassword => {
                CommandWriter::new(port)
                    .write(&SkCommand::SetSkStackPassword(credentials.password.to_string()))?;
                Ok(WaitSetSkStackPassword)
            }

            WaitSetSkStackPassword => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(SetSkStackId)
                } else {
                    Ok(WaitSetSkStackPassword)
                }
            }

            SetSkStackId => {
                CommandWriter::new(port).write(&SkCommand::SetSkStackId(credentials.id.to_string()))?;
                Ok(WaitSetSkStackId)
            }

            WaitSetSkStackId => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(ReadOpt)
                } else {
                    Ok(WaitSetSkStackId)
                }
            }

            ReadOpt => {
                CommandWriter::new(port).write(&SkCommand::ReadOpt)?;
                Ok(WaitReadOpt)
            }

            WaitReadOpt => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if line.trim() == "OK 01" {
                    Ok(ActiveScanWithIe)
                } else {
                    Ok(WriteOpt)
                }
            }

            WriteOpt => {
                CommandWriter::new(port).write(&SkCommand::WriteOpt(0x01))?;
                Ok(WaitWriteOpt)
            }

            WaitWriteOpt => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(ActiveScanWithIe)
                } else {
                    Ok(WaitWriteOpt)
                }
            }

            ActiveScanWithIe => {
                let mode_digit = config.scan_mode.as_mode_digit();
                CommandWriter::new(port).write(&SkCommand::ScanSkStack {
                    mode_digit,
                    channel_mask: config.channel_mask,
                    duration: self.flags.scan_duration,
                })?;
                Ok(WaitActiveScanWithIeOk)
            }

            WaitActiveScanWithIeOk => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(WaitScanEvent)
                } else {
                    Ok(WaitActiveScanWithIeOk)
                }
            }

            WaitScanEvent => {
                let line = line.unwrap();
                match parse_event(line) {
                    Ok((_, event)) => match event.code {
                        EventCode::Beacon => {
                            self.param.dest_ipv6_address = Some(event.sender.to_string());
                            self.flags.received_beacon = true;
                            Ok(WaitEpanDesc)
                        }
                        EventCode::ScanDone => {
                            if self.flags.received_beacon && self.flags.received_epandesc {
                                self.flags.reset_scan_wait();
                                Ok(ConvertAddr)
                            } else {
                                tracing::warn!(target: "init-state", "{}", AbsorbedError::Timeout);
                                Ok(self.abort_scan_to(config.scan_duration_cap))
                            }
                        }
                        _ => Ok(WaitScanEvent),
                    },
                    Err(_) => Ok(WaitScanEvent),
                }
            }

            WaitEpanDesc => {
                let line = line.unwrap();
                if is_epandesc_literal(line) {
                    Ok(WaitChannel)
                } else {
                    tracing::warn!(target: "init-state", "{}", AbsorbedError::UnexpectedFormat);
                    Ok(self.abort_scan_to(config.scan_duration_cap))
                }
            }

            WaitChannel => {
                let line = line.unwrap();
                match parse_epandesc_kv(line, EpandescKey::Channel) {
                    Some(value) => {
                        self.param.channel = Some(value);
                        Ok(WaitChannelPage)
                    }
                    None => {
                        tracing::warn!(target: "init-state", "{}", AbsorbedError::UnexpectedFormat);
                        Ok(self.abort_scan_to(config.scan_duration_cap))
                    }
                }
            }

            WaitChannelPage => {
                let line = line.unwrap();
                match parse_epandesc_kv(line, EpandescKey::ChannelPage) {
                    Some(value) => {
                        self.param.channel_page = Some(value);
                        Ok(WaitPanId)
                    }
                    None => {
                        tracing::warn!(target: "init-state", "{}", AbsorbedError::UnexpectedFormat);
                        Ok(self.abort_scan_to(config.scan_duration_cap))
                    }
                }
            }

            WaitPanId => {
                let line = line.unwrap();
                match parse_epandesc_kv(line, EpandescKey::PanId) {
                    Some(value) => {
                        self.param.pan_id = Some(value);
                        Ok(WaitAddr)
                    }
                    None => {
                        tracing::warn!(target: "init-state", "{}", AbsorbedError::UnexpectedFormat);
                        Ok(self.abort_scan_to(config.scan_duration_cap))
                    }
                }
            }

            WaitAddr => {
                let line = line.unwrap();
                match parse_epandesc_kv(line, EpandescKey::Addr) {
                    Some(value) => {
                        self.param.mac_address = Some(value);
                        Ok(WaitLqi)
                    }
                    None => {
                        tracing::warn!(target: "init-state", "{}", AbsorbedError::UnexpectedFormat);
                        Ok(self.abort_scan_to(config.scan_duration_cap))
                    }
                }
            }

            WaitLqi => {
                let line = line.unwrap();
                match parse_epandesc_kv(line, EpandescKey::Lqi) {
                    Some(value) => {
                        self.param.lqi = Some(value);
                        Ok(WaitPairId)
                    }
                    None => {
                        tracing::warn!(target: "init-state", "{}", AbsorbedError::UnexpectedFormat);
                        Ok(self.abort_scan_to(config.scan_duration_cap))
                    }
                }
            }

            WaitPairId => {
                let line = line.unwrap();
                match parse_epandesc_kv(line, EpandescKey::PairId) {
                    Some(value) => {
                        self.param.pair_id = Some(value);
                        self.flags.received_epandesc = true;
                        Ok(WaitScanEvent)
                    }
                    None => {
                        tracing::warn!(target: "init-state", "{}", AbsorbedError::UnexpectedFormat);
                        Ok(self.abort_scan_to(config.scan_duration_cap))
                    }
                }
            }

            ConvertAddr => {
                let mac = self.param.mac_address.clone().unwrap_or_default();
                CommandWriter::new(port).write(&SkCommand::ConvertMac2Ipv6(mac))?;
                Ok(WaitConvertAddr)
            }

            WaitConvertAddr => {
                let line = line.unwrap();
                if line.trim().len() == 39 {
                    self.param.ipv6_address = Some(line.trim().to_string());
                    Ok(SetChannel)
                } else {
                    tracing::warn!(target: "init-state", "{}", AbsorbedError::UnexpectedFormat);
                    Ok(self.abort_scan_to(config.scan_duration_cap))
                }
            }

            SetChannel => {
                let channel = self.param.channel.clone().unwrap_or_default();
                CommandWriter::new(port)
                    .write(&SkCommand::SetRegister(VirtualRegister::ChannelNumber, channel))?;
                Ok(WaitSetChannel)
            }

            WaitSetChannel => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(SetPanId)
                } else {
                    Ok(WaitSetChannel)
                }
            }

            SetPanId => {
                let pan_id = self.param.pan_id.clone().unwrap_or_default();
                CommandWriter::new(port).write(&SkCommand::SetRegister(VirtualRegister::PanId, pan_id))?;
                Ok(WaitSetPanId)
            }

            WaitSetPanId => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(SkJoin)
                } else {
                    Ok(WaitSetPanId)
                }
            }

            SkJoin => {
                let addr = self.param.ipv6_address.clone().unwrap_or_default();
                CommandWriter::new(port).write(&SkCommand::JoinSkStack(addr))?;
                Ok(WaitSkJoin)
            }

            WaitSkJoin => {
                let line = line.unwrap();
                if is_fail_line(line) {
                    log_protocol_reject(line);
                    LineReader::new(port).discard(100)?;
                    Ok(Uninitialized)
                } else if is_bare_ok(line) {
                    Ok(WaitPana)
                } else {
                    Ok(WaitSkJoin)
                }
            }

            WaitPana => {
                let line = line.unwrap();
                match parse_event(line) {
                    Ok((_, event)) => match event.code {
                        EventCode::PanaOk => Ok(ReadyCommunication),
                        EventCode::PanaFail => {
                            tracing::warn!(target: "init-state", "{}", AbsorbedError::PanaRejected);
                            Ok(ConvertAddr)
                        }
                        _ => Ok(WaitPana),
                    },
                    Err(_) => Ok(WaitPana),
                }
            }

            ReadyCommunication => {
                let destination: Ipv6Addr = self
                    .param
                    .ipv6_address
                    .as_deref()
                    .unwrap_or("::")
                    .parse()
                    .unwrap_or(Ipv6Addr::UNSPECIFIED);
                let tid = self.next_tid();
                let frame = echonet::build_get_request(
                    tid,
                    super::SEOJ_CONTROLLER,
                    super::DEOJ_LOW_VOLTAGE_SMART_METER,
                    &[super::EPC_COEFFICIENT, super::EPC_CUMULATIVE_ENERGY_UNIT],
                );
                let command = echonet::build_send_command(&destination, &frame)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
                port.write_bytes(&command)?;
                port.write_bytes(b"\r\n")?;
                port.flush()?;
                Ok(WaitInitParamSuccessUdpSend)
            }

            WaitInitParamSuccessUdpSend => {
                let line = line.unwrap();
                if is_bare_ok(line) {
                    self.flags.udp_sent_ok = true;
                } else if let Ok((_, event)) = parse_event(line) {
                    if event.code == EventCode::UdpSent {
                        self.flags.udp_sent_event = true;
                        self.flags.udp_sent_result = event.udp_sent_result();
                    }
                }

                if self.flags.udp_sent_ok && self.flags.udp_sent_event {
                    let result = self.flags.udp_sent_result;
                    self.flags.reset_udp_sent();
                    let proceed = if config.strict_udp_sent_check {
                        result == Some(UdpSentResult::Success)
                    } else {
                        true
                    };
                    if proceed {
                        Ok(WaitInitParamErxudp)
                    } else {
                        Ok(ReadyCommunication)
                    }
                } else {
                    Ok(WaitInitParamSuccessUdpSend)
                }
            }

            WaitInitParamErxudp => {
                let line = line.unwrap();
                if !line.starts_with("ERXUDP") {
                    return Ok(WaitInitParamErxudp);
                }
                let Ok((_, frame)) = parse_erxudp(line) else {
                    return Ok(WaitInitParamErxudp);
                };
                let expected = self.param.ipv6_address.as_deref().and_then(|s| s.parse::<Ipv6Addr>().ok());
                if expected != Some(frame.sender) {
                    return Ok(WaitInitParamErxudp);
                }
                match echonet::decode_frame(&frame.data) {
                    Ok(decoded) => {
                        for edata in &decoded.edata {
                            if edata.epc == super::EPC_COEFFICIENT && !edata.edt.is_empty() {
                                self.initial_parameters.coefficient = Some(edata.edt[0]);
                            }
                            if edata.epc == super::EPC_CUMULATIVE_ENERGY_UNIT && !edata.edt.is_empty() {
                                self.initial_parameters.cumulative_energy_unit = Some(edata.edt[0]);
                            }
                        }
                        Ok(ReadySmartMeter)
                    }
                    Err(_) => {
                        tracing::warn!(target: "init-state", "{}", AbsorbedError::DecodeFailure);
                        Ok(ReadyCommunication)
                    }
                }
            }

            ReadySmartMeter => Ok(ReadySmartMeter),
        }
    }
}

impl Default for InitMachine {
    fn default() -> Self {
        Self::new()
    }
}
