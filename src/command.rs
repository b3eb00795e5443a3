// コマンド語彙とコマンド書き込み
// SPDX-License-Identifier: MPL-2.0
//
//! 固定の語彙表からコマンドを組み立て、CRLF終端の1行として書き込む。
use crate::serial::SerialPort;

/// `SKSREG` が操作する仮想レジスタ番号。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualRegister {
    EchoBack = 0xFE,
    ChannelNumber = 0x02,
    PanId = 0x03,
}

/// モジュールへ送る1コマンド。書式化は `write` が一手に引き受ける。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkCommand {
    /// `SKSREG S<reg> <arg>`
    SetRegister(VirtualRegister, String),
    /// `SKSREG SFE 0`
    DisableEcho,
    /// `SKVER`
    GetSkStackVersion,
    /// `SKTERM`
    TerminateSkStack,
    /// `SKINFO`
    GetSkInfo,
    /// `SKLL64 <mac64hex>`
    ConvertMac2Ipv6(String),
    /// `SKSETPWD C <password>`
    SetSkStackPassword(String),
    /// `SKSETRBID <id>`
    SetSkStackId(String),
    /// `SKJOIN <ipv6>`
    JoinSkStack(String),
    /// `SKSCAN <mode> <channel_mask:08X> <duration:X>`
    ScanSkStack {
        mode_digit: u8,
        channel_mask: u32,
        duration: u8,
    },
    /// `SKRESET`
    ResetSkStack,
    /// `ROPT`
    ReadOpt,
    /// `WOPT <mode:02X>`
    WriteOpt(u8),
}

impl SkCommand {
    /// このコマンドが実際にシリアルポートへ送る文字列(CRLFは含まない)。
    pub fn render(&self) -> String {
        match self {
            SkCommand::SetRegister(reg, arg) => format!("SKSREG S{:X} {}", *reg as u8, arg),
            SkCommand::DisableEcho => "SKSREG SFE 0".to_string(),
            SkCommand::GetSkStackVersion => "SKVER".to_string(),
            SkCommand::TerminateSkStack => "SKTERM".to_string(),
            SkCommand::GetSkInfo => "SKINFO".to_string(),
            SkCommand::ConvertMac2Ipv6(mac) => format!("SKLL64 {}", mac),
            SkCommand::SetSkStackPassword(pw) => format!("SKSETPWD C {}", pw),
            SkCommand::SetSkStackId(id) => format!("SKSETRBID {}", id),
            SkCommand::JoinSkStack(addr) => format!("SKJOIN {}", addr),
            SkCommand::ScanSkStack {
                mode_digit,
                channel_mask,
                duration,
            } => format!("SKSCAN {} {:08X} {:X}", mode_digit, channel_mask, duration),
            SkCommand::ResetSkStack => "SKRESET".to_string(),
            SkCommand::ReadOpt => "ROPT".to_string(),
            SkCommand::WriteOpt(mode) => format!("WOPT {:02X}", mode),
        }
    }
}

/// コマンドをCRLF終端で書き出し、同期的にフラッシュする。
pub struct CommandWriter<'a> {
    port: &'a mut dyn SerialPort,
}

impl<'a> CommandWriter<'a> {
    pub fn new(port: &'a mut dyn SerialPort) -> Self {
        CommandWriter { port }
    }

    pub fn write(&mut self, command: &SkCommand) -> std::io::Result<()> {
        let line = command.render();
        tracing::debug!(target: "sk-command", "{}", line);
        self.port.write_line(&line)?;
        self.port.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renders_set_channel_register() {
        let cmd = SkCommand::SetRegister(VirtualRegister::ChannelNumber, "21".to_string());
        assert_eq!(cmd.render(), "SKSREG S2 21");
    }

    #[test]
    fn renders_scan_command() {
        let cmd = SkCommand::ScanSkStack {
            mode_digit: 2,
            channel_mask: 0xFFFF_FFFF,
            duration: 3,
        };
        assert_eq!(cmd.render(), "SKSCAN 2 FFFFFFFF 3");
    }

    #[test]
    fn renders_password_and_id() {
        assert_eq!(
            SkCommand::SetSkStackPassword("ABCDEFGHIJKL".to_string()).render(),
            "SKSETPWD C ABCDEFGHIJKL"
        );
        assert_eq!(
            SkCommand::SetSkStackId("X".repeat(32)).render(),
            format!("SKSETRBID {}", "X".repeat(32))
        );
    }

    #[test]
    fn write_line_appends_crlf_and_flushes() {
        use crate::serial::FakeSerialPort;
        let mut port = FakeSerialPort::new();
        {
            let mut writer = CommandWriter::new(&mut port);
            writer.write(&SkCommand::GetSkStackVersion).unwrap();
        }
        assert_eq!(port.written, vec!["SKVER".to_string(), "\r\n".to_string()]);
    }
}
