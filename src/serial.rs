// シリアルポート抽象化
// SPDX-License-Identifier: MPL-2.0
//
//! モジュールと交換する生のバイト列の出入り口。`SerialPort` の実装は差し替え
//! 可能で、本番では `serialport` クレートの UART、テストでは `FakeSerialPort`
//! が使われる。
use std::io;
use std::time::Duration;

/// バイト単位の全二重通信路。
pub trait SerialPort {
    /// バッファへ書き込む。戻り値は書き込んだバイト数。
    fn write_bytes(&mut self, buffer: &[u8]) -> io::Result<usize>;

    /// CRLFを付与して1行書き込む。
    fn write_line(&mut self, text: &str) -> io::Result<()> {
        self.write_bytes(text.as_bytes())?;
        self.write_bytes(b"\r\n")?;
        Ok(())
    }

    /// 送信バッファを掃き出す。
    fn flush(&mut self) -> io::Result<()>;

    /// `\n` までを読み込む(`\n` は含まない)。データが無ければブロックする。
    fn read_line_until_lf(&mut self) -> io::Result<String>;

    /// 現在読み出し可能なバイト数。
    fn available(&mut self) -> io::Result<usize>;

    /// 1バイト読み込む。データが無ければ `None`。
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
}

/// `serialport` クレートのUARTを実装として使うアダプタ。
pub struct UartSerialPort {
    port: Box<dyn serialport::SerialPort>,
    linebuf: Vec<u8>,
}

impl UartSerialPort {
    pub fn open(device: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(device, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(50))
            .open()?;
        Ok(UartSerialPort {
            port,
            linebuf: Vec::new(),
        })
    }
}

impl SerialPort for UartSerialPort {
    fn write_bytes(&mut self, buffer: &[u8]) -> io::Result<usize> {
        tracing::trace!(target: "Tx->", "{}", String::from_utf8_lossy(buffer).escape_debug());
        self.port.write(buffer)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn read_line_until_lf(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.linebuf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.linebuf.drain(..=pos).collect();
                line.pop(); // '\n'
                let text = String::from_utf8_lossy(&line).trim_end().to_string();
                tracing::trace!(target: "<-Rx", "{}", text.escape_debug());
                return Ok(text);
            }
            let mut byte = [0u8; 1];
            match self.port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) => self.linebuf.push(byte[0]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn available(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize + self.linebuf.len())
            .map_err(io::Error::from)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if !self.linebuf.is_empty() {
            return Ok(Some(self.linebuf.remove(0)));
        }
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// 台本化された擬似シリアルポート。テストから注入する固定応答の列を1行ずつ
/// 読み出させ、書き込まれたコマンドは記録する。
#[derive(Debug, Default)]
pub struct FakeSerialPort {
    pending_lines: std::collections::VecDeque<String>,
    pub written: Vec<String>,
}

impl FakeSerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// モジュールからの応答として読ませたい行を末尾に積む。
    pub fn push_line(&mut self, line: impl Into<String>) -> &mut Self {
        self.pending_lines.push_back(line.into());
        self
    }

    /// 複数行をまとめて積む。
    pub fn push_lines<I, S>(&mut self, lines: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.push_line(line);
        }
        self
    }
}

impl SerialPort for FakeSerialPort {
    fn write_bytes(&mut self, buffer: &[u8]) -> io::Result<usize> {
        self.written
            .push(String::from_utf8_lossy(buffer).into_owned());
        Ok(buffer.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_line_until_lf(&mut self) -> io::Result<String> {
        self.pending_lines
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no scripted line left"))
    }

    fn available(&mut self) -> io::Result<usize> {
        Ok(if self.pending_lines.is_empty() { 0 } else { 1 })
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fake_serial_replays_scripted_lines_in_order() {
        let mut port = FakeSerialPort::new();
        port.push_line("OK").push_line("FAIL ER04");
        assert_eq!(port.available().unwrap(), 1);
        assert_eq!(port.read_line_until_lf().unwrap(), "OK");
        assert_eq!(port.read_line_until_lf().unwrap(), "FAIL ER04");
        assert_eq!(port.available().unwrap(), 0);
    }

    #[test]
    fn fake_serial_records_writes() {
        let mut port = FakeSerialPort::new();
        port.write_line("SKVER").unwrap();
        assert_eq!(port.written, vec!["SKVER".to_string(), "\r\n".to_string()]);
    }
}
