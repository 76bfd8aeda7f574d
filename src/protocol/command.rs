use thiserror::Error;

/// Receiver-side UDP buffer size; no datagram may exceed it
pub const MAX_DATAGRAM: usize = 512;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

/// First byte of every datagram
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Off = 0,
    Brightness = 1,
    PixelColor = 2,
    FillColor = 3,
    FillPattern = 4,
    Rainbow = 5,
    RainbowCycle = 6,
    TheaterChase = 7,
    HolidayRotation = 8,
    ResetInfo = 253,
    Uptime = 254,
    Readback = 255,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("fill_pattern needs at least one color")]
    EmptyPattern,
    #[error("fill_pattern carries {0} colors but the count field holds at most 255")]
    PatternTooLong(usize),
    #[error("encoded command is {0} bytes, receiver accepts at most 512")]
    DatagramTooLarge(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Off,
    Brightness(u8),
    PixelColor { offset: u8, color: Rgb },
    FillColor(Rgb),
    /// Colors repeated along the strip by the receiver
    FillPattern(Vec<Rgb>),
    TheaterChase { repeat: bool, color: Rgb },
    /// Without a delay the receiver uses its built-in 20ms step
    Rainbow { repeat: bool, delay_ms: Option<u16> },
    RainbowCycle { repeat: bool },
    HolidayRotation { repeat: bool },
    Readback,
    ResetInfo,
    /// Replied with the controller uptime in milliseconds as decimal text
    Uptime,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Off => Opcode::Off,
            Command::Brightness(_) => Opcode::Brightness,
            Command::PixelColor { .. } => Opcode::PixelColor,
            Command::FillColor(_) => Opcode::FillColor,
            Command::FillPattern(_) => Opcode::FillPattern,
            Command::TheaterChase { .. } => Opcode::TheaterChase,
            Command::Rainbow { .. } => Opcode::Rainbow,
            Command::RainbowCycle { .. } => Opcode::RainbowCycle,
            Command::HolidayRotation { .. } => Opcode::HolidayRotation,
            Command::Readback => Opcode::Readback,
            Command::ResetInfo => Opcode::ResetInfo,
            Command::Uptime => Opcode::Uptime,
        }
    }

    /// Readback, reset_info and uptime are answered with a single datagram
    pub fn expects_reply(&self) -> bool {
        matches!(self, Command::Readback | Command::ResetInfo | Command::Uptime)
    }

    /// Byte layout of the datagram. The fill_pattern color count is a
    /// single byte.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![self.opcode() as u8];
        match self {
            Command::Off | Command::Readback | Command::ResetInfo | Command::Uptime => {}
            Command::Brightness(value) => out.push(*value),
            Command::PixelColor { offset, color } => {
                out.push(*offset);
                out.extend_from_slice(&color.bytes());
            }
            Command::FillColor(color) => out.extend_from_slice(&color.bytes()),
            Command::FillPattern(colors) => {
                if colors.is_empty() {
                    return Err(ProtocolError::EmptyPattern);
                }
                let count = u8::try_from(colors.len())
                    .map_err(|_| ProtocolError::PatternTooLong(colors.len()))?;
                out.reserve(1 + colors.len() * 3);
                out.push(count);
                for color in colors {
                    out.extend_from_slice(&color.bytes());
                }
            }
            Command::TheaterChase { repeat, color } => {
                out.push(*repeat as u8);
                out.extend_from_slice(&color.bytes());
            }
            Command::Rainbow { repeat, delay_ms } => {
                out.push(*repeat as u8);
                if let Some(delay) = delay_ms {
                    out.extend_from_slice(&delay.to_be_bytes());
                }
            }
            Command::RainbowCycle { repeat } | Command::HolidayRotation { repeat } => {
                out.push(*repeat as u8)
            }
        }

        if out.len() > MAX_DATAGRAM {
            return Err(ProtocolError::DatagramTooLarge(out.len()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_pattern_uses_single_byte_count() {
        let cmd = Command::FillPattern(vec![
            Rgb::new(10, 20, 30),
            Rgb::new(40, 50, 60),
            Rgb::new(70, 80, 90),
        ]);
        assert_eq!(
            cmd.encode().unwrap(),
            vec![4, 3, 10, 20, 30, 40, 50, 60, 70, 80, 90]
        );
    }

    #[test]
    fn fixed_layouts() {
        assert_eq!(Command::Off.encode().unwrap(), vec![0]);
        assert_eq!(Command::Brightness(200).encode().unwrap(), vec![1, 200]);
        assert_eq!(
            Command::PixelColor { offset: 105, color: Rgb::new(1, 2, 3) }.encode().unwrap(),
            vec![2, 105, 1, 2, 3]
        );
        assert_eq!(Command::FillColor(Rgb::new(255, 0, 0)).encode().unwrap(), vec![3, 255, 0, 0]);
        assert_eq!(
            Command::TheaterChase { repeat: true, color: Rgb::new(0, 255, 0) }.encode().unwrap(),
            vec![7, 1, 0, 255, 0]
        );
        assert_eq!(Command::RainbowCycle { repeat: true }.encode().unwrap(), vec![6, 1]);
        assert_eq!(Command::HolidayRotation { repeat: false }.encode().unwrap(), vec![8, 0]);
        assert_eq!(Command::Readback.encode().unwrap(), vec![255]);
        assert_eq!(Command::ResetInfo.encode().unwrap(), vec![253]);
        assert_eq!(Command::Uptime.encode().unwrap(), vec![254]);
    }

    #[test]
    fn rainbow_delay_is_big_endian() {
        let cmd = Command::Rainbow { repeat: true, delay_ms: Some(6000) };
        assert_eq!(cmd.encode().unwrap(), vec![5, 1, 0x17, 0x70]);
        let cmd = Command::Rainbow { repeat: false, delay_ms: None };
        assert_eq!(cmd.encode().unwrap(), vec![5, 0]);
    }

    #[test]
    fn oversized_patterns_are_rejected() {
        assert_eq!(
            Command::FillPattern(vec![Rgb::default(); 256]).encode(),
            Err(ProtocolError::PatternTooLong(256))
        );
        assert_eq!(
            Command::FillPattern(vec![Rgb::default(); 171]).encode(),
            Err(ProtocolError::DatagramTooLarge(515))
        );
        assert_eq!(Command::FillPattern(vec![Rgb::default(); 170]).encode().unwrap().len(), 512);
        assert_eq!(Command::FillPattern(Vec::new()).encode(), Err(ProtocolError::EmptyPattern));
    }

    #[test]
    fn only_queries_expect_replies() {
        assert!(Command::Readback.expects_reply());
        assert!(Command::ResetInfo.expects_reply());
        assert!(Command::Uptime.expects_reply());
        assert!(!Command::Off.expects_reply());
    }
}
