//! Serial frame format in the ESP32 config-word layout.
//!
//! ```text
//! bits 0-1  parity      0 none, 2 even, 3 odd
//! bits 2-3  data bits   value + 5
//! bits 4-5  stop bits   1 one, 3 two
//! ```
//!
//! The upper bits carry the fixed `0x8000000` marker of the Arduino
//! constants and are ignored when decoding.

use tokio_serial::{DataBits, Parity, StopBits};

pub const SERIAL_5N1: u32 = 0x8000010;
pub const SERIAL_6N1: u32 = 0x8000014;
pub const SERIAL_7N1: u32 = 0x8000018;
pub const SERIAL_8N1: u32 = 0x800001c;
pub const SERIAL_7E1: u32 = 0x800001a;
pub const SERIAL_8E1: u32 = 0x800001e;
pub const SERIAL_7O1: u32 = 0x800001b;
pub const SERIAL_8O1: u32 = 0x800001f;
pub const SERIAL_8N2: u32 = 0x800003c;
pub const SERIAL_8E2: u32 = 0x800003e;
pub const SERIAL_8O2: u32 = 0x800003f;

/// Decoded line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFormat {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialFormat {
    /// Decode a config word. Returns `None` for encodings the host side
    /// cannot express (parity value 1, 1.5 stop bits, stop field 0).
    pub fn from_config(config: u32) -> Option<Self> {
        let parity = match config & 0x3 {
            0 => Parity::None,
            2 => Parity::Even,
            3 => Parity::Odd,
            _ => return None,
        };
        let data_bits = match (config >> 2) & 0x3 {
            0 => DataBits::Five,
            1 => DataBits::Six,
            2 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = match (config >> 4) & 0x3 {
            1 => StopBits::One,
            3 => StopBits::Two,
            _ => return None,
        };
        Some(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl Default for SerialFormat {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(SERIAL_8N1, DataBits::Eight, Parity::None, StopBits::One; "8n1")]
    #[test_case(SERIAL_5N1, DataBits::Five, Parity::None, StopBits::One; "5n1")]
    #[test_case(SERIAL_7E1, DataBits::Seven, Parity::Even, StopBits::One; "7e1")]
    #[test_case(SERIAL_8O1, DataBits::Eight, Parity::Odd, StopBits::One; "8o1")]
    #[test_case(SERIAL_8E2, DataBits::Eight, Parity::Even, StopBits::Two; "8e2")]
    fn test_decode(config: u32, data_bits: DataBits, parity: Parity, stop_bits: StopBits) {
        assert_eq!(
            SerialFormat::from_config(config),
            Some(SerialFormat {
                data_bits,
                parity,
                stop_bits
            })
        );
    }

    #[test]
    fn test_default_is_8n1() {
        assert_eq!(SerialFormat::from_config(SERIAL_8N1), Some(SerialFormat::default()));
    }

    #[test]
    fn test_unrepresentable_encodings() {
        // parity 1 is reserved
        assert_eq!(SerialFormat::from_config(0x800001d), None);
        // 1.5 stop bits
        assert_eq!(SerialFormat::from_config(0x800002c), None);
        assert_eq!(SerialFormat::from_config(0), None);
    }
}
