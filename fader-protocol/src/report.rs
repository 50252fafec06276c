//! HID configuration report codec
//!
//! Both directions use the same 64-byte shape: a little-endian command word
//! followed by fifteen little-endian parameter words.

use heapless::Vec;

/// Report size in bytes
pub const REPORT_SIZE: usize = 64;

/// Number of parameter words after the command
pub const REPORT_PARAMETERS: usize = 15;

/// Errors that can occur while decoding a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportError {
    /// Buffer is not exactly one report long
    WrongLength,
}

/// A configuration request or response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Report {
    /// Command word, echoed in the response
    pub command: u32,
    /// Command-specific parameter words
    pub parameters: [u32; REPORT_PARAMETERS],
}

impl Report {
    /// Create a report with all parameters zeroed
    pub fn new(command: u32) -> Self {
        Self {
            command,
            parameters: [0; REPORT_PARAMETERS],
        }
    }

    /// Decode a report received from the host
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReportError> {
        if bytes.len() != REPORT_SIZE {
            return Err(ReportError::WrongLength);
        }

        let word = |i: usize| {
            let at = i * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        let mut report = Self::new(word(0));
        for (i, parameter) in report.parameters.iter_mut().enumerate() {
            *parameter = word(i + 1);
        }
        Ok(report)
    }

    /// Encode this report for sending
    pub fn to_bytes(&self) -> [u8; REPORT_SIZE] {
        let mut bytes = [0u8; REPORT_SIZE];
        bytes[..4].copy_from_slice(&self.command.to_le_bytes());
        for (i, parameter) in self.parameters.iter().enumerate() {
            let at = (i + 1) * 4;
            bytes[at..at + 4].copy_from_slice(&parameter.to_le_bytes());
        }
        bytes
    }

    /// Encode this report into a heapless Vec
    pub fn encode_to_vec(&self) -> Vec<u8, REPORT_SIZE> {
        let mut vec = Vec::new();
        // Capacity is exactly one report
        let _ = vec.extend_from_slice(&self.to_bytes());
        vec
    }

    /// Store a signed status code in parameter word `index`
    pub fn set_status(&mut self, index: usize, code: i32) {
        self.parameters[index] = code as u32;
    }

    /// Read parameter word `index` as a signed status code
    pub fn status(&self, index: usize) -> i32 {
        self.parameters[index] as i32
    }
}
