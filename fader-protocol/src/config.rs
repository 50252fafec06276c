//! GET/SET parameter requests from the host
//!
//! | Command | Request words           | Response words                       |
//! |---------|-------------------------|--------------------------------------|
//! | 0x00    | -                       | status, segment, used, free, live    |
//! | 0x40    | -, id                   | status, id, value, length            |
//! | 0x80    | -, id, value, length    | status                               |
//!
//! Values travel as one little-endian word, so at most four bytes are moved
//! per request. Any other command answers status 2.

use embedded_storage::nor_flash::NorFlash;
use fader_storage::error::{NvmError, CODE_OK};
use fader_storage::{SegmentId, Storage};

use crate::report::Report;

/// Report the storage state
pub const CMD_STATUS: u32 = 0x00;
/// Read a parameter
pub const CMD_GET_PARAM: u32 = 0x40;
/// Write a parameter
pub const CMD_SET_PARAM: u32 = 0x80;

/// Status answered to a command the device does not know
pub const STATUS_UNKNOWN_COMMAND: i32 = 2;

/// Bytes carried by the value word
pub const VALUE_SIZE: usize = 4;

/// A decoded request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigCommand {
    Status,
    GetParam {
        parameter: u16,
    },
    SetParam {
        parameter: u16,
        value: u32,
        len: usize,
    },
    Unknown(u32),
}

impl ConfigCommand {
    /// Decode the command word and its parameters
    ///
    /// Ids are truncated to 16 bits and SET lengths clamped to the value word.
    pub fn from_report(report: &Report) -> Self {
        match report.command {
            CMD_STATUS => ConfigCommand::Status,
            CMD_GET_PARAM => ConfigCommand::GetParam {
                parameter: report.parameters[1] as u16,
            },
            CMD_SET_PARAM => ConfigCommand::SetParam {
                parameter: report.parameters[1] as u16,
                value: report.parameters[2],
                len: (report.parameters[3] as usize).min(VALUE_SIZE),
            },
            other => ConfigCommand::Unknown(other),
        }
    }
}

/// Answers configuration requests from the parameter store
pub struct ConfigHandler;

impl ConfigHandler {
    /// Execute `request` and build the response
    ///
    /// The response always echoes the command word; every other word not
    /// set by the command is zero.
    pub fn handle<F>(storage: &mut Storage<F>, request: &Report) -> Report
    where
        F: NorFlash<Error = NvmError>,
    {
        let mut response = Report::new(request.command);

        match ConfigCommand::from_report(request) {
            ConfigCommand::Status => match storage.stats() {
                Ok(stats) => {
                    response.set_status(0, CODE_OK);
                    response.parameters[1] = match stats.active {
                        SegmentId::A => 0,
                        SegmentId::B => 1,
                    };
                    response.parameters[2] = stats.used;
                    response.parameters[3] = stats.free;
                    response.parameters[4] = stats.live as u32;
                }
                Err(e) => response.set_status(0, e.code()),
            },
            ConfigCommand::GetParam { parameter } => {
                let mut value = [0u8; VALUE_SIZE];
                response.parameters[1] = parameter as u32;
                match storage.read(parameter, &mut value) {
                    Ok(outcome) => {
                        response.set_status(0, outcome.code());
                        response.parameters[2] = u32::from_le_bytes(value);
                        response.parameters[3] = outcome.len as u32;
                    }
                    Err(e) => response.set_status(0, e.code()),
                }
            }
            ConfigCommand::SetParam {
                parameter,
                value,
                len,
            } => {
                let bytes = value.to_le_bytes();
                let code = match storage.write(parameter, &bytes[..len]) {
                    Ok(()) => CODE_OK,
                    Err(e) => e.code(),
                };
                response.set_status(0, code);
            }
            ConfigCommand::Unknown(_) => response.set_status(0, STATUS_UNKNOWN_COMMAND),
        }

        response
    }
}
