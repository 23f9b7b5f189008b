//! Result tables and capture files.

pub mod spreadsheet;
pub mod waveform;

pub use spreadsheet::{add_to_spreadsheet, read_spreadsheet, write_spreadsheet, Table};
pub use waveform::{decimation_factor, time_prefix, Decimation, WaveformTable};
