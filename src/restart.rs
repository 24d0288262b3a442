//! Binary restart blocks for the settings and the coefficient table.
//!
//! The layout is fixed and little-endian, and a compatible reader must
//! consume exactly the bytes a writer produced:
//!
//! * settings block: temperature (f64), global cutoff (f64), seed (i32),
//!   mixing-rule selector (i32);
//! * coefficient block, one record per unordered type pair in row-major
//!   order (`i <= j`): a set flag (i32, 0 or 1), followed only when set by
//!   the conservative coefficient, the friction coefficient, and the cutoff
//!   (three f64). Unset pairs contribute no coefficient bytes.
//!
//! The derived noise strength is never persisted; it is re-derived from the
//! friction coefficient and the temperature when the table is finalized.
//! Distributing the decoded scalars to other partitions is the caller's
//! business, via [`crate::comm::Collective`].

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::params::{MixRule, PairTableBuilder, Settings};

/// Errors of the restart codec. All are terminal: a malformed block means the
/// stream and the expected layout disagree, and nothing after the first bad
/// field can be trusted.
#[derive(Error, Debug)]
pub enum RestartError {
    /// Wraps a standard I/O error, including truncated streams.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The set flag of a coefficient record was neither 0 nor 1.
    #[error("Invalid set flag {0} in the coefficient block.")]
    InvalidFlag(i32),
    /// The mixing-rule selector in the settings block is unknown.
    #[error("Invalid mixing-rule selector {0} in the settings block.")]
    InvalidMixRule(i32),
    /// A decoded settings scalar is outside its legal range.
    #[error("Settings block rejected: {0}")]
    InvalidSettings(String),
}

fn write_f64<W: Write>(writer: &mut W, value: f64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn write_i32<W: Write>(writer: &mut W, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn read_f64<R: Read>(reader: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Writes the settings block.
pub fn write_settings<W: Write>(settings: &Settings, writer: &mut W) -> Result<(), RestartError> {
    write_f64(writer, settings.temperature)?;
    write_f64(writer, settings.cut_global)?;
    write_i32(writer, settings.seed)?;
    write_i32(writer, settings.mix.as_i32())?;
    Ok(())
}

/// Reads and validates the settings block.
pub fn read_settings<R: Read>(reader: &mut R) -> Result<Settings, RestartError> {
    let temperature = read_f64(reader)?;
    let cut_global = read_f64(reader)?;
    let seed = read_i32(reader)?;
    let mix_raw = read_i32(reader)?;
    let mix = MixRule::from_i32(mix_raw).ok_or(RestartError::InvalidMixRule(mix_raw))?;
    let mut settings = Settings::new(temperature, cut_global, seed)
        .map_err(|e| RestartError::InvalidSettings(e.to_string()))?;
    settings.mix = mix;
    Ok(settings)
}

/// Writes the coefficient block of `builder`.
pub fn write_pair_table<W: Write>(
    builder: &PairTableBuilder,
    writer: &mut W,
) -> Result<(), RestartError> {
    let n = builder.n_types();
    for i in 0..n {
        for j in i..n {
            match builder.raw(i, j) {
                Some(raw) => {
                    write_i32(writer, 1)?;
                    write_f64(writer, raw.a0)?;
                    write_f64(writer, raw.gamma)?;
                    write_f64(writer, raw.cut)?;
                }
                None => write_i32(writer, 0)?,
            }
        }
    }
    Ok(())
}

/// Reads a coefficient block over `n_types` types. The type count is owned
/// by the external engine and must match what the writer saw.
pub fn read_pair_table<R: Read>(
    n_types: usize,
    reader: &mut R,
) -> Result<PairTableBuilder, RestartError> {
    let mut builder = PairTableBuilder::new(n_types);
    for i in 0..n_types {
        for j in i..n_types {
            match read_i32(reader)? {
                0 => {}
                1 => {
                    let a0 = read_f64(reader)?;
                    let gamma = read_f64(reader)?;
                    let cut = read_f64(reader)?;
                    builder
                        .set(i, j, a0, gamma, cut)
                        .map_err(|e| RestartError::InvalidSettings(e.to_string()))?;
                }
                flag => return Err(RestartError::InvalidFlag(flag)),
            }
        }
    }
    Ok(builder)
}

/// Writes the full restart payload: settings block, then coefficient block.
pub fn write_restart<W: Write>(
    settings: &Settings,
    builder: &PairTableBuilder,
    writer: &mut W,
) -> Result<(), RestartError> {
    write_settings(settings, writer)?;
    write_pair_table(builder, writer)
}

/// Reads the full restart payload written by [`write_restart`].
pub fn read_restart<R: Read>(
    n_types: usize,
    reader: &mut R,
) -> Result<(Settings, PairTableBuilder), RestartError> {
    let settings = read_settings(reader)?;
    let builder = read_pair_table(n_types, reader)?;
    Ok((settings, builder))
}
