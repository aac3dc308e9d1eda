use std::path::Path;

use crate::{
    error::{ConfigError, ParameterError},
    parameters::ParameterValues,
};

/// reads a parameter override file. The format is the same as a .env file:
/// one `Key=Value` per line, blank lines and lines starting with # are skipped.
/// values may optionally be surrounded by single or double quotes.
pub fn load_parameter_file<P: AsRef<Path>>(path: P) -> Result<ParameterValues, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_parameter_lines(&contents)?)
}

pub fn parse_parameter_lines(contents: &str) -> Result<ParameterValues, ParameterError> {
    let mut map = ParameterValues::new();
    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, val) = match line.split_once('=') {
            Some((key, val)) if !key.trim().is_empty() => (key.trim(), val.trim()),
            _ => {
                return Err(ParameterError::Malformed {
                    line: i + 1,
                    content: line.to_string(),
                })
            }
        };
        map.insert(key.to_string(), unquote(val).to_string());
    }
    Ok(map)
}

fn unquote(val: &str) -> &str {
    for quote in ['"', '\''] {
        if val.len() >= 2 && val.starts_with(quote) && val.ends_with(quote) {
            return &val[1..val.len() - 1];
        }
    }
    val
}
